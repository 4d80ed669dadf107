use super::dtw::{dtw_distance, LocalCost};
use super::{MatchAlgorithm, MatchParams, Segment};
use crate::audio::Features;

/// Naive baseline: aligns the whole audio against every window of the same length in the
/// video and keeps the best one.
///
/// This costs one full DTW per video offset, so it is only usable on short videos.
#[derive(Clone, Debug)]
pub struct Exhaustive {
    params: MatchParams,
}

impl Exhaustive {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    /// Returns the smallest DTW distance over all offsets, along with the offset (frame).
    /// `None` if the audio is empty or longer than the video.
    pub fn min_distance(&self, video: &Features, audio: &Features) -> Option<(f64, usize)> {
        let video = video.frame_vectors();
        let audio = audio.frame_vectors();
        if audio.is_empty() || video.len() < audio.len() {
            return None;
        }

        let len = audio.len();
        let mut best: Option<(f64, usize)> = None;
        for start in 0..=video.len() - len {
            let distance = dtw_distance(&video[start..start + len], &audio, LocalCost::Euclidean);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, start));
            }
        }
        best
    }
}

impl MatchAlgorithm for Exhaustive {
    fn run(&self, video: &Features, audio: &Features, _label: &str) -> Vec<Segment> {
        let Some((distance, start)) = self.min_distance(video, audio) else {
            return Vec::new();
        };

        tracing::debug!(distance, start, "best exhaustive alignment");

        if distance < self.params.threshold {
            vec![self.params.segment(start, Some(start + audio.frames()))]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array2;

    use super::*;

    // Two-channel features whose values follow `f(frame)`.
    fn features(frames: usize, f: impl Fn(usize) -> f32) -> Features {
        let matrix = Array2::from_shape_fn((2, frames), |(c, t)| f(t) * (c + 1) as f32);
        Features::new(matrix, 4.0)
    }

    fn exhaustive(threshold: f64) -> Exhaustive {
        Exhaustive::new(MatchParams {
            frame_rate: 4.0,
            threshold,
        })
    }

    #[test]
    fn test_finds_embedded_clip() {
        let video = features(80, |t| t as f32 * 0.5);
        let audio = features(20, |t| (t + 30) as f32 * 0.5);
        let m = exhaustive(1.0);
        let (distance, start) = m.min_distance(&video, &audio).unwrap();
        assert_eq!(distance, 0.0);
        assert_eq!(start, 30);

        let segments = m.run(&video, &audio, "clip");
        assert_eq!(segments, vec![Segment::new(30, Some(50), 4.0)]);
    }

    #[test]
    fn test_audio_longer_than_video() {
        let video = features(10, |t| t as f32);
        let audio = features(11, |t| t as f32);
        assert!(exhaustive(1e9).run(&video, &audio, "long").is_empty());
    }

    #[test]
    fn test_threshold_monotonicity() {
        let video = features(40, |t| ((t * 5) % 11) as f32);
        let audios = [
            features(8, |t| (((t + 3) * 5) % 11) as f32),
            features(8, |t| ((t * 3) % 7) as f32),
            features(8, |t| t as f32 * 0.5),
        ];
        let thresholds = [0.0, 0.5, 5.0, 20.0, 50.0, 200.0, 1e6];

        for audio in &audios {
            let matched: Vec<bool> = thresholds
                .iter()
                .map(|&th| !exhaustive(th).run(&video, audio, "pair").is_empty())
                .collect();
            // Once matched at some threshold, every larger threshold matches too.
            for w in matched.windows(2) {
                assert!(!w[0] || w[1], "{:?}", matched);
            }
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let video = features(10, |t| t as f32);
        let audio = features(4, |t| (t + 2) as f32);
        assert!(exhaustive(0.0).run(&video, &audio, "strict").is_empty());
        assert_eq!(exhaustive(1e-9).run(&video, &audio, "strict").len(), 1);
    }
}
