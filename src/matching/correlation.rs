use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::{MatchAlgorithm, MatchParams, Segment};
use crate::audio::Features;

/// Frequency-domain cross-correlation matcher.
///
/// Each channel is correlated independently after zero-padding both sequences to the
/// same length. The offset reported is the one from the channel with the single
/// strongest peak, while the confidence test uses the sum of every channel's peak.
/// A match has a start but no defined end.
#[derive(Clone, Debug)]
pub struct Correlation {
    params: MatchParams,
}

/// Result of correlating every channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrelationPeak {
    /// Offset (frame) of the strongest single-channel peak.
    pub offset: usize,
    /// Sum of the peak magnitudes over all channels.
    pub total_score: f64,
    /// Mean absolute value of the padded video features.
    pub baseline: f64,
}

impl Correlation {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    /// Correlates `video` against `audio`, channel by channel. `None` if either has no
    /// frames or they disagree on the channel count.
    pub fn peak(&self, video: &Features, audio: &Features) -> Option<CorrelationPeak> {
        if video.is_empty() || audio.is_empty() || video.channels() != audio.channels() {
            return None;
        }

        let len = video.frames().max(audio.frames());
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(len);
        let ifft = planner.plan_fft_inverse(len);

        let mut total_score = 0.0;
        let mut max_score = f64::NEG_INFINITY;
        let mut offset = 0;
        let mut abs_sum = 0.0;

        for (v, a) in video.matrix.rows().into_iter().zip(audio.matrix.rows()) {
            let mut data = padded(v.iter(), len);
            let mut pattern = padded(a.iter(), len);
            abs_sum += data.iter().map(|c| c.re.abs()).sum::<f64>();

            fft.process(&mut data);
            fft.process(&mut pattern);

            let mut cross: Vec<Complex<f64>> = data
                .iter()
                .zip(&pattern)
                .map(|(d, p)| d * p.conj())
                .collect();
            ifft.process(&mut cross);

            // rustfft leaves the inverse unnormalized.
            let (loc, score) = cross
                .iter()
                .map(|c| c.norm() / len as f64)
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, s)| {
                    if s > best.1 {
                        (i, s)
                    } else {
                        best
                    }
                });

            if score > max_score {
                max_score = score;
                offset = loc;
            }
            total_score += score;
        }

        Some(CorrelationPeak {
            offset,
            total_score,
            baseline: abs_sum / (len * video.channels()) as f64,
        })
    }
}

fn padded<'a>(values: impl Iterator<Item = &'a f32>, len: usize) -> Vec<Complex<f64>> {
    let mut out: Vec<Complex<f64>> = values.map(|&v| Complex::new(v as f64, 0.0)).collect();
    out.resize(len, Complex::new(0.0, 0.0));
    out
}

impl MatchAlgorithm for Correlation {
    fn run(&self, video: &Features, audio: &Features, _label: &str) -> Vec<Segment> {
        let Some(peak) = self.peak(video, audio) else {
            return Vec::new();
        };

        tracing::debug!(
            offset = peak.offset,
            total_score = peak.total_score,
            baseline = peak.baseline,
            "correlation peak"
        );

        if peak.total_score > peak.baseline {
            vec![self.params.segment(peak.offset, None)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use ndarray::{s, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    const PARAMS: MatchParams = MatchParams {
        frame_rate: 4.0,
        threshold: 20.0,
    };

    #[test]
    fn test_finds_offset() {
        let mut rng = StdRng::seed_from_u64(7);
        let video = Array2::from_shape_fn((3, 128), |_| rng.gen_range(-1.0_f32..1.0));
        let audio = video.slice(s![.., 40..72]).to_owned();
        let (video, audio) = (Features::new(video, 4.0), Features::new(audio, 4.0));
        let m = Correlation::new(PARAMS);

        let peak = m.peak(&video, &audio).unwrap();
        assert_eq!(peak.offset, 40);
        assert!(peak.total_score > peak.baseline);
        assert_eq!(m.run(&video, &audio, "pair"), vec![Segment::new(40, None, 4.0)]);
    }

    #[test]
    fn test_offset_from_strongest_channel() {
        // Impulses: one channel peaks at frame 10 with 3.0, the other at 30 with 1.0.
        // Try both channel orders so neither the first nor the last channel wins by position.
        for (strong, weak) in [(0, 1), (1, 0)] {
            let mut video = Array2::zeros((2, 64));
            video[[strong, 10]] = 3.0;
            video[[weak, 30]] = 1.0;
            let mut audio = Array2::zeros((2, 16));
            audio[[0, 0]] = 1.0;
            audio[[1, 0]] = 1.0;

            let peak = Correlation::new(PARAMS)
                .peak(&Features::new(video, 4.0), &Features::new(audio, 4.0))
                .unwrap();
            assert_eq!(peak.offset, 10, "strong channel {}", strong);
            assert!((peak.total_score - 4.0).abs() < 1e-9, "{:?}", peak);
            assert!((peak.baseline - 4.0 / 128.0).abs() < 1e-12, "{:?}", peak);
        }
    }

    #[test]
    fn test_silent_video_does_not_match() {
        let video = Features::new(Array2::zeros((2, 64)), 4.0);
        let audio = Features::new(Array2::from_elem((2, 16), 1.0), 4.0);
        assert!(Correlation::new(PARAMS).run(&video, &audio, "silent").is_empty());
    }

    #[test]
    fn test_audio_longer_than_video() {
        let video = Features::new(Array2::from_elem((1, 8), 1.0), 4.0);
        let audio = Features::new(Array2::from_elem((1, 16), 1.0), 4.0);
        let peak = Correlation::new(PARAMS).peak(&video, &audio).unwrap();
        // Video is padded to 16 frames; half of it is zero.
        assert!((peak.baseline - 0.5).abs() < 1e-12);
        assert!(peak.total_score > peak.baseline);
    }

    #[test]
    fn test_empty_inputs() {
        let video = Features::new(Array2::zeros((2, 0)), 4.0);
        let audio = Features::new(Array2::from_elem((2, 4), 1.0), 4.0);
        assert!(Correlation::new(PARAMS).run(&video, &audio, "empty").is_empty());
    }
}
