use std::path::PathBuf;

use super::dtw::{dtw_distance, LocalCost};
use super::{plot, MatchAlgorithm, MatchParams, RangeAggregator, Segment};
use super::{MIN_MATCH_DURATION, WINDOW_SPLITS, WINDOW_STEP};
use crate::audio::Features;

#[cfg(test)]
thread_local! {
    static DTW_CALLS: std::cell::Cell<usize> = std::cell::Cell::new(0);
}

/// Multi-scale sliding-window matcher.
///
/// The audio features are cut into 4 and then 3 equal slices. Each slice is compared
/// against every window of the same length in the video, stepping by a fifth of the
/// window. Window distances are spread over the frames they cover, and the average
/// distance per frame decides which frames match. Long enough runs of matching frames
/// become segments.
#[derive(Clone, Debug)]
pub struct MultiWindow {
    params: MatchParams,
}

impl MultiWindow {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }

    /// Computes the average window distance at every video frame. Frames no window
    /// covers get a ratio of 0.
    pub fn ratios(&self, video: &Features, audio: &Features) -> Vec<f64> {
        let n = video.frames();
        let video = video.frame_vectors();
        let audio = audio.frame_vectors();

        let mut distances = RangeAggregator::new(n);
        let mut coverage = RangeAggregator::new(n);

        for split in WINDOW_SPLITS {
            let window = audio.len() / split;
            if window == 0 || window > n {
                tracing::debug!(split, window, frames = n, "skipping window size");
                continue;
            }
            let step = ((window as f64 * WINDOW_STEP) as usize).max(1);

            for slice in audio.chunks_exact(window).take(split) {
                for (start, distance) in window_distances(&video, slice, step) {
                    distances.update(start, start + window, distance);
                    coverage.update(start, start + window, 1.0);
                }
            }
        }

        (0..n)
            .map(|idx| {
                let count = coverage.get(idx);
                if count > 0.0 {
                    distances.get(idx) / count
                } else {
                    0.0
                }
            })
            .collect()
    }
}

// DTW distance of `slice` against every window of the video starting at a multiple of
// `step`. Runs on the calling thread; pairs are the unit of parallelism.
fn window_distances(video: &[Vec<f32>], slice: &[Vec<f32>], step: usize) -> Vec<(usize, f64)> {
    let window = slice.len();
    (0..=video.len() - window)
        .step_by(step)
        .map(|start| {
            #[cfg(test)]
            DTW_CALLS.with(|c| c.set(c.get() + 1));
            (
                start,
                dtw_distance(&video[start..start + window], slice, LocalCost::Cosine),
            )
        })
        .collect()
}

/// Scans `ratios` for maximal runs of frames below `threshold` and returns the ones
/// lasting at least [MIN_MATCH_DURATION] seconds.
pub(crate) fn segments_from_ratios(ratios: &[f64], params: &MatchParams) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut idx = 0;
    while idx < ratios.len() {
        let start = idx;
        while idx < ratios.len() && ratios[idx] < params.threshold {
            idx += 1;
        }
        let duration = (idx - start) as f64 / params.frame_rate;
        if duration >= MIN_MATCH_DURATION {
            segments.push(params.segment(start, Some(idx)));
        }
        // Either past the end or on a frame at/above the threshold.
        idx += 1;
    }
    segments
}

impl MatchAlgorithm for MultiWindow {
    fn run(&self, video: &Features, audio: &Features, _label: &str) -> Vec<Segment> {
        let ratios = self.ratios(video, audio);
        segments_from_ratios(&ratios, &self.params)
    }
}

/// [MultiWindow] that also draws the per-frame ratio curve against the threshold to
/// `<plot_dir>/<label>.png`. Drawing never changes the returned segments; failures
/// are logged and ignored.
#[derive(Clone, Debug)]
pub struct MultiWindowDiagnostics {
    inner: MultiWindow,
    plot_dir: PathBuf,
}

impl MultiWindowDiagnostics {
    pub fn new(params: MatchParams, plot_dir: PathBuf) -> Self {
        Self {
            inner: MultiWindow::new(params),
            plot_dir,
        }
    }

    pub fn with_plot_dir(mut self, plot_dir: PathBuf) -> Self {
        self.plot_dir = plot_dir;
        self
    }

    pub fn plot_dir(&self) -> &PathBuf {
        &self.plot_dir
    }
}

impl MatchAlgorithm for MultiWindowDiagnostics {
    fn run(&self, video: &Features, audio: &Features, label: &str) -> Vec<Segment> {
        let ratios = self.inner.ratios(video, audio);

        let path = self.plot_dir.join(format!("{}.png", label));
        match plot::render_ratios(&ratios, self.inner.params.threshold, &path) {
            Ok(()) => tracing::debug!("wrote ratio plot to {}", path.display()),
            Err(e) => tracing::warn!("failed to write ratio plot to {}: {}", path.display(), e),
        }

        segments_from_ratios(&ratios, &self.inner.params)
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array2;

    use super::*;

    const PARAMS: MatchParams = MatchParams {
        frame_rate: 4.0,
        threshold: 20.0,
    };

    // Two-channel features rotating by `phase(frame)` radians.
    fn features(frames: usize, phase: impl Fn(usize) -> f32) -> Features {
        let matrix = Array2::from_shape_fn((2, frames), |(c, t)| {
            let p = phase(t);
            if c == 0 {
                p.cos()
            } else {
                p.sin()
            }
        });
        Features::new(matrix, 4.0)
    }

    #[test]
    fn test_min_duration() {
        let run = |len: usize| {
            let mut ratios = vec![50.0; 40];
            for r in &mut ratios[10..10 + len] {
                *r = 1.0;
            }
            segments_from_ratios(&ratios, &PARAMS)
        };

        // 5 seconds at 4 frames per second.
        assert!(run(19).is_empty());
        assert_eq!(run(20), vec![Segment::new(10, Some(30), 4.0)]);
    }

    #[test]
    fn test_separate_runs() {
        let mut ratios = vec![0.0; 60];
        ratios[25] = 20.0;
        let segments = segments_from_ratios(&ratios, &PARAMS);
        insta::assert_snapshot!(
            segments.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" "),
            @"(0:0, 0:6) (0:6, 0:15)"
        );
        assert_eq!(
            segments,
            vec![
                Segment::new(0, Some(25), 4.0),
                Segment::new(26, Some(60), 4.0)
            ]
        );
    }

    #[test]
    fn test_identical_features_match_everywhere() {
        let video = features(80, |_| 0.3);
        let audio = features(24, |_| 0.3);
        let m = MultiWindow::new(PARAMS);

        let ratios = m.ratios(&video, &audio);
        assert_eq!(ratios.len(), 80);
        assert!(ratios.iter().all(|r| r.abs() < 1e-9));
        assert_eq!(
            m.run(&video, &audio, "same"),
            vec![Segment::new(0, Some(80), 4.0)]
        );
    }

    #[test]
    fn test_orthogonal_features_never_match() {
        let video = features(80, |_| 0.0);
        let audio = features(24, |_| std::f32::consts::FRAC_PI_2);
        let m = MultiWindow::new(MatchParams {
            frame_rate: 4.0,
            threshold: 1.0,
        });
        assert!(m.run(&video, &audio, "orthogonal").is_empty());
    }

    #[test]
    fn test_short_video_is_uncovered() {
        // Both window sizes (6 and 8) exceed the video, so every frame stays at 0.
        let video = features(5, |_| 0.0);
        let audio = features(24, |t| t as f32);
        let ratios = MultiWindow::new(PARAMS).ratios(&video, &audio);
        assert_eq!(ratios, vec![0.0; 5]);
    }

    #[test]
    fn test_windows_run_on_calling_thread() {
        let video = features(40, |t| t as f32 * 0.3);
        let audio = features(24, |t| t as f32 * 0.2);

        DTW_CALLS.with(|c| c.set(0));
        MultiWindow::new(PARAMS).ratios(&video, &audio);

        // Windows of 6 (4 slices x 35 starts) and 8 (3 slices x 33 starts), step 1.
        assert_eq!(DTW_CALLS.with(|c| c.get()), 4 * 35 + 3 * 33);
    }

    #[test]
    fn test_diagnostics_do_not_change_output() {
        let dir = tempfile::tempdir().unwrap();
        let video = features(100, |t| (t as f32 * 0.1).sin());
        let audio = features(30, |t| ((t + 40) as f32 * 0.1).sin());

        let plain = MultiWindow::new(PARAMS).run(&video, &audio, "pair");
        let diagnostics = MultiWindowDiagnostics::new(PARAMS, dir.path().to_owned());
        assert_eq!(diagnostics.run(&video, &audio, "pair"), plain);
        assert!(dir.path().join("pair.png").exists());

        // Unwritable plot directory: still the same segments.
        let broken = diagnostics.with_plot_dir(dir.path().join("missing"));
        assert_eq!(broken.run(&video, &audio, "pair"), plain);
    }
}
