#[cfg(feature = "rayon")]
extern crate rayon;

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::audio::{
    Decode, FeatureExtractor, FeatureMode, Features, FfmpegDecoder, PreprocessMode,
    Preprocessor, DEFAULT_SAMPLE_RATE,
};
use crate::matching::{MatchMode, Matcher, Segment, DEFAULT_THRESHOLD};
use crate::report::ReportWriter;
use crate::{util, Error, Result};

/// Default fraction of the available cores used for matching.
pub const DEFAULT_CORE_FRACTION: f64 = 0.8;

/// Produces the [Features] for a media file.
pub trait FeatureSource: Sync {
    fn features(&self, path: &Path) -> Result<Features>;
}

/// Decode, preprocess and extract: the standard way to get [Features] for a file.
#[derive(Clone, Debug)]
pub struct FeaturePipeline<D: Decode> {
    decoder: D,
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
}

impl<D: Decode> FeaturePipeline<D> {
    pub fn new(
        decoder: D,
        preprocess_mode: PreprocessMode,
        feature_mode: FeatureMode,
        sample_rate: u32,
    ) -> Self {
        Self {
            decoder,
            preprocessor: Preprocessor::new(preprocess_mode, sample_rate),
            extractor: FeatureExtractor::new(feature_mode),
        }
    }
}

impl<D: Decode> FeatureSource for FeaturePipeline<D> {
    fn features(&self, path: &Path) -> Result<Features> {
        let waveform = self.preprocessor.run(&self.decoder, path)?;
        self.extractor.run(&waveform)
    }
}

/// Result for a single (video, audio) pair that matched.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct MatchRecord {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub segments: Vec<Segment>,
}

impl Display for MatchRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let segments = self
            .segments
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "Video: {}, Audio: {}, Matched segments: [{}]",
            self.video.display(),
            self.audio.display(),
            segments
        )
    }
}

/// A pair that could not be matched, or whose result could not be persisted.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PairFailure {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub reason: String,
}

/// Everything a [MatchRunner::run] produced.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct RunReport {
    pub matches: Vec<MatchRecord>,
    pub failures: Vec<PairFailure>,
}

// Features keyed by path. A path is computed at most once: the lock is held across
// the miss and the fill, and failed computations are not stored.
struct FeatureCache {
    role: &'static str,
    entries: Mutex<HashMap<PathBuf, Arc<Features>>>,
}

impl FeatureCache {
    fn new(role: &'static str) -> Self {
        Self {
            role,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_compute(&self, path: &Path, source: &dyn FeatureSource) -> Result<Arc<Features>> {
        let mut entries = self.entries.lock();
        if let Some(features) = entries.get(path) {
            tracing::debug!("{} already extracted, skipping", path.display());
            return Ok(features.clone());
        }

        tracing::info!("extracting {} features for {}", self.role, path.display());
        let start = Instant::now();
        let features = Arc::new(source.features(path)?);
        tracing::info!(
            frames = features.frames(),
            elapsed = ?start.elapsed(),
            "extracted {} features for {}",
            self.role,
            path.display()
        );

        entries.insert(path.to_owned(), features.clone());
        Ok(features)
    }
}

/// Matches every audio file against every video file.
///
/// Features are computed once per file and shared between all pairs that use it.
/// Pairs run in parallel on a dedicated worker pool. Every match is appended to the
/// video's report in the results directory and returned in a [RunReport]. A pair
/// that fails is logged and recorded without affecting the others.
pub struct MatchRunner {
    videos: Vec<PathBuf>,
    audios: Vec<PathBuf>,
    results_dir: PathBuf,
    plot_dir: Option<PathBuf>,
    sample_rate: u32,
    threshold: f64,
    match_mode: MatchMode,
    preprocess_mode: PreprocessMode,
    feature_mode: FeatureMode,
    core_fraction: f64,
    threading: bool,
    source: Option<Box<dyn FeatureSource>>,
}

impl Default for MatchRunner {
    fn default() -> Self {
        Self {
            videos: Vec::new(),
            audios: Vec::new(),
            results_dir: PathBuf::from("results"),
            plot_dir: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            threshold: DEFAULT_THRESHOLD,
            match_mode: MatchMode::MultiWindow,
            preprocess_mode: PreprocessMode::Spectral,
            feature_mode: FeatureMode::Spectral,
            core_fraction: DEFAULT_CORE_FRACTION,
            threading: true,
            source: None,
        }
    }
}

impl MatchRunner {
    /// Constructs a [MatchRunner] that pairs each of `videos` with each of `audios`.
    pub fn from_files(videos: impl Into<Vec<PathBuf>>, audios: impl Into<Vec<PathBuf>>) -> Self {
        let mut runner = Self::default();
        runner.videos = videos.into();
        runner.audios = audios.into();
        runner
    }

    pub fn videos(&self) -> &[PathBuf] {
        &self.videos
    }

    pub fn audios(&self) -> &[PathBuf] {
        &self.audios
    }

    /// Returns a new [MatchRunner] that writes reports into `results_dir`.
    pub fn with_results_dir(mut self, results_dir: impl Into<PathBuf>) -> Self {
        self.results_dir = results_dir.into();
        self
    }

    /// Returns a new [MatchRunner] that writes diagnostic images into `plot_dir`.
    /// Defaults to the results directory.
    pub fn with_plot_dir(mut self, plot_dir: impl Into<PathBuf>) -> Self {
        self.plot_dir = Some(plot_dir.into());
        self
    }

    /// Returns a new [MatchRunner] with the provided analysis `sample_rate`.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Returns a new [MatchRunner] with the provided match `threshold`.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Returns a new [MatchRunner] with the provided `match_mode`.
    pub fn with_match_mode(mut self, match_mode: MatchMode) -> Self {
        self.match_mode = match_mode;
        self
    }

    /// Returns a new [MatchRunner] with the provided `preprocess_mode`.
    pub fn with_preprocess_mode(mut self, preprocess_mode: PreprocessMode) -> Self {
        self.preprocess_mode = preprocess_mode;
        self
    }

    /// Returns a new [MatchRunner] with the provided `feature_mode`.
    pub fn with_feature_mode(mut self, feature_mode: FeatureMode) -> Self {
        self.feature_mode = feature_mode;
        self
    }

    /// Returns a new [MatchRunner] that uses `core_fraction` of the available cores.
    pub fn with_core_fraction(mut self, core_fraction: f64) -> Self {
        self.core_fraction = core_fraction;
        self
    }

    /// Returns a new [MatchRunner] with threading enabled or disabled. Only has an
    /// effect with the `rayon` feature.
    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    /// Returns a new [MatchRunner] that gets features from `source` instead of decoding
    /// files with FFmpeg. The preprocess and feature modes are then up to `source`.
    pub fn with_feature_source(mut self, source: impl FeatureSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    fn process_pair(
        &self,
        video: &Path,
        audio: &Path,
        source: &dyn FeatureSource,
        video_cache: &FeatureCache,
        audio_cache: &FeatureCache,
    ) -> Result<Option<MatchRecord>> {
        // Each cache lock is released inside get_or_compute, before matching starts.
        let video_features = video_cache.get_or_compute(video, source)?;
        let audio_features = audio_cache.get_or_compute(audio, source)?;

        let plot_dir = self.plot_dir.as_ref().unwrap_or(&self.results_dir);
        let matcher = Matcher::new(self.match_mode, video_features.frame_rate, self.threshold)
            .with_plot_dir(plot_dir);

        let start = Instant::now();
        let segments = matcher.run(
            &video_features,
            &audio_features,
            &util::pair_label(video, audio),
        );
        tracing::debug!(
            elapsed = ?start.elapsed(),
            "matched {} against {}",
            audio.display(),
            video.display()
        );

        if segments.is_empty() {
            return Ok(None);
        }

        Ok(Some(MatchRecord {
            video: video.to_owned(),
            audio: audio.to_owned(),
            segments,
        }))
    }

    /// Runs every (video, audio) pair and blocks until all of them are done.
    pub fn run(&self) -> Result<RunReport> {
        if self.videos.is_empty() || self.audios.is_empty() {
            return Err(Error::MissingPaths);
        }

        std::fs::create_dir_all(&self.results_dir)?;
        if self.match_mode == MatchMode::MultiWindowDiagnostics {
            if let Some(plot_dir) = &self.plot_dir {
                std::fs::create_dir_all(plot_dir)?;
            }
        }

        let default_source;
        let source: &dyn FeatureSource = match &self.source {
            Some(source) => source.as_ref(),
            None => {
                default_source = FeaturePipeline::new(
                    FfmpegDecoder::new(!self.threading),
                    self.preprocess_mode,
                    self.feature_mode,
                    self.sample_rate,
                );
                &default_source
            }
        };

        let mut pairs = Vec::with_capacity(self.videos.len() * self.audios.len());
        for video in &self.videos {
            for audio in &self.audios {
                pairs.push((video.as_path(), audio.as_path()));
            }
        }

        let video_cache = FeatureCache::new("video");
        let audio_cache = FeatureCache::new("audio");
        let reports = ReportWriter::new(&self.results_dir);
        let matches = Mutex::new(Vec::new());
        let failures = Mutex::new(Vec::new());

        let fail = |video: &Path, audio: &Path, reason: String| {
            failures.lock().push(PairFailure {
                video: video.to_owned(),
                audio: audio.to_owned(),
                reason,
            });
        };

        let task = |&(video, audio): &(&Path, &Path)| {
            match self.process_pair(video, audio, source, &video_cache, &audio_cache) {
                Ok(Some(record)) => {
                    tracing::info!(
                        segments = record.segments.len(),
                        "found {} in {}",
                        audio.display(),
                        video.display()
                    );
                    if let Err(e) = reports.append(video, audio, &record.segments) {
                        tracing::error!(
                            "failed to append report for {} & {}: {}",
                            video.display(),
                            audio.display(),
                            e
                        );
                        fail(video, audio, format!("report append failed: {}", e));
                    }
                    matches.lock().push(record);
                }
                Ok(None) => (),
                Err(e) => {
                    tracing::error!(
                        "matching {} & {} failed, skipping: {}",
                        video.display(),
                        audio.display(),
                        e
                    );
                    fail(video, audio, e.to_string());
                }
            }
        };

        if cfg!(feature = "rayon") && self.threading {
            #[cfg(feature = "rayon")]
            {
                let workers = util::worker_count(self.core_fraction);
                tracing::info!("using {} workers for {} pairs", workers, pairs.len());
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()?;
                pool.install(|| pairs.par_iter().for_each(task));
            }
        } else {
            pairs.iter().for_each(task);
        }

        let mut matches = matches.into_inner();
        let mut failures = failures.into_inner();
        matches.sort_by(|a, b| (&a.video, &a.audio).cmp(&(&b.video, &b.audio)));
        failures.sort_by(|a, b| (&a.video, &a.audio).cmp(&(&b.video, &b.audio)));

        Ok(RunReport { matches, failures })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::audio::Waveform;

    // Uniform features for any path, except ones whose name contains "broken".
    #[derive(Default)]
    struct CountingSource {
        calls: Mutex<HashMap<PathBuf, usize>>,
        total: AtomicUsize,
    }

    impl CountingSource {
        fn calls(&self, path: &str) -> usize {
            self.calls.lock().get(Path::new(path)).copied().unwrap_or(0)
        }
    }

    impl FeatureSource for Arc<CountingSource> {
        fn features(&self, path: &Path) -> Result<Features> {
            *self.calls.lock().entry(path.to_owned()).or_default() += 1;
            self.total.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("broken") {
                return Err(Error::EmptyWaveform(path.to_owned()));
            }
            Ok(Features::new(Array2::from_elem((4, 40), 1.0), 4.0))
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_features_computed_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::default());
        let runner = MatchRunner::from_files(
            paths(&["v1.wav", "v2.wav", "v3.wav"]),
            paths(&["a1.wav", "a2.wav", "a3.wav", "a4.wav"]),
        )
        .with_results_dir(dir.path())
        .with_feature_source(source.clone());

        let report = runner.run().unwrap();
        assert_eq!(report.matches.len(), 12);
        assert!(report.failures.is_empty());
        for path in ["v1.wav", "v2.wav", "v3.wav", "a1.wav", "a2.wav", "a3.wav", "a4.wav"] {
            assert_eq!(source.calls(path), 1, "{}", path);
        }
        assert_eq!(source.total.load(Ordering::SeqCst), 7);

        // Uniform features match over the whole 10 second video.
        assert_eq!(
            report.matches[0].to_string(),
            "Video: v1.wav, Audio: a1.wav, Matched segments: [(0:0, 0:10)]"
        );

        let v2 = std::fs::read_to_string(dir.path().join("v2_report.txt")).unwrap();
        assert_eq!(v2.matches("Audio: ").count(), 4);
    }

    #[test]
    fn test_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::default());
        let runner = MatchRunner::from_files(
            paths(&["v1.wav", "broken_video.wav"]),
            paths(&["a1.wav", "broken_audio.wav"]),
        )
        .with_results_dir(dir.path())
        .with_feature_source(source.clone());

        let report = runner.run().unwrap();
        assert_eq!(
            report.matches.iter().map(|m| (&m.video, &m.audio)).collect::<Vec<_>>(),
            vec![(&PathBuf::from("v1.wav"), &PathBuf::from("a1.wav"))]
        );
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().all(|f| f.reason.contains("broken")));

        // Successful extractions are cached; failed ones are retried, not stored.
        assert_eq!(source.calls("v1.wav"), 1);
        assert_eq!(source.calls("a1.wav"), 1);
        assert!(source.calls("broken_video.wav") >= 1);
        assert!(!dir.path().join("broken_video_report.txt").exists());
    }

    #[test]
    fn test_sequential_run_matches_parallel_run() {
        let parallel_dir = tempfile::tempdir().unwrap();
        let sequential_dir = tempfile::tempdir().unwrap();
        let videos = paths(&["v1.wav", "v2.wav"]);
        let audios = paths(&["a1.wav", "broken.wav"]);

        let parallel = MatchRunner::from_files(videos.clone(), audios.clone())
            .with_results_dir(parallel_dir.path())
            .with_feature_source(Arc::new(CountingSource::default()))
            .run()
            .unwrap();
        let sequential = MatchRunner::from_files(videos, audios)
            .with_results_dir(sequential_dir.path())
            .with_threading(false)
            .with_feature_source(Arc::new(CountingSource::default()))
            .run()
            .unwrap();

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_missing_paths() {
        let runner = MatchRunner::from_files(Vec::new(), paths(&["a1.wav"]));
        assert!(matches!(runner.run(), Err(Error::MissingPaths)));
    }

    #[test]
    fn test_report_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the report path makes the append fail.
        std::fs::create_dir(dir.path().join("v1_report.txt")).unwrap();

        let report = MatchRunner::from_files(paths(&["v1.wav"]), paths(&["a1.wav"]))
            .with_results_dir(dir.path())
            .with_feature_source(Arc::new(CountingSource::default()))
            .run()
            .unwrap();

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.starts_with("report append failed"));
    }

    // 20 seconds of a 440 Hz tone; "clip.wav" is seconds 5 to 10 of it.
    struct ToneDecoder;

    impl Decode for ToneDecoder {
        fn decode(&self, path: &Path) -> Result<Waveform> {
            let rate = 8000;
            let tone: Vec<f32> = (0..20 * rate)
                .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
                .collect();
            let samples = if path.ends_with("clip.wav") {
                tone[5 * rate..10 * rate].to_vec()
            } else {
                tone
            };
            Ok(Waveform::new(samples, rate as u32))
        }
    }

    #[test]
    fn test_tone_clip_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FeaturePipeline::new(
            ToneDecoder,
            PreprocessMode::Spectral,
            FeatureMode::Spectral,
            DEFAULT_SAMPLE_RATE,
        );
        let report = MatchRunner::from_files(paths(&["tone.wav"]), paths(&["clip.wav"]))
            .with_results_dir(dir.path())
            .with_feature_source(pipeline)
            .run()
            .unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(report.matches.len(), 1);
        let segments = &report.matches[0].segments;
        assert_eq!(segments.len(), 1);

        // 4 frames per second at 2048 Hz; the clip spans frames 20 to 40.
        let segment = segments[0];
        let end = segment.end.unwrap();
        assert!(segment.start.frame <= 21, "{:?}", segment);
        assert!(end.frame >= 39, "{:?}", segment);

        let contents = std::fs::read_to_string(dir.path().join("tone_report.txt")).unwrap();
        assert!(contents.starts_with("Audio: clip\nMatched segments: [("));
    }

    // 20 seconds of a random melody, one note every half second; "clip.wav" is seconds
    // 10 to 15 of it.
    struct MelodyDecoder;

    impl Decode for MelodyDecoder {
        fn decode(&self, path: &Path) -> Result<Waveform> {
            let rate = 8000;
            let notes = [131.0, 165.0, 196.0, 247.0, 294.0, 349.0, 415.0, 494.0, 587.0, 698.0, 784.0, 880.0];
            let mut rng = StdRng::seed_from_u64(3);
            let mut phase = 0.0_f32;
            let mut freq = notes[0];
            let melody: Vec<f32> = (0..20 * rate)
                .map(|i| {
                    if i % (rate / 2) == 0 {
                        freq = notes[rng.gen_range(0..notes.len())];
                    }
                    phase += 2.0 * std::f32::consts::PI * freq / rate as f32;
                    0.5 * phase.sin()
                })
                .collect();
            let samples = if path.ends_with("clip.wav") {
                melody[10 * rate..15 * rate].to_vec()
            } else {
                melody
            };
            Ok(Waveform::new(samples, rate as u32))
        }
    }

    #[test]
    fn test_melody_clip_is_localized() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FeaturePipeline::new(
            MelodyDecoder,
            PreprocessMode::Spectral,
            FeatureMode::Spectral,
            DEFAULT_SAMPLE_RATE,
        );
        // Only the best offset is ever reported, so the threshold just has to admit it.
        let report = MatchRunner::from_files(paths(&["melody.wav"]), paths(&["clip.wav"]))
            .with_results_dir(dir.path())
            .with_match_mode(MatchMode::Exhaustive)
            .with_threshold(1e9)
            .with_feature_source(pipeline)
            .run()
            .unwrap();

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        let segments = &report.matches[0].segments;
        assert_eq!(segments.len(), 1);

        // 4 frames per second: seconds 10 to 15 are frames 40 to 60 (plus the
        // trailing centered frame).
        let segment = segments[0];
        let end = segment.end.unwrap();
        assert!((39..=41).contains(&segment.start.frame), "{:?}", segment);
        assert!((59..=62).contains(&end.frame), "{:?}", segment);
    }
}
