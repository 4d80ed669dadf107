mod data;
mod decoder;
mod dsp;
mod feature;
mod preprocess;

pub use data::{Features, Waveform};
pub use decoder::{Decode, FfmpegDecoder};
pub use feature::{FeatureExtractor, FeatureMode};
pub use preprocess::{PreprocessMode, Preprocessor};

/// Default target sample rate (Hz) that every waveform is resampled to.
///
/// Larger values are slightly more accurate but make feature extraction and matching
/// significantly slower.
pub const DEFAULT_SAMPLE_RATE: u32 = 2048;

/// Number of samples between two successive feature frames.
///
/// This is shared by every feature extractor so that feature matrices from different
/// sources stay time-comparable: the frame rate is always `sample_rate / HOP_SIZE`.
pub const HOP_SIZE: usize = 512;

/// FFT size used for all short-time transforms.
pub const FFT_SIZE: usize = 2048;

/// Pre-emphasis filter coefficient.
pub const PRE_EMPHASIS: f32 = 0.97;

/// Frames quieter than this (relative to the loudest frame) are dropped by the
/// basic preprocessor.
pub const SILENCE_TOP_DB: f32 = 20.0;
