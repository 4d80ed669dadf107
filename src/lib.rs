use std::path::PathBuf;

pub mod audio;
pub mod convert;
pub mod matching;
pub mod report;
pub mod runner;
pub mod util;

pub use runner::{FeatureSource, MatchRecord, MatchRunner, PairFailure, RunReport};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid {role} mode: {value:?}")]
    InvalidMode { role: &'static str, value: String },
    #[error("no audio stream found in: {0:?}")]
    NoAudioStream(PathBuf),
    #[error("decoded no samples from: {0:?}")]
    EmptyWaveform(PathBuf),
    #[error("no video or no audio paths provided to runner")]
    MissingPaths,
    #[error("directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("WAV error: {0}")]
    WavError(#[from] hound::Error),
    #[error("feature shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[cfg(feature = "rayon")]
    #[error("thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
