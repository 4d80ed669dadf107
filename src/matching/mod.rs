use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::audio::Features;
use crate::{Error, Result};

mod aggregator;
mod correlation;
mod dtw;
mod exhaustive;
mod multi;
mod plot;

pub use aggregator::RangeAggregator;
pub use correlation::Correlation;
pub use dtw::{dtw_distance, LocalCost};
pub use exhaustive::Exhaustive;
pub use multi::{MultiWindow, MultiWindowDiagnostics};

/// Default matching threshold. Lower distances are better; a candidate matches when its
/// distance is strictly below the threshold.
pub const DEFAULT_THRESHOLD: f64 = 20.0;

/// Minimum length (seconds) of a below-threshold run for the multi-window matchers to
/// report it.
pub const MIN_MATCH_DURATION: f64 = 5.0;

/// Number of equal slices the audio features are split into, one pass per entry.
pub const WINDOW_SPLITS: [usize; 2] = [4, 3];

/// Sliding window step, as a fraction of the window length.
pub const WINDOW_STEP: f64 = 0.2;

/// Point in the video, truncated to whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub frame: usize,
    pub minutes: u64,
    pub seconds: u64,
}

impl Timestamp {
    /// Converts a frame index to `minutes:seconds` at the given frame rate. Sub-second
    /// precision is dropped, not rounded.
    pub fn from_frame(frame: usize, frame_rate: f64) -> Self {
        let total = if frame_rate > 0.0 {
            frame as f64 / frame_rate
        } else {
            0.0
        };
        let minutes = (total / 60.0).floor();
        let seconds = (total - minutes * 60.0).floor();
        Self {
            frame,
            minutes: minutes as u64,
            seconds: seconds as u64,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.minutes, self.seconds)
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Time range in the video where the audio was found. Correlation matches have no
/// defined end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Segment {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl Segment {
    pub fn new(start: usize, end: Option<usize>, frame_rate: f64) -> Self {
        Self {
            start: Timestamp::from_frame(start, frame_rate),
            end: end.map(|e| Timestamp::from_frame(e, frame_rate)),
        }
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "({}, {})", self.start, end),
            None => write!(f, "({}, )", self.start),
        }
    }
}

/// Frame rate and threshold shared by every matcher.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchParams {
    pub frame_rate: f64,
    pub threshold: f64,
}

impl MatchParams {
    pub fn timestamp(&self, frame: usize) -> Timestamp {
        Timestamp::from_frame(frame, self.frame_rate)
    }

    pub(crate) fn segment(&self, start: usize, end: Option<usize>) -> Segment {
        Segment::new(start, end, self.frame_rate)
    }
}

/// Compares video features against audio (pattern) features.
pub trait MatchAlgorithm {
    /// Returns every matched segment; empty means no match. `label` identifies the pair
    /// for any side artifacts the algorithm writes.
    fn run(&self, video: &Features, audio: &Features, label: &str) -> Vec<Segment>;
}

/// Selects one of the four matching algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum MatchMode {
    Exhaustive,
    MultiWindow,
    MultiWindowDiagnostics,
    Correlation,
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "exhaustive" => Ok(Self::Exhaustive),
            "2" | "multi" | "multi-window" => Ok(Self::MultiWindow),
            "3" | "diagnostics" | "multi-window-diagnostics" => Ok(Self::MultiWindowDiagnostics),
            "4" | "correlation" => Ok(Self::Correlation),
            _ => Err(Error::InvalidMode {
                role: "matcher",
                value: s.to_owned(),
            }),
        }
    }
}

/// A matching algorithm selected by [MatchMode].
#[derive(Clone, Debug)]
pub enum Matcher {
    Exhaustive(Exhaustive),
    MultiWindow(MultiWindow),
    MultiWindowDiagnostics(MultiWindowDiagnostics),
    Correlation(Correlation),
}

impl Matcher {
    /// Builds the matcher for `mode`. Diagnostic images go to the working directory
    /// unless [Matcher::with_plot_dir] says otherwise.
    pub fn new(mode: MatchMode, frame_rate: f64, threshold: f64) -> Self {
        let params = MatchParams {
            frame_rate,
            threshold,
        };
        match mode {
            MatchMode::Exhaustive => Self::Exhaustive(Exhaustive::new(params)),
            MatchMode::MultiWindow => Self::MultiWindow(MultiWindow::new(params)),
            MatchMode::MultiWindowDiagnostics => {
                Self::MultiWindowDiagnostics(MultiWindowDiagnostics::new(params, PathBuf::from(".")))
            }
            MatchMode::Correlation => Self::Correlation(Correlation::new(params)),
        }
    }

    /// Returns a new [Matcher] that writes diagnostic images to `plot_dir`. Only the
    /// diagnostics variant writes images.
    pub fn with_plot_dir(self, plot_dir: impl Into<PathBuf>) -> Self {
        match self {
            Self::MultiWindowDiagnostics(m) => {
                Self::MultiWindowDiagnostics(m.with_plot_dir(plot_dir.into()))
            }
            other => other,
        }
    }

    pub fn mode(&self) -> MatchMode {
        match self {
            Self::Exhaustive(_) => MatchMode::Exhaustive,
            Self::MultiWindow(_) => MatchMode::MultiWindow,
            Self::MultiWindowDiagnostics(_) => MatchMode::MultiWindowDiagnostics,
            Self::Correlation(_) => MatchMode::Correlation,
        }
    }

    pub fn run(&self, video: &Features, audio: &Features, label: &str) -> Vec<Segment> {
        let span = tracing::span!(tracing::Level::TRACE, "match");
        let _enter = span.enter();

        tracing::debug!(
            mode = ?self.mode(),
            video_frames = video.frames(),
            audio_frames = audio.frames(),
            channels = video.channels(),
            "starting match"
        );

        match self {
            Self::Exhaustive(m) => m.run(video, audio, label),
            Self::MultiWindow(m) => m.run(video, audio, label),
            Self::MultiWindowDiagnostics(m) => m.run(video, audio, label),
            Self::Correlation(m) => m.run(video, audio, label),
        }
    }
}
