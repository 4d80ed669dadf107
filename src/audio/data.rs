use ndarray::Array2;

/// Mono audio samples plus the rate they were sampled at.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the waveform, in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Feature matrix for a single source. This is the result of running a
/// [FeatureExtractor](super::FeatureExtractor) on a preprocessed [Waveform].
///
/// The matrix is laid out as `(channels, frames)`. `frame_rate` is always
/// `sample_rate / HOP_SIZE`, so matrices built from different sources at the same
/// sample rate can be compared frame by frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Features {
    pub matrix: Array2<f32>,
    pub frame_rate: f64,
}

impl Features {
    pub fn new(matrix: Array2<f32>, frame_rate: f64) -> Self {
        Self { matrix, frame_rate }
    }

    pub fn channels(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn frames(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Returns the features as a list of per-frame vectors. Matchers walk the
    /// data frame by frame, so this layout avoids strided access in the hot loops.
    pub fn frame_vectors(&self) -> Vec<Vec<f32>> {
        self.matrix
            .columns()
            .into_iter()
            .map(|c| c.to_vec())
            .collect()
    }
}
