use std::path::Path;
use std::str::FromStr;

use rustfft::num_complex::Complex32;

use super::{dsp, Decode, Waveform};
use crate::{Error, Result};

/// Selects how a decoded waveform is cleaned up before feature extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum PreprocessMode {
    /// Silence removal, pre-emphasis, peak normalization and resampling.
    Basic,
    /// Spectral subtraction and a wavelet pass before the basic chain.
    Spectral,
}

impl FromStr for PreprocessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "basic" => Ok(Self::Basic),
            "2" | "spectral" => Ok(Self::Spectral),
            _ => Err(Error::InvalidMode {
                role: "preprocess",
                value: s.to_owned(),
            }),
        }
    }
}

/// Turns a raw decoded waveform into a denoised, normalized waveform at the target
/// sample rate.
#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    mode: PreprocessMode,
    sample_rate: u32,
}

impl Preprocessor {
    pub fn new(mode: PreprocessMode, sample_rate: u32) -> Self {
        Self { mode, sample_rate }
    }

    pub fn mode(&self) -> PreprocessMode {
        self.mode
    }

    /// Target sample rate of every waveform this preprocessor returns.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decodes `path` and preprocesses the result. Decode failures are returned as-is.
    pub fn run(&self, decoder: &dyn Decode, path: &Path) -> Result<Waveform> {
        let waveform = decoder.decode(path)?;
        tracing::debug!(
            samples = waveform.len(),
            sample_rate = waveform.sample_rate,
            "preprocessing {}",
            path.display()
        );
        Ok(self.process(waveform))
    }

    pub fn process(&self, waveform: Waveform) -> Waveform {
        let span = tracing::span!(tracing::Level::TRACE, "preprocess");
        let _enter = span.enter();

        let Waveform {
            samples,
            sample_rate,
        } = waveform;

        let samples = match self.mode {
            PreprocessMode::Basic => {
                dsp::remove_silence(&samples, super::SILENCE_TOP_DB, super::FFT_SIZE, super::HOP_SIZE)
            }
            PreprocessMode::Spectral => {
                let denoised = spectral_subtraction(&samples);
                dsp::wavelet_smooth(&denoised)
            }
        };

        let samples = dsp::pre_emphasis(&samples, super::PRE_EMPHASIS);
        let samples = dsp::peak_normalize(&samples);
        let samples = dsp::resample(&samples, sample_rate, self.sample_rate);

        Waveform::new(samples, self.sample_rate)
    }
}

// Subtracts the mean magnitude spectrum, weighted by the signal's mean amplitude, from
// every frame. Phases are kept; magnitudes are floored at zero.
fn spectral_subtraction(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let n_fft = super::FFT_SIZE;
    let noise_est = (samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64) as f32;
    let noise = dsp::mean_magnitude(samples, n_fft, super::HOP_SIZE);

    dsp::stft_filter(samples, n_fft, super::HOP_SIZE, |spectrum: &mut [Complex32]| {
        for (k, c) in spectrum.iter_mut().enumerate() {
            // Mirror the negative frequencies onto their positive bin.
            let bin = k.min(n_fft - k);
            let mag = c.norm();
            if mag <= 0.0 {
                continue;
            }
            let cleaned = (mag - noise_est * noise[bin]).max(0.0);
            *c = *c * (cleaned / mag);
        }
    })
}
