extern crate ffmpeg_next;

use std::path::Path;

use super::Waveform;
use crate::{Error, Result};

/// Turns a media file into a mono [Waveform] at the file's own sample rate.
///
/// Preprocessors only ever see the decoded samples, so anything that can produce a
/// [Waveform] for a path (including synthetic sources in tests) can stand in for FFmpeg.
pub trait Decode: Sync {
    fn decode(&self, path: &Path) -> Result<Waveform>;
}

/// Thin wrapper around the native `FFmpeg` audio decoder.
struct Decoder {
    decoder: ffmpeg_next::codec::decoder::Audio,
}

impl Decoder {
    fn build_threading_config() -> ffmpeg_next::codec::threading::Config {
        let mut config = ffmpeg_next::codec::threading::Config::default();
        config.count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        config.kind = ffmpeg_next::codec::threading::Type::Frame;
        config
    }

    fn from_stream(stream: ffmpeg_next::format::stream::Stream, threaded: bool) -> Result<Self> {
        let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = ctx.decoder();

        if threaded {
            decoder.set_threading(Self::build_threading_config());
        }

        let decoder = decoder.audio()?;

        Ok(Self { decoder })
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::packet::Packet) -> Result<()> {
        Ok(self.decoder.send_packet(packet)?)
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(self.decoder.send_eof()?)
    }

    /// Returns `false` once the decoder needs more input or is fully flushed.
    fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Audio) -> Result<bool> {
        match self.decoder.receive_frame(frame) {
            Ok(()) => Ok(true),
            Err(e) if is_drained(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_drained(e: &ffmpeg_next::Error) -> bool {
    matches!(
        e,
        ffmpeg_next::Error::Eof
            | ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN
            }
    )
}

/// Mono `f32` resampler that rebuilds itself when the decoded frame layout changes
/// mid-stream.
struct MonoResampler {
    resampler: ffmpeg_next::software::resampling::Context,
    rate: u32,
}

impl MonoResampler {
    const FORMAT: ffmpeg_next::format::Sample =
        ffmpeg_next::format::Sample::F32(ffmpeg_next::format::sample::Type::Packed);

    fn new(decoder: &Decoder) -> Result<Self> {
        let rate = decoder.decoder.rate();
        let resampler =
            decoder
                .decoder
                .resampler(Self::FORMAT, ffmpeg_next::ChannelLayout::MONO, rate)?;
        Ok(Self { resampler, rate })
    }

    // Resamples a single decoded frame and appends the mono samples to `out`.
    fn push(&mut self, frame: &ffmpeg_next::frame::Audio, out: &mut Vec<f32>) -> Result<()> {
        let mut resampled = ffmpeg_next::frame::Audio::empty();
        let mut delay = match self.resampler.run(frame, &mut resampled) {
            Ok(v) => v,
            // The input layout changed (e.g., a stream switched channel count), so build a
            // new resampler from this frame and keep using it for the rest of the stream.
            Err(ffmpeg_next::Error::InputChanged) => {
                let mut local = frame.resampler(
                    Self::FORMAT,
                    ffmpeg_next::ChannelLayout::MONO,
                    self.rate,
                )?;
                let delay = local.run(frame, &mut resampled)?;
                self.resampler = local;
                delay
            }
            Err(e) => return Err(e.into()),
        };

        loop {
            // Mono, packed f32: each sample is 4 bytes. `data` is a fixed-size buffer, so
            // only the first `samples() * 4` bytes are meaningful.
            let raw = &resampled.data(0)[..resampled.samples() * 4];

            // SAFETY: the resampler was explicitly configured to output packed f32 samples.
            let (_, samples, _) = unsafe { raw.align_to::<f32>() };
            out.extend_from_slice(samples);

            if delay.is_none() {
                break;
            }
            delay = self.resampler.flush(&mut resampled)?;
        }

        Ok(())
    }
}

/// Decodes the best audio stream of a media file with FFmpeg and downmixes it to mono.
///
/// The samples keep the stream's original sample rate; resampling to the analysis rate
/// is a preprocessing concern.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegDecoder {
    threaded: bool,
}

impl FfmpegDecoder {
    pub fn new(threaded: bool) -> Self {
        Self { threaded }
    }

    fn drain(
        decoder: &mut Decoder,
        resampler: &mut MonoResampler,
        frame: &mut ffmpeg_next::frame::Audio,
        out: &mut Vec<f32>,
    ) -> Result<()> {
        while decoder.receive_frame(frame)? {
            resampler.push(frame, out)?;
        }
        Ok(())
    }
}

impl Decode for FfmpegDecoder {
    fn decode(&self, path: &Path) -> Result<Waveform> {
        let span = tracing::span!(tracing::Level::TRACE, "decode");
        let _enter = span.enter();

        let mut ctx = ffmpeg_next::format::input(&path)?;
        let stream = ctx
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .ok_or_else(|| Error::NoAudioStream(path.to_owned()))?;
        let stream_idx = stream.index();
        let mut decoder = Decoder::from_stream(stream, self.threaded)?;
        let mut resampler = MonoResampler::new(&decoder)?;
        let sample_rate = resampler.rate;

        let mut samples = Vec::new();
        let mut frame = ffmpeg_next::frame::Audio::empty();

        for (s, p) in ctx.packets() {
            if s.index() != stream_idx {
                continue;
            }
            decoder.send_packet(&p)?;
            Self::drain(&mut decoder, &mut resampler, &mut frame, &mut samples)?;
        }

        decoder.send_eof()?;
        Self::drain(&mut decoder, &mut resampler, &mut frame, &mut samples)?;

        if samples.is_empty() {
            return Err(Error::EmptyWaveform(path.to_owned()));
        }

        tracing::debug!(
            samples = samples.len(),
            sample_rate,
            "decoded {}",
            path.display()
        );

        Ok(Waveform::new(samples, sample_rate))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_only_eagain_and_eof_end_a_drain() {
        assert!(is_drained(&ffmpeg_next::Error::Eof));
        assert!(is_drained(&ffmpeg_next::Error::Other {
            errno: ffmpeg_next::error::EAGAIN
        }));

        // Corrupt input must surface instead of silently truncating the waveform.
        assert!(!is_drained(&ffmpeg_next::Error::InvalidData));
        assert!(!is_drained(&ffmpeg_next::Error::Other {
            errno: ffmpeg_next::error::EINVAL
        }));
    }
}
