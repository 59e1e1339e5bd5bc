//! Audio capture and playback
//!
//! Capture feeds the live transcriber with 16 kHz mono 16-bit PCM chunks;
//! playback renders synthesized replies. Devices rarely run at 16 kHz
//! natively, so both directions resample with rubato.

mod capture;
mod playback;

pub use capture::CaptureHandle;
pub use playback::{AudioPlayback, decode_audio, play_encoded};

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Fixed input block size for the FFT resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Streaming mono resampler
///
/// Accepts arbitrarily sized sample runs and emits resampled audio as
/// enough input accumulates. A no-op when input and output rates match.
pub struct MonoResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    /// Create a resampler from `fs_in` to `fs_out`
    ///
    /// # Errors
    ///
    /// Returns error if the rate pair is unsupported
    pub fn new(fs_in: u32, fs_out: u32) -> Result<Self> {
        let inner = if fs_in == fs_out {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(fs_in as usize, fs_out as usize, RESAMPLE_CHUNK, 2, 1)
                    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = &mut self.inner else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= RESAMPLE_CHUNK {
            let block = &self.pending[offset..offset + RESAMPLE_CHUNK];
            let frames = resampler
                .process(&[block], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            out.extend_from_slice(&frames[0]);
            offset += RESAMPLE_CHUNK;
        }
        self.pending.drain(..offset);
        Ok(out)
    }

    /// Flush buffered input, padding the last partial block
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = &mut self.inner else {
            return Ok(std::mem::take(&mut self.pending));
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let remainder = std::mem::take(&mut self.pending);
        let frames = resampler
            .process_partial(Some(&[remainder.as_slice()]), None)
            .map_err(|e| Error::Audio(format!("resample flush failed: {e}")))?;
        Ok(frames.into_iter().next().unwrap_or_default())
    }

    /// Drop any buffered input without emitting it
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }
}

/// Resample a complete mono buffer
///
/// # Errors
///
/// Returns error if resampling fails
pub fn resample_mono(input: &[f32], fs_in: u32, fs_out: u32) -> Result<Vec<f32>> {
    if fs_in == fs_out || input.is_empty() {
        return Ok(input.to_vec());
    }
    let mut resampler = MonoResampler::new(fs_in, fs_out)?;
    let mut out = resampler.push(input)?;
    out.extend(resampler.flush()?);
    Ok(out)
}

/// Convert f32 samples to 16-bit little-endian linear PCM
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Average interleaved frames down to mono
#[must_use]
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_conversion_clamps_and_scales() {
        let bytes = samples_to_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
        // Over-range input clamps rather than wrapping.
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), 32767);
    }

    #[test]
    fn downmix_averages_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix(&samples, 1), samples);
    }

    #[test]
    fn resample_identity_rate_is_passthrough() {
        let input: Vec<f32> = (0..5000).map(|i| (i as f32 / 100.0).sin()).collect();
        let out = resample_mono(&input, 16_000, 16_000).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn resample_halves_length_when_downsampling() {
        let input: Vec<f32> = (0..32_000).map(|i| (i as f32 / 50.0).sin()).collect();
        let out = resample_mono(&input, 32_000, 16_000).unwrap();
        // FFT resampler latency trims a little from the tail; the ratio
        // should still be close to one half.
        let ratio = out.len() as f32 / input.len() as f32;
        assert!((0.4..=0.55).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn streaming_resampler_emits_incrementally() {
        let mut resampler = MonoResampler::new(48_000, 16_000).unwrap();
        let mut total = 0;
        for _ in 0..10 {
            let block = vec![0.25_f32; 4800];
            total += resampler.push(&block).unwrap().len();
        }
        total += resampler.flush().unwrap().len();
        // 48000 input samples at a 3:1 ratio; allow for filter latency.
        assert!((14_000..=16_500).contains(&total), "total was {total}");
    }

    #[test]
    fn discard_pending_clears_buffer() {
        let mut resampler = MonoResampler::new(48_000, 16_000).unwrap();
        resampler.push(&vec![0.5_f32; 100]).unwrap();
        resampler.discard_pending();
        assert!(resampler.flush().unwrap().is_empty());
    }
}
