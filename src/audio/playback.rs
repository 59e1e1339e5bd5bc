//! Audio playback to the default output device
//!
//! Decodes one complete synthesized buffer (WAV or MP3), resamples it to
//! the device rate, and plays it blocking. Playback speed is applied by
//! resampling: treating the source as if recorded at `rate * speed`
//! shortens (or stretches) the output proportionally. An abort flag lets
//! the session interrupt playback mid-buffer.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::resample_mono;
use crate::tts::AudioFormat;
use crate::{Error, Result};

/// Poll cadence while waiting for playback to finish
const FINISH_POLL: Duration = Duration::from_millis(50);

/// Plays audio to the default output device
pub struct AudioPlayback {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
}

impl AudioPlayback {
    /// Create a new playback instance on the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// The device sample rate playback runs at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play mono samples recorded at `source_rate`, blocking until done
    ///
    /// `speed` shifts tempo (clamped upstream to a sane range); `abort`
    /// stops playback early when set.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be opened
    pub fn play(
        &self,
        samples: &[f32],
        source_rate: u32,
        speed: f32,
        abort: &Arc<AtomicBool>,
    ) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let effective_rate = ((source_rate as f32) * speed).round().max(1.0) as u32;
        let samples = resample_mono(samples, effective_rate, self.sample_rate())?;

        if self.sample_format != SampleFormat::F32 {
            return Err(Error::Audio(format!(
                "unsupported output sample format: {:?}",
                self.sample_format
            )));
        }

        let channels = self.config.channels as usize;
        let total = samples.len();

        let shared = Arc::new(Mutex::new(samples));
        let position = Arc::new(Mutex::new(0_usize));
        let finished = Arc::new(AtomicBool::new(false));

        let cb_samples = Arc::clone(&shared);
        let cb_position = Arc::clone(&position);
        let cb_finished = Arc::clone(&finished);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let samples = cb_samples.lock().unwrap();
                    let mut pos = cb_position.lock().unwrap();

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            let s = samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            cb_finished.store(true, Ordering::SeqCst);
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Wait for completion, the abort flag, or a safety timeout.
        let duration_ms = (total as u64 * 1000) / u64::from(self.sample_rate().max(1));
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = std::time::Instant::now();

        while !finished.load(Ordering::SeqCst) {
            if abort.load(Ordering::SeqCst) {
                tracing::debug!("playback aborted");
                break;
            }
            if start.elapsed() > timeout {
                tracing::warn!("playback timed out");
                break;
            }
            std::thread::sleep(FINISH_POLL);
        }

        drop(stream);
        tracing::debug!(samples = total, "playback complete");
        Ok(())
    }
}

/// Decode an encoded audio buffer into mono f32 samples and its rate
///
/// # Errors
///
/// Returns error if the buffer cannot be decoded
pub fn decode_audio(data: &[u8], format: AudioFormat) -> Result<(Vec<f32>, u32)> {
    match format {
        AudioFormat::Wav => decode_wav(data),
        AudioFormat::Mp3 => decode_mp3(data),
    }
}

/// Decode WAV bytes (16-bit int or 32-bit float, any channel count)
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample != 16 {
                return Err(Error::Audio(format!(
                    "unsupported WAV bit depth: {}",
                    spec.bits_per_sample
                )));
            }
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / 32768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
    };

    let mono = super::downmix(&interleaved, spec.channels as usize);
    Ok((mono, spec.sample_rate))
}

/// Decode MP3 bytes, averaging stereo down to mono
fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate.max(0) as u32;
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 buffer contained no frames".to_string()));
    }
    Ok((samples, sample_rate))
}

/// Decode and play one synthesized buffer, blocking until done
///
/// Convenience wrapper used by the session worker (via `spawn_blocking`)
/// and the `test-tts` diagnostic.
///
/// # Errors
///
/// Returns error if decoding fails or the output device is unavailable
pub fn play_encoded(
    data: &[u8],
    format: AudioFormat,
    speed: f32,
    abort: &Arc<AtomicBool>,
) -> Result<()> {
    let (samples, rate) = decode_audio(data, format)?;
    let playback = AudioPlayback::new()?;
    playback.play(&samples, rate, speed, abort)
}
