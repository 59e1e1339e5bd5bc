//! Audio capture from the default input device
//!
//! A dedicated thread owns the cpal stream (streams are not `Send`) and
//! forwards fixed-size 16-bit PCM chunks to the live transcriber. While
//! the suppress gate is set (synthesized audio is playing) captured
//! samples are discarded so the assistant does not hear itself; the gate
//! is best-effort, checked once per drain pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;

use super::{MonoResampler, downmix, samples_to_pcm16};
use crate::{Error, Result};

/// How often the capture thread drains the device buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to a running capture thread
///
/// Stopping (or dropping) the handle tears the stream down; the audio
/// channel closes once the thread exits.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Start capturing and forwarding audio
    ///
    /// * `target_rate` - PCM rate expected by the transcriber (16 kHz)
    /// * `chunk_samples` - samples per forwarded chunk
    /// * `suppress` - gate set while synthesized audio is playing
    /// * `audio_tx` - sink feeding the transcriber
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream cannot
    /// be opened
    pub fn spawn(
        target_rate: u32,
        chunk_samples: usize,
        suppress: Arc<AtomicBool>,
        audio_tx: mpsc::Sender<Bytes>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        // Stream setup happens on the capture thread; report the outcome
        // back so startup failures surface as errors, not log lines.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                run_capture(
                    target_rate,
                    chunk_samples,
                    &suppress,
                    &audio_tx,
                    &thread_stop,
                    &ready_tx,
                );
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Audio("capture thread exited during setup".to_string())),
        }
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture loop body, run on the dedicated thread
fn run_capture(
    target_rate: u32,
    chunk_samples: usize,
    suppress: &AtomicBool,
    audio_tx: &mpsc::Sender<Bytes>,
    stop: &AtomicBool,
    ready_tx: &std::sync::mpsc::Sender<Result<()>>,
) {
    let setup = open_input_stream();
    let (stream, buffer, device_rate, channels) = match setup {
        Ok(parts) => {
            let _ = ready_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut resampler = match MonoResampler::new(device_rate, target_rate) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "capture resampler init failed");
            return;
        }
    };
    let mut pending: Vec<f32> = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(DRAIN_INTERVAL);

        let raw = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if suppress.load(Ordering::SeqCst) {
            // Playback active: drop captured audio so the assistant does
            // not transcribe its own voice.
            pending.clear();
            resampler.discard_pending();
            continue;
        }

        if raw.is_empty() {
            continue;
        }

        let mono = downmix(&raw, channels);
        match resampler.push(&mono) {
            Ok(resampled) => pending.extend_from_slice(&resampled),
            Err(e) => {
                tracing::warn!(error = %e, "capture resample failed");
                continue;
            }
        }

        while pending.len() >= chunk_samples {
            let chunk: Vec<f32> = pending.drain(..chunk_samples).collect();
            let pcm = Bytes::from(samples_to_pcm16(&chunk));
            if audio_tx.blocking_send(pcm).is_err() {
                // Transcriber gone; nothing left to capture for.
                tracing::debug!("audio sink closed, stopping capture");
                drop(stream);
                return;
            }
        }
    }

    drop(stream);
}

type InputParts = (cpal::Stream, Arc<Mutex<Vec<f32>>>, u32, usize);

/// Open the default input device and start an input stream
fn open_input_stream() -> Result<InputParts> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        format = ?sample_format,
        "audio capture initialized"
    );

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let err_fn = |err| {
        tracing::error!(error = %err, "audio capture error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let buf = Arc::clone(&buffer);
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = buf.lock() {
                            buf.extend_from_slice(data);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        SampleFormat::I16 => {
            let buf = Arc::clone(&buffer);
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = buf.lock() {
                            buf.extend(data.iter().map(|&s| f32::from(s) / 32768.0));
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        SampleFormat::U16 => {
            let buf = Arc::clone(&buffer);
            device
                .build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = buf.lock() {
                            buf.extend(
                                data.iter().map(|&s| (f32::from(s) - 32768.0) / 32768.0),
                            );
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        other => {
            return Err(Error::Audio(format!(
                "unsupported input sample format: {other:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");

    Ok((stream, buffer, device_rate, channels))
}
