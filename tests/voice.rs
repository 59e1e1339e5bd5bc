//! Voice pipeline integration tests
//!
//! Tests utterance segmentation and audio conversions without requiring
//! audio hardware or live service connections.

use std::time::{Duration, Instant};

use courtside::audio::{decode_audio, resample_mono, samples_to_pcm16};
use courtside::config::VoiceConfig;
use courtside::tts::AudioFormat;
use courtside::{TranscriptAccumulator, TranscriptEvent, TranscriptKind};

const SILENCE: Duration = Duration::from_secs(2);

fn partial(text: &str, at: Instant) -> TranscriptEvent {
    TranscriptEvent {
        kind: TranscriptKind::Partial,
        text: text.to_string(),
        at,
    }
}

fn final_event(text: &str, at: Instant) -> TranscriptEvent {
    TranscriptEvent {
        kind: TranscriptKind::Final,
        text: text.to_string(),
        at,
    }
}

#[test]
fn partials_then_final_submit_exactly_one_utterance() {
    // Fragments "How", " are", " the Lakers" arrive as partials, the full
    // sentence arrives as a final, then 2.1s of silence passes.
    let t0 = Instant::now();
    let mut acc = TranscriptAccumulator::new();

    acc.observe(&partial("How", t0));
    acc.observe(&partial(" are", t0 + Duration::from_millis(200)));
    acc.observe(&partial(" the Lakers", t0 + Duration::from_millis(400)));
    let final_at = t0 + Duration::from_millis(700);
    acc.observe(&final_event("How are the Lakers doing?", final_at));

    let check = final_at + Duration::from_millis(2100);
    assert!(acc.utterance_ready(check, SILENCE));
    assert_eq!(acc.take(), "How are the Lakers doing?");

    // Nothing further pending: the partials were never accumulated.
    assert!(!acc.utterance_ready(check + Duration::from_secs(60), SILENCE));
    assert_eq!(acc.pending(), "");
}

#[test]
fn gaps_exceeding_threshold_split_groups() {
    let t0 = Instant::now();
    let mut acc = TranscriptAccumulator::new();
    let mut submitted = Vec::new();

    // First group: two finals 300ms apart.
    acc.observe(&final_event("Who won", t0));
    acc.observe(&final_event(" the game?", t0 + Duration::from_millis(300)));

    // Poll after the gap: the group flushes as one message.
    let poll1 = t0 + Duration::from_millis(300) + SILENCE;
    if acc.utterance_ready(poll1, SILENCE) {
        submitted.push(acc.take());
    }

    // Second group, well after the first.
    let t1 = t0 + Duration::from_secs(10);
    acc.observe(&final_event("And the score?", t1));
    let poll2 = t1 + SILENCE;
    if acc.utterance_ready(poll2, SILENCE) {
        submitted.push(acc.take());
    }

    assert_eq!(submitted, vec!["Who won the game?", "And the score?"]);
}

#[test]
fn fragment_at_silence_boundary_defers_the_flush() {
    let t0 = Instant::now();
    let mut acc = TranscriptAccumulator::new();

    acc.observe(&final_event("Tell me about", t0));

    // A partial lands just before the boundary poll; the timer resets.
    let boundary = t0 + SILENCE - Duration::from_millis(50);
    acc.observe(&partial("the draft", boundary));
    assert!(!acc.utterance_ready(t0 + SILENCE, SILENCE));

    // The flush happens one full threshold after the late fragment.
    assert!(acc.utterance_ready(boundary + SILENCE, SILENCE));
    assert_eq!(acc.take(), "Tell me about");
}

#[test]
fn empty_utterance_after_timeout_is_discarded() {
    let t0 = Instant::now();
    let mut acc = TranscriptAccumulator::new();

    // Only blank/partial activity: nothing is ever ready to submit.
    acc.observe(&final_event("  ", t0));
    acc.observe(&partial("mm", t0 + Duration::from_millis(100)));
    assert!(!acc.utterance_ready(t0 + Duration::from_secs(30), SILENCE));
}

#[test]
fn default_voice_config_matches_capture_contract() {
    let config = VoiceConfig::default();
    assert_eq!(config.sample_rate, 16_000);
    assert_eq!(config.chunk_samples, 8_000);
    assert_eq!(config.silence_threshold(), Duration::from_secs(2));
    assert_eq!(config.poll_interval(), Duration::from_millis(100));
}

#[test]
fn pcm_chunks_are_16_bit_little_endian() {
    let chunk = samples_to_pcm16(&vec![0.5_f32; 8_000]);
    assert_eq!(chunk.len(), 16_000);
    let first = i16::from_le_bytes([chunk[0], chunk[1]]);
    assert!((f32::from(first) / 32768.0 - 0.5).abs() < 0.001);
}

#[test]
fn synthesized_wav_decodes_and_resamples_for_playback() {
    // Build a 48 kHz mono WAV like the synthesis API returns.
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..48_000 {
            #[allow(clippy::cast_possible_truncation)]
            let sample = ((f64::from(i) / 40.0).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    let wav = cursor.into_inner();

    let (samples, rate) = decode_audio(&wav, AudioFormat::Wav).unwrap();
    assert_eq!(rate, 48_000);
    assert_eq!(samples.len(), 48_000);

    // Downsample to a 24 kHz output device: about half the samples.
    let out = resample_mono(&samples, rate, 24_000).unwrap();
    let ratio = out.len() as f32 / samples.len() as f32;
    assert!((0.4..=0.55).contains(&ratio), "ratio was {ratio}");
}
