//! Microphone capture pipeline.
//!
//! The cpal input callback downmixes each device block to mono and hands it
//! to a worker thread over a bounded channel; `cpal::Stream` is `!Send`, so
//! the stream itself never leaves the thread that built it. The worker gates
//! on (connected ∧ open AUDIO target), resamples the block to the protocol
//! rate, encodes it and pushes one `audioInput` event per block into the
//! session's outbound queue. Blocks that arrive while the gate is closed are
//! discarded, never buffered.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::codec::{encode_audio, pcm16_to_f32};
use super::resample::resample_block;
use crate::core::events::{Envelope, PROTOCOL_SAMPLE_RATE};
use crate::core::session::{CaptureFeed, CaptureTarget, OutboundMessage};

/// Microphone acquisition failure. Never retried automatically.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No input device, or the device disappeared
    #[error("no audio input device available")]
    DeviceNotFound,
    /// The platform refused microphone access
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    /// Anything else the audio backend reports
    #[error("audio capture error: {0}")]
    Other(String),
}

fn classify<E: std::fmt::Display>(err: E) -> CaptureError {
    let text = err.to_string();
    if text.to_ascii_lowercase().contains("permission") {
        CaptureError::PermissionDenied(text)
    } else {
        CaptureError::Other(text)
    }
}

/// Build the outbound `audioInput` event for one captured mono block.
/// Empty blocks produce nothing.
pub(crate) fn frame_event(
    block: &[f32],
    input_rate: u32,
    target: &CaptureTarget,
) -> Option<Envelope> {
    if block.is_empty() {
        return None;
    }
    let resampled = resample_block(block, input_rate, PROTOCOL_SAMPLE_RATE);
    Some(Envelope::audio_input(
        target.prompt_name.clone(),
        target.content_name.clone(),
        encode_audio(&resampled),
    ))
}

/// Owns the input stream and the framing worker for one capture lifetime.
pub struct AudioCapture {
    stream: Option<cpal::Stream>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Acquire the default input device and start framing blocks into the
    /// session's outbound queue.
    pub fn start(feed: CaptureFeed) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound)?;
        let supported = device.default_input_config().map_err(classify)?;
        let input_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let config = supported.config();

        // Bounded bridge from the realtime callback to the framing worker.
        // A full channel drops the block; the callback must never stall.
        let (tx, rx) = sync_channel::<Vec<f32>>(64);
        let err_fn = |e| warn!("input stream error: {e}");

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| push_block(&tx, data, channels, |s| s),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| push_block(&tx, data, channels, pcm16_to_f32),
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    push_block(&tx, data, channels, |s| (f32::from(s) - 32768.0) / 32768.0)
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::Other(format!(
                    "unsupported input sample format {other:?}"
                )));
            }
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                return Err(CaptureError::DeviceNotFound);
            }
            Err(e) => return Err(classify(e)),
        };
        stream.play().map_err(classify)?;

        debug!(input_rate, channels, "microphone capture started");
        let worker = std::thread::spawn(move || frame_worker(rx, feed, input_rate));

        Ok(Self {
            stream: Some(stream),
            worker: Some(worker),
        })
    }

    /// Release the device and stop the worker. Idempotent; a second call is a
    /// no-op.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!("microphone capture stopped");
        }
        // The callback's channel sender went away with the stream; the worker
        // drains whatever is in flight and exits.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Downmix one interleaved device block to mono and queue it for framing.
fn push_block<T: Copy>(
    tx: &SyncSender<Vec<f32>>,
    data: &[T],
    channels: usize,
    convert: impl Fn(T) -> f32,
) {
    let channels = channels.max(1);
    let mono: Vec<f32> = data
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| convert(s)).sum::<f32>() / channels as f32)
        .collect();
    // Drop the block if the worker is behind; stale audio is worse than a gap.
    let _ = tx.try_send(mono);
}

fn frame_worker(rx: Receiver<Vec<f32>>, feed: CaptureFeed, input_rate: u32) {
    for block in rx.iter() {
        if !feed.connected.load(Ordering::SeqCst) {
            continue;
        }
        let Some(target) = feed.target.borrow().clone() else {
            continue;
        };
        let Some(event) = frame_event(&block, input_rate, &target) else {
            continue;
        };
        match event.into_value() {
            Ok(value) => {
                if feed.outbound.try_send(OutboundMessage::Event(value)).is_err() {
                    trace!("outbound queue full, capture block dropped");
                }
            }
            Err(e) => warn!("failed to serialize capture block: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::codec::decode_audio;
    use serde_json::Value;

    fn target() -> CaptureTarget {
        CaptureTarget {
            prompt_name: "prompt_1".into(),
            content_name: "audio_1".into(),
        }
    }

    #[test]
    fn frame_event_resamples_and_encodes_one_block() {
        let block = vec![0.5_f32; 512];
        let event = frame_event(&block, 48_000, &target()).unwrap();
        let value: Value = event.into_value().unwrap();
        let body = &value["event"]["audioInput"];
        assert_eq!(body["promptName"], "prompt_1");
        assert_eq!(body["contentName"], "audio_1");
        // ceil(512 / 48000 * 16000) = 171 protocol-rate samples
        let payload = body["content"].as_str().unwrap();
        assert_eq!(decode_audio(payload).unwrap().len(), 171);
    }

    #[test]
    fn empty_block_produces_no_event() {
        assert!(frame_event(&[], 48_000, &target()).is_none());
    }

    #[test]
    fn classify_detects_permission_errors() {
        assert!(matches!(
            classify("Permission denied by the OS"),
            CaptureError::PermissionDenied(_)
        ));
        assert!(matches!(classify("backend exploded"), CaptureError::Other(_)));
    }
}
