//! Gap-free playback of decoded assistant audio with barge-in.
//!
//! Decoded frames are pushed into a shared queue in arrival order; the output
//! stream callback drains the queue sample by sample, so consecutive frames
//! play back-to-back with no scheduling gap. `barge_in` clears the current
//! frame and everything queued behind it. The [`PlaybackHandle`] is `Clone`
//! and can exist without a device (`detached`) for tests and headless use.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::resample::resample_block;
use crate::core::events::PROTOCOL_SAMPLE_RATE;

/// Output device failure.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// No usable output device was found
    #[error("no audio output device available")]
    DeviceNotFound,
    /// Device exists but the stream could not be opened
    #[error("audio output stream error: {0}")]
    Stream(String),
}

/// Pending playback frames plus a cursor into the frame currently playing.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: VecDeque<Vec<f32>>,
    offset: usize,
}

impl PlaybackQueue {
    /// Enqueue a frame behind everything already pending.
    pub fn push(&mut self, frame: Vec<f32>) {
        if !frame.is_empty() {
            self.frames.push_back(frame);
        }
    }

    /// Drop the current frame and everything queued behind it.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.offset = 0;
    }

    /// Number of frames pending, including the one being played.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Fill an interleaved output buffer from the queue, consuming samples in
    /// arrival order. Mono queue samples are duplicated across `channels`.
    /// Remaining space is zero-filled when the queue runs dry.
    pub fn fill(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for slot in out.chunks_mut(channels) {
            let sample = loop {
                match self.frames.front() {
                    Some(frame) if self.offset < frame.len() => {
                        let s = frame[self.offset];
                        self.offset += 1;
                        break s;
                    }
                    Some(_) => {
                        self.frames.pop_front();
                        self.offset = 0;
                    }
                    None => break 0.0,
                }
            };
            slot.fill(sample);
        }
    }
}

/// Cloneable handle for enqueueing and interrupting playback.
#[derive(Clone)]
pub struct PlaybackHandle {
    queue: Arc<Mutex<PlaybackQueue>>,
    device_rate: u32,
}

impl PlaybackHandle {
    /// Handle with no device behind it; frames accumulate until cleared.
    pub fn detached(device_rate: u32) -> Self {
        Self {
            queue: Arc::new(Mutex::new(PlaybackQueue::default())),
            device_rate,
        }
    }

    /// Enqueue protocol-rate samples for playback. Non-blocking; the frame is
    /// resampled to the device rate up front so the output callback only
    /// copies.
    pub fn play_audio(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let frame = resample_block(samples, PROTOCOL_SAMPLE_RATE, self.device_rate);
        self.queue.lock().push(frame);
    }

    /// Stop the current frame and drop everything queued. Frames enqueued
    /// after this call start a fresh queue.
    pub fn barge_in(&self) {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            debug!(dropped, "barge-in cleared playback queue");
        }
    }

    /// Frames currently pending.
    pub fn pending_frames(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Owns the output device stream. `cpal::Stream` is `!Send`, so the player
/// stays on the thread that created it; everything else talks to the shared
/// queue through a [`PlaybackHandle`].
pub struct AudioPlayer {
    handle: PlaybackHandle,
    config: cpal::StreamConfig,
    device: cpal::Device,
    stream: Option<cpal::Stream>,
}

impl AudioPlayer {
    /// Bind the default output device without starting the stream.
    pub fn new() -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::DeviceNotFound)?;
        let config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Stream(e.to_string()))?
            .config();
        let SampleRate(device_rate) = config.sample_rate;
        Ok(Self {
            handle: PlaybackHandle::detached(device_rate),
            config,
            device,
            stream: None,
        })
    }

    /// Handle for enqueueing audio from other components.
    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    /// Open the output stream and begin draining the queue. Idempotent.
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let queue = Arc::clone(&self.handle.queue);
        let channels = self.config.channels as usize;
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |out: &mut [f32], _| queue.lock().fill(out, channels),
                |e| warn!("output stream error: {e}"),
                None,
            )
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::Stream(e.to_string()))?;
        debug!(
            rate = self.handle.device_rate,
            channels, "audio playback started"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Release the output device and drop pending audio. Idempotent.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!("audio playback stopped");
        }
        self.handle.barge_in();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_drain_in_arrival_order() {
        let mut queue = PlaybackQueue::default();
        queue.push(vec![0.1, 0.2]);
        queue.push(vec![0.3]);
        let mut out = [0.0_f32; 4];
        queue.fill(&mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn fill_duplicates_mono_across_channels() {
        let mut queue = PlaybackQueue::default();
        queue.push(vec![0.5, -0.5]);
        let mut out = [0.0_f32; 4];
        queue.fill(&mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn partial_drain_resumes_mid_frame() {
        let mut queue = PlaybackQueue::default();
        queue.push(vec![0.1, 0.2, 0.3]);
        let mut first = [0.0_f32; 2];
        queue.fill(&mut first, 1);
        let mut second = [0.0_f32; 2];
        queue.fill(&mut second, 1);
        assert_eq!(first, [0.1, 0.2]);
        assert_eq!(second, [0.3, 0.0]);
    }

    #[test]
    fn barge_in_drops_everything_pending() {
        let handle = PlaybackHandle::detached(16_000);
        handle.play_audio(&[0.1; 160]);
        handle.play_audio(&[0.2; 160]);
        assert_eq!(handle.pending_frames(), 2);
        handle.barge_in();
        assert_eq!(handle.pending_frames(), 0);
    }

    #[test]
    fn play_after_barge_in_starts_fresh_queue() {
        let handle = PlaybackHandle::detached(16_000);
        handle.play_audio(&[0.1; 160]);
        handle.barge_in();
        handle.play_audio(&[0.9, 0.9]);
        let mut out = [0.0_f32; 2];
        handle.queue.lock().fill(&mut out, 1);
        assert_eq!(out, [0.9, 0.9]);
    }

    #[test]
    fn play_audio_resamples_to_device_rate() {
        let handle = PlaybackHandle::detached(48_000);
        // 160 samples at 16 kHz → 480 at 48 kHz
        handle.play_audio(&[0.25; 160]);
        assert_eq!(handle.queue.lock().frames[0].len(), 480);
    }

    #[test]
    fn empty_frame_is_not_queued() {
        let handle = PlaybackHandle::detached(16_000);
        handle.play_audio(&[]);
        assert_eq!(handle.pending_frames(), 0);
    }
}
