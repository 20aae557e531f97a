//! Real-time output through the default audio device.
//!
//! The session renders on the main thread and pushes blocks into a shared
//! queue; the device thread drains it through a rodio [`Source`], playing
//! silence whenever the queue runs dry.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rodio::{OutputStream, Sink, Source};
use sensory_sketchpad_core::{AudioContext, AudioHost, Clock, SketchpadError};

/// Samples pulled from the queue per lock.
const BATCH: usize = 512;
/// Longest backlog kept before the oldest samples are dropped.
const MAX_BACKLOG_SECONDS: f64 = 2.0;

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

struct QueueSource {
    queue: SampleQueue,
    sample_rate: u32,
    batch: Vec<f32>,
    pos: usize,
}

impl QueueSource {
    fn new(queue: SampleQueue, sample_rate: u32) -> Self {
        Self {
            queue,
            sample_rate,
            batch: Vec::with_capacity(BATCH),
            pos: 0,
        }
    }
}

impl Iterator for QueueSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.batch.len() {
            self.batch.clear();
            self.pos = 0;
            let mut queue = self.queue.lock();
            let take = queue.len().min(BATCH);
            self.batch.extend(queue.drain(..take));
        }

        // Underrun: keep the stream alive with silence.
        let sample = self.batch.get(self.pos).copied().unwrap_or(0.0);
        self.pos += 1;
        Some(sample)
    }
}

impl Source for QueueSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(BATCH)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// An open output stream fed from a sample queue.
pub struct DeviceOutput {
    _stream: OutputStream,
    sink: Sink,
    queue: SampleQueue,
    sample_rate: u32,
}

impl DeviceOutput {
    pub fn open(sample_rate: u32) -> sensory_sketchpad_core::Result<Self> {
        let (stream, handle) = OutputStream::try_default().map_err(|err| {
            SketchpadError::AudioUnavailable(format!("no output stream: {err}"))
        })?;
        let sink = Sink::try_new(&handle)
            .map_err(|err| SketchpadError::AudioUnavailable(format!("no output sink: {err}")))?;

        let queue = SampleQueue::default();
        sink.append(QueueSource::new(Arc::clone(&queue), sample_rate));
        Ok(Self {
            _stream: stream,
            sink,
            queue,
            sample_rate,
        })
    }

    /// Queues `samples` for playback.
    pub fn push(&self, samples: &[f32]) {
        let limit = (MAX_BACKLOG_SECONDS * self.sample_rate as f64) as usize;
        let mut queue = self.queue.lock();
        queue.extend(samples.iter().copied());
        if queue.len() > limit {
            let excess = queue.len() - limit;
            queue.drain(..excess);
            tracing::debug!(dropped = excess, "audio backlog trimmed");
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Blocks until the device has consumed the queue or `timeout` passes.
    pub fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.queued() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// [`AudioHost`] backed by the default output device. When the device cannot
/// be opened the session falls back to muted mode.
pub struct DeviceHost {
    sample_rate: u32,
    clock: Rc<dyn Clock>,
    output: RefCell<Option<DeviceOutput>>,
}

impl DeviceHost {
    pub fn new(sample_rate: u32, clock: Rc<dyn Clock>) -> Self {
        Self {
            sample_rate,
            clock,
            output: RefCell::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.output.borrow().is_some()
    }

    /// Sends a rendered block to the device. Returns `false` when there is
    /// no device to send it to.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.output.borrow().as_ref() {
            Some(output) => {
                output.push(samples);
                true
            }
            None => false,
        }
    }

    pub fn drain(&self, timeout: Duration) {
        if let Some(output) = self.output.borrow().as_ref() {
            output.drain(timeout);
        }
    }
}

impl AudioHost for DeviceHost {
    fn open(&self) -> sensory_sketchpad_core::Result<AudioContext> {
        let output = DeviceOutput::open(self.sample_rate).map_err(|err| {
            tracing::warn!(error = %err, "audio device unavailable");
            err
        })?;
        tracing::info!(sample_rate = self.sample_rate, "audio device opened");
        *self.output.borrow_mut() = Some(output);
        Ok(AudioContext::new(self.sample_rate, self.clock.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_plays_queued_samples_then_silence() {
        let queue = SampleQueue::default();
        queue.lock().extend([0.25, -0.5, 1.0]);
        let mut source = QueueSource::new(Arc::clone(&queue), 8_000);

        let played: Vec<f32> = source.by_ref().take(5).collect();
        assert_eq!(played, [0.25, -0.5, 1.0, 0.0, 0.0]);
        assert!(queue.lock().is_empty());

        queue.lock().push_back(0.75);
        assert_eq!(source.next(), Some(0.75));
        assert_eq!(source.channels(), 1);
        assert_eq!(source.sample_rate(), 8_000);
    }
}
