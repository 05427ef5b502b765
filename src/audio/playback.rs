//! Gap-free sequential playback of inbound audio
//!
//! Every buffer starts at `max(next_start_time, now)`, so consecutive buffers
//! never overlap and playback never drifts behind the output clock.

use std::collections::BTreeMap;

use crate::audio::buffer::PlaybackBuffer;
use crate::error::DeviceError;

/// Identifier of a buffer handed to an output
pub type PlaybackHandle = u64;

/// Power state of an audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Running,
    Suspended,
    Closed,
}

/// A playback device with its own monotonic clock
pub trait AudioOutput: Send {
    /// Output clock in seconds; stands still while suspended
    fn current_time(&self) -> f64;

    fn state(&self) -> OutputState;

    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Play `buffer` starting at `start_time` on the output clock
    fn start(
        &mut self,
        handle: PlaybackHandle,
        buffer: &PlaybackBuffer,
        start_time: f64,
    ) -> Result<(), DeviceError>;

    /// Stop a buffer that has not finished yet
    fn cancel(&mut self, handle: PlaybackHandle);

    fn close(&mut self);
}

/// Where a buffer landed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub handle: PlaybackHandle,
    pub start: f64,
    pub end: f64,
}

/// Scheduler owning one output for one session generation
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    next_handle: PlaybackHandle,
    /// Live handles and their end times
    live: BTreeMap<PlaybackHandle, f64>,
    scheduled: u64,
    dropped: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            next_handle: 0,
            live: BTreeMap::new(),
            scheduled: 0,
            dropped: 0,
        }
    }

    /// Schedule a decoded buffer right after the previous one
    pub fn schedule(&mut self, mut buffer: PlaybackBuffer) -> Result<ScheduledPlayback, DeviceError> {
        match self.output.state() {
            OutputState::Closed => {
                self.dropped += 1;
                return Err(DeviceError::Closed);
            }
            OutputState::Suspended => {
                if let Err(e) = self.output.resume() {
                    tracing::warn!("Playback output resume failed, dropping buffer: {}", e);
                    self.dropped += 1;
                    return Err(e);
                }
            }
            OutputState::Running => {}
        }

        self.reap_finished();

        let now = self.output.current_time();
        let start = self.next_start_time.max(now);
        let handle = self.next_handle;
        buffer.scheduled_start = Some(start);

        if let Err(e) = self.output.start(handle, &buffer, start) {
            tracing::warn!("Failed to start playback buffer: {}", e);
            self.dropped += 1;
            return Err(e);
        }

        let end = start + buffer.duration();

        self.next_handle += 1;
        self.next_start_time = end;
        self.live.insert(handle, end);
        self.scheduled += 1;

        Ok(ScheduledPlayback { handle, start, end })
    }

    /// Forget handles whose playback has completed
    pub fn reap_finished(&mut self) {
        let now = self.output.current_time();
        self.live.retain(|_, end| *end > now);
    }

    /// Stop everything queued or playing, e.g. when the model is interrupted
    pub fn interrupt(&mut self) {
        for handle in self.live.keys() {
            self.output.cancel(*handle);
        }
        self.live.clear();
        self.next_start_time = 0.0;
    }

    /// Drop tracking without stopping playback; the timeline restarts at zero
    pub fn clear(&mut self) {
        self.live.clear();
        self.next_start_time = 0.0;
    }

    /// Release the output
    pub fn close(&mut self) {
        self.clear();
        self.output.close();
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.scheduled,
            dropped: self.dropped,
            live: self.live.len(),
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.output.close();
    }
}

/// Scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub dropped: u64,
    pub live: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeOutput;
    use proptest::prelude::*;

    fn buffer_of(secs: f64) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![0.0; (secs * 24_000.0) as usize], 24_000, 1)
    }

    #[test]
    fn back_to_back_buffers_do_not_overlap() {
        let (output, probe) = FakeOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(output));

        let a = scheduler.schedule(buffer_of(0.5)).unwrap();
        let b = scheduler.schedule(buffer_of(0.25)).unwrap();

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, a.end);
        assert_eq!(scheduler.live_count(), 2);
        assert_eq!(probe.lock().started.len(), 2);
    }

    #[test]
    fn late_buffer_starts_now_not_in_the_past() {
        let (output, probe) = FakeOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(output));

        scheduler.schedule(buffer_of(0.5)).unwrap();
        probe.lock().now = 3.0;
        let late = scheduler.schedule(buffer_of(0.5)).unwrap();

        assert_eq!(late.start, 3.0);
        // First buffer finished before now and was reaped
        assert_eq!(scheduler.live_count(), 1);
    }

    #[test]
    fn suspended_output_is_resumed_first() {
        let (output, probe) = FakeOutput::new();
        probe.lock().state = OutputState::Suspended;
        let mut scheduler = PlaybackScheduler::new(Box::new(output));

        scheduler.schedule(buffer_of(0.1)).unwrap();
        assert_eq!(probe.lock().state, OutputState::Running);
        assert_eq!(probe.lock().resumes, 1);
    }

    #[test]
    fn resume_failure_drops_buffer() {
        let (output, probe) = FakeOutput::new();
        {
            let mut p = probe.lock();
            p.state = OutputState::Suspended;
            p.resume_fails = true;
        }
        let mut scheduler = PlaybackScheduler::new(Box::new(output));

        assert!(scheduler.schedule(buffer_of(0.1)).is_err());
        assert!(probe.lock().started.is_empty());
        assert_eq!(scheduler.stats().dropped, 1);
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn clear_resets_timeline() {
        let (output, _probe) = FakeOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(output));
        scheduler.schedule(buffer_of(1.0)).unwrap();
        scheduler.clear();
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(scheduler.live_count(), 0);
    }

    #[test]
    fn interrupt_cancels_live_buffers() {
        let (output, probe) = FakeOutput::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(output));
        let a = scheduler.schedule(buffer_of(1.0)).unwrap();
        let b = scheduler.schedule(buffer_of(1.0)).unwrap();
        scheduler.interrupt();
        assert_eq!(probe.lock().cancelled, vec![a.handle, b.handle]);
        assert_eq!(scheduler.live_count(), 0);
    }

    proptest! {
        #[test]
        fn schedule_never_overlaps(
            events in proptest::collection::vec((1usize..4800, 0.0f64..0.3), 1..40)
        ) {
            let (output, probe) = FakeOutput::new();
            let mut scheduler = PlaybackScheduler::new(Box::new(output));
            let mut previous: Option<ScheduledPlayback> = None;

            for (frames, advance) in events {
                probe.lock().now += advance;
                let now = probe.lock().now;
                let slot = scheduler
                    .schedule(PlaybackBuffer::new(vec![0.0; frames], 24_000, 1))
                    .unwrap();
                prop_assert!(slot.start >= now);
                if let Some(prev) = previous {
                    prop_assert!(slot.start >= prev.end);
                }
                previous = Some(slot);
            }
        }
    }
}
