//! cpal playback output with a frame-accurate clock
//!
//! Scheduled buffers are mixed in the device callback at their start frame.
//! The clock is the number of frames rendered, so it stands still while the
//! stream is paused, like a suspended audio context.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{downmix_to_mono, resample_linear, PlaybackBuffer};
use crate::audio::device::{resolve_device, Direction};
use crate::audio::playback::{AudioOutput, OutputState, PlaybackHandle};
use crate::error::DeviceError;

struct Source {
    handle: PlaybackHandle,
    start_frame: u64,
    samples: Vec<f32>,
}

#[derive(Default)]
struct Mixer {
    frames_rendered: u64,
    sources: Vec<Source>,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let frames = data.len() / channels;
        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let t = self.frames_rendered + i as u64;
            let mut value = 0.0f32;
            for source in &self.sources {
                if t >= source.start_frame {
                    if let Some(s) = source.samples.get((t - source.start_frame) as usize) {
                        value += *s;
                    }
                }
            }
            let value = value.clamp(-1.0, 1.0);
            for out in frame.iter_mut() {
                *out = value;
            }
        }
        self.frames_rendered += frames as u64;
        let now = self.frames_rendered;
        self.sources
            .retain(|s| s.start_frame + s.samples.len() as u64 > now);
    }
}

enum Command {
    Play,
    Pause,
}

/// cpal-backed playback output
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
    state: OutputState,
    commands: Option<Sender<(Command, Sender<Result<(), String>>)>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the output device and start its stream
    pub fn open(device_id: Option<&str>) -> Result<Self, DeviceError> {
        let device = resolve_device(device_id, Direction::Output)?;
        let config = device.stream_config()?;
        let device_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let mixer_for_stream = mixer.clone();
        let (cmd_tx, cmd_rx) = bounded::<(Command, Sender<Result<(), String>>)>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let cpal_device = device.device;
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mixer_for_stream.lock().render(data, channels);
                    },
                    move |err| {
                        tracing::warn!("Playback stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Serve play/pause until the sender side is dropped
                while let Ok((command, reply)) = cmd_rx.recv() {
                    let result = match command {
                        Command::Play => stream.play().map_err(|e| e.to_string()),
                        Command::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    let _ = reply.send(result);
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DeviceError::StreamError("output did not start".to_string())),
        }

        Ok(Self {
            mixer,
            device_rate,
            state: OutputState::Running,
            commands: Some(cmd_tx),
            thread_handle: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<(), DeviceError> {
        let commands = self.commands.as_ref().ok_or(DeviceError::Closed)?;
        let (reply_tx, reply_rx) = bounded(1);
        commands
            .send((command, reply_tx))
            .map_err(|_| DeviceError::Closed)?;
        match reply_rx.recv_timeout(Duration::from_secs(1)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeviceError::ResumeFailed(e)),
            Err(_) => Err(DeviceError::ResumeFailed("no reply from output thread".to_string())),
        }
    }

    /// Pause the stream; the clock stops until resumed
    pub fn suspend(&mut self) -> Result<(), DeviceError> {
        self.send(Command::Pause)?;
        self.state = OutputState::Suspended;
        Ok(())
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().frames_rendered as f64 / self.device_rate as f64
    }

    fn state(&self) -> OutputState {
        self.state
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.send(Command::Play)?;
        self.state = OutputState::Running;
        Ok(())
    }

    fn start(
        &mut self,
        handle: PlaybackHandle,
        buffer: &PlaybackBuffer,
        start_time: f64,
    ) -> Result<(), DeviceError> {
        if self.state == OutputState::Closed {
            return Err(DeviceError::Closed);
        }
        let mono = downmix_to_mono(&buffer.samples, buffer.channels);
        let samples = resample_linear(&mono, buffer.sample_rate, self.device_rate);
        let start_frame = (start_time * self.device_rate as f64).round() as u64;
        self.mixer.lock().sources.push(Source {
            handle,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn cancel(&mut self, handle: PlaybackHandle) {
        self.mixer.lock().sources.retain(|s| s.handle != handle);
    }

    fn close(&mut self) {
        if self.state == OutputState::Closed {
            return;
        }
        self.state = OutputState::Closed;
        // Dropping the command sender ends the output thread and its stream
        self.commands = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.mixer.lock().sources.clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
