//! Microphone capture
//!
//! The device delivers audio on its own thread; the capture pipe re-blocks it
//! into fixed 16 kHz mono blocks and hands each block to a callback owned by
//! the current session generation.

use crate::error::DeviceError;

/// Receives one fixed-size block of 16 kHz mono samples per call
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A microphone stream owned by one session generation
pub trait Microphone: Send {
    /// Begin delivering blocks to `on_block`
    fn start(&mut self, on_block: BlockCallback) -> Result<(), DeviceError>;

    /// Stop the device track; no callbacks are delivered afterwards
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

#[cfg(feature = "devices")]
pub use self::cpal_capture::CpalMicrophone;

#[cfg(feature = "devices")]
mod cpal_capture {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::StreamConfig;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::{BlockCallback, Microphone};
    use crate::audio::buffer::{downmix_to_mono, BlockAccumulator, LinearResampler};
    use crate::audio::device::{resolve_device, Direction};
    use crate::error::DeviceError;

    /// cpal-backed microphone
    pub struct CpalMicrophone {
        device_id: Option<String>,
        config: StreamConfig,
        target_rate: u32,
        block_size: usize,
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        blocks_delivered: Arc<AtomicU64>,
    }

    impl CpalMicrophone {
        /// Resolve the device and its native format; fails if access is denied
        pub fn open(
            device_id: Option<&str>,
            target_rate: u32,
            block_size: usize,
        ) -> Result<Self, DeviceError> {
            let device = resolve_device(device_id, Direction::Input)?;
            let config = device.stream_config()?;

            tracing::debug!(
                "Microphone {} at {}Hz x{}",
                device.name,
                config.sample_rate.0,
                config.channels
            );

            Ok(Self {
                device_id: device_id.map(str::to_string),
                config,
                target_rate,
                block_size,
                running: Arc::new(AtomicBool::new(false)),
                thread_handle: None,
                blocks_delivered: Arc::new(AtomicU64::new(0)),
            })
        }

        pub fn blocks_delivered(&self) -> u64 {
            self.blocks_delivered.load(Ordering::Relaxed)
        }
    }

    impl Microphone for CpalMicrophone {
        fn start(&mut self, mut on_block: BlockCallback) -> Result<(), DeviceError> {
            if self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            let device = resolve_device(self.device_id.as_deref(), Direction::Input)?;
            let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

            let running = self.running.clone();
            let running_for_loop = self.running.clone();
            let blocks_delivered = self.blocks_delivered.clone();
            let config = self.config.clone();
            let channels = self.config.channels;
            let mut resampler = LinearResampler::new(self.config.sample_rate.0, self.target_rate);
            let mut accumulator = BlockAccumulator::new(self.block_size);

            running.store(true, Ordering::SeqCst);

            let handle = thread::Builder::new()
                .name("microphone-capture".to_string())
                .spawn(move || {
                    let cpal_device = device.device;

                    let stream = cpal_device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if !running.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono = downmix_to_mono(data, channels);
                            let resampled = resampler.process(&mono);
                            accumulator.push(&resampled, |block| {
                                blocks_delivered.fetch_add(1, Ordering::Relaxed);
                                on_block(block);
                            });
                        },
                        move |err| {
                            tracing::warn!("Microphone stream error: {}", err);
                        },
                        None,
                    );

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let err = match e {
                                cpal::BuildStreamError::DeviceNotAvailable => {
                                    DeviceError::PermissionDenied(e.to_string())
                                }
                                other => DeviceError::StreamError(other.to_string()),
                            };
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };

                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    // Keep the stream alive while running
                    while running_for_loop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                    // Stream dropped here, stopping capture
                })
                .map_err(|e| DeviceError::StreamError(e.to_string()))?;

            self.thread_handle = Some(handle);

            match ready_rx.recv_timeout(Duration::from_secs(3)) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    self.stop();
                    Err(e)
                }
                Err(_) => {
                    self.stop();
                    Err(DeviceError::StreamError("microphone did not start".to_string()))
                }
            }
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    impl Drop for CpalMicrophone {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
