//! Live Session Application
//!
//! Streams microphone and camera to the live endpoint, plays the spoken
//! replies and runs snapshot scans typed on stdin.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_field_session::{
    audio::device::list_devices,
    config::AppConfig,
    media::SystemDevices,
    network::LiveTransport,
    snapshot::{GeminiAnalysisClient, ScanHistory},
    ScanMode, ScanResult, SessionController, SessionHandle, SnapshotAnalyzer,
};

const HELP: &str = "Commands: scan [general|plant|soil|pest|disease], mute, unmute, \
pause, resume, zoom <level>, start, stop, quit";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting live session");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(std::path::Path::new(&path))?,
        None => AppConfig::load_default()?,
    };

    println!("\n=== Audio Devices ===");
    for device in list_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.id, default_marker);
    }
    println!();

    let transport =
        LiveTransport::from_env(&config.live).context("Live transport is not configured")?;
    tracing::info!("Endpoint: {}", transport.display_endpoint());

    let client = GeminiAnalysisClient::from_env(&config.snapshot)
        .context("Snapshot analysis is not configured")?;
    let history: Arc<dyn ScanHistory> = Arc::new(|scan: ScanResult| {
        tracing::info!("Saved scan {} ({})", scan.id, scan.mode);
    });
    let analyzer = SnapshotAnalyzer::new(Arc::new(client), config.snapshot.jpeg_quality)
        .with_history(history);

    let devices = SystemDevices::new(config.audio.clone(), config.video.clone());
    let session = SessionController::spawn(config, Arc::new(transport), Arc::new(devices), analyzer);

    spawn_status_log(&session);
    spawn_text_log(&session);

    session.start()?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, line.trim())? {
                    break;
                }
            }
        }
    }

    session.stop()?;
    // Give the controller a moment to release devices
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tracing::info!("Live session stopped");
    Ok(())
}

/// Returns false on `quit`. Scans run in the background so the prompt and
/// Ctrl-C stay responsive while an analysis is in flight.
fn handle_line(session: &SessionHandle, line: &str) -> Result<bool> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("quit" | "exit"), _) => return Ok(false),
        (Some("start"), _) => session.start()?,
        (Some("stop"), _) => session.stop()?,
        (Some("mute"), _) => session.set_muted(true),
        (Some("unmute"), _) => session.set_muted(false),
        (Some("pause"), _) => session.set_video_paused(true),
        (Some("resume"), _) => session.set_video_paused(false),
        (Some("zoom"), Some(level)) => match level.parse::<f64>() {
            Ok(level) => session.set_zoom(level)?,
            Err(_) => println!("Invalid zoom level: {}", level),
        },
        (Some("scan"), mode) => {
            let mode = match mode.map(str::parse::<ScanMode>).transpose() {
                Ok(mode) => mode.unwrap_or_default(),
                Err(e) => {
                    println!("{}", e);
                    return Ok(true);
                }
            };
            println!("Scanning ({})...", mode);
            let session = session.clone();
            tokio::spawn(async move {
                let outcome = session.scan(mode).await;
                println!("\n{}\n", outcome.text());
            });
        }
        _ => println!("{}", HELP),
    }
    Ok(true)
}

fn spawn_status_log(session: &SessionHandle) {
    let mut status = session.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match &current.error {
                Some(error) => tracing::error!("Session {:?}: {}", current.phase, error),
                None if current.attempt > 0 => tracing::warn!(
                    "Session {:?} (attempt {}/{})",
                    current.phase,
                    current.attempt,
                    current.max_retries
                ),
                None => tracing::info!("Session {:?}", current.phase),
            }
        }
    });
}

fn spawn_text_log(session: &SessionHandle) {
    let mut text = session.subscribe_text();
    tokio::spawn(async move {
        loop {
            match text.recv().await {
                Ok(text) => println!("> {}", text),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Skipped {} text messages", n)
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use image::RgbImage;
    use live_field_session::audio::{
        AudioOutput, BlockCallback, Microphone, OutputState, PlaybackBuffer, PlaybackHandle,
    };
    use live_field_session::error::{AnalysisError, DeviceError, NetworkError};
    use live_field_session::media::{CaptureDevices, MediaDevices};
    use live_field_session::network::{Connection, ConnectionState, EventSink, Transport};
    use live_field_session::protocol::{MediaChunk, SetupMessage};
    use live_field_session::snapshot::AnalysisClient;
    use live_field_session::video::{Camera, ZoomCapability};
    use std::time::Duration;

    struct StillCamera;

    impl Camera for StillCamera {
        fn is_ready(&self) -> bool {
            true
        }
        fn snapshot(&self) -> Option<RgbImage> {
            Some(RgbImage::new(64, 36))
        }
        fn zoom_capability(&self) -> Option<ZoomCapability> {
            None
        }
        fn apply_zoom(&self, _level: f64) -> Result<(), DeviceError> {
            Ok(())
        }
        fn stop(&self) {}
    }

    struct IdleMicrophone;

    impl Microphone for IdleMicrophone {
        fn start(&mut self, _on_block: BlockCallback) -> Result<(), DeviceError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    struct SilentOutput;

    impl AudioOutput for SilentOutput {
        fn current_time(&self) -> f64 {
            0.0
        }
        fn state(&self) -> OutputState {
            OutputState::Running
        }
        fn resume(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn start(
            &mut self,
            _: PlaybackHandle,
            _: &PlaybackBuffer,
            _: f64,
        ) -> Result<(), DeviceError> {
            Ok(())
        }
        fn cancel(&mut self, _: PlaybackHandle) {}
        fn close(&mut self) {}
    }

    struct StillDevices;

    impl MediaDevices for StillDevices {
        fn acquire(&self) -> Result<CaptureDevices, DeviceError> {
            Ok(CaptureDevices {
                microphone: Box::new(IdleMicrophone),
                camera: Arc::new(StillCamera),
            })
        }
        fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError> {
            Ok(Box::new(SilentOutput))
        }
    }

    /// Stays connecting forever
    struct PendingConnection;

    impl Connection for PendingConnection {
        fn send(&self, _chunk: MediaChunk) -> Result<(), NetworkError> {
            Err(NetworkError::NotOpen)
        }
        fn close(&self) {}
        fn state(&self) -> ConnectionState {
            ConnectionState::Connecting
        }
    }

    struct PendingTransport;

    impl Transport for PendingTransport {
        fn open(
            &self,
            _: SetupMessage,
            _: EventSink,
        ) -> Result<Arc<dyn Connection>, NetworkError> {
            Ok(Arc::new(PendingConnection))
        }
    }

    /// Never answers
    struct SlowClient;

    impl AnalysisClient for SlowClient {
        fn analyze(
            &self,
            _: String,
            _: String,
        ) -> BoxFuture<'static, Result<String, AnalysisError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scan_command_does_not_block_the_prompt() {
        let analyzer = SnapshotAnalyzer::new(Arc::new(SlowClient), 80);
        let session = SessionController::spawn(
            AppConfig::default(),
            Arc::new(PendingTransport),
            Arc::new(StillDevices),
            analyzer,
        );
        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(handle_line(&session, "scan pest").unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_scanning());

        // Still accepting commands while the analysis hangs
        assert!(handle_line(&session, "mute").unwrap());
        assert!(session.is_muted());
        assert!(!handle_line(&session, "quit").unwrap());
    }
}
