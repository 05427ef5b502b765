//! Session controller
//!
//! ```text
//!   SessionHandle ──commands──▶ ┌──────────────────────┐ ◀──GenerationEvent── Connection task
//!        ▲                      │  Controller (actor)  │
//!        └───watch<Status>──────│  ReconnectMachine    │──open()──▶ Transport
//!                               │  Generation          │──acquire()▶ MediaDevices
//!                               └──────────────────────┘
//!   mic thread ──gate?──▶ PcmEncoder ──▶ Connection::send
//!   FrameSampler ──gate?──▶ VideoFrame ──▶ Connection::send
//!   inbound audio ──gate?──▶ PcmDecoder ──▶ PlaybackScheduler
//! ```
//!
//! The actor is the only owner of the current [`Generation`]. Device and
//! timer callbacks never touch it; they hold the generation's
//! [`SessionGate`] and check it at the moment of use.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::audio::buffer::{rms, LevelMeter};
use crate::audio::capture::{BlockCallback, Microphone};
use crate::audio::playback::PlaybackScheduler;
use crate::codec::{PcmDecoder, PcmEncoder};
use crate::config::AppConfig;
use crate::error::{DeviceError, Error, Result};
use crate::media::{CaptureDevices, MediaDevices};
use crate::network::transport::{
    Connection, EventSink, GenerationEvent, Transport, TransportEvent,
};
use crate::protocol::{InboundMessage, SetupMessage};
use crate::session::gate::SessionGate;
use crate::session::state::{Effect, Event, Phase, ReconnectMachine};
use crate::snapshot::{ScanMode, ScanOutcome, SnapshotAnalyzer};
use crate::video::camera::Camera;
use crate::video::sampler::FrameSampler;
use crate::video::zoom::{ZoomCapability, ZoomControl};

/// Snapshot of the session for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    /// Reconnect attempt in progress, 0 when none
    pub attempt: u32,
    pub max_retries: u32,
    /// Terminal error text, if the session failed
    pub error: Option<String>,
    pub zoom: Option<ZoomCapability>,
}

impl SessionStatus {
    fn idle(max_retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            max_retries,
            error: None,
            zoom: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Active
    }
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    SetZoom(f64),
}

/// Camera of the current generation, readable outside the actor for scans
type CameraSlot = Arc<Mutex<Option<Arc<dyn Camera>>>>;

/// Cloneable front end of a running controller
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    text: broadcast::Sender<String>,
    level: Arc<LevelMeter>,
    muted: Arc<AtomicBool>,
    video_paused: Arc<AtomicBool>,
    camera: CameraSlot,
    analyzer: Arc<SnapshotAnalyzer>,
}

impl SessionHandle {
    /// Start, or restart after a failure. Any previous generation is torn
    /// down before the new one starts.
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn set_zoom(&self, level: f64) -> Result<()> {
        self.send(Command::SetZoom(level))
    }

    /// Muted audio is still metered but never sent
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_video_paused(&self, paused: bool) {
        self.video_paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_video_paused(&self) -> bool {
        self.video_paused.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Text parts of model turns
    pub fn subscribe_text(&self) -> broadcast::Receiver<String> {
        self.text.subscribe()
    }

    /// RMS of the last microphone block, 0 when no session is live
    pub fn input_level(&self) -> f32 {
        self.level.get()
    }

    /// Analyze the current camera frame
    pub async fn scan(&self, mode: ScanMode) -> ScanOutcome {
        let camera = self.camera.lock().clone();
        self.analyzer.capture(camera, mode).await
    }

    pub fn is_scanning(&self) -> bool {
        self.analyzer.is_scanning()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ControllerGone)
    }
}

/// Resources of one connection attempt
struct Generation {
    gate: Arc<SessionGate>,
    connection: Arc<dyn Connection>,
    microphone: Box<dyn Microphone>,
    camera: Arc<dyn Camera>,
    scheduler: PlaybackScheduler,
    decoder: PcmDecoder,
    zoom: ZoomControl,
    frame_task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Connect(u32),
    Retry,
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    deadline: Instant,
    kind: TimerKind,
}

/// Owns the reconnect machine and the current generation
pub struct SessionController {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    devices: Arc<dyn MediaDevices>,
    machine: ReconnectMachine,
    next_generation: u64,
    generation: Option<Generation>,
    timer: Option<PendingTimer>,
    error: Option<String>,
    events_tx: mpsc::UnboundedSender<GenerationEvent>,
    status_tx: watch::Sender<SessionStatus>,
    text_tx: broadcast::Sender<String>,
    level: Arc<LevelMeter>,
    muted: Arc<AtomicBool>,
    video_paused: Arc<AtomicBool>,
    camera: CameraSlot,
}

impl SessionController {
    /// Spawn the actor on the current runtime. The session starts idle; call
    /// [`SessionHandle::start`]. The actor stops the session and exits when
    /// the last handle is dropped.
    pub fn spawn(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn MediaDevices>,
        analyzer: SnapshotAnalyzer,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle(config.retry.max_retries));
        let (text_tx, _) = broadcast::channel(64);
        let level = Arc::new(LevelMeter::new());
        let muted = Arc::new(AtomicBool::new(false));
        let video_paused = Arc::new(AtomicBool::new(false));
        let camera: CameraSlot = Arc::new(Mutex::new(None));

        let controller = SessionController {
            machine: ReconnectMachine::new(config.retry.clone()),
            config,
            transport,
            devices,
            next_generation: 0,
            generation: None,
            timer: None,
            error: None,
            events_tx,
            status_tx,
            text_tx: text_tx.clone(),
            level: level.clone(),
            muted: muted.clone(),
            video_paused: video_paused.clone(),
            camera: camera.clone(),
        };
        tokio::spawn(controller.run(commands_rx, events_rx));

        SessionHandle {
            commands: commands_tx,
            status: status_rx,
            text: text_tx,
            level,
            muted,
            video_paused,
            camera,
            analyzer: Arc::new(analyzer),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<GenerationEvent>,
    ) {
        loop {
            let deadline = self.timer.map(|t| t.deadline);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.on_transport_event(event),
                _ = wait_until(deadline) => self.on_timer(),
            }
            self.publish_status();
        }

        self.apply(Event::Stop);
        self.publish_status();
        tracing::debug!("Session controller exited");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                tracing::info!("Starting session");
                self.apply(Event::Start);
            }
            Command::Stop => {
                tracing::info!("Stopping session");
                self.apply(Event::Stop);
            }
            Command::SetZoom(level) => match self.generation.as_mut() {
                Some(generation) => {
                    generation.zoom.set(level);
                }
                None => tracing::debug!("Zoom ignored, no camera"),
            },
        }
    }

    fn on_transport_event(&mut self, event: GenerationEvent) {
        let current = self.generation.as_ref().map(|g| g.gate.id());
        if current != Some(event.generation) {
            tracing::debug!(
                "Ignoring event from stale generation {}",
                event.generation
            );
            return;
        }

        match event.event {
            TransportEvent::Opened => self.apply(Event::Opened),
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Error(e) => {
                tracing::warn!("Connection error: {}", e);
                self.apply(Event::Failure);
            }
            TransportEvent::Closed(reason) => {
                tracing::info!(
                    "Connection closed{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.apply(Event::Closed);
            }
        }
    }

    fn on_message(&mut self, message: InboundMessage) {
        let Some(generation) = self.generation.as_mut() else {
            return;
        };
        if !generation.gate.is_active() {
            return;
        }

        if message.interrupted {
            tracing::debug!("Model interrupted, clearing playback");
            generation.scheduler.interrupt();
        }
        if let Some(text) = message.text {
            let _ = self.text_tx.send(text);
        }
        if let Some(audio) = message.audio {
            match generation.decoder.decode(&audio) {
                Ok(buffer) => {
                    let scheduler = &mut generation.scheduler;
                    if let Err(e) = device_call(|| scheduler.schedule(buffer)) {
                        tracing::debug!("Playback buffer dropped: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Dropping undecodable audio: {}", e),
            }
        }
    }

    fn on_timer(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        match timer.kind {
            TimerKind::Connect(attempt) => self.connect(attempt),
            TimerKind::Retry => self.apply(Event::RetryElapsed),
        }
    }

    fn apply(&mut self, event: Event) {
        for effect in self.machine.handle(event) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Deactivate => {
                if let Some(generation) = &self.generation {
                    generation.gate.deactivate();
                }
            }
            Effect::CancelTimer => self.timer = None,
            Effect::TearDown => self.tear_down(),
            Effect::ClearError => self.error = None,
            Effect::Connect { attempt, delay } => {
                if delay.is_zero() {
                    self.connect(attempt);
                } else {
                    self.arm(delay, TimerKind::Connect(attempt));
                }
            }
            Effect::Activate => self.activate(),
            Effect::ScheduleRetry { attempt, delay } => {
                tracing::info!(
                    "Retrying ({}/{}) in {:?}",
                    attempt,
                    self.machine.max_retries(),
                    delay
                );
                self.arm(delay, TimerKind::Retry);
            }
            Effect::ReportFailure(message) => {
                tracing::error!("Session failed: {}", message);
                self.error = Some(message);
            }
        }
    }

    fn arm(&mut self, delay: std::time::Duration, kind: TimerKind) {
        self.timer = Some(PendingTimer {
            deadline: Instant::now() + delay,
            kind,
        });
    }

    /// Start a new generation: fresh gate, devices, output and connection
    fn connect(&mut self, attempt: u32) {
        self.tear_down();

        self.next_generation += 1;
        let gate = SessionGate::new(self.next_generation);
        tracing::info!(
            "Connecting generation {} (attempt {})",
            gate.id(),
            attempt + 1
        );

        let capture = match device_call(|| self.devices.acquire()) {
            Ok(capture) => capture,
            Err(e) => return self.device_failed(e),
        };
        let output = match device_call(|| self.devices.open_output()) {
            Ok(output) => output,
            Err(e) => {
                capture.release();
                return self.device_failed(e);
            }
        };

        let live = &self.config.live;
        let setup = SetupMessage::audio_only(&live.model, &live.voice, &live.system_instruction);
        let sink = EventSink::new(gate.id(), self.events_tx.clone());
        let connection = match self.transport.open(setup, sink) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!("Could not open connection: {}", e);
                capture.release();
                self.apply(Event::Failure);
                return;
            }
        };

        let CaptureDevices { microphone, camera } = capture;
        *self.camera.lock() = Some(camera.clone());

        self.generation = Some(Generation {
            gate,
            connection,
            microphone,
            zoom: ZoomControl::negotiate(camera.clone()),
            camera,
            scheduler: PlaybackScheduler::new(output),
            decoder: PcmDecoder::new(self.config.audio.playback_rate, 1),
            frame_task: None,
        });
    }

    /// Open the gate and start the media pipes
    fn activate(&mut self) {
        let Some(generation) = self.generation.as_mut() else {
            return;
        };
        generation.gate.activate();
        tracing::info!("Generation {} active", generation.gate.id());

        let on_block = capture_pipe(
            generation.gate.clone(),
            generation.connection.clone(),
            self.muted.clone(),
            self.level.clone(),
            PcmEncoder::new(self.config.audio.capture_rate),
        );
        let started = device_call(|| generation.microphone.start(on_block));

        let sampler = FrameSampler::new(
            self.config.video.clone(),
            generation.camera.clone(),
            generation.connection.clone(),
            generation.gate.clone(),
            self.video_paused.clone(),
        );
        generation.frame_task = Some(sampler.spawn());

        if let Err(e) = started {
            self.device_failed(e);
        }
    }

    fn device_failed(&mut self, error: DeviceError) {
        tracing::error!("Device error: {}", error);
        self.apply(Event::DeviceDenied(error.to_string()));
    }

    /// Release everything the current generation owns. The gate closes
    /// first so in-flight callbacks stop before their resources go away.
    fn tear_down(&mut self) {
        let Some(mut generation) = self.generation.take() else {
            return;
        };
        generation.gate.deactivate();
        if let Some(task) = generation.frame_task.take() {
            task.abort();
        }
        generation.connection.close();
        device_call(|| {
            generation.microphone.stop();
            generation.scheduler.close();
            generation.camera.stop();
        });
        *self.camera.lock() = None;
        self.level.reset();
        tracing::debug!("Generation {} torn down", generation.gate.id());
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            phase: self.machine.phase(),
            attempt: self.machine.attempt(),
            max_retries: self.machine.max_retries(),
            error: self.error.clone(),
            zoom: self.generation.as_ref().and_then(|g| g.zoom.capability()),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Microphone callback: meter, then encode and send while the gate is open
fn capture_pipe(
    gate: Arc<SessionGate>,
    connection: Arc<dyn Connection>,
    muted: Arc<AtomicBool>,
    level: Arc<LevelMeter>,
    mut encoder: PcmEncoder,
) -> BlockCallback {
    Box::new(move |block: &[f32]| {
        if !gate.is_active() {
            return;
        }
        level.set(rms(block));
        if muted.load(Ordering::Relaxed) {
            return;
        }
        let chunk = encoder.encode(block).into_media();
        if let Err(e) = connection.send(chunk) {
            tracing::debug!("Dropping audio chunk: {}", e);
        }
    })
}

/// Run a device call that may block on a device thread. On a multi-thread
/// runtime the worker is handed off first; a current-thread runtime has no
/// other worker to hand off to, so the call runs inline.
fn device_call<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(tokio::runtime::RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
