//! In-memory fakes of the device, transport and analysis seams

use futures_util::future::BoxFuture;
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::audio::buffer::PlaybackBuffer;
use crate::audio::capture::{BlockCallback, Microphone};
use crate::audio::playback::{AudioOutput, OutputState, PlaybackHandle};
use crate::error::{AnalysisError, DeviceError, NetworkError};
use crate::media::{CaptureDevices, MediaDevices};
use crate::network::transport::{
    Connection, ConnectionState, EventSink, Transport, TransportEvent,
};
use crate::protocol::{InboundMessage, MediaChunk, SetupMessage};
use crate::snapshot::AnalysisClient;
use crate::video::camera::Camera;
use crate::video::zoom::ZoomCapability;

// ---------------------------------------------------------------------------
// Audio output
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OutputProbe {
    pub now: f64,
    pub state: OutputState,
    pub resume_fails: bool,
    pub resumes: u32,
    pub started: Vec<(PlaybackHandle, f64)>,
    pub cancelled: Vec<PlaybackHandle>,
    pub closed: bool,
}

pub struct FakeOutput {
    probe: Arc<Mutex<OutputProbe>>,
}

impl FakeOutput {
    pub fn new() -> (Self, Arc<Mutex<OutputProbe>>) {
        let probe = Arc::new(Mutex::new(OutputProbe {
            now: 0.0,
            state: OutputState::Running,
            resume_fails: false,
            resumes: 0,
            started: Vec::new(),
            cancelled: Vec::new(),
            closed: false,
        }));
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.probe.lock().now
    }

    fn state(&self) -> OutputState {
        self.probe.lock().state
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        let mut probe = self.probe.lock();
        if probe.resume_fails {
            return Err(DeviceError::ResumeFailed("fake".into()));
        }
        probe.state = OutputState::Running;
        probe.resumes += 1;
        Ok(())
    }

    fn start(
        &mut self,
        handle: PlaybackHandle,
        _buffer: &PlaybackBuffer,
        start_time: f64,
    ) -> Result<(), DeviceError> {
        let mut probe = self.probe.lock();
        if probe.state == OutputState::Closed {
            return Err(DeviceError::Closed);
        }
        probe.started.push((handle, start_time));
        Ok(())
    }

    fn cancel(&mut self, handle: PlaybackHandle) {
        self.probe.lock().cancelled.push(handle);
    }

    fn close(&mut self) {
        let mut probe = self.probe.lock();
        probe.state = OutputState::Closed;
        probe.closed = true;
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Shared view of a fake microphone. The callback is kept after `stop` so
/// tests can simulate a device thread delivering one last block late.
#[derive(Clone, Default)]
pub struct MicrophoneProbe {
    callback: Arc<Mutex<Option<BlockCallback>>>,
    running: Arc<AtomicBool>,
}

impl MicrophoneProbe {
    pub fn fire(&self, block: &[f32]) {
        if let Some(callback) = self.callback.lock().as_mut() {
            callback(block);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct FakeMicrophone {
    probe: MicrophoneProbe,
    live: Option<Arc<LiveCounter>>,
}

impl FakeMicrophone {
    pub fn new() -> (Self, MicrophoneProbe) {
        let probe = MicrophoneProbe::default();
        (
            Self {
                probe: probe.clone(),
                live: None,
            },
            probe,
        )
    }
}

impl Microphone for FakeMicrophone {
    fn start(&mut self, on_block: BlockCallback) -> Result<(), DeviceError> {
        *self.probe.callback.lock() = Some(on_block);
        self.probe.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.running.store(false, Ordering::SeqCst);
        if let Some(live) = self.live.take() {
            live.release();
        }
    }

    fn is_running(&self) -> bool {
        self.probe.is_running()
    }
}

/// Counts acquired-but-not-stopped microphones
#[derive(Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    max: AtomicUsize,
}

impl LiveCounter {
    fn acquire(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CameraState {
    pub ready: bool,
    pub stopped: bool,
    pub zoom: Option<ZoomCapability>,
    pub zoom_fails: bool,
    pub zoom_requests: Vec<f64>,
}

pub struct FakeCamera {
    pub state: Mutex<CameraState>,
}

impl FakeCamera {
    pub fn with_zoom(zoom: Option<ZoomCapability>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CameraState {
                ready: true,
                stopped: false,
                zoom,
                zoom_fails: false,
                zoom_requests: Vec::new(),
            }),
        })
    }
}

impl Camera for FakeCamera {
    fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.ready && !state.stopped
    }

    fn snapshot(&self) -> Option<RgbImage> {
        if !self.is_ready() {
            return None;
        }
        Some(RgbImage::from_fn(128, 72, |x, y| {
            image::Rgb([(x * 2) as u8, (y * 3) as u8, 90])
        }))
    }

    fn zoom_capability(&self) -> Option<ZoomCapability> {
        self.state.lock().zoom
    }

    fn apply_zoom(&self, level: f64) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.zoom_requests.push(level);
        if state.zoom_fails {
            return Err(DeviceError::Unsupported("zoom".into()));
        }
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().stopped = true;
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub struct FakeDevices {
    denied: AtomicBool,
    acquired: AtomicUsize,
    live: Arc<LiveCounter>,
    microphones: Mutex<Vec<MicrophoneProbe>>,
    outputs: Mutex<Vec<Arc<Mutex<OutputProbe>>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            denied: AtomicBool::new(false),
            acquired: AtomicUsize::new(0),
            live: Arc::new(LiveCounter::default()),
            microphones: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        })
    }

    pub fn deny(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Most recently acquired microphone
    pub fn microphone(&self) -> MicrophoneProbe {
        self.microphones.lock().last().cloned().unwrap_or_default()
    }

    pub fn output(&self, index: usize) -> Arc<Mutex<OutputProbe>> {
        self.outputs.lock()[index].clone()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn live_microphones(&self) -> usize {
        self.live.live.load(Ordering::SeqCst)
    }

    pub fn max_live_microphones(&self) -> usize {
        self.live.max.load(Ordering::SeqCst)
    }
}

impl MediaDevices for FakeDevices {
    fn acquire(&self) -> Result<CaptureDevices, DeviceError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied("camera and microphone".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.live.acquire();

        let (mut microphone, probe) = FakeMicrophone::new();
        microphone.live = Some(self.live.clone());
        self.microphones.lock().push(probe);

        let camera: Arc<dyn Camera> = FakeCamera::with_zoom(ZoomCapability::new(1.0, 4.0, 0.5, 1.0));
        Ok(CaptureDevices {
            microphone: Box::new(microphone),
            camera,
        })
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError> {
        let (output, probe) = FakeOutput::new();
        self.outputs.lock().push(probe);
        Ok(Box::new(output))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct FakeConnection {
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<MediaChunk>>,
    /// Every `send` call, accepted or not
    send_calls: AtomicUsize,
    events: Option<EventSink>,
}

impl FakeConnection {
    /// Already open, not attached to any controller
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Open),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            events: None,
        })
    }

    fn attached(events: EventSink) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Connecting),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            events: Some(events),
        })
    }

    pub fn sent(&self) -> Vec<MediaChunk> {
        self.sent.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == ConnectionState::Closed
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn set_open(&self) {
        *self.state.lock() = ConnectionState::Open;
        self.emit(TransportEvent::Opened);
    }

    /// Report a mid-stream error
    pub fn fail(&self) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Failed;
            }
        }
        self.emit(TransportEvent::Error(NetworkError::ConnectionFailed(
            "fake failure".into(),
        )));
    }

    /// Simulate a server message
    pub fn deliver(&self, message: InboundMessage) {
        self.emit(TransportEvent::Message(message));
    }
}

impl Connection for FakeConnection {
    fn send(&self, chunk: MediaChunk) -> Result<(), NetworkError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if *self.state.lock() != ConnectionState::Open {
            return Err(NetworkError::NotOpen);
        }
        self.sent.lock().push(chunk);
        Ok(())
    }

    fn close(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OpenScript {
    AlwaysOpen,
    AlwaysFail,
}

pub struct FakeTransport {
    script: OpenScript,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn new(script: OpenScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock()[index].clone()
    }
}

impl Transport for FakeTransport {
    fn open(
        &self,
        _setup: SetupMessage,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, NetworkError> {
        let connection = FakeConnection::attached(events);
        self.connections.lock().push(connection.clone());
        match self.script {
            OpenScript::AlwaysOpen => connection.set_open(),
            OpenScript::AlwaysFail => connection.fail(),
        }
        Ok(connection)
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

pub struct FakeAnalysisClient {
    reply: Result<String, AnalysisError>,
    gated: bool,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    called: Notify,
    release: Arc<Notify>,
}

impl FakeAnalysisClient {
    pub fn replying(reply: Result<String, AnalysisError>) -> Arc<Self> {
        Self::build(reply, false)
    }

    /// Holds every reply until [`release`](Self::release)
    pub fn gated(reply: Result<String, AnalysisError>) -> Arc<Self> {
        Self::build(reply, true)
    }

    fn build(reply: Result<String, AnalysisError>, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            reply,
            gated,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            called: Notify::new(),
            release: Arc::new(Notify::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }

    pub async fn wait_until_called(&self) {
        self.called.notified().await
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl AnalysisClient for FakeAnalysisClient {
    fn analyze(
        &self,
        _jpeg_base64: String,
        prompt: String,
    ) -> BoxFuture<'static, Result<String, AnalysisError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = Some(prompt);
        self.called.notify_one();

        let reply = self.reply.clone();
        let release = self.gated.then(|| self.release.clone());
        Box::pin(async move {
            if let Some(release) = release {
                release.notified().await;
            }
            reply
        })
    }
}
