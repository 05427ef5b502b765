//! WebSocket transport to the bidirectional generate endpoint
//!
//! Each connection runs on its own task: connect, send `setup`, wait for
//! `setupComplete`, then pump outbound chunks and inbound server messages
//! until either side closes.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{api_key_from_env, LiveConfig};
use crate::error::NetworkError;
use crate::network::transport::{
    Connection, ConnectionState, ConnectionStats, ConnectionStatus, EventSink, Transport,
    TransportEvent,
};
use crate::protocol::{MediaChunk, RealtimeInputMessage, ServerMessage, SetupMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Transport backed by tokio-tungstenite
pub struct LiveTransport {
    url: Url,
    setup_timeout: Duration,
    send_queue: usize,
}

impl LiveTransport {
    pub fn new(config: &LiveConfig, api_key: &str) -> Result<Self, NetworkError> {
        if api_key.trim().is_empty() {
            return Err(NetworkError::MissingApiKey);
        }
        let mut url = Url::parse(&config.endpoint)
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", config.endpoint, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(NetworkError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        url.query_pairs_mut().append_pair("key", api_key.trim());

        Ok(Self {
            url,
            setup_timeout: Duration::from_millis(config.setup_timeout_ms),
            send_queue: config.send_queue.max(1),
        })
    }

    /// Use the API key from the environment
    pub fn from_env(config: &LiveConfig) -> Result<Self, NetworkError> {
        let key = api_key_from_env().ok_or(NetworkError::MissingApiKey)?;
        Self::new(config, &key)
    }

    /// Host and path only; the query carries the key
    pub fn display_endpoint(&self) -> String {
        format!(
            "{}://{}{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or(""),
            self.url.path()
        )
    }
}

impl Transport for LiveTransport {
    fn open(
        &self,
        setup: SetupMessage,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, NetworkError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.send_queue);
        let (close_tx, close_rx) = watch::channel(false);
        let status = Arc::new(ConnectionStatus::default());

        tracing::info!(
            "Connecting generation {} to {}",
            events.generation(),
            self.display_endpoint()
        );

        let worker = ConnectionWorker {
            url: self.url.to_string(),
            setup,
            setup_timeout: self.setup_timeout,
            status: status.clone(),
            outbound: outbound_rx,
            close: close_rx,
            events,
        };
        tokio::spawn(worker.run());

        Ok(Arc::new(LiveConnection {
            status,
            outbound: outbound_tx,
            close: close_tx,
        }))
    }
}

/// Handle to one WebSocket session
pub struct LiveConnection {
    status: Arc<ConnectionStatus>,
    outbound: mpsc::Sender<MediaChunk>,
    close: watch::Sender<bool>,
}

impl LiveConnection {
    pub fn stats(&self) -> ConnectionStats {
        self.status.stats()
    }
}

impl Connection for LiveConnection {
    fn send(&self, chunk: MediaChunk) -> Result<(), NetworkError> {
        if !self.status.is_open() {
            self.status.record_dropped();
            return Err(NetworkError::NotOpen);
        }
        self.outbound.try_send(chunk).map_err(|e| {
            self.status.record_dropped();
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    NetworkError::SendFailed("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => NetworkError::NotOpen,
            }
        })
    }

    fn close(&self) {
        if self.status.transition(ConnectionState::Closed) {
            tracing::debug!("Closing connection");
        }
        let _ = self.close.send(true);
    }

    fn state(&self) -> ConnectionState {
        self.status.get()
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct ConnectionWorker {
    url: String,
    setup: SetupMessage,
    setup_timeout: Duration,
    status: Arc<ConnectionStatus>,
    outbound: mpsc::Receiver<MediaChunk>,
    close: watch::Receiver<bool>,
    events: EventSink,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let mut close = self.close.clone();
        let handshake = tokio::select! {
            result = self.handshake() => result,
            _ = closed(&mut close) => return,
        };

        let ws = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        // Closed locally while the handshake was finishing
        if !self.status.transition(ConnectionState::Open) {
            let (mut sink, _) = ws.split();
            let _ = sink.close().await;
            return;
        }
        tracing::info!("Generation {} connected", self.events.generation());
        self.events.emit(TransportEvent::Opened);

        self.pump(ws).await;
    }

    async fn handshake(&mut self) -> Result<WsStream, NetworkError> {
        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(classify_connect_error)?;

        let setup = serde_json::to_string(&self.setup)
            .map_err(|e| NetworkError::ConnectionFailed(format!("setup encoding: {}", e)))?;
        ws.send(tungstenite::Message::Text(setup.into()))
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("setup send: {}", e)))?;

        match tokio::time::timeout(self.setup_timeout, wait_for_setup(&mut ws)).await {
            Ok(Ok(())) => Ok(ws),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NetworkError::Timeout),
        }
    }

    async fn pump(mut self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let mut close = self.close.clone();

        loop {
            tokio::select! {
                _ = closed(&mut close) => {
                    let _ = sink.close().await;
                    break;
                }
                Some(chunk) = self.outbound.recv() => {
                    let text = match serde_json::to_string(&RealtimeInputMessage::new(chunk)) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::debug!("Dropping unencodable chunk: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(tungstenite::Message::Text(text.into())).await {
                        self.fail(NetworkError::ConnectionFailed(e.to_string()));
                        break;
                    }
                    self.status.record_sent();
                }
                message = stream.next() => match message {
                    Some(Ok(tungstenite::Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        match std::str::from_utf8(&data) {
                            Ok(text) => self.dispatch(text),
                            Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                        self.remote_closed(reason);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.fail(NetworkError::ConnectionFailed(e.to_string()));
                        break;
                    }
                    None => {
                        self.remote_closed(None);
                        break;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring unparseable server message: {}", e);
                return;
            }
        };
        if message.go_away.is_some() {
            tracing::info!("Server announced shutdown of generation {}", self.events.generation());
        }
        if let Some(inbound) = message.into_inbound() {
            self.events.emit(TransportEvent::Message(inbound));
        }
    }

    fn fail(&self, error: NetworkError) {
        if self.status.transition(ConnectionState::Failed) {
            tracing::warn!("Generation {} failed: {}", self.events.generation(), error);
            self.events.emit(TransportEvent::Error(error));
        }
    }

    fn remote_closed(&self, reason: Option<String>) {
        if self.status.transition(ConnectionState::Closed) {
            tracing::info!(
                "Generation {} closed by server{}",
                self.events.generation(),
                reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
            );
            self.events.emit(TransportEvent::Closed(reason));
        }
    }
}

async fn wait_for_setup(ws: &mut WsStream) -> Result<(), NetworkError> {
    while let Some(message) = ws.next().await {
        let text = match message {
            Ok(tungstenite::Message::Text(text)) => text.as_str().to_string(),
            Ok(tungstenite::Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(tungstenite::Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed during setup".to_string());
                return Err(NetworkError::Rejected(reason));
            }
            Ok(_) => continue,
            Err(e) => return Err(NetworkError::ConnectionFailed(e.to_string())),
        };
        if ServerMessage::parse(&text)
            .map(|m| m.is_setup_complete())
            .unwrap_or(false)
        {
            return Ok(());
        }
    }
    Err(NetworkError::Closed("closed during setup".to_string()))
}

fn classify_connect_error(err: tungstenite::Error) -> NetworkError {
    match &err {
        tungstenite::Error::Http(response) if response.status().is_client_error() => {
            NetworkError::Rejected(format!("HTTP {}", response.status()))
        }
        _ => NetworkError::ConnectionFailed(err.to_string()),
    }
}

/// Resolves once close has been requested or the handle is gone
async fn closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
