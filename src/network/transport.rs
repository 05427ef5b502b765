//! Session transport abstraction
//!
//! A [`Transport`] opens one [`Connection`] per session generation. Opening
//! never blocks: the connection starts in `Connecting` and reports progress
//! through an [`EventSink`] tagged with the generation id, so the controller
//! can ignore events from connections it has already torn down.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::protocol::{InboundMessage, MediaChunk, SetupMessage};

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

/// Asynchronous report from a connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Setup acknowledged; media may flow
    Opened,
    Message(InboundMessage),
    /// Connect failure, rejection or mid-stream error
    Error(NetworkError),
    /// Remote close, with the reason if one was given
    Closed(Option<String>),
}

/// A transport event tagged with the generation that produced it
#[derive(Debug, Clone)]
pub struct GenerationEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Where a connection delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<GenerationEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<GenerationEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the receiver is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(GenerationEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens connections to the live endpoint
pub trait Transport: Send + Sync {
    /// Begin connecting. Errors here are configuration problems; everything
    /// that happens on the wire is reported through `events`.
    fn open(
        &self,
        setup: SetupMessage,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>, NetworkError>;
}

/// One live connection
pub trait Connection: Send + Sync {
    /// Enqueue a chunk. Fails without queueing unless the connection is open.
    fn send(&self, chunk: MediaChunk) -> Result<(), NetworkError>;

    /// Idempotent
    fn close(&self);

    fn state(&self) -> ConnectionState;
}

/// Connection state plus send counters, shared by transport implementations
#[derive(Debug)]
pub struct ConnectionStatus {
    state: Mutex<ConnectionState>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connecting),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

impl ConnectionStatus {
    pub fn get(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` unless already terminal; returns whether it changed
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Closed | ConnectionState::Failed => false,
            current if current == next => false,
            _ => {
                *state = next;
                true
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.get() == ConnectionState::Open
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            chunks_sent: self.sent.load(Ordering::Relaxed),
            chunks_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub chunks_sent: u64,
    pub chunks_dropped: u64,
}
