//! Network subsystem for the live WebSocket transport

pub mod live;
pub mod transport;

pub use live::{LiveConnection, LiveTransport};
pub use transport::{
    Connection, ConnectionState, ConnectionStats, EventSink, GenerationEvent, Transport,
    TransportEvent,
};
