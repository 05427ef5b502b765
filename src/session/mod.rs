//! Session lifecycle: generation gate, reconnect machine and the controller
//! actor that ties devices, transport and playback together

pub mod controller;
pub mod gate;
pub mod state;

pub use controller::{SessionController, SessionHandle, SessionStatus};
pub use gate::SessionGate;
pub use state::{
    Effect, Event, Phase, ReconnectMachine, CONNECT_FAILED_MESSAGE, SERVICE_UNAVAILABLE_MESSAGE,
};
