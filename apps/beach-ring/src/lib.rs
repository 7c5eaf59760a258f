//! Beach Ring: signaling relay for peer-to-peer calls.
//!
//! Clients register an identity, see who else is online, and exchange
//! offers, answers and ICE candidates through the relay. Media never flows
//! through here; the relay only brokers the handshake and tracks which
//! identities are currently paired in a call.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod pairing;
pub mod registry;
pub mod relay;
pub mod server;
pub mod signaling;
pub mod telemetry;
pub mod websocket;

pub use relay::{Relay, RelayError, RelayStats};
pub use signaling::{ClientMessage, ServerMessage};
