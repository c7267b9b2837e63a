//! MQTT broker library: connection handling, the protocol processor
//! core, and the TCP/TLS listener that wires them together.

pub mod auth;
pub mod connection;
pub mod error;
pub mod interceptor;
pub mod processor;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod tls;
