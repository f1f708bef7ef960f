//! Transports and connection establishment.

pub use self::connect::{connect_authenticated, session_addresses, system_addresses};
mod connect;

pub use self::transport::{loopback, Transport};
mod transport;

#[cfg(test)]
mod tests;
