//! Network layer: TLS material loading for the listener.

pub mod tls;
