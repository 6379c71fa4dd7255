//! Clients for services behind the gateway.

mod service;

pub use service::*;
