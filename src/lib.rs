#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod config;
mod crypto;
pub mod engine;
pub mod error;
mod frame;
mod handshake;
pub mod ipc;
pub mod link;
mod noise;
mod proxy;
mod session;
mod split;
mod supervisor;

pub use config::{ProxyType, TunnelConfig};
pub use engine::Engine;
pub use error::Error;
