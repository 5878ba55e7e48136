#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod backoff;
mod buffer;
pub mod bus;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
mod guard;
mod heartbeat;
pub mod platform;
pub mod plugin;
pub mod protocol;
mod timer;
pub mod transform;
pub mod transport;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::config::{Config, ReconnectConfig};
pub use crate::connection::{Client, ClientBuilder, ReadyState};
