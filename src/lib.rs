#![forbid(unsafe_code)]

//! `cai-acp-proxy`: stdio ACP proxy between a host editor and an agent
//! running inside a workspace container.

pub mod acp;
pub mod config;
pub mod errors;
pub mod interrupt;
pub mod proxy;
pub mod runner;
pub mod translate;

pub use config::ProxyConfig;
pub use errors::{AppError, Result};
