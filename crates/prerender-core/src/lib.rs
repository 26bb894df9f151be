//! # prerender-core
//!
//! Core types for the prerender gateway: the unified error enum, the
//! `RenderResult` shared by the render and cache paths, and process
//! configuration read from the environment.

mod config;
mod error;
mod types;

pub use config::{
    parse_duration, CacheBackend, GatewayConfig, RenderOptions, DEFAULT_BLOCKED_URLS,
    DEFAULT_UA_SUFFIX,
};
pub use error::{PrerenderError, Result};
pub use types::RenderResult;
