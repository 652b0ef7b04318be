//! Chromium driver glue: detection, launch, pooled browser contexts, and the
//! leaf operations the gateway's tools execute.

pub mod detect;
pub mod error;
pub mod factory;
pub mod launcher;
pub mod ops;
pub mod pool;
pub mod snapshot;
pub mod types;

pub use {
    error::{BrowserError, infer_code},
    factory::{ChromiumFactory, ContextFactory, ContextHandle},
    launcher::{BrowserHandle, LaunchSettings},
    pool::{ContextPool, PoolSettings, PoolStats, PooledContext},
    types::{ContextFingerprint, Viewport},
};
