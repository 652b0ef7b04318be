//! Session lifecycle: per-client browser contexts with ring buffers, quotas,
//! and idle reaping.

pub mod accounting;
pub mod manager;
pub mod ring;
pub mod session;

pub use {
    accounting::{AccountantSettings, AccountantSnapshot, ResourceAccountants},
    manager::{ConsoleHook, ManagerSettings, SessionManager, SessionManagerRebuilder},
    ring::{ConsoleEntry, ConsoleLevel, NetworkEntry, RingBuffer, SourceLocation},
    session::{Session, SessionOptions},
};
