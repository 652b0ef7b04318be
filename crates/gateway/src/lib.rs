//! The gateway runtime: tool dispatch, scheduling, transports, and wiring.

pub mod dispatcher;
pub mod har;
pub mod macros;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod stdio;
pub mod tools;
pub mod ws;

pub use {
    dispatcher::{Dispatcher, Tool, ToolRegistry},
    scheduler::{ExecutionScheduler, SchedulerSettings},
    server::run_server,
    state::{GatewayState, build_state},
    stdio::run_stdio,
};
