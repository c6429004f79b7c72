//! Lifecycle management
//!
//! Binds the inbound listener, serves until a termination signal and then
//! drains in-flight connections within a grace period.

pub mod listener;
pub mod shutdown;

pub use listener::Server;
pub use shutdown::{ShutdownReport, wait_for_signal};
