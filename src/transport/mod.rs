//! Connection transport and task scheduling
//!
//! The room core never touches a socket directly: it consumes an
//! already-upgraded connection through the [`connection::FrameSource`] /
//! [`connection::FrameSink`] capabilities, and all per-client IO runs on the
//! fixed-capacity [`task_pool::TaskPool`] so connection count stays decoupled
//! from task count.

pub mod connection;
pub mod task_pool;

pub use connection::{split_socket, FrameSink, FrameSource, Incoming, Outbound};
pub use task_pool::{TaskPool, TaskSlot};
