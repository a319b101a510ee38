//! Background task runtime.
//!
//! - [`task`]: worker threads, task ids and the cooperative alive flag

pub mod task;
