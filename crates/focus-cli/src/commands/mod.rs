pub mod common;
pub mod queue;
pub mod session;
pub mod sync;
pub mod task;
