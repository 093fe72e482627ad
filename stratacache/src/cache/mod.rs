//! Cache orchestration across the memory and disk tiers.
//!
//! [`Cache`] is the public entry point. The remaining modules are its
//! moving parts:
//!
//! - [`queue`]: the serial disk I/O thread
//! - [`sequencer`]: keeps removals and stores from being undone by earlier
//!   writes and reads
//! - [`task`]: awaitable results of disk work
//! - `cleanup`: the recurring eviction scheduler

mod cleanup;
pub mod queue;
pub mod sequencer;
mod system;
pub mod task;

pub use queue::DiskQueue;
pub use sequencer::{ReadTicket, WriteSequencer, WriteTicket};
pub use system::{Cache, IO_THREAD_NAME};
pub use task::DiskTask;
