//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntryState`: lifecycle of a single frontier entry (pending, in flight, retry scheduled, done, failed)
//! - `RunState`: lifecycle of a whole crawl run

mod entry_state;
mod run_state;

// Re-export main types
pub use entry_state::EntryState;
pub use run_state::RunState;
