//! Durable records: the append-only History Log and snapshot export files.

mod history;
mod snapshot;

pub use history::{read_history, HistoryEntry, HistoryLog, PROCESS_DOMAIN};
pub use snapshot::{read_snapshot, write_snapshot};
