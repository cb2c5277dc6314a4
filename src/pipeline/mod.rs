//! Long-running engines.
//!
//! - `SyncEngine`: catalog sync jobs and their lifecycle
//! - `MonitorScheduler`: adaptive stock-check sweeps

pub mod scheduler;
pub mod sync;

pub use scheduler::{
    CheckOutcome, MonitorScheduler, SweepReport, Ticker, effective_frequency, is_due,
};
pub use sync::{ABANDONED_MESSAGE, SyncEngine, SyncTicket};
