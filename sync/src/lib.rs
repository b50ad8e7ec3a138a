//! Staged bootstrap of the service-node registry and payment history.
//!
//! A fresh peer walks `Initial → Sporks → List → Votes → Finished`,
//! requesting each asset class once per peer and advancing on success or
//! quiet-timeout. A stage that times out with zero successful exchanges
//! enters `Failed` and retries after a cool-down.

mod sync;

pub use sync::{SyncStage, SyncState, SyncTargets, SyncTickContext};
