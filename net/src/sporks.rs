//! Consumed feature flags.
//!
//! Sporks are distributed by a separate subsystem; we only read them.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SporkFlags {
    /// When set, only nodes at the newer payment protocol are paid.
    pub pay_updated_nodes: bool,
    /// When set, blocks paying the wrong service node are rejected;
    /// otherwise the longest chain is accepted with a warning.
    pub payment_enforcement: bool,
}

impl Default for SporkFlags {
    fn default() -> Self {
        Self {
            pay_updated_nodes: false,
            payment_enforcement: true,
        }
    }
}
