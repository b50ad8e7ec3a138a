//! State enums for remote service nodes and the local activation machine.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a registered service node, as evaluated by the
/// periodic check against time, chain state, and liveness proofs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Announced and pinged, but the first ping is younger than the
    /// pre-enable window.
    PreEnabled,
    /// Fully active; eligible for payment election.
    Enabled,
    /// No ping within the expiration window.
    Expired,
    /// The collateral UTXO no longer exists; terminal.
    OutpointSpent,
    /// Protocol version below the payment minimum.
    UpdateRequired,
    /// Watchdog is active network-wide and this node's last watchdog vote
    /// is too old.
    WatchdogExpired,
    /// Silent for so long that only a fresh announce can revive it.
    NewStartRequired,
    /// Banned by proof-of-service; sits out until the ban height.
    PoSeBan,
}

impl LifecycleState {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// States from which the local node may auto-start without operator
    /// intervention when it finds its own entry in the registry.
    pub fn valid_for_auto_start(&self) -> bool {
        matches!(
            self,
            Self::Enabled | Self::PreEnabled | Self::Expired | Self::WatchdogExpired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreEnabled => "PRE_ENABLED",
            Self::Enabled => "ENABLED",
            Self::Expired => "EXPIRED",
            Self::OutpointSpent => "OUTPOINT_SPENT",
            Self::UpdateRequired => "UPDATE_REQUIRED",
            Self::WatchdogExpired => "WATCHDOG_EXPIRED",
            Self::NewStartRequired => "NEW_START_REQUIRED",
            Self::PoSeBan => "POSE_BAN",
        }
    }
}

/// The state of the local node's own activation machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    /// Just started, not yet evaluated.
    Initial,
    /// Waiting for the blockchain to finish syncing.
    SyncInProcess,
    /// Collateral exists but lacks the required confirmations.
    InputTooNew,
    /// Something about the environment disqualifies us; see the status
    /// string for the reason.
    NotCapable,
    /// Activated; the pinger is running.
    Started,
}

impl ActivationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::SyncInProcess => "SYNC_IN_PROCESS",
            Self::InputTooNew => "INPUT_TOO_NEW",
            Self::NotCapable => "NOT_CAPABLE",
            Self::Started => "STARTED",
        }
    }
}
