//! One registered service node and its lifecycle state machine.

use onyx_chain::ChainView;
use onyx_crypto::{sha256d, sha256d_multi, U256};
use onyx_messages::{Announce, Ping};
use onyx_types::params::*;
use onyx_types::{
    Amount, BlockHash, LifecycleState, Outpoint, PublicKey, Script, Signature,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::PaymentsView;

/// Per-check environment handed to the state machine.
pub struct CheckContext<'a> {
    pub now: i64,
    pub chain: &'a dyn ChainView,
    /// Node-list sync stage finished; before that, silent nodes wait for
    /// a ping instead of expiring.
    pub list_synced: bool,
    /// Watchdog votes have been seen recently network-wide.
    pub watchdog_active: bool,
    pub min_payment_proto: u32,
    /// The local service key, when this daemon runs a node.
    pub our_service_pubkey: Option<&'a PublicKey>,
    /// Current registry size, used to size PoSe bans.
    pub registry_size: usize,
}

/// A registered service node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceNodeEntry {
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub service_pubkey: PublicKey,
    pub last_ping: Option<Ping>,
    /// Announce signature under the collateral key.
    pub sig: Signature,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub state: LifecycleState,
    pub last_checked: i64,
    pub last_watchdog_vote: i64,
    pub last_paid_height: u32,
    pub last_paid_time: i64,
    /// Height of the block holding the collateral; 0 until first resolved.
    pub collateral_height: u32,
    pub pose_score: i16,
    pub pose_ban_height: u32,
}

impl ServiceNodeEntry {
    /// Build an entry from an accepted announce.
    ///
    /// `starts_expired` carries the announce-check result for a missing or
    /// unverifiable embedded ping.
    pub fn from_announce(ann: &Announce, starts_expired: bool) -> Self {
        Self {
            outpoint: ann.outpoint,
            addr: ann.addr,
            collateral_pubkey: ann.collateral_pubkey,
            service_pubkey: ann.service_pubkey,
            last_ping: ann.last_ping.clone(),
            sig: ann.sig,
            sig_time: ann.sig_time,
            protocol_version: ann.protocol_version,
            state: if starts_expired {
                LifecycleState::Expired
            } else {
                LifecycleState::Enabled
            },
            last_checked: 0,
            last_watchdog_vote: ann.sig_time,
            last_paid_height: 0,
            last_paid_time: 0,
            collateral_height: 0,
            pose_score: 0,
            pose_ban_height: 0,
        }
    }

    /// Reconstruct the wire announce for this entry (list serving and the
    /// seen cache keep the full form around).
    pub fn to_announce(&self) -> Announce {
        Announce {
            outpoint: self.outpoint,
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            service_pubkey: self.service_pubkey,
            sig: self.sig,
            sig_time: self.sig_time,
            protocol_version: self.protocol_version,
            last_ping: self.last_ping.clone(),
            recovery: false,
        }
    }

    pub fn payee_script(&self) -> Script {
        Script::p2pkh(&self.collateral_pubkey)
    }

    // -- Liveness predicates ------------------------------------------------

    pub fn is_broadcasted_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Whether the last ping is younger than `seconds` at time `at`.
    pub fn is_pinged_within(&self, seconds: i64, at: i64) -> bool {
        match &self.last_ping {
            None => false,
            Some(ping) => at - ping.sig_time < seconds,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == LifecycleState::Enabled
    }

    pub fn is_pre_enabled(&self) -> bool {
        self.state == LifecycleState::PreEnabled
    }

    pub fn is_pose_banned(&self) -> bool {
        self.state == LifecycleState::PoSeBan
    }

    /// Verified by enough PoSe exchanges to be immune to same-address bans.
    /// Relies on the score, not the state.
    pub fn is_pose_verified(&self) -> bool {
        self.pose_score <= -POSE_BAN_MAX_SCORE
    }

    pub fn is_outpoint_spent(&self) -> bool {
        self.state == LifecycleState::OutpointSpent
    }

    pub fn is_update_required(&self) -> bool {
        self.state == LifecycleState::UpdateRequired
    }

    pub fn is_new_start_required(&self) -> bool {
        self.state == LifecycleState::NewStartRequired
    }

    /// Eligible for the payment election. Identical to `Enabled` since the
    /// sentinel-flag relaxation is permanently off.
    pub fn is_valid_for_payment(&self) -> bool {
        self.is_enabled()
    }

    pub fn increase_pose_score(&mut self) {
        if self.pose_score < POSE_BAN_MAX_SCORE {
            self.pose_score += 1;
        }
    }

    pub fn decrease_pose_score(&mut self) {
        if self.pose_score > -POSE_BAN_MAX_SCORE {
            self.pose_score -= 1;
        }
    }

    // -- Election score -----------------------------------------------------

    /// Deterministic rank score against a block hash.
    ///
    /// The distance between `SHA256d(block_hash)` and
    /// `SHA256d(block_hash || txid + vout)` as 256-bit integers; the
    /// furthest wins the election. Must produce identical results on every
    /// peer.
    pub fn calculate_score(&self, block_hash: &BlockHash) -> U256 {
        let aux = U256::from_le_bytes(*self.outpoint.txid.as_bytes())
            .wrapping_add_u32(self.outpoint.vout);
        let hash2 = U256::from_be_bytes(sha256d(block_hash.as_bytes()));
        let hash3 = U256::from_be_bytes(sha256d_multi(&[
            block_hash.as_bytes(),
            &aux.to_le_bytes(),
        ]));
        hash3.abs_diff(hash2)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Evaluate the lifecycle state.
    ///
    /// Runs at most once per `CHECK_SECONDS` unless forced. Transitions in
    /// priority order: spent collateral, PoSe ban entry/exit, protocol
    /// floor, silence thresholds, watchdog, then the pre-enable window.
    pub fn check(&mut self, ctx: &CheckContext, force: bool) {
        if !force && ctx.now - self.last_checked < CHECK_SECONDS {
            return;
        }
        self.last_checked = ctx.now;

        // Once spent, stop doing the checks.
        if self.is_outpoint_spent() {
            return;
        }

        let Some(tip) = ctx.chain.tip_height() else {
            return;
        };

        if ctx.chain.utxo(&self.outpoint).is_none() {
            self.state = LifecycleState::OutpointSpent;
            tracing::debug!(node = %self.outpoint.to_short_string(), "collateral spent");
            return;
        }

        if self.is_pose_banned() {
            if tip < self.pose_ban_height {
                return;
            }
            // Back in the list, but on the edge: it will be banned again
            // quickly unless verify exchanges strengthen its position.
            tracing::info!(node = %self.outpoint.to_short_string(), "unbanned, back in list");
            self.decrease_pose_score();
        } else if self.pose_score >= POSE_BAN_MAX_SCORE {
            self.state = LifecycleState::PoSeBan;
            // Ban for the whole payment cycle.
            self.pose_ban_height = tip + ctx.registry_size as u32;
            tracing::info!(
                node = %self.outpoint.to_short_string(),
                until = self.pose_ban_height,
                "PoSe banned"
            );
            return;
        }

        let prev_state = self.state;
        let ours = ctx.our_service_pubkey == Some(&self.service_pubkey);

        // Below the payment floor, or our own node waiting for a re-announce
        // after an upgrade.
        let requires_update = self.protocol_version < ctx.min_payment_proto
            || (ours && self.protocol_version < PROTOCOL_VERSION);
        if requires_update {
            self.state = LifecycleState::UpdateRequired;
            self.log_transition(prev_state);
            return;
        }

        // Keep old nodes around during startup; give them a chance to ping.
        let wait_for_ping = !ctx.list_synced && !self.is_pinged_within(MIN_PING_SECONDS, ctx.now);

        if wait_for_ping && !ours {
            // Already written off before the initial sync finished; leave it.
            if matches!(
                self.state,
                LifecycleState::Expired
                    | LifecycleState::WatchdogExpired
                    | LifecycleState::NewStartRequired
            ) {
                return;
            }
        }

        if !wait_for_ping || ours {
            if !self.is_pinged_within(NEW_START_REQUIRED_SECONDS, ctx.now) {
                self.state = LifecycleState::NewStartRequired;
                self.log_transition(prev_state);
                return;
            }

            let watchdog_expired = ctx.watchdog_active
                && ctx.now - self.last_watchdog_vote > WATCHDOG_MAX_SECONDS;
            if watchdog_expired {
                self.state = LifecycleState::WatchdogExpired;
                self.log_transition(prev_state);
                return;
            }

            if !self.is_pinged_within(EXPIRATION_SECONDS, ctx.now) {
                self.state = LifecycleState::Expired;
                self.log_transition(prev_state);
                return;
            }
        }

        let first_ping_age = self
            .last_ping
            .as_ref()
            .map(|ping| ping.sig_time - self.sig_time)
            .unwrap_or(0);
        if first_ping_age < MIN_PING_SECONDS {
            self.state = LifecycleState::PreEnabled;
            self.log_transition(prev_state);
            return;
        }

        self.state = LifecycleState::Enabled;
        self.log_transition(prev_state);
    }

    fn log_transition(&self, prev: LifecycleState) {
        if prev != self.state {
            tracing::debug!(
                node = %self.outpoint.to_short_string(),
                state = self.state.as_str(),
                "state changed"
            );
        }
    }

    /// Apply a newer announce for the same collateral.
    ///
    /// Returns `false` when the announce is not actually newer (and not a
    /// recovery replay).
    pub fn update_from_announce(&mut self, ann: &Announce) -> bool {
        if ann.sig_time <= self.sig_time && !ann.recovery {
            return false;
        }
        self.service_pubkey = ann.service_pubkey;
        self.sig_time = ann.sig_time;
        self.sig = ann.sig;
        self.protocol_version = ann.protocol_version;
        self.addr = ann.addr;
        self.pose_score = 0;
        self.pose_ban_height = 0;
        self.last_checked = 0;
        true
    }

    // -- Chain-derived data -------------------------------------------------

    /// Confirmations of the collateral output, memoized by block height.
    /// `None` while the chain has no tip or the UTXO is unknown.
    pub fn collateral_age(&mut self, chain: &dyn ChainView) -> Option<u32> {
        let tip = chain.tip_height()?;
        if self.collateral_height == 0 {
            self.collateral_height = chain.utxo(&self.outpoint)?.height;
        }
        Some(tip.saturating_sub(self.collateral_height))
    }

    /// Scan recent coinbases for the newest payment to this node's script,
    /// limited to `max_scan_back` blocks below `tip`.
    ///
    /// Only blocks whose recorded payee set credits this script with at
    /// least 2 votes are read from disk.
    pub fn update_last_paid(
        &mut self,
        chain: &dyn ChainView,
        history: &dyn PaymentsView,
        tip: u32,
        max_scan_back: u32,
    ) {
        let payee = self.payee_script();
        let mut height = tip;
        for _ in 0..max_scan_back {
            if height <= self.last_paid_height || height == 0 {
                return;
            }
            if history.block_has_payee(height, &payee, 2) {
                let Some(coinbase) = chain.coinbase_at(height) else {
                    height -= 1;
                    continue;
                };
                let payment: Amount =
                    onyx_chain::service_node_payment(height, coinbase.total_out());
                let paid = coinbase
                    .outputs
                    .iter()
                    .any(|out| out.script == payee && out.value == payment);
                if paid {
                    self.last_paid_height = height;
                    self.last_paid_time = chain.block_time_at(height).unwrap_or(0);
                    tracing::debug!(
                        node = %self.outpoint.to_short_string(),
                        height,
                        "found last paid block"
                    );
                    return;
                }
            }
            height -= 1;
        }
    }

    /// Read-only snapshot handed out by registry queries.
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            outpoint: self.outpoint,
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            service_pubkey: self.service_pubkey,
            sig_time: self.sig_time,
            last_ping_time: self.last_ping.as_ref().map(|p| p.sig_time).unwrap_or(0),
            last_paid_height: self.last_paid_height,
            last_paid_time: self.last_paid_time,
            state: self.state,
            protocol_version: self.protocol_version,
            pose_score: self.pose_score,
        }
    }
}

/// Immutable per-node view for election, UI, and vote validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub service_pubkey: PublicKey,
    pub sig_time: i64,
    pub last_ping_time: i64,
    pub last_paid_height: u32,
    pub last_paid_time: i64,
    pub state: LifecycleState,
    pub protocol_version: u32,
    pub pose_score: i16,
}
