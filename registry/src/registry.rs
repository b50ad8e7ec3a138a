//! The node directory: gossip ingest, seen caches, list serving, pruning.

use crate::entry::{CheckContext, NodeInfo, ServiceNodeEntry};
use crate::{GossipContext, IngestResult, PaymentsView, RejectReason};
use onyx_chain::ChainView;
use onyx_crypto::U256;
use onyx_messages::{Announce, Inv, InvKind, MsgHash, Ping, Verify, WireMessage};
use onyx_net::{PeerInfo, Transport};
use onyx_sync::SyncState;
use onyx_types::params::*;
use onyx_types::{Amount, NetworkId, Outpoint, PublicKey, Script};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};

/// Misbehavior points for spamming full-list requests.
const DSEG_SPAM_DOS: u8 = 34;

/// The directory of all known service nodes plus the gossip bookkeeping
/// around it. One instance per process, guarded by a single lock at the
/// subsystem level; chain and transport are passed into each call.
#[derive(Default, Serialize, Deserialize)]
pub struct Registry {
    nodes: BTreeMap<Outpoint, ServiceNodeEntry>,

    /// Announce hash → (first seen, announce).
    pub(crate) seen_announces: HashMap<MsgHash, (i64, Announce)>,
    /// Ping hash → ping.
    pub(crate) seen_pings: HashMap<MsgHash, Ping>,
    /// Verify hash → verify (broadcast stage only).
    pub(crate) seen_verifies: HashMap<MsgHash, Verify>,

    /// Peers that asked us for the full list → retry-allowed time.
    asked_us_for_list: HashMap<SocketAddr, i64>,
    /// Peers we asked for the full list → retry-allowed time.
    we_asked_for_list: HashMap<SocketAddr, i64>,
    /// Entries we asked peers for → per-peer retry-allowed time.
    we_asked_for_entry: HashMap<Outpoint, HashMap<SocketAddr, i64>>,
    /// Addresses we sent a verify request to, by the request we sent.
    pub(crate) we_asked_for_verification: HashMap<SocketAddr, Verify>,

    /// Recovery: announce hash → (reply deadline, peers asked).
    recovery_requests: HashMap<MsgHash, (i64, HashSet<SocketAddr>)>,
    /// Recovery: announce hash → good replies collected.
    recovery_good_replies: HashMap<MsgHash, Vec<Announce>>,
    /// Connections the subsystem should open to fetch recovery announces.
    scheduled_recovery_connects: Vec<(SocketAddr, MsgHash)>,

    last_watchdog_vote: i64,
    /// Mixing-queue counter carried in announces of older wallets; kept
    /// for persistence compatibility.
    pub dsq_count: i64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Queries ------------------------------------------------------------

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn has(&self, outpoint: &Outpoint) -> bool {
        self.nodes.contains_key(outpoint)
    }

    pub fn count_total(&self, min_proto: u32) -> usize {
        self.nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto)
            .count()
    }

    pub fn count_enabled(&self, min_proto: u32) -> usize {
        self.nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto && n.is_enabled())
            .count()
    }

    pub fn node_info(&self, outpoint: &Outpoint) -> Option<NodeInfo> {
        self.nodes.get(outpoint).map(|n| n.info())
    }

    pub fn find_by_service_key(&self, key: &PublicKey) -> Option<NodeInfo> {
        self.nodes
            .values()
            .find(|n| &n.service_pubkey == key)
            .map(|n| n.info())
    }

    pub fn find_by_payee(&self, payee: &Script) -> Option<NodeInfo> {
        self.nodes
            .values()
            .find(|n| &n.payee_script() == payee)
            .map(|n| n.info())
    }

    /// Full immutable view for election and UI.
    pub fn enumerate(&self) -> Vec<NodeInfo> {
        self.nodes.values().map(|n| n.info()).collect()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &ServiceNodeEntry> {
        self.nodes.values()
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut ServiceNodeEntry> {
        self.nodes.values_mut()
    }

    pub(crate) fn entry(&self, outpoint: &Outpoint) -> Option<&ServiceNodeEntry> {
        self.nodes.get(outpoint)
    }

    pub(crate) fn entry_mut(&mut self, outpoint: &Outpoint) -> Option<&mut ServiceNodeEntry> {
        self.nodes.get_mut(outpoint)
    }

    pub fn seen_announce(&self, hash: &MsgHash) -> Option<&Announce> {
        self.seen_announces.get(hash).map(|(_, ann)| ann)
    }

    pub fn seen_ping(&self, hash: &MsgHash) -> Option<&Ping> {
        self.seen_pings.get(hash)
    }

    // -- Watchdog -----------------------------------------------------------

    pub fn update_watchdog_vote(&mut self, outpoint: &Outpoint, now: i64) {
        if let Some(entry) = self.nodes.get_mut(outpoint) {
            entry.last_watchdog_vote = now;
            self.last_watchdog_vote = now;
        }
    }

    pub fn is_watchdog_active(&self, now: i64) -> bool {
        now - self.last_watchdog_vote <= WATCHDOG_MAX_SECONDS
    }

    // -- Announce ingest ----------------------------------------------------

    /// Apply (or reject) a remote announce. Exact semantics here are
    /// consensus-relevant: every honest peer must converge on the same
    /// registry contents.
    pub fn ingest_announce(
        &mut self,
        src: Option<SocketAddr>,
        ann: Announce,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) -> IngestResult {
        let hash = ann.hash();
        let short = ann.outpoint.to_short_string();

        if self.seen_announces.contains_key(&hash) && !ann.recovery {
            return self.note_seen_announce(src, &ann, hash, chain, ctx, sync);
        }
        self.seen_announces.insert(hash, (ctx.now, ann.clone()));

        tracing::debug!(node = %short, "new announce");

        let starts_expired = match simple_check(&ann, chain, ctx) {
            Ok(starts_expired) => starts_expired,
            Err((dos, reason)) => {
                tracing::debug!(node = %short, reason = reason.as_str(), "announce failed checks");
                return IngestResult::rejected(dos, reason);
            }
        };

        if let Some(existing_sig_time) = self.nodes.get(&ann.outpoint).map(|e| e.sig_time) {
            let old_hash = self
                .nodes
                .get(&ann.outpoint)
                .map(|e| e.to_announce().hash());
            let result = self.update_existing(&ann, existing_sig_time, chain, ctx, sync, transport);
            if result.is_accepted() {
                if let Some(old_hash) = old_hash {
                    if old_hash != hash {
                        self.seen_announces.remove(&old_hash);
                    }
                }
            }
            return result;
        }

        match check_outpoint(&ann, chain, ctx) {
            Ok(()) => {}
            Err(CollateralCheck::Transient(reason)) => {
                // Not the announcer's fault; drop the cached copy so a
                // redelivery retries the lookup.
                self.seen_announces.remove(&hash);
                return IngestResult::rejected(0, reason);
            }
            Err(CollateralCheck::Reject(dos, reason)) => {
                tracing::debug!(node = %short, reason = reason.as_str(), "collateral check failed");
                return IngestResult::rejected(dos, reason);
            }
        }

        let mut entry = ServiceNodeEntry::from_announce(&ann, starts_expired);
        self.attach_announce_ping(&mut entry, &ann, chain);

        if ctx.is_our_service_key(&ann.service_pubkey) {
            // Our own announce came back from the network.
            entry.pose_score = -POSE_BAN_MAX_SCORE;
            if ann.protocol_version != PROTOCOL_VERSION {
                // Stale broadcast from a previous install; the operator must
                // re-activate. Don't add, don't relay, don't punish the peer.
                tracing::warn!(
                    announced = ann.protocol_version,
                    running = PROTOCOL_VERSION,
                    "own announce carries a different protocol version; re-activation required"
                );
                return IngestResult::rejected(0, RejectReason::WrongLocalVersion);
            }
            tracing::info!(node = %short, "remote activation: our announce is in the registry");
        }

        tracing::info!(node = %short, addr = %ann.addr, count = self.nodes.len() + 1, "registered service node");
        self.nodes.insert(ann.outpoint, entry);
        sync.note_list_item(ctx.now);
        transport.relay(Inv::new(InvKind::Announce, hash));
        IngestResult::Accepted
    }

    /// Duplicate announce: refresh the seen stamp when the node is close
    /// to dropping out, and collect recovery replies we solicited.
    fn note_seen_announce(
        &mut self,
        src: Option<SocketAddr>,
        ann: &Announce,
        hash: MsgHash,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
    ) -> IngestResult {
        if let Some((first_seen, _)) = self.seen_announces.get_mut(&hash) {
            // Less than two pings left before the node becomes
            // non-recoverable; treat the duplicate as fresh evidence.
            if ctx.now - *first_seen > NEW_START_REQUIRED_SECONDS - MIN_PING_SECONDS * 2 {
                *first_seen = ctx.now;
                sync.note_list_item(ctx.now);
            }
        }

        let Some(src) = src else {
            return IngestResult::AcceptedSeen;
        };
        let solicited = self
            .recovery_requests
            .get(&hash)
            .is_some_and(|(deadline, peers)| ctx.now < *deadline && peers.contains(&src));
        if solicited {
            if let Some((_, peers)) = self.recovery_requests.get_mut(&hash) {
                // One reply per asked peer.
                peers.remove(&src);
            }
            let cached_ping_time = self
                .seen_announces
                .get(&hash)
                .and_then(|(_, cached)| cached.last_ping.as_ref())
                .map(|p| p.sig_time)
                .unwrap_or(0);
            let newer_ping = ann
                .last_ping
                .as_ref()
                .is_some_and(|p| p.sig_time > cached_ping_time);
            if newer_ping {
                // Project the state this announce would produce; count it as
                // a good reply when the node could auto-start from it.
                let mut probe = ServiceNodeEntry::from_announce(ann, false);
                probe.check(
                    &CheckContext {
                        now: ctx.now,
                        chain,
                        list_synced: sync.is_list_synced(),
                        watchdog_active: false,
                        min_payment_proto: ctx.min_payment_proto,
                        our_service_pubkey: None,
                        registry_size: self.nodes.len(),
                    },
                    true,
                );
                if probe.state.valid_for_auto_start() {
                    tracing::debug!(node = %ann.outpoint.to_short_string(), peer = %src, "good recovery reply");
                    self.recovery_good_replies
                        .entry(hash)
                        .or_default()
                        .push(ann.clone());
                }
            }
        }
        IngestResult::AcceptedSeen
    }

    fn update_existing(
        &mut self,
        ann: &Announce,
        existing_sig_time: i64,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) -> IngestResult {
        let short = ann.outpoint.to_short_string();

        if ann.sig_time == existing_sig_time && !ann.recovery {
            // Legit duplicate that slipped past the seen cache (restart).
            return IngestResult::AcceptedSeen;
        }
        if ann.sig_time < existing_sig_time {
            tracing::debug!(node = %short, "announce older than known entry");
            return IngestResult::rejected(0, RejectReason::Stale);
        }

        let registry_size = self.nodes.len();
        let watchdog_active = sync.is_synced() && self.is_watchdog_active(ctx.now);
        let list_synced = sync.is_list_synced();
        let ours = ctx.is_our_service_key(&ann.service_pubkey);

        // Validate the embedded ping up front; the entry borrow below must
        // not overlap the seen-pings map.
        let valid_ping = ann
            .last_ping
            .as_ref()
            .filter(|p| {
                chain.height_of(&p.block_hash).is_some() && p.verify_sig(&ann.service_pubkey)
            })
            .cloned();

        let check_ctx = CheckContext {
            now: ctx.now,
            chain,
            list_synced,
            watchdog_active,
            min_payment_proto: ctx.min_payment_proto,
            our_service_pubkey: ctx.our_service_pubkey.as_ref(),
            registry_size,
        };

        let Some(entry) = self.nodes.get_mut(&ann.outpoint) else {
            return IngestResult::rejected(0, RejectReason::UnknownNode);
        };
        entry.check(&check_ctx, false);

        if entry.is_pose_banned() {
            tracing::debug!(node = %short, "rejecting announce for banned node");
            return IngestResult::rejected(0, RejectReason::PoseBanned);
        }

        // Collateral association was validated when the entry was created;
        // after that the keys only need to match.
        if entry.collateral_pubkey != ann.collateral_pubkey {
            return IngestResult::rejected(33, RejectReason::CollateralKeyMismatch);
        }

        if !ann.verify_sig() {
            return IngestResult::rejected(100, RejectReason::BadSignature);
        }

        if entry.is_broadcasted_within(MIN_ANNOUNCE_SECONDS, ctx.now) && !ours {
            // Too fresh; ignore without penalty.
            return IngestResult::rejected(0, RejectReason::Stale);
        }

        if !entry.update_from_announce(ann) {
            return IngestResult::rejected(0, RejectReason::Stale);
        }
        if ours {
            entry.pose_score = -POSE_BAN_MAX_SCORE;
        }
        if let Some(ping) = &valid_ping {
            entry.last_ping = Some(ping.clone());
        }
        entry.check(&check_ctx, true);

        if let Some(ping) = valid_ping {
            self.seen_pings.insert(ping.hash(), ping);
        }

        tracing::info!(node = %short, addr = %ann.addr, "updated service node from announce");
        sync.note_list_item(ctx.now);
        transport.relay(Inv::new(InvKind::Announce, ann.hash()));
        IngestResult::Accepted
    }

    /// Validate and attach the announce's embedded ping to an entry.
    fn attach_announce_ping(
        &mut self,
        entry: &mut ServiceNodeEntry,
        ann: &Announce,
        chain: &dyn ChainView,
    ) {
        let Some(ping) = &ann.last_ping else {
            return;
        };
        let block_known = chain.height_of(&ping.block_hash).is_some();
        if block_known && ping.verify_sig(&ann.service_pubkey) {
            entry.last_ping = Some(ping.clone());
            self.seen_pings.insert(ping.hash(), ping.clone());
        }
    }

    // -- Ping ingest --------------------------------------------------------

    pub fn ingest_ping(
        &mut self,
        src: Option<SocketAddr>,
        ping: Ping,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) -> IngestResult {
        let hash = ping.hash();
        let short = ping.outpoint.to_short_string();

        if self.seen_pings.contains_key(&hash) {
            return IngestResult::AcceptedSeen;
        }
        self.seen_pings.insert(hash, ping.clone());
        tracing::debug!(node = %short, "new ping");

        if ping.sig_time > ctx.now + FUTURE_DRIFT_SECONDS {
            return IngestResult::rejected(1, RejectReason::FutureTime);
        }

        let Some(ping_height) = chain.height_of(&ping.block_hash) else {
            // We may be stuck or forked; don't punish, just don't accept.
            tracing::debug!(node = %short, "ping references unknown block");
            return IngestResult::rejected(0, RejectReason::UnknownBlock);
        };

        let registry_size = self.nodes.len();
        let watchdog_active = sync.is_synced() && self.is_watchdog_active(ctx.now);
        let list_synced = sync.is_list_synced();

        let Some(entry) = self.nodes.get_mut(&ping.outpoint) else {
            // Unknown node: maybe we missed its announce; ask the source.
            if let Some(src) = src {
                self.ask_for_entry(src, ping.outpoint, ctx.now, transport);
            }
            return IngestResult::rejected(0, RejectReason::UnknownNode);
        };

        if entry.is_new_start_required() {
            // Too late; only a fresh announce revives this node.
            return IngestResult::rejected(0, RejectReason::NodeNotRunning);
        }
        if entry.is_update_required() {
            return IngestResult::rejected(0, RejectReason::OutdatedProtocol);
        }

        if let Some(tip) = chain.tip_height() {
            if ping_height < tip.saturating_sub(PING_MAX_AGE_BLOCKS) {
                tracing::debug!(node = %short, ping_height, tip, "ping block too old");
                return IngestResult::rejected(0, RejectReason::PingTooOld);
            }
        }

        // Replay/spam guard: only accept when the previous ping is at least
        // one cadence (minus slack) older than this one.
        if entry.is_pinged_within(MIN_PING_SECONDS - 60, ping.sig_time) {
            return IngestResult::rejected(0, RejectReason::PingTooEarly);
        }

        if !ping.verify_sig(&entry.service_pubkey) {
            return IngestResult::rejected(33, RejectReason::BadSignature);
        }

        // Still syncing and silent for half the expiration window: treat the
        // ping as list-sync progress so the stage doesn't time out.
        if !list_synced && !entry.is_pinged_within(EXPIRATION_SECONDS / 2, ctx.now) {
            sync.note_list_item(ctx.now);
        }

        entry.last_ping = Some(ping.clone());
        entry.check(
            &CheckContext {
                now: ctx.now,
                chain,
                list_synced,
                watchdog_active,
                min_payment_proto: ctx.min_payment_proto,
                our_service_pubkey: ctx.our_service_pubkey.as_ref(),
                registry_size,
            },
            true,
        );
        let enabled = entry.is_enabled();
        let announce_hash = entry.to_announce().hash();

        // The cached announce carries a ping too; keep it current.
        if let Some((_, cached)) = self.seen_announces.get_mut(&announce_hash) {
            cached.last_ping = Some(ping);
        }

        if !enabled {
            return IngestResult::rejected(0, RejectReason::NodeNotRunning);
        }
        transport.relay(Inv::new(InvKind::Ping, hash));
        IngestResult::Accepted
    }

    /// Record a ping produced by the local pinger (already signed).
    pub fn set_local_ping(&mut self, ping: Ping) {
        let Some(entry) = self.nodes.get_mut(&ping.outpoint) else {
            return;
        };
        entry.last_ping = Some(ping.clone());
        self.seen_pings.insert(ping.hash(), ping.clone());
        let announce_hash = entry.to_announce().hash();
        if let Some((_, cached)) = self.seen_announces.get_mut(&announce_hash) {
            cached.last_ping = Some(ping);
        }
    }

    pub fn is_pinged_within(&self, outpoint: &Outpoint, seconds: i64, at: i64) -> bool {
        self.nodes
            .get(outpoint)
            .is_some_and(|e| e.is_pinged_within(seconds, at))
    }

    /// Apply the announce we just created for our own node. Runs the same
    /// bookkeeping as remote ingest but skips the collateral re-check; the
    /// local path validated the wallet output already.
    pub fn register_local_announce(&mut self, ann: &Announce, now: i64, sync: &SyncState) {
        if let Some(ping) = &ann.last_ping {
            self.seen_pings.insert(ping.hash(), ping.clone());
        }
        self.seen_announces
            .insert(ann.hash(), (now, ann.clone()));
        match self.nodes.get_mut(&ann.outpoint) {
            None => {
                let entry = ServiceNodeEntry::from_announce(ann, false);
                tracing::info!(node = %ann.outpoint.to_short_string(), "registered local service node");
                self.nodes.insert(ann.outpoint, entry);
                sync.note_list_item(now);
            }
            Some(entry) => {
                let old_hash = entry.to_announce().hash();
                if entry.update_from_announce(ann) {
                    if let Some(ping) = &ann.last_ping {
                        entry.last_ping = Some(ping.clone());
                    }
                    sync.note_list_item(now);
                    self.seen_announces.remove(&old_hash);
                }
            }
        }
    }

    // -- Targeted requests --------------------------------------------------

    /// Ask a peer for one node's announce, rate-limited per (peer, outpoint).
    pub fn ask_for_entry(
        &mut self,
        peer: SocketAddr,
        outpoint: Outpoint,
        now: i64,
        transport: &mut dyn Transport,
    ) {
        let per_peer = self.we_asked_for_entry.entry(outpoint).or_default();
        if let Some(retry_at) = per_peer.get(&peer) {
            if now < *retry_at {
                // Asking again too soon could get us banned.
                return;
            }
        }
        tracing::debug!(peer = %peer, node = %outpoint.to_short_string(), "asking for entry");
        per_peer.insert(peer, now + DSEG_UPDATE_SECONDS);
        transport.send(peer, WireMessage::DsegRequest(Some(outpoint)));
    }

    /// Ask a peer for the full node list, rate-limited per peer on mainnet
    /// public addresses.
    pub fn ask_for_full_list(
        &mut self,
        peer: &PeerInfo,
        network: NetworkId,
        now: i64,
        transport: &mut dyn Transport,
    ) {
        if network == NetworkId::Main && !is_private_addr(&peer.addr) {
            if let Some(retry_at) = self.we_asked_for_list.get(&peer.addr) {
                if now < *retry_at {
                    tracing::debug!(peer = %peer.addr, "already asked for the list; skipping");
                    return;
                }
            }
        }
        self.we_asked_for_list
            .insert(peer.addr, now + DSEG_UPDATE_SECONDS);
        tracing::debug!(peer = %peer.addr, "asking for full node list");
        transport.send(peer.addr, WireMessage::DsegRequest(None));
    }

    /// Serve a peer's list/entry request.
    pub fn handle_dseg(
        &mut self,
        peer: SocketAddr,
        request: Option<Outpoint>,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) {
        // Heavy to serve; ignore until we are fully synced ourselves.
        if !sync.is_synced() {
            return;
        }

        if request.is_none() {
            let local_peer = is_private_addr(&peer);
            if !local_peer && ctx.network == NetworkId::Main {
                if let Some(retry_at) = self.asked_us_for_list.get(&peer) {
                    if ctx.now < *retry_at {
                        tracing::debug!(peer = %peer, "peer re-asked for the list too soon");
                        transport.misbehave(peer, DSEG_SPAM_DOS);
                        return;
                    }
                }
                self.asked_us_for_list
                    .insert(peer, ctx.now + DSEG_UPDATE_SECONDS);
            }
        }

        let mut count = 0i32;
        let mut to_cache: Vec<Announce> = Vec::new();
        for entry in self.nodes.values() {
            if let Some(wanted) = &request {
                if *wanted != entry.outpoint {
                    continue;
                }
            }
            if is_private_addr(&entry.addr) {
                continue; // never advertise local-network nodes
            }
            if entry.is_update_required() {
                continue;
            }
            let ann = entry.to_announce();
            transport.push_inventory(peer, Inv::new(InvKind::Announce, ann.hash()));
            if let Some(ping) = &entry.last_ping {
                transport.push_inventory(peer, Inv::new(InvKind::Ping, ping.hash()));
            }
            to_cache.push(ann);
            count += 1;
            if request.is_some() {
                break;
            }
        }
        for ann in to_cache {
            let hash = ann.hash();
            self.seen_announces.entry(hash).or_insert((ctx.now, ann));
        }

        if request.is_none() {
            transport.send(
                peer,
                WireMessage::SyncStatusCount {
                    stage: onyx_sync::SyncStage::List.id(),
                    count,
                },
            );
            tracing::debug!(peer = %peer, count, "served full node list");
        } else if count == 0 {
            // Someone asked for an outpoint we know nothing about.
            tracing::debug!(peer = %peer, "no inventory sent for entry request");
        }
    }

    // -- Ranks --------------------------------------------------------------

    /// Scores of all payment-eligible nodes against the block hash at
    /// `height`, sorted best-first with ascending-outpoint tie-break.
    fn scores_at(
        &self,
        chain: &dyn ChainView,
        height: u32,
        min_proto: u32,
    ) -> Option<Vec<(U256, Outpoint)>> {
        let block_hash = chain.block_hash_at(height)?;
        let mut scores: Vec<(U256, Outpoint)> = self
            .nodes
            .values()
            .filter(|n| n.protocol_version >= min_proto && n.is_enabled())
            .map(|n| (n.calculate_score(&block_hash), n.outpoint))
            .collect();
        scores.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Some(scores)
    }

    /// 1-based rank of a node at `height`; `None` when the block hash is
    /// unknown or the node is not eligible.
    pub fn rank_of(
        &self,
        outpoint: &Outpoint,
        chain: &dyn ChainView,
        height: u32,
        min_proto: u32,
    ) -> Option<usize> {
        self.scores_at(chain, height, min_proto)?
            .iter()
            .position(|(_, op)| op == outpoint)
            .map(|i| i + 1)
    }

    /// All eligible nodes with their 1-based ranks at `height`.
    pub fn ranks(
        &self,
        chain: &dyn ChainView,
        height: u32,
        min_proto: u32,
    ) -> Vec<(usize, NodeInfo)> {
        let Some(scores) = self.scores_at(chain, height, min_proto) else {
            return Vec::new();
        };
        scores
            .iter()
            .enumerate()
            .filter_map(|(i, (_, op))| self.node_info(op).map(|info| (i + 1, info)))
            .collect()
    }

    // -- Maintenance --------------------------------------------------------

    /// Run the lifecycle check on every node.
    pub fn check_all(&mut self, chain: &dyn ChainView, ctx: &GossipContext, sync: &SyncState) {
        let registry_size = self.nodes.len();
        let watchdog_active = sync.is_synced() && self.is_watchdog_active(ctx.now);
        let list_synced = sync.is_list_synced();
        for entry in self.nodes.values_mut() {
            entry.check(
                &CheckContext {
                    now: ctx.now,
                    chain,
                    list_synced,
                    watchdog_active,
                    min_payment_proto: ctx.min_payment_proto,
                    our_service_pubkey: ctx.our_service_pubkey.as_ref(),
                    registry_size,
                },
                false,
            );
        }
    }

    /// Force a lifecycle check on the node with the given service key
    /// (used by the local activation path before adopting its entry).
    pub fn force_check_by_service_key(
        &mut self,
        key: &PublicKey,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
    ) {
        let registry_size = self.nodes.len();
        let watchdog_active = sync.is_synced() && self.is_watchdog_active(ctx.now);
        let list_synced = sync.is_list_synced();
        let Some(entry) = self.nodes.values_mut().find(|n| &n.service_pubkey == key) else {
            return;
        };
        entry.check(
            &CheckContext {
                now: ctx.now,
                chain,
                list_synced,
                watchdog_active,
                min_payment_proto: ctx.min_payment_proto,
                our_service_pubkey: ctx.our_service_pubkey.as_ref(),
                registry_size,
            },
            true,
        );
    }

    /// Periodic sweep: evict spent nodes, initiate announce recovery,
    /// process recovery replies, expire caches.
    pub fn check_and_remove(
        &mut self,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) {
        if !sync.is_list_synced() {
            return;
        }

        self.check_all(chain, ctx, sync);

        // Evict spent nodes, collecting recovery candidates on the way.
        let spent: Vec<Outpoint> = self
            .nodes
            .values()
            .filter(|e| e.is_outpoint_spent())
            .map(|e| e.outpoint)
            .collect();
        for outpoint in &spent {
            if let Some(entry) = self.nodes.remove(outpoint) {
                let hash = entry.to_announce().hash();
                self.seen_announces.remove(&hash);
                self.we_asked_for_entry.remove(outpoint);
                tracing::info!(node = %outpoint.to_short_string(), count = self.nodes.len(), "removed spent service node");
            }
        }

        // Ask top-ranked nodes for fresh announces of non-recoverable nodes.
        if sync.is_synced() {
            self.initiate_recovery(chain, ctx);
        }

        // Reprocess collected replies once their wait window closed.
        let mut to_reprocess: Vec<Announce> = Vec::new();
        let mut done: Vec<MsgHash> = Vec::new();
        for (hash, replies) in &self.recovery_good_replies {
            let deadline_passed = self
                .recovery_requests
                .get(hash)
                .map_or(true, |(deadline, _)| *deadline < ctx.now);
            if deadline_passed {
                if replies.len() >= RECOVERY_QUORUM_REQUIRED {
                    if let Some(first) = replies.first() {
                        let mut ann = first.clone();
                        ann.recovery = true;
                        to_reprocess.push(ann);
                    }
                }
                done.push(*hash);
            }
        }
        for hash in done {
            self.recovery_good_replies.remove(&hash);
        }
        for ann in to_reprocess {
            tracing::info!(node = %ann.outpoint.to_short_string(), "reprocessing recovery announce");
            self.ingest_announce(None, ann, chain, ctx, sync, transport);
        }

        // Allow re-asking for still-broken nodes after the retry window.
        self.recovery_requests
            .retain(|_, (deadline, _)| ctx.now - *deadline <= RECOVERY_RETRY_SECONDS);

        // Expire the asked maps.
        self.asked_us_for_list.retain(|_, t| *t >= ctx.now);
        self.we_asked_for_list.retain(|_, t| *t >= ctx.now);
        self.we_asked_for_entry.retain(|_, per_peer| {
            per_peer.retain(|_, t| *t >= ctx.now);
            !per_peer.is_empty()
        });

        if let Some(tip) = chain.tip_height() {
            let cutoff = tip.saturating_sub(MAX_POSE_BLOCKS);
            self.we_asked_for_verification
                .retain(|_, v| v.block_height >= cutoff);
            self.seen_verifies.retain(|_, v| v.block_height >= cutoff);
        }

        // Note: seen announces are only evicted on entry removal/supersede.
        self.seen_pings
            .retain(|_, p| ctx.now - p.sig_time <= NEW_START_REQUIRED_SECONDS);

        tracing::debug!(
            nodes = self.nodes.len(),
            seen_announces = self.seen_announces.len(),
            seen_pings = self.seen_pings.len(),
            "registry sweep complete"
        );
    }

    fn initiate_recovery(&mut self, chain: &dyn ChainView, ctx: &GossipContext) {
        let Some(tip) = chain.tip_height() else {
            return;
        };
        let candidates: Vec<(Outpoint, MsgHash)> = self
            .nodes
            .values()
            .filter(|e| e.is_new_start_required())
            .map(|e| (e.outpoint, e.to_announce().hash()))
            .filter(|(_, hash)| !self.recovery_requests.contains_key(hash))
            .take(RECOVERY_MAX_ASK_ENTRIES)
            .collect();
        if candidates.is_empty() {
            return;
        }

        // Rank against a random recent block so every ban-wave doesn't hit
        // the same quorum.
        let random_height = rand::thread_rng().gen_range(0..=tip);
        let ranked = self.ranks(chain, random_height, MIN_POSE_PROTO);
        if ranked.is_empty() {
            return;
        }

        for (outpoint, hash) in candidates {
            let asked_before = self
                .we_asked_for_entry
                .get(&outpoint)
                .cloned()
                .unwrap_or_default();
            let mut requested: HashSet<SocketAddr> = HashSet::new();
            for (_, info) in &ranked {
                if requested.len() >= RECOVERY_QUORUM_TOTAL {
                    break;
                }
                // Avoid banging on peers we asked recently.
                if asked_before.contains_key(&info.addr) {
                    continue;
                }
                requested.insert(info.addr);
                self.scheduled_recovery_connects.push((info.addr, hash));
            }
            if !requested.is_empty() {
                tracing::debug!(node = %outpoint.to_short_string(), peers = requested.len(), "recovery initiated");
                self.recovery_requests
                    .insert(hash, (ctx.now + RECOVERY_WAIT_SECONDS, requested));
            }
        }
    }

    /// Next scheduled recovery connection, with every hash wanted from the
    /// same address folded together.
    pub fn pop_scheduled_recovery_connect(&mut self) -> Option<(SocketAddr, Vec<MsgHash>)> {
        let (addr, _) = *self.scheduled_recovery_connects.first()?;
        let mut hashes = Vec::new();
        self.scheduled_recovery_connects.retain(|(a, h)| {
            if *a == addr {
                hashes.push(*h);
                false
            } else {
                true
            }
        });
        Some((addr, hashes))
    }

    /// Refresh last-paid data for every node by scanning recent coinbases.
    pub fn update_last_paid(
        &mut self,
        chain: &dyn ChainView,
        history: &dyn PaymentsView,
        max_scan_back: u32,
    ) {
        let Some(tip) = chain.tip_height() else {
            return;
        };
        for entry in self.nodes.values_mut() {
            entry.update_last_paid(chain, history, tip, max_scan_back);
        }
    }

    /// Storage window for payment votes, sized by the registry.
    pub fn vote_storage_limit(&self) -> u32 {
        ((self.nodes.len() as f64 * STORAGE_COEFF) as u32).max(MIN_BLOCKS_TO_STORE)
    }
}

/// Check everything about an announce that needs no UTXO access.
/// Returns whether the entry should start out expired (missing or
/// unverifiable embedded ping).
fn simple_check(
    ann: &Announce,
    chain: &dyn ChainView,
    ctx: &GossipContext,
) -> Result<bool, (u8, RejectReason)> {
    if !is_valid_node_addr(&ann.addr, ctx.network) {
        return Err((0, RejectReason::InvalidAddress));
    }

    // Signatures from the future are malicious; the past is fine.
    if ann.sig_time > ctx.now + FUTURE_DRIFT_SECONDS {
        return Err((1, RejectReason::FutureTime));
    }

    // Missing ping, sig from the future, or an unknown block hash: one of
    // us is probably forked. Mark expired and keep checking the rest.
    let starts_expired = match &ann.last_ping {
        None => true,
        Some(ping) => {
            ping.sig_time > ctx.now + FUTURE_DRIFT_SECONDS
                || chain.height_of(&ping.block_hash).is_none()
        }
    };

    if ann.protocol_version < ctx.min_payment_proto {
        return Err((0, RejectReason::OutdatedProtocol));
    }

    if ann.collateral_pubkey.is_zero() || ann.service_pubkey.is_zero() {
        return Err((100, RejectReason::MalformedKeys));
    }

    if !ctx.network.valid_node_port(ann.addr.port()) {
        return Err((0, RejectReason::InvalidAddress));
    }

    Ok(starts_expired)
}

enum CollateralCheck {
    /// Permanent failure with a DoS score.
    Reject(u8, RejectReason),
    /// The chain can't answer yet; retry on redelivery.
    Transient(RejectReason),
}

/// Validate the collateral UTXO behind a new announce.
fn check_outpoint(
    ann: &Announce,
    chain: &dyn ChainView,
    ctx: &GossipContext,
) -> Result<(), CollateralCheck> {
    // Our own active announce: nothing to do, the local path owns it.
    if ctx.our_outpoint == Some(ann.outpoint) && ctx.is_our_service_key(&ann.service_pubkey) {
        return Err(CollateralCheck::Reject(0, RejectReason::OwnAnnounce));
    }

    if !ann.verify_sig() {
        return Err(CollateralCheck::Reject(100, RejectReason::BadSignature));
    }

    let Some(tip) = chain.tip_height() else {
        return Err(CollateralCheck::Transient(
            RejectReason::CollateralUnavailable,
        ));
    };
    let Some(utxo) = chain.utxo(&ann.outpoint) else {
        return Err(CollateralCheck::Transient(
            RejectReason::CollateralUnavailable,
        ));
    };

    if utxo.value != Amount::collateral() {
        return Err(CollateralCheck::Reject(0, RejectReason::CollateralWrongValue));
    }

    let min_conf = ctx.network.min_collateral_confirmations();
    if (tip + 1).saturating_sub(utxo.height) < min_conf {
        // Maybe we're a few blocks short; retry later.
        return Err(CollateralCheck::Transient(RejectReason::CollateralImmature));
    }

    // The collateral must actually be controlled by the announced key.
    if utxo.script != Script::p2pkh(&ann.collateral_pubkey) {
        return Err(CollateralCheck::Reject(
            33,
            RejectReason::CollateralKeyMismatch,
        ));
    }

    // The announce must postdate the block where the collateral reached
    // its confirmation requirement.
    let conf_height = utxo.height + min_conf - 1;
    if let Some(conf_time) = chain.block_time_at(conf_height) {
        if conf_time > ann.sig_time {
            return Err(CollateralCheck::Reject(
                0,
                RejectReason::SigTimePredatesCollateral,
            ));
        }
    }

    Ok(())
}

fn is_private_addr(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_private() || ip.is_loopback(),
        IpAddr::V6(ip) => ip.is_loopback(),
    }
}

/// IPv4 only, routable, and on the right port for the network. Regtest
/// accepts anything so tests can run on loopback.
fn is_valid_node_addr(addr: &SocketAddr, network: NetworkId) -> bool {
    if network == NetworkId::Regtest {
        return true;
    }
    match addr.ip() {
        IpAddr::V4(ip) => !ip.is_private() && !ip.is_loopback() && !ip.is_unspecified(),
        IpAddr::V6(_) => false,
    }
}
