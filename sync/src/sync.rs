//! The sync driver and its shared progress state.

use onyx_messages::WireMessage;
use onyx_net::{FulfilledRequests, PeerInfo, Transport};
use onyx_types::NetworkId;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

/// Quiet-timeout per stage: no new items for this long ⇒ advance or fail.
pub const SYNC_TIMEOUT_SECONDS: i64 = 30;

/// Cool-down before a failed sync restarts.
pub const SYNC_FAIL_RETRY_SECONDS: i64 = 60;

/// Fulfilled-request entries live this long.
const FULFILLED_TTL: i64 = 60 * 60;

const STAGE_FAILED: i32 = -1;
const STAGE_INITIAL: i32 = 0;
const STAGE_SPORKS: i32 = 1;
const STAGE_LIST: i32 = 2;
const STAGE_VOTES: i32 = 3;
const STAGE_FINISHED: i32 = 999;

/// Bootstrap stages, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStage {
    Failed,
    Initial,
    Sporks,
    List,
    Votes,
    Finished,
}

impl SyncStage {
    pub fn id(&self) -> i32 {
        match self {
            Self::Failed => STAGE_FAILED,
            Self::Initial => STAGE_INITIAL,
            Self::Sporks => STAGE_SPORKS,
            Self::List => STAGE_LIST,
            Self::Votes => STAGE_VOTES,
            Self::Finished => STAGE_FINISHED,
        }
    }

    fn from_id(id: i32) -> Self {
        match id {
            STAGE_FAILED => Self::Failed,
            STAGE_INITIAL => Self::Initial,
            STAGE_SPORKS => Self::Sporks,
            STAGE_LIST => Self::List,
            STAGE_VOTES => Self::Votes,
            _ => Self::Finished,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "FAILED",
            Self::Initial => "INITIAL",
            Self::Sporks => "SPORKS",
            Self::List => "LIST",
            Self::Votes => "VOTES",
            Self::Finished => "FINISHED",
        }
    }
}

/// What the driver asks of the registry and payment components.
///
/// Implemented by the subsystem so this crate stays below both in the
/// dependency graph.
pub trait SyncTargets {
    /// Number of known service nodes.
    fn registry_count(&self) -> usize;

    /// Ask a peer for the full node list.
    fn request_full_list(&mut self, peer: &PeerInfo, transport: &mut dyn Transport, now: i64);

    /// Ask a peer for payment votes plus any low-data payment blocks.
    fn request_payment_sync(&mut self, peer: &PeerInfo, transport: &mut dyn Transport, now: i64);

    /// Whether enough payment history has arrived to finish the stage.
    fn payment_data_is_enough(&self) -> bool;
}

/// Per-tick environment.
pub struct SyncTickContext {
    pub now: i64,
    pub network: NetworkId,
    pub min_payment_proto: u32,
    /// Whether this daemon runs a service node (inbound peers are then
    /// likely temporary verify connections and skipped for sync).
    pub we_are_service_node: bool,
}

/// Shared sync progress.
///
/// All fields are atomics so gossip ingest paths can bump timers while the
/// driver runs on another thread, without a lock ordering entanglement with
/// the registry mutex.
pub struct SyncState {
    stage: AtomicI32,
    attempt: AtomicI32,
    stage_started: AtomicI64,
    last_list_item: AtomicI64,
    last_vote_item: AtomicI64,
    last_failure: AtomicI64,
    fail_count: AtomicI32,
    chain_synced: AtomicBool,
}

impl SyncState {
    pub fn new(now: i64) -> Self {
        Self {
            stage: AtomicI32::new(STAGE_INITIAL),
            attempt: AtomicI32::new(0),
            stage_started: AtomicI64::new(now),
            last_list_item: AtomicI64::new(now),
            last_vote_item: AtomicI64::new(now),
            last_failure: AtomicI64::new(0),
            fail_count: AtomicI32::new(0),
            chain_synced: AtomicBool::new(false),
        }
    }

    pub fn stage(&self) -> SyncStage {
        SyncStage::from_id(self.stage.load(Ordering::SeqCst))
    }

    pub fn is_synced(&self) -> bool {
        self.stage() == SyncStage::Finished
    }

    pub fn is_failed(&self) -> bool {
        self.stage() == SyncStage::Failed
    }

    /// The node list has been fetched (stage past `List`).
    pub fn is_list_synced(&self) -> bool {
        let id = self.stage.load(Ordering::SeqCst);
        id > STAGE_LIST && id != STAGE_FAILED
    }

    /// The vote history has been fetched (stage past `Votes`).
    pub fn is_winners_synced(&self) -> bool {
        let id = self.stage.load(Ordering::SeqCst);
        id > STAGE_VOTES && id != STAGE_FAILED
    }

    /// The out-of-scope chain layer reports whether the block chain itself
    /// is caught up; the subsystem only consumes the flag.
    pub fn note_chain_synced(&self, synced: bool) {
        self.chain_synced.store(synced, Ordering::SeqCst);
    }

    pub fn is_chain_synced(&self) -> bool {
        self.chain_synced.load(Ordering::SeqCst)
    }

    /// A new node-list item arrived; keeps the `List` stage alive.
    pub fn note_list_item(&self, now: i64) {
        self.last_list_item.store(now, Ordering::SeqCst);
    }

    /// A new payment vote arrived; keeps the `Votes` stage alive.
    pub fn note_payment_vote(&self, now: i64) {
        self.last_vote_item.store(now, Ordering::SeqCst);
    }

    pub fn reset(&self, now: i64) {
        self.stage.store(STAGE_INITIAL, Ordering::SeqCst);
        self.attempt.store(0, Ordering::SeqCst);
        self.stage_started.store(now, Ordering::SeqCst);
        self.last_list_item.store(now, Ordering::SeqCst);
        self.last_vote_item.store(now, Ordering::SeqCst);
        self.last_failure.store(0, Ordering::SeqCst);
        tracing::info!("sync reset");
    }

    pub fn fail(&self, now: i64) {
        self.last_failure.store(now, Ordering::SeqCst);
        self.fail_count.fetch_add(1, Ordering::SeqCst);
        self.stage.store(STAGE_FAILED, Ordering::SeqCst);
        tracing::warn!("sync failed; retrying in {SYNC_FAIL_RETRY_SECONDS}s");
    }

    /// Advance to the next stage and reset per-stage bookkeeping.
    pub fn switch_to_next(&self, now: i64, fulfilled: &mut FulfilledRequests) {
        let next = match self.stage() {
            SyncStage::Failed => {
                // Failed resets through `reset()`, never by advancing.
                return;
            }
            SyncStage::Initial => {
                for key in ["spork-sync", "list-sync", "payment-sync", "full-sync"] {
                    fulfilled.remove_all_for_key(key);
                }
                SyncStage::Sporks
            }
            SyncStage::Sporks => {
                self.last_list_item.store(now, Ordering::SeqCst);
                SyncStage::List
            }
            SyncStage::List => {
                self.last_vote_item.store(now, Ordering::SeqCst);
                SyncStage::Votes
            }
            SyncStage::Votes | SyncStage::Finished => SyncStage::Finished,
        };
        self.stage.store(next.id(), Ordering::SeqCst);
        self.attempt.store(0, Ordering::SeqCst);
        self.stage_started.store(now, Ordering::SeqCst);
        tracing::info!(stage = next.as_str(), "sync stage started");
    }

    /// Operator-facing progress line.
    pub fn status(&self) -> &'static str {
        match self.stage() {
            SyncStage::Initial => "Synchronization pending...",
            SyncStage::Sporks => "Synchronizing feature flags...",
            SyncStage::List => "Synchronizing service nodes...",
            SyncStage::Votes => "Synchronizing payment votes...",
            SyncStage::Failed => "Synchronization failed",
            SyncStage::Finished => "Synchronization finished",
        }
    }

    /// A peer told us how many items it sent for a stage. Progress display
    /// only; counts are never trusted for stage decisions.
    pub fn handle_status_count(&self, stage: i32, count: i32) {
        if self.is_synced() || self.is_failed() {
            return;
        }
        tracing::debug!(stage, count, "received sync status count");
    }

    /// Drive one sync round. Called every `SYNC_TICK_SECONDS`.
    pub fn tick(
        &self,
        targets: &mut dyn SyncTargets,
        transport: &mut dyn Transport,
        fulfilled: &mut FulfilledRequests,
        ctx: &SyncTickContext,
    ) {
        let now = ctx.now;

        if self.is_synced() {
            // Resync if every node vanished (sleep/wake, or we synced
            // against a bad peer).
            if targets.registry_count() == 0 {
                tracing::warn!("registry empty after sync; restarting");
                self.reset(now);
            }
            return;
        }

        if self.is_failed() {
            if self.last_failure.load(Ordering::SeqCst) + SYNC_FAIL_RETRY_SECONDS < now {
                self.reset(now);
            }
            return;
        }

        if ctx.network != NetworkId::Regtest
            && !self.is_chain_synced()
            && self.stage().id() > STAGE_SPORKS
        {
            // Chain fell behind mid-sync; freeze the stage timers.
            self.last_list_item.store(now, Ordering::SeqCst);
            self.last_vote_item.store(now, Ordering::SeqCst);
            return;
        }

        if self.stage() == SyncStage::Initial
            || (self.stage() == SyncStage::Sporks && self.is_chain_synced())
        {
            self.switch_to_next(now, fulfilled);
        }

        for peer in transport.connected_peers() {
            // Temporary service-node connections are unreliable for sync;
            // inbound connections this early are most likely the same.
            if peer.servicenode_conn || (ctx.we_are_service_node && peer.inbound) {
                continue;
            }

            if ctx.network == NetworkId::Regtest {
                self.quick_mode_tick(targets, transport, &peer, now);
                return;
            }

            if fulfilled.has(peer.addr, "full-sync", now) {
                // Already fully synced from this one; free the slot.
                tracing::debug!(peer = %peer.addr, "disconnecting recently synced peer");
                transport.disconnect(peer.addr);
                continue;
            }

            // Always fetch feature flags from each peer first.
            if !fulfilled.has(peer.addr, "spork-sync", now) {
                fulfilled.add(peer.addr, "spork-sync", now, FULFILLED_TTL);
                transport.send(peer.addr, WireMessage::GetSporks);
                tracing::debug!(peer = %peer.addr, "requested sporks");
                continue;
            }

            match self.stage() {
                SyncStage::List => {
                    if self.last_list_item.load(Ordering::SeqCst) < now - SYNC_TIMEOUT_SECONDS {
                        if self.attempt.load(Ordering::SeqCst) == 0 {
                            // No way to continue without the node list.
                            self.fail(now);
                        } else {
                            self.switch_to_next(now, fulfilled);
                        }
                        return;
                    }
                    if fulfilled.has(peer.addr, "list-sync", now) {
                        continue;
                    }
                    fulfilled.add(peer.addr, "list-sync", now, FULFILLED_TTL);
                    if peer.version < ctx.min_payment_proto {
                        continue;
                    }
                    self.attempt.fetch_add(1, Ordering::SeqCst);
                    targets.request_full_list(&peer, transport, now);
                    // One request per tick keeps load spread over peers.
                    return;
                }
                SyncStage::Votes => {
                    if self.last_vote_item.load(Ordering::SeqCst) < now - SYNC_TIMEOUT_SECONDS {
                        if self.attempt.load(Ordering::SeqCst) == 0 {
                            self.fail(now);
                        } else {
                            self.switch_to_next(now, fulfilled);
                        }
                        return;
                    }
                    // Fetch from at least two peers before trusting counts.
                    if self.attempt.load(Ordering::SeqCst) > 1 && targets.payment_data_is_enough()
                    {
                        self.switch_to_next(now, fulfilled);
                        fulfilled.add(peer.addr, "full-sync", now, FULFILLED_TTL);
                        return;
                    }
                    if fulfilled.has(peer.addr, "payment-sync", now) {
                        continue;
                    }
                    fulfilled.add(peer.addr, "payment-sync", now, FULFILLED_TTL);
                    if peer.version < ctx.min_payment_proto {
                        continue;
                    }
                    self.attempt.fetch_add(1, Ordering::SeqCst);
                    targets.request_payment_sync(&peer, transport, now);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Regtest walks the stages by attempt count alone.
    fn quick_mode_tick(
        &self,
        targets: &mut dyn SyncTargets,
        transport: &mut dyn Transport,
        peer: &PeerInfo,
        now: i64,
    ) {
        let attempt = self.attempt.load(Ordering::SeqCst);
        if attempt <= 2 {
            transport.send(peer.addr, WireMessage::GetSporks);
        } else if attempt < 4 {
            targets.request_full_list(peer, transport, now);
        } else if attempt < 6 {
            targets.request_payment_sync(peer, transport, now);
        } else {
            self.stage.store(STAGE_FINISHED, Ordering::SeqCst);
        }
        self.attempt.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_net::NullTransport;
    use std::net::SocketAddr;

    struct FakeTargets {
        count: usize,
        enough: bool,
        list_requests: Vec<SocketAddr>,
        payment_requests: Vec<SocketAddr>,
    }

    impl FakeTargets {
        fn new() -> Self {
            Self {
                count: 0,
                enough: false,
                list_requests: Vec::new(),
                payment_requests: Vec::new(),
            }
        }
    }

    impl SyncTargets for FakeTargets {
        fn registry_count(&self) -> usize {
            self.count
        }
        fn request_full_list(
            &mut self,
            peer: &PeerInfo,
            _transport: &mut dyn Transport,
            _now: i64,
        ) {
            self.list_requests.push(peer.addr);
        }
        fn request_payment_sync(
            &mut self,
            peer: &PeerInfo,
            _transport: &mut dyn Transport,
            _now: i64,
        ) {
            self.payment_requests.push(peer.addr);
        }
        fn payment_data_is_enough(&self) -> bool {
            self.enough
        }
    }

    fn ctx(now: i64) -> SyncTickContext {
        SyncTickContext {
            now,
            network: NetworkId::Main,
            min_payment_proto: 90023,
            we_are_service_node: false,
        }
    }

    fn peer_addr(n: u8) -> SocketAddr {
        format!("10.1.0.{n}:8585").parse().unwrap()
    }

    #[test]
    fn stages_advance_in_order() {
        let state = SyncState::new(100);
        let mut fulfilled = FulfilledRequests::new();
        assert_eq!(state.stage(), SyncStage::Initial);
        state.switch_to_next(100, &mut fulfilled);
        assert_eq!(state.stage(), SyncStage::Sporks);
        state.switch_to_next(100, &mut fulfilled);
        assert_eq!(state.stage(), SyncStage::List);
        assert!(!state.is_list_synced());
        state.switch_to_next(100, &mut fulfilled);
        assert_eq!(state.stage(), SyncStage::Votes);
        assert!(state.is_list_synced());
        assert!(!state.is_winners_synced());
        state.switch_to_next(100, &mut fulfilled);
        assert!(state.is_synced());
        assert!(state.is_winners_synced());
    }

    #[test]
    fn first_tick_requests_sporks() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);
        let mut fulfilled = FulfilledRequests::new();

        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(100));
        let sent = transport.sent_to(peer_addr(1));
        assert!(matches!(sent[0], WireMessage::GetSporks));
        // Initial advanced to Sporks; List starts on the next tick.
        assert_eq!(state.stage(), SyncStage::Sporks);

        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(106));
        assert_eq!(state.stage(), SyncStage::List);
    }

    #[test]
    fn list_stage_asks_each_peer_once() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);
        let mut fulfilled = FulfilledRequests::new();

        // Tick 1: sporks. Tick 2: list request. Tick 3: nothing new.
        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(100));
        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(106));
        assert_eq!(targets.list_requests, vec![peer_addr(1)]);
        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(112));
        assert_eq!(targets.list_requests.len(), 1);
    }

    #[test]
    fn list_timeout_without_attempts_fails() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut fulfilled = FulfilledRequests::new();
        state.switch_to_next(100, &mut fulfilled); // Sporks
        state.switch_to_next(100, &mut fulfilled); // List

        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);
        // Pretend sporks were already fetched.
        fulfilled.add(peer_addr(1), "spork-sync", 100, 3600);

        // Past the quiet timeout with zero attempts.
        let mut c = ctx(200);
        c.now = 200;
        // First tick issues the list request (attempt becomes 1)... unless
        // the timeout hits first, which it does here.
        state.tick(&mut targets, &mut transport, &mut fulfilled, &c);
        assert!(state.is_failed());
    }

    #[test]
    fn failed_sync_retries_after_cooldown() {
        let state = SyncState::new(100);
        state.fail(100);
        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        let mut fulfilled = FulfilledRequests::new();

        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(130));
        assert!(state.is_failed());

        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(161));
        assert_eq!(state.stage(), SyncStage::Initial);
    }

    #[test]
    fn votes_stage_finishes_on_enough_data() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut fulfilled = FulfilledRequests::new();
        for _ in 0..3 {
            state.switch_to_next(100, &mut fulfilled); // → Votes
        }
        assert_eq!(state.stage(), SyncStage::Votes);
        state.attempt.store(2, Ordering::SeqCst);

        let mut targets = FakeTargets::new();
        targets.enough = true;
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);
        fulfilled.add(peer_addr(1), "spork-sync", 100, 3600);

        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(105));
        assert!(state.is_synced());
    }

    #[test]
    fn empty_registry_after_sync_resets() {
        let state = SyncState::new(100);
        let mut fulfilled = FulfilledRequests::new();
        for _ in 0..4 {
            state.switch_to_next(100, &mut fulfilled);
        }
        assert!(state.is_synced());

        let mut targets = FakeTargets::new();
        targets.count = 0;
        let mut transport = NullTransport::new();
        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(200));
        assert_eq!(state.stage(), SyncStage::Initial);
    }

    #[test]
    fn chain_not_synced_freezes_timers() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut fulfilled = FulfilledRequests::new();
        state.switch_to_next(100, &mut fulfilled);
        state.switch_to_next(100, &mut fulfilled); // List
        state.note_chain_synced(false);

        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);

        // Way past the timeout, but the chain is behind: no failure.
        state.tick(&mut targets, &mut transport, &mut fulfilled, &ctx(500));
        assert_eq!(state.stage(), SyncStage::List);
        assert!(!state.is_failed());
    }

    #[test]
    fn regtest_quick_mode_finishes_by_attempts() {
        let state = SyncState::new(100);
        state.note_chain_synced(true);
        let mut targets = FakeTargets::new();
        let mut transport = NullTransport::new();
        transport.add_peer(peer_addr(1), 90025);
        let mut fulfilled = FulfilledRequests::new();
        let mut c = ctx(100);
        c.network = NetworkId::Regtest;

        for i in 0..8 {
            c.now = 100 + i * 6;
            state.tick(&mut targets, &mut transport, &mut fulfilled, &c);
        }
        assert!(state.is_synced());
        assert!(!targets.list_requests.is_empty());
        assert!(!targets.payment_requests.is_empty());
    }
}
