//! The assembled subsystem: one value owning every component.
//!
//! Lock order (outermost first): `local` → `fulfilled` → `registry`;
//! the payment maps are leaf locks acquired last. The chain oracle and
//! transport are passed into every entry point rather than owned, so tests
//! drive them directly.

use crate::local::LocalNode;
use crate::wallet::Wallet;
use crate::{NodeConfig, NodeError};
use onyx_chain::ChainView;
use onyx_messages::{Inv, InvKind, WireMessage};
use onyx_net::{FulfilledRequests, PeerInfo, SporkFlags, Transport};
use onyx_payments::Payments;
use onyx_registry::{GossipContext, IngestResult, Registry};
use onyx_sync::{SyncState, SyncTargets, SyncTickContext};
use onyx_types::params::{
    LAST_PAID_SCAN_BLOCKS, MIN_PAYMENT_PROTO_V1, MIN_PAYMENT_PROTO_V2, VOTE_LEAD_BLOCKS,
};
use onyx_types::{unix_now, NetworkId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sync driver cadence within the 1 Hz tick.
const SYNC_TICK_EVERY: u64 = 6;
/// Maintenance cadence within the 1 Hz tick.
const MAINTENANCE_EVERY: u64 = 60;

const REGISTRY_CACHE_FILE: &str = "sncache.dat";
const PAYMENTS_CACHE_FILE: &str = "snpayments.dat";

/// The service-node subsystem.
pub struct Subsystem {
    pub config: NodeConfig,
    pub registry: Mutex<Registry>,
    pub payments: Payments,
    pub sync: SyncState,
    pub local: Mutex<LocalNode>,
    pub fulfilled: Mutex<FulfilledRequests>,
    pub sporks: Mutex<SporkFlags>,
    tick_count: AtomicU64,
    /// Whether the initial full last-paid scan has completed.
    last_paid_scanned: AtomicBool,
}

impl Subsystem {
    /// Build the subsystem, restoring persisted caches from the data
    /// directory. Any persistence problem resets to empty state; nothing
    /// here is fatal.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let local = LocalNode::from_config(&config)?;

        let registry = match onyx_registry::load_registry(&config.data_dir.join(REGISTRY_CACHE_FILE))
        {
            Ok(registry) => registry,
            Err(e) => {
                tracing::info!(error = %e, "starting with an empty registry");
                Registry::new()
            }
        };
        let payments =
            match onyx_payments::load_payments(&config.data_dir.join(PAYMENTS_CACHE_FILE)) {
                Ok(payments) => payments,
                Err(e) => {
                    tracing::info!(error = %e, "starting with empty payment data");
                    Payments::new()
                }
            };

        Ok(Self {
            config,
            registry: Mutex::new(registry),
            payments,
            sync: SyncState::new(unix_now()),
            local: Mutex::new(local),
            fulfilled: Mutex::new(FulfilledRequests::new()),
            sporks: Mutex::new(SporkFlags::default()),
            tick_count: AtomicU64::new(0),
            last_paid_scanned: AtomicBool::new(false),
        })
    }

    /// Persist the registry and payment caches.
    pub fn save_caches(&self) -> Result<(), NodeError> {
        std::fs::create_dir_all(&self.config.data_dir)?;
        onyx_registry::save_registry(
            &self.registry.lock(),
            &self.cache_path(REGISTRY_CACHE_FILE),
        )?;
        onyx_payments::save_payments(&self.payments, &self.cache_path(PAYMENTS_CACHE_FILE))?;
        Ok(())
    }

    fn cache_path(&self, file: &str) -> PathBuf {
        self.config.data_dir.join(file)
    }

    /// Spork-dependent minimum protocol for payment participation.
    pub fn min_payment_proto(&self) -> u32 {
        if self.sporks.lock().pay_updated_nodes {
            MIN_PAYMENT_PROTO_V2
        } else {
            MIN_PAYMENT_PROTO_V1
        }
    }

    pub fn set_sporks(&self, flags: SporkFlags) {
        *self.sporks.lock() = flags;
    }

    fn gossip_ctx_with(&self, local: &LocalNode, now: i64) -> GossipContext {
        GossipContext {
            now,
            network: self.config.network,
            min_payment_proto: self.min_payment_proto(),
            our_outpoint: (!local.outpoint.is_zero()).then_some(local.outpoint),
            our_service_pubkey: local.service_pubkey(),
        }
    }

    fn gossip_ctx(&self, now: i64) -> GossipContext {
        let local = self.local.lock();
        self.gossip_ctx_with(&local, now)
    }

    fn apply_dos(&self, peer: SocketAddr, result: &IngestResult, transport: &mut dyn Transport) {
        if let IngestResult::Rejected { dos, reason } = result {
            if *dos > 0 {
                tracing::debug!(peer = %peer, dos, reason = reason.as_str(), "penalizing peer");
                transport.misbehave(peer, *dos);
            }
        }
    }

    /// Dispatch one wire message from a peer.
    pub fn handle_message(
        &self,
        peer: SocketAddr,
        msg: WireMessage,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
        now: i64,
    ) {
        // Gossip is meaningless against a stale chain.
        if !self.sync.is_chain_synced() && self.config.network != NetworkId::Regtest {
            if !matches!(msg, WireMessage::SyncStatusCount { .. }) {
                return;
            }
        }

        match msg {
            WireMessage::Announce(ann) => {
                let ctx = self.gossip_ctx(now);
                let result = self.registry.lock().ingest_announce(
                    Some(peer),
                    ann,
                    chain,
                    &ctx,
                    &self.sync,
                    transport,
                );
                self.apply_dos(peer, &result, transport);
            }
            WireMessage::Ping(ping) => {
                let ctx = self.gossip_ctx(now);
                let result = self.registry.lock().ingest_ping(
                    Some(peer),
                    ping,
                    chain,
                    &ctx,
                    &self.sync,
                    transport,
                );
                self.apply_dos(peer, &result, transport);
            }
            WireMessage::DsegRequest(request) => {
                let ctx = self.gossip_ctx(now);
                self.registry
                    .lock()
                    .handle_dseg(peer, request, &ctx, &self.sync, transport);
            }
            WireMessage::Verify(v) => {
                let local = self.local.lock();
                let ctx = self.gossip_ctx_with(&local, now);
                let signer = local.signer();
                let mut fulfilled = self.fulfilled.lock();
                self.registry.lock().handle_verify(
                    peer,
                    v,
                    chain,
                    &ctx,
                    &self.sync,
                    &mut fulfilled,
                    transport,
                    signer.as_ref(),
                );
            }
            WireMessage::PaymentVote(vote) => {
                let ctx = self.gossip_ctx(now);
                let mut registry = self.registry.lock();
                let result = self.payments.ingest_vote(
                    Some(peer),
                    vote,
                    &mut registry,
                    chain,
                    &ctx,
                    &self.sync,
                    transport,
                );
                drop(registry);
                self.apply_dos(peer, &result, transport);
            }
            WireMessage::PaymentSync(_count) => {
                let ctx = self.gossip_ctx(now);
                let mut fulfilled = self.fulfilled.lock();
                self.payments.handle_payment_sync(
                    peer,
                    chain,
                    &ctx,
                    &self.sync,
                    &mut fulfilled,
                    transport,
                );
            }
            WireMessage::SyncStatusCount { stage, count } => {
                self.sync.handle_status_count(stage, count);
            }
            WireMessage::GetSporks => {
                // Served by the spork subsystem; nothing for us to do.
            }
        }
    }

    /// One second of wall-clock time. Runs the sync driver every 6 s and
    /// the maintenance sweep (lifecycle checks, pruning, activation,
    /// verification round) every 60 s.
    pub fn tick(
        &self,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
        wallet: &mut dyn Wallet,
        now: i64,
    ) {
        let n = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;

        if n % SYNC_TICK_EVERY == 0 {
            let mut adapter = TargetAdapter {
                registry: &self.registry,
                payments: &self.payments,
                chain,
                network: self.config.network,
            };
            let ctx = SyncTickContext {
                now,
                network: self.config.network,
                min_payment_proto: self.min_payment_proto(),
                we_are_service_node: self.config.service_node,
            };
            let mut fulfilled = self.fulfilled.lock();
            self.sync.tick(&mut adapter, transport, &mut fulfilled, &ctx);
        }

        if n % MAINTENANCE_EVERY == 0 {
            self.maintain(chain, transport, wallet, now);
        }
    }

    fn maintain(
        &self,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
        wallet: &mut dyn Wallet,
        now: i64,
    ) {
        {
            let ctx = self.gossip_ctx(now);
            self.registry
                .lock()
                .check_and_remove(chain, &ctx, &self.sync, transport);
        }

        if let Some(tip) = chain.tip_height() {
            let limit = self.registry.lock().vote_storage_limit();
            self.payments.check_and_remove(tip, limit);
        }

        // Local activation and heart-beat.
        {
            let mut local = self.local.lock();
            let ctx = self.gossip_ctx_with(&local, now);
            let mut registry = self.registry.lock();
            local.manage(&mut registry, chain, &ctx, &self.sync, transport, wallet, now);
        }

        // Proof-of-service round.
        {
            let local = self.local.lock();
            let ctx = self.gossip_ctx_with(&local, now);
            let signer = local.signer();
            let mut fulfilled = self.fulfilled.lock();
            self.registry.lock().do_full_verification_step(
                chain,
                &ctx,
                &self.sync,
                &mut fulfilled,
                transport,
                signer.as_ref(),
            );
        }

        // Open connections scheduled for announce recovery and request the
        // missing announces directly.
        let mut registry = self.registry.lock();
        while let Some((addr, hashes)) = registry.pop_scheduled_recovery_connect() {
            if transport.connect(addr) {
                let invs = hashes
                    .into_iter()
                    .map(|hash| Inv::new(InvKind::Announce, hash))
                    .collect();
                transport.push_get_data(addr, invs);
            }
        }
    }

    /// The chain advanced. Runs the same-address sweep, refreshes
    /// last-paid data, and emits our payment vote when we are in the
    /// signing set.
    pub fn updated_block_tip(
        &self,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
        now: i64,
    ) {
        self.registry.lock().check_same_addr(&self.sync);

        if self.config.service_node {
            // Full scan until the winners list has synced once, quick scans
            // per block afterwards.
            let scan = if self.last_paid_scanned.load(Ordering::SeqCst) {
                LAST_PAID_SCAN_BLOCKS
            } else {
                self.registry.lock().vote_storage_limit()
            };
            self.registry
                .lock()
                .update_last_paid(chain, &self.payments, scan);
            self.last_paid_scanned
                .store(self.sync.is_winners_synced(), Ordering::SeqCst);
        }

        let Some(tip) = chain.tip_height() else {
            return;
        };
        let local = self.local.lock();
        let Some(signer) = local.signer() else {
            return;
        };
        let ctx = self.gossip_ctx_with(&local, now);
        let mut registry = self.registry.lock();
        self.payments.vote_for_winner(
            tip + VOTE_LEAD_BLOCKS,
            &mut registry,
            chain,
            &ctx,
            &self.sync,
            transport,
            signer.outpoint,
            signer.service_key,
        );
    }

    /// Operator status line.
    pub fn status(&self) -> String {
        self.local.lock().status()
    }
}

/// Bridges the sync driver to the registry and payment components.
struct TargetAdapter<'a> {
    registry: &'a Mutex<Registry>,
    payments: &'a Payments,
    chain: &'a dyn ChainView,
    network: NetworkId,
}

impl SyncTargets for TargetAdapter<'_> {
    fn registry_count(&self) -> usize {
        self.registry.lock().size()
    }

    fn request_full_list(&mut self, peer: &PeerInfo, transport: &mut dyn Transport, now: i64) {
        self.registry
            .lock()
            .ask_for_full_list(peer, self.network, now, transport);
    }

    fn request_payment_sync(&mut self, peer: &PeerInfo, transport: &mut dyn Transport, _now: i64) {
        let limit = self.registry.lock().vote_storage_limit();
        // Ask for all payment votes the peer holds, then for the specific
        // low-data blocks we can identify.
        transport.send(peer.addr, WireMessage::PaymentSync(limit as i32));
        self.payments
            .request_low_data_blocks(peer.addr, self.chain, limit, transport);
    }

    fn payment_data_is_enough(&self) -> bool {
        let limit = self.registry.lock().vote_storage_limit();
        self.payments.is_enough_data(limit)
    }
}
