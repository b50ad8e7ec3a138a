//! The vote store and its ingest pipeline.

use crate::payees::BlockPayees;
use onyx_chain::ChainView;
use onyx_messages::{Inv, InvKind, MsgHash, PaymentVote, WireMessage};
use onyx_net::Transport;
use onyx_registry::{GossipContext, IngestResult, PaymentsView, Registry, RejectReason};
use onyx_sync::SyncState;
use onyx_types::params::*;
use onyx_types::{Outpoint, PrivateKey, Script};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Misbehavior points for re-requesting the payment sync too soon.
const PAYMENT_SYNC_SPAM_DOS: u8 = 20;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct StoredVote {
    pub vote: PaymentVote,
    /// Signature and rank validated; only verified votes are served to
    /// peers or counted toward buckets.
    pub verified: bool,
}

#[derive(Default, Serialize, Deserialize)]
pub(crate) struct VoteStore {
    pub votes: HashMap<MsgHash, StoredVote>,
    /// Last height each node voted for, enforcing one vote per height.
    pub last_votes: HashMap<Outpoint, u32>,
}

/// All payment-election state.
///
/// Vote and bucket maps live under separate locks so winner lookups and
/// coinbase validation (`blocks`) don't serialize behind vote ingest
/// (`votes`). Lock order where both are needed: `blocks` before `votes`.
#[derive(Default)]
pub struct Payments {
    pub(crate) votes: RwLock<VoteStore>,
    pub(crate) blocks: RwLock<BTreeMap<u32, BlockPayees>>,
}

impl Payments {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Queries ------------------------------------------------------------

    pub fn vote_count(&self) -> usize {
        self.votes.read().votes.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn has_verified_vote(&self, hash: &MsgHash) -> bool {
        self.votes
            .read()
            .votes
            .get(hash)
            .is_some_and(|stored| stored.verified)
    }

    pub fn vote(&self, hash: &MsgHash) -> Option<PaymentVote> {
        self.votes.read().votes.get(hash).map(|s| s.vote.clone())
    }

    /// The winning payee for a height, when votes exist.
    pub fn block_payee(&self, height: u32) -> Option<Script> {
        self.blocks
            .read()
            .get(&height)
            .and_then(|payees| payees.best_payee())
    }

    /// Whether enough vote history has arrived for sync to finish.
    pub fn is_enough_data(&self, storage_limit: u32) -> bool {
        let average_votes = (SIGNATURES_TOTAL + SIGNATURES_REQUIRED) / 2;
        self.block_count() > storage_limit as usize
            && self.vote_count() > storage_limit as usize * average_votes
    }

    // -- Vote ingest --------------------------------------------------------

    /// Apply (or reject) a payment vote from the network.
    pub fn ingest_vote(
        &self,
        src: Option<SocketAddr>,
        vote: PaymentVote,
        registry: &mut Registry,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
    ) -> IngestResult {
        // Ignore payment traffic until the node list is synced.
        if !sync.is_list_synced() {
            return IngestResult::rejected(0, RejectReason::NotSynced);
        }
        let Some(tip) = chain.tip_height() else {
            return IngestResult::rejected(0, RejectReason::UnknownBlock);
        };

        let hash = vote.hash();
        let short = vote.voter.to_short_string();
        {
            let mut store = self.votes.write();
            if store.votes.contains_key(&hash) {
                return IngestResult::AcceptedSeen;
            }
            // Remember the vote before validating so the same bytes are
            // never processed twice; verification happens below.
            store.votes.insert(
                hash,
                StoredVote {
                    vote: vote.clone(),
                    verified: false,
                },
            );
        }

        let first_block = tip.saturating_sub(registry.vote_storage_limit());
        if vote.block_height < first_block || vote.block_height > tip + VOTE_FUTURE_WINDOW {
            tracing::debug!(
                voter = %short,
                height = vote.block_height,
                tip,
                "vote outside the storage window"
            );
            return IngestResult::rejected(0, RejectReason::OutOfWindow);
        }

        let Some(voter) = registry.node_info(&vote.voter) else {
            // Some info is missing; we can't validate, so ask around.
            tracing::debug!(voter = %short, "vote from unknown service node");
            if let Some(src) = src {
                registry.ask_for_entry(src, vote.voter, ctx.now, transport);
            }
            return IngestResult::rejected(0, RejectReason::UnknownNode);
        };

        // Old blocks tolerate nodes that have not upgraded yet.
        let min_required_proto = if vote.block_height >= tip {
            ctx.min_payment_proto
        } else {
            MIN_PAYMENT_PROTO_V1
        };
        if voter.protocol_version < min_required_proto {
            tracing::debug!(
                voter = %short,
                proto = voter.protocol_version,
                required = min_required_proto,
                "voter protocol too old"
            );
            return IngestResult::rejected(0, RejectReason::OutdatedProtocol);
        }

        let rank = registry.rank_of(
            &vote.voter,
            chain,
            vote.block_height.saturating_sub(RANK_HASH_DEPTH),
            min_required_proto,
        );
        let Some(rank) = rank else {
            tracing::debug!(voter = %short, "cannot rank voter");
            return IngestResult::rejected(0, RejectReason::NotInTopRanks);
        };
        if rank > SIGNATURES_TOTAL {
            // Nodes mistakenly think they are in the top 10 all the time;
            // only punish votes that are wildly off for future blocks.
            let dos = if rank > SIGNATURES_TOTAL * 2 && vote.block_height > tip {
                PAYMENT_SYNC_SPAM_DOS
            } else {
                0
            };
            tracing::debug!(voter = %short, rank, "voter not in the top ranks");
            return IngestResult::rejected(dos, RejectReason::NotInTopRanks);
        }

        {
            let mut store = self.votes.write();
            if store.last_votes.get(&vote.voter) == Some(&vote.block_height) {
                tracing::debug!(voter = %short, height = vote.block_height, "node already voted");
                return IngestResult::rejected(0, RejectReason::AlreadyVoted);
            }
            store.last_votes.insert(vote.voter, vote.block_height);
        }

        if !vote.verify_sig(&voter.service_pubkey) {
            // Either our registry entry is outdated (ask for a refresh) or
            // the vote was signed with a key we'll never know; both are
            // unprovable for past blocks.
            let dos = if sync.is_list_synced() && vote.block_height > tip {
                PAYMENT_SYNC_SPAM_DOS
            } else {
                0
            };
            if let Some(src) = src {
                registry.ask_for_entry(src, vote.voter, ctx.now, transport);
            }
            return IngestResult::rejected(dos, RejectReason::BadSignature);
        }

        if !self.add_vote(&vote, chain) {
            return IngestResult::rejected(0, RejectReason::UnknownBlock);
        }
        tracing::debug!(
            voter = %short,
            height = vote.block_height,
            "payment vote accepted"
        );
        sync.note_payment_vote(ctx.now);
        transport.relay(Inv::new(InvKind::PaymentVote, hash));
        IngestResult::Accepted
    }

    /// File a validated vote into its height bucket. Fails when the rank
    /// hash for the height is unknown.
    pub fn add_vote(&self, vote: &PaymentVote, chain: &dyn ChainView) -> bool {
        if chain
            .block_hash_at(vote.block_height.saturating_sub(RANK_HASH_DEPTH))
            .is_none()
        {
            return false;
        }
        if self.has_verified_vote(&vote.hash()) {
            return false;
        }

        let mut blocks = self.blocks.write();
        let mut store = self.votes.write();
        store.votes.insert(
            vote.hash(),
            StoredVote {
                vote: vote.clone(),
                verified: true,
            },
        );
        blocks
            .entry(vote.block_height)
            .or_insert_with(|| BlockPayees::new(vote.block_height))
            .add_vote(vote);
        true
    }

    // -- Local voting -------------------------------------------------------

    /// Produce, record, and relay our vote for `block_height` when we rank
    /// in the signing set. Called with `tip + VOTE_LEAD_BLOCKS` on every
    /// new tip.
    pub fn vote_for_winner(
        &self,
        block_height: u32,
        registry: &mut Registry,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
        our_outpoint: Outpoint,
        service_key: &PrivateKey,
    ) -> Option<PaymentVote> {
        // Little chance to pick the right winner while the list is out of
        // sync; don't even try.
        if !sync.is_list_synced() {
            return None;
        }

        let rank = registry.rank_of(
            &our_outpoint,
            chain,
            block_height.saturating_sub(RANK_HASH_DEPTH),
            ctx.min_payment_proto,
        )?;
        if rank > SIGNATURES_TOTAL {
            tracing::debug!(rank, "not in the signing set for this height");
            return None;
        }

        let (winner, _) = registry.next_in_queue_for_payment(
            block_height,
            true,
            chain,
            self,
            ctx.now,
            ctx.min_payment_proto,
        );
        let winner = match winner {
            Some(winner) => winner,
            None => {
                tracing::warn!(height = block_height, "failed to find a service node to pay");
                return None;
            }
        };

        let mut vote = PaymentVote::new(
            our_outpoint,
            block_height,
            Script::p2pkh(&winner.collateral_pubkey),
        );
        vote.sign(service_key);

        if !self.add_vote(&vote, chain) {
            return None;
        }
        {
            let mut store = self.votes.write();
            store.last_votes.insert(our_outpoint, block_height);
        }
        tracing::info!(
            height = block_height,
            winner = %winner.outpoint.to_short_string(),
            "voted for payment winner"
        );
        if sync.is_winners_synced() {
            transport.relay(Inv::new(InvKind::PaymentVote, vote.hash()));
        }
        Some(vote)
    }

    // -- Peer sync ----------------------------------------------------------

    /// Serve a peer's payment-sync request: inventory for every verified
    /// vote on future heights, then a terminating count.
    pub fn handle_payment_sync(
        &self,
        peer: SocketAddr,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        fulfilled: &mut onyx_net::FulfilledRequests,
        transport: &mut dyn Transport,
    ) {
        // Heavy; only served when fully synced ourselves.
        if !sync.is_synced() {
            return;
        }
        if fulfilled.has(peer, "payment-sync-served", ctx.now) {
            tracing::debug!(peer = %peer, "peer re-requested payment sync too soon");
            transport.misbehave(peer, PAYMENT_SYNC_SPAM_DOS);
            return;
        }
        fulfilled.add(peer, "payment-sync-served", ctx.now, 60 * 60);

        let Some(tip) = chain.tip_height() else {
            return;
        };

        let mut count = 0i32;
        {
            let blocks = self.blocks.read();
            let votes = self.votes.read();
            for height in tip..tip + VOTE_FUTURE_WINDOW {
                let Some(payees) = blocks.get(&height) else {
                    continue;
                };
                for bucket in payees.buckets() {
                    for hash in bucket.vote_hashes() {
                        if !votes.votes.get(hash).is_some_and(|s| s.verified) {
                            continue;
                        }
                        transport.push_inventory(peer, Inv::new(InvKind::PaymentVote, *hash));
                        count += 1;
                    }
                }
            }
        }

        transport.send(
            peer,
            WireMessage::SyncStatusCount {
                stage: onyx_sync::SyncStage::Votes.id(),
                count,
            },
        );
        tracing::info!(peer = %peer, count, "served payment votes");
    }

    /// Ask a peer for payment blocks we have little or no vote data for,
    /// batched within the get-data limit.
    pub fn request_low_data_blocks(
        &self,
        peer: SocketAddr,
        chain: &dyn ChainView,
        storage_limit: u32,
        transport: &mut dyn Transport,
    ) {
        let Some(tip) = chain.tip_height() else {
            return;
        };
        let average_votes = (SIGNATURES_TOTAL + SIGNATURES_REQUIRED) / 2;

        let mut to_fetch: Vec<Inv> = Vec::new();
        let blocks = self.blocks.read();

        // Heights we know nothing about.
        let first = tip.saturating_sub(storage_limit.saturating_sub(1));
        for height in (first..=tip).rev() {
            if blocks.contains_key(&height) {
                continue;
            }
            let Some(block_hash) = chain.block_hash_at(height) else {
                continue;
            };
            to_fetch.push(Inv::new(
                InvKind::PaymentBlock,
                MsgHash::new(*block_hash.as_bytes()),
            ));
            if to_fetch.len() == MAX_INV {
                transport.push_get_data(peer, std::mem::take(&mut to_fetch));
            }
        }

        // Heights with votes but no clear winner and below-average totals.
        for (height, payees) in blocks.iter() {
            if payees.max_signatures() >= SIGNATURES_REQUIRED
                || payees.total_votes() >= average_votes
            {
                continue;
            }
            let Some(block_hash) = chain.block_hash_at(*height) else {
                continue;
            };
            to_fetch.push(Inv::new(
                InvKind::PaymentBlock,
                MsgHash::new(*block_hash.as_bytes()),
            ));
            if to_fetch.len() == MAX_INV {
                transport.push_get_data(peer, std::mem::take(&mut to_fetch));
            }
        }

        if !to_fetch.is_empty() {
            tracing::debug!(peer = %peer, count = to_fetch.len(), "requesting low-data payment blocks");
            transport.push_get_data(peer, to_fetch);
        }
    }

    // -- Maintenance --------------------------------------------------------

    /// Evict votes (and their buckets) older than the storage window.
    pub fn check_and_remove(&self, tip: u32, storage_limit: u32) {
        let mut blocks = self.blocks.write();
        let mut store = self.votes.write();

        let mut removed = 0usize;
        store.votes.retain(|_, stored| {
            let keep = tip.saturating_sub(stored.vote.block_height) <= storage_limit;
            if !keep {
                blocks.remove(&stored.vote.block_height);
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(removed, "evicted payment votes outside the storage window");
        }
        tracing::debug!(
            votes = store.votes.len(),
            blocks = blocks.len(),
            "payment store swept"
        );
    }

    pub fn clear(&self) {
        self.blocks.write().clear();
        let mut store = self.votes.write();
        store.votes.clear();
        store.last_votes.clear();
    }
}

impl PaymentsView for Payments {
    fn block_has_payee(&self, height: u32, payee: &Script, min_votes: usize) -> bool {
        self.blocks
            .read()
            .get(&height)
            .is_some_and(|payees| payees.has_payee_with_votes(payee, min_votes))
    }

    /// Look ahead `SCHEDULED_LOOKAHEAD` blocks to let the latest votes
    /// propagate before a node is considered electable again.
    fn is_scheduled(&self, payee: &Script, not_height: u32, tip: u32) -> bool {
        let blocks = self.blocks.read();
        for height in tip..=tip + SCHEDULED_LOOKAHEAD {
            if height == not_height {
                continue;
            }
            let best = blocks.get(&height).and_then(|payees| payees.best_payee());
            if best.as_ref() == Some(payee) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_chain::{MemoryChain, Utxo};
    use onyx_crypto::keypair_from_seed;
    use onyx_messages::{Announce, Ping};
    use onyx_net::{FulfilledRequests, NullTransport};
    use onyx_types::{Amount, NetworkId, Signature, TxHash};

    const T0: i64 = 985_000;
    const NOW: i64 = 990_800;

    fn test_outpoint(seed: u8) -> Outpoint {
        Outpoint::new(TxHash::new([seed; 32]), 0)
    }

    fn service_key(seed: u8) -> onyx_types::KeyPair {
        keypair_from_seed(&[seed.wrapping_add(50); 32])
    }

    fn gossip_ctx(now: i64) -> GossipContext {
        GossipContext {
            now,
            network: NetworkId::Main,
            min_payment_proto: MIN_PAYMENT_PROTO_V1,
            our_outpoint: None,
            our_service_pubkey: None,
        }
    }

    fn synced_state(now: i64) -> SyncState {
        let state = SyncState::new(now);
        let mut fulfilled = FulfilledRequests::new();
        for _ in 0..4 {
            state.switch_to_next(now, &mut fulfilled);
        }
        state
    }

    /// Registry of `n` enabled nodes built through the real announce/ping
    /// ingest pipeline.
    fn build_network(n: u8) -> (MemoryChain, Registry, SyncState, NullTransport) {
        let mut chain = MemoryChain::with_tip(200);
        chain.set_genesis_time(900_000);
        let sync = synced_state(T0);
        let mut transport = NullTransport::new();
        let mut registry = Registry::new();

        for seed in 1..=n {
            let ckp = keypair_from_seed(&[seed; 32]);
            let skp = service_key(seed);
            chain.add_utxo(
                test_outpoint(seed),
                Utxo {
                    value: Amount::collateral(),
                    script: Script::p2pkh(&ckp.public),
                    height: 10,
                },
            );
            let mut ping = Ping::new(test_outpoint(seed), chain.block_hash_at(188).unwrap(), T0);
            ping.sign(&skp.private);
            let mut ann = Announce {
                outpoint: test_outpoint(seed),
                addr: format!("52.40.0.{seed}:8585").parse().unwrap(),
                collateral_pubkey: ckp.public,
                service_pubkey: skp.public,
                sig: Signature::ZERO,
                sig_time: T0,
                protocol_version: PROTOCOL_VERSION,
                last_ping: Some(ping),
                recovery: false,
            };
            ann.sign(&ckp.private, T0);
            let result = registry.ingest_announce(
                None,
                ann,
                &chain,
                &gossip_ctx(T0),
                &sync,
                &mut transport,
            );
            assert!(result.is_accepted());

            let mut ping = Ping::new(
                test_outpoint(seed),
                chain.block_hash_at(188).unwrap(),
                T0 + 700,
            );
            ping.sign(&skp.private);
            let result = registry.ingest_ping(
                None,
                ping,
                &chain,
                &gossip_ctx(T0 + 710),
                &sync,
                &mut transport,
            );
            assert!(result.is_accepted());
        }
        assert_eq!(registry.count_enabled(MIN_PAYMENT_PROTO_V1), n as usize);
        transport.clear();
        (chain, registry, sync, transport)
    }

    /// A voter ranked within (or outside) the signing set at `height - 101`.
    fn voter_with_rank(
        registry: &Registry,
        chain: &MemoryChain,
        height: u32,
        in_top: bool,
        n: u8,
    ) -> u8 {
        for seed in 1..=n {
            let rank = registry
                .rank_of(
                    &test_outpoint(seed),
                    chain,
                    height - RANK_HASH_DEPTH,
                    MIN_PAYMENT_PROTO_V1,
                )
                .unwrap();
            if in_top == (rank <= SIGNATURES_TOTAL) {
                return seed;
            }
        }
        panic!("no voter with the requested rank");
    }

    fn signed_vote(seed: u8, height: u32, payee: Script) -> PaymentVote {
        let mut vote = PaymentVote::new(test_outpoint(seed), height, payee);
        vote.sign(&service_key(seed).private);
        vote
    }

    #[test]
    fn valid_vote_is_accepted_and_bucketed() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);
        let payee = Script::from_bytes(vec![0xaa; 25]);

        let result = payments.ingest_vote(
            None,
            signed_vote(voter, 205, payee.clone()),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        assert_eq!(result, IngestResult::Accepted);
        assert_eq!(payments.block_payee(205), Some(payee));
        assert!(transport
            .relayed
            .iter()
            .any(|inv| inv.kind == InvKind::PaymentVote));
    }

    #[test]
    fn duplicate_vote_is_seen() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);
        let vote = signed_vote(voter, 205, Script::from_bytes(vec![0xaa; 25]));

        payments.ingest_vote(
            None,
            vote.clone(),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        let result = payments.ingest_vote(
            None,
            vote,
            &mut registry,
            &chain,
            &gossip_ctx(NOW + 1),
            &sync,
            &mut transport,
        );
        assert_eq!(result, IngestResult::AcceptedSeen);
        assert_eq!(payments.vote_count(), 1);
    }

    #[test]
    fn one_vote_per_voter_per_height() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);

        payments.ingest_vote(
            None,
            signed_vote(voter, 205, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        // Same voter, same height, different payee: a different message
        // hash, but still one vote per height.
        let result = payments.ingest_vote(
            None,
            signed_vote(voter, 205, Script::from_bytes(vec![0xbb; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW + 1),
            &sync,
            &mut transport,
        );
        assert_eq!(
            result,
            IngestResult::Rejected {
                dos: 0,
                reason: RejectReason::AlreadyVoted
            }
        );
    }

    #[test]
    fn votes_outside_the_window_are_dropped() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);

        let result = payments.ingest_vote(
            None,
            signed_vote(voter, 200 + VOTE_FUTURE_WINDOW + 10, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        assert_eq!(
            result,
            IngestResult::Rejected {
                dos: 0,
                reason: RejectReason::OutOfWindow
            }
        );
    }

    #[test]
    fn unknown_voter_triggers_entry_request() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let peer: SocketAddr = "88.1.1.1:8585".parse().unwrap();

        let result = payments.ingest_vote(
            Some(peer),
            signed_vote(99, 205, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        assert_eq!(
            result,
            IngestResult::Rejected {
                dos: 0,
                reason: RejectReason::UnknownNode
            }
        );
        assert!(matches!(
            transport.sent_to(peer)[0],
            WireMessage::DsegRequest(Some(_))
        ));
    }

    #[test]
    fn bad_signature_on_future_vote_scores_20() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);

        let mut vote = PaymentVote::new(
            test_outpoint(voter),
            205,
            Script::from_bytes(vec![0xaa; 25]),
        );
        vote.sign(&service_key(99).private); // wrong key
        let result = payments.ingest_vote(
            None,
            vote,
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        assert_eq!(result.dos(), 20);
    }

    #[test]
    fn low_ranked_voter_is_rejected() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let outsider = voter_with_rank(&registry, &chain, 205, false, 12);

        let result = payments.ingest_vote(
            None,
            signed_vote(outsider, 205, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        assert_eq!(
            result,
            IngestResult::Rejected {
                dos: 0,
                reason: RejectReason::NotInTopRanks
            }
        );
    }

    #[test]
    fn votes_ignored_until_list_synced() {
        let (chain, mut registry, _, mut transport) = build_network(12);
        let payments = Payments::new();
        let not_synced = SyncState::new(NOW);

        let result = payments.ingest_vote(
            None,
            signed_vote(1, 205, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &not_synced,
            &mut transport,
        );
        assert_eq!(
            result,
            IngestResult::Rejected {
                dos: 0,
                reason: RejectReason::NotSynced
            }
        );
    }

    #[test]
    fn scheduling_looks_ahead_eight_blocks() {
        let chain = MemoryChain::with_tip(200);
        let payments = Payments::new();
        let payee = Script::from_bytes(vec![0xaa; 25]);
        assert!(payments.add_vote(&signed_vote(1, 203, payee.clone()), &chain));

        assert!(payments.is_scheduled(&payee, 999, 200));
        // The height being filled is excluded.
        assert!(!payments.is_scheduled(&payee, 203, 200));
        // Outside the look-ahead.
        assert!(!payments.is_scheduled(&payee, 999, 190));
    }

    #[test]
    fn eviction_honors_the_storage_window() {
        let chain = MemoryChain::with_tip(200);
        let payments = Payments::new();
        assert!(payments.add_vote(&signed_vote(1, 100, Script::from_bytes(vec![0xaa; 25])), &chain));
        assert!(payments.add_vote(&signed_vote(2, 195, Script::from_bytes(vec![0xbb; 25])), &chain));

        payments.check_and_remove(200, 50);
        assert_eq!(payments.vote_count(), 1);
        assert_eq!(payments.block_count(), 1);
        assert_eq!(payments.block_payee(100), None);
        assert!(payments.block_payee(195).is_some());
    }

    #[test]
    fn payment_sync_serves_future_votes_once() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let voter = voter_with_rank(&registry, &chain, 205, true, 12);
        payments.ingest_vote(
            None,
            signed_vote(voter, 205, Script::from_bytes(vec![0xaa; 25])),
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
        );
        transport.clear();

        let peer: SocketAddr = "88.2.2.2:8585".parse().unwrap();
        let mut fulfilled = FulfilledRequests::new();
        payments.handle_payment_sync(peer, &chain, &gossip_ctx(NOW), &sync, &mut fulfilled, &mut transport);
        assert_eq!(transport.inventory.len(), 1);
        assert!(transport
            .sent_to(peer)
            .iter()
            .any(|m| matches!(m, WireMessage::SyncStatusCount { .. })));

        payments.handle_payment_sync(peer, &chain, &gossip_ctx(NOW + 1), &sync, &mut fulfilled, &mut transport);
        assert_eq!(transport.misbehavior, vec![(peer, 20)]);
    }

    #[test]
    fn vote_for_winner_signs_and_records() {
        let (chain, mut registry, sync, mut transport) = build_network(12);
        let payments = Payments::new();
        let our_seed = voter_with_rank(&registry, &chain, 205, true, 12);
        let our_keys = service_key(our_seed);

        let vote = payments.vote_for_winner(
            205,
            &mut registry,
            &chain,
            &gossip_ctx(NOW),
            &sync,
            &mut transport,
            test_outpoint(our_seed),
            &our_keys.private,
        );
        let vote = vote.expect("we are in the signing set");
        assert!(vote.verify_sig(&our_keys.public));
        assert!(payments.has_verified_vote(&vote.hash()));
        assert_eq!(payments.block_payee(205), Some(vote.payee.clone()));

        // Voting again for the same height changes nothing.
        let again = payments.vote_for_winner(
            205,
            &mut registry,
            &chain,
            &gossip_ctx(NOW + 1),
            &sync,
            &mut transport,
            test_outpoint(our_seed),
            &our_keys.private,
        );
        assert!(again.is_none());
    }

    #[test]
    fn request_low_data_blocks_batches_requests() {
        let chain = MemoryChain::with_tip(200);
        let payments = Payments::new();
        let mut transport = NullTransport::new();
        let peer: SocketAddr = "88.3.3.3:8585".parse().unwrap();

        // Nothing known: every height in the window is low-data.
        payments.request_low_data_blocks(peer, &chain, 50, &mut transport);
        let total: usize = transport.get_data.iter().map(|(_, invs)| invs.len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn enough_data_needs_blocks_and_votes() {
        let chain = MemoryChain::with_tip(200);
        let payments = Payments::new();
        assert!(!payments.is_enough_data(1));

        for height in [150u32, 160] {
            for seed in 1..=9u8 {
                let mut vote = PaymentVote::new(
                    test_outpoint(seed),
                    height,
                    Script::from_bytes(vec![0xcc; 25]),
                );
                vote.sign(&service_key(seed).private);
                assert!(payments.add_vote(&vote, &chain));
            }
        }
        // 2 blocks > 1, 18 votes > 8.
        assert!(payments.is_enough_data(1));
    }
}
