//! Proof-of-service: reciprocal nonce challenges that detect impostors
//! advertising an address they don't control.
//!
//! Top-ranked nodes audit addresses a few ranks below them. A challenged
//! node proves address ownership by signing the auditor's nonce; the
//! auditor then relays the signed result. Nodes sharing the verified
//! address with a different collateral get their ban score raised.

use crate::registry::Registry;
use crate::GossipContext;
use onyx_chain::ChainView;
use onyx_crypto::{sign_message, verify_signature};
use onyx_messages::{Inv, InvKind, Verify, WireMessage};
use onyx_net::{FulfilledRequests, Transport};
use onyx_sync::SyncState;
use onyx_types::params::*;
use onyx_types::{Outpoint, PrivateKey, PublicKey};
use rand::Rng;
use std::net::SocketAddr;

/// Fulfilled-request entries for verify exchanges live this long.
const VERIFY_FULFILLED_TTL: i64 = 60 * 60;

/// The local node's signing identity, needed to answer and issue
/// challenges.
pub struct LocalSigner<'a> {
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub service_pubkey: PublicKey,
    pub service_key: &'a PrivateKey,
}

impl Registry {
    /// Dispatch a verify message by its role.
    pub fn handle_verify(
        &mut self,
        src: SocketAddr,
        v: Verify,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        fulfilled: &mut FulfilledRequests,
        transport: &mut dyn Transport,
        local: Option<&LocalSigner>,
    ) {
        if v.is_request() {
            self.send_verify_reply(src, v, chain, ctx, fulfilled, transport, local);
        } else if v.is_reply() {
            self.process_verify_reply(src, v, chain, ctx, fulfilled, transport, local);
        } else {
            self.process_verify_broadcast(src, v, chain, transport);
        }
    }

    /// Case 1: someone asked us to prove we own the address we advertise.
    fn send_verify_reply(
        &mut self,
        src: SocketAddr,
        mut v: Verify,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        fulfilled: &mut FulfilledRequests,
        transport: &mut dyn Transport,
        local: Option<&LocalSigner>,
    ) {
        // Only service nodes answer. No penalty for asking a regular node:
        // a malicious party might be advertising our IP to confuse auditors.
        let Some(local) = local else {
            return;
        };

        if fulfilled.has(src, "verify-reply", ctx.now) {
            tracing::debug!(peer = %src, "peer re-requested verification too soon");
            transport.misbehave(src, 20);
            return;
        }

        let Some(block_hash) = chain.block_hash_at(v.block_height) else {
            tracing::debug!(height = v.block_height, "verify request for unknown height");
            return;
        };

        let message = Verify {
            addr: local.addr,
            ..v.clone()
        }
        .reply_message(&block_hash);
        v.sig1 = sign_message(message.as_bytes(), local.service_key);
        if !verify_signature(message.as_bytes(), &v.sig1, &local.service_pubkey) {
            tracing::warn!("could not produce a valid verify reply signature");
            return;
        }

        transport.send(src, WireMessage::Verify(v));
        fulfilled.add(src, "verify-reply", ctx.now, VERIFY_FULFILLED_TTL);
    }

    /// Case 2: a node we challenged replied with its proof.
    fn process_verify_reply(
        &mut self,
        src: SocketAddr,
        mut v: Verify,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        fulfilled: &mut FulfilledRequests,
        transport: &mut dyn Transport,
        local: Option<&LocalSigner>,
    ) {
        // Did we even ask?
        if !fulfilled.has(src, "verify-request", ctx.now) {
            tracing::debug!(peer = %src, "unsolicited verify reply");
            transport.misbehave(src, 20);
            return;
        }
        let Some(asked) = self.we_asked_for_verification.get(&src) else {
            transport.misbehave(src, 20);
            return;
        };
        if asked.nonce != v.nonce {
            tracing::debug!(peer = %src, requested = asked.nonce, received = v.nonce, "wrong nonce");
            transport.misbehave(src, 20);
            return;
        }
        if asked.block_height != v.block_height {
            tracing::debug!(peer = %src, "wrong block height in verify reply");
            transport.misbehave(src, 20);
            return;
        }
        let Some(block_hash) = chain.block_hash_at(v.block_height) else {
            return;
        };
        if fulfilled.has(src, "verify-done", ctx.now) {
            tracing::debug!(peer = %src, "address already verified recently");
            transport.misbehave(src, 20);
            return;
        }

        let message1 = Verify { addr: src, ..v.clone() }.reply_message(&block_hash);

        // Find the node that actually controls this address; everyone else
        // announcing it is an impostor.
        let mut real: Option<Outpoint> = None;
        let mut impostors: Vec<Outpoint> = Vec::new();
        for entry in self.entries() {
            if entry.addr != src {
                continue;
            }
            if verify_signature(message1.as_bytes(), &v.sig1, &entry.service_pubkey) {
                real = Some(entry.outpoint);
            } else {
                impostors.push(entry.outpoint);
            }
        }

        let Some(real_outpoint) = real else {
            // Nobody at this address could have signed that; the peer is
            // playing games.
            tracing::warn!(peer = %src, "no real service node found for verified address");
            transport.misbehave(src, 20);
            return;
        };

        if let Some(entry) = self.entry_mut(&real_outpoint) {
            if !entry.is_pose_verified() {
                entry.decrease_pose_score();
            }
        }
        fulfilled.add(src, "verify-done", ctx.now, VERIFY_FULFILLED_TTL);
        tracing::info!(node = %real_outpoint.to_short_string(), addr = %src, "verified service node");

        // Broadcast the result if we are an activated node ourselves.
        if let Some(local) = local {
            let real_addr = self
                .entry(&real_outpoint)
                .map(|e| e.addr)
                .unwrap_or(src);
            v.addr = real_addr;
            v.vin1 = real_outpoint;
            v.vin2 = local.outpoint;
            let message2 = v.broadcast_message(&block_hash);
            v.sig2 = sign_message(message2.as_bytes(), local.service_key);
            self.we_asked_for_verification.insert(src, v.clone());
            self.seen_verifies.insert(v.hash(), v.clone());
            transport.relay(Inv::new(InvKind::Verify, v.hash()));
        }

        for outpoint in &impostors {
            if let Some(entry) = self.entry_mut(outpoint) {
                entry.increase_pose_score();
                tracing::debug!(
                    node = %outpoint.to_short_string(),
                    score = entry.pose_score,
                    "raised ban score for impostor"
                );
            }
        }
        if !impostors.is_empty() {
            tracing::info!(count = impostors.len(), addr = %src, "ban score raised for fake nodes");
        }
    }

    /// Case 3: a relayed, doubly-signed verification from elsewhere.
    fn process_verify_broadcast(
        &mut self,
        src: SocketAddr,
        v: Verify,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
    ) {
        let hash = v.hash();
        if self.seen_verifies.contains_key(&hash) {
            return;
        }
        self.seen_verifies.insert(hash, v.clone());

        let Some(tip) = chain.tip_height() else {
            return;
        };
        // We don't care about history.
        if v.block_height < tip.saturating_sub(MAX_POSE_BLOCKS) {
            tracing::debug!(height = v.block_height, tip, "outdated verify broadcast");
            return;
        }

        if v.vin1 == v.vin2 {
            // Verifying yourself was not a good idea.
            tracing::debug!(node = %v.vin1.to_short_string(), "self-verification broadcast");
            transport.misbehave(src, 100);
            return;
        }

        let Some(block_hash) = chain.block_hash_at(v.block_height) else {
            return;
        };

        // Only top-ranked nodes may broadcast audits.
        let Some(rank) = self.rank_of(&v.vin2, chain, v.block_height, MIN_POSE_PROTO) else {
            tracing::debug!(node = %v.vin2.to_short_string(), "cannot rank auditor");
            return;
        };
        if rank > MAX_POSE_RANK {
            tracing::debug!(node = %v.vin2.to_short_string(), rank, "auditor not in top ranks");
            return;
        }

        let message1 = v.reply_message(&block_hash);
        let message2 = v.broadcast_message(&block_hash);

        let Some(verified) = self.entry(&v.vin1) else {
            tracing::debug!(node = %v.vin1.to_short_string(), "unknown verified node");
            return;
        };
        let Some(auditor) = self.entry(&v.vin2) else {
            tracing::debug!(node = %v.vin2.to_short_string(), "unknown auditor node");
            return;
        };

        if verified.addr != v.addr {
            tracing::debug!(addr = %v.addr, "address does not match the verified node");
            return;
        }
        if !verify_signature(message1.as_bytes(), &v.sig1, &verified.service_pubkey) {
            tracing::debug!("verify broadcast: bad replier signature");
            return;
        }
        if !verify_signature(message2.as_bytes(), &v.sig2, &auditor.service_pubkey) {
            tracing::debug!("verify broadcast: bad auditor signature");
            return;
        }

        if let Some(entry) = self.entry_mut(&v.vin1) {
            if !entry.is_pose_verified() {
                entry.decrease_pose_score();
            }
        }
        transport.relay(Inv::new(InvKind::Verify, hash));
        tracing::info!(node = %v.vin1.to_short_string(), addr = %v.addr, "accepted verify broadcast");

        // Raise the score for everyone else claiming the same address.
        let impostors: Vec<Outpoint> = self
            .entries()
            .filter(|e| e.addr == v.addr && e.outpoint != v.vin1)
            .map(|e| e.outpoint)
            .collect();
        for outpoint in &impostors {
            if let Some(entry) = self.entry_mut(outpoint) {
                entry.increase_pose_score();
            }
        }
        if !impostors.is_empty() {
            tracing::info!(count = impostors.len(), addr = %v.addr, "ban score raised for fake nodes");
        }
    }

    /// Periodic audit round: if we rank in the top `MAX_POSE_RANK`, challenge
    /// up to `MAX_POSE_CONNECTIONS` nodes starting a stride below us.
    pub fn do_full_verification_step(
        &mut self,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        fulfilled: &mut FulfilledRequests,
        transport: &mut dyn Transport,
        local: Option<&LocalSigner>,
    ) {
        let Some(local) = local else {
            return;
        };
        if !sync.is_synced() {
            return;
        }
        let Some(tip) = chain.tip_height() else {
            return;
        };
        let height = tip.saturating_sub(1);
        let ranked = self.ranks(chain, height, MIN_POSE_PROTO);

        let mut my_rank = None;
        for (rank, info) in &ranked {
            if *rank > MAX_POSE_RANK {
                // Sorted: once past the cap without finding ourselves, we
                // don't participate this round.
                break;
            }
            if info.outpoint == local.outpoint {
                my_rank = Some(*rank);
                break;
            }
        }
        let Some(my_rank) = my_rank else {
            return;
        };
        tracing::debug!(rank = my_rank, total = ranked.len(), "running verification round");

        let mut offset = MAX_POSE_RANK + my_rank - 1;
        let mut sent = 0usize;
        while offset < ranked.len() {
            let (_, info) = &ranked[offset];
            let target = self
                .entry(&info.outpoint)
                .map(|e| (e.is_pose_verified(), e.is_pose_banned(), e.addr));
            let Some((pose_verified, pose_banned, addr)) = target else {
                offset += MAX_POSE_CONNECTIONS;
                continue;
            };
            if pose_verified || pose_banned {
                offset += MAX_POSE_CONNECTIONS;
                continue;
            }
            tracing::debug!(node = %info.outpoint.to_short_string(), addr = %addr, "verifying");
            if self.send_verify_request(addr, ctx, tip, fulfilled, transport) {
                sent += 1;
                if sent >= MAX_POSE_CONNECTIONS {
                    break;
                }
            }
            offset += MAX_POSE_CONNECTIONS;
        }
        tracing::debug!(count = sent, "sent verification requests");
    }

    fn send_verify_request(
        &mut self,
        addr: SocketAddr,
        ctx: &GossipContext,
        tip: u32,
        fulfilled: &mut FulfilledRequests,
        transport: &mut dyn Transport,
    ) -> bool {
        if fulfilled.has(addr, "verify-request", ctx.now) {
            // Asked recently; too many requests get us banned.
            return false;
        }
        if !transport.connect(addr) {
            tracing::debug!(addr = %addr, "cannot connect for verification");
            return false;
        }
        fulfilled.add(addr, "verify-request", ctx.now, VERIFY_FULFILLED_TTL);

        // Random nonce, stored so only the matching reply is accepted.
        let nonce = rand::thread_rng().gen_range(0..999_999);
        let v = Verify::request(addr, nonce, tip.saturating_sub(1));
        self.we_asked_for_verification.insert(addr, v.clone());
        tracing::debug!(addr = %addr, nonce, "sent verify request");
        transport.send(addr, WireMessage::Verify(v));
        true
    }

    /// Group nodes by address; wherever one of a group is PoSe-verified,
    /// raise the ban score of every other node in that group. Runs on every
    /// tip update.
    pub fn check_same_addr(&mut self, sync: &SyncState) {
        if !sync.is_synced() || self.size() == 0 {
            return;
        }

        let mut by_addr: Vec<(SocketAddr, Outpoint, bool)> = self
            .entries()
            .filter(|e| e.is_enabled() || e.is_pre_enabled())
            .map(|e| (e.addr, e.outpoint, e.is_pose_verified()))
            .collect();
        by_addr.sort_by_key(|(addr, op, _)| (*addr, *op));

        let mut to_ban: Vec<Outpoint> = Vec::new();
        let mut prev: Option<(SocketAddr, Outpoint)> = None;
        let mut verified_in_group: Option<Outpoint> = None;
        for (addr, outpoint, is_verified) in by_addr {
            match prev {
                Some((prev_addr, prev_op)) if prev_addr == addr => {
                    if verified_in_group.is_some() {
                        // Another node at this address already proved itself.
                        to_ban.push(outpoint);
                    } else if is_verified {
                        // This one proved itself; everything before it in the
                        // group was fake.
                        to_ban.push(prev_op);
                        verified_in_group = Some(outpoint);
                    }
                }
                _ => {
                    verified_in_group = is_verified.then_some(outpoint);
                }
            }
            prev = Some((addr, outpoint));
        }

        for outpoint in to_ban {
            if let Some(entry) = self.entry_mut(&outpoint) {
                tracing::info!(node = %outpoint.to_short_string(), "raising ban score for duplicate address");
                entry.increase_pose_score();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GossipContext;
    use onyx_chain::MemoryChain;
    use onyx_crypto::keypair_from_seed;
    use onyx_messages::{Announce, Ping};
    use onyx_net::NullTransport;
    use onyx_types::{KeyPair, NetworkId, Outpoint, Signature, TxHash};

    fn collateral_keys(seed: u8) -> KeyPair {
        keypair_from_seed(&[seed; 32])
    }

    fn service_keys(seed: u8) -> KeyPair {
        keypair_from_seed(&[seed.wrapping_add(50); 32])
    }

    fn test_outpoint(seed: u8) -> Outpoint {
        Outpoint::new(TxHash::new([seed; 32]), 0)
    }

    fn addr_of(seed: u8) -> SocketAddr {
        format!("52.20.0.{seed}:8585").parse().unwrap()
    }

    /// Seed a node straight into the registry (the local-announce path
    /// skips collateral validation).
    fn seed_node(registry: &mut Registry, sync: &SyncState, seed: u8, addr: SocketAddr, now: i64) {
        let ckp = collateral_keys(seed);
        let skp = service_keys(seed);
        let mut ping = Ping::new(
            test_outpoint(seed),
            onyx_types::BlockHash::new({
                let mut b = [0xcdu8; 32];
                b[..4].copy_from_slice(&188u32.to_le_bytes());
                b
            }),
            now,
        );
        ping.sign(&skp.private);
        let mut ann = Announce {
            outpoint: test_outpoint(seed),
            addr,
            collateral_pubkey: ckp.public,
            service_pubkey: skp.public,
            sig: Signature::ZERO,
            sig_time: now - 700,
            protocol_version: onyx_types::params::PROTOCOL_VERSION,
            last_ping: Some(ping),
            recovery: false,
        };
        ann.sign(&ckp.private, now - 700);
        registry.register_local_announce(&ann, now, sync);
    }

    fn synced_state(now: i64) -> SyncState {
        let state = SyncState::new(now);
        let mut fulfilled = FulfilledRequests::new();
        for _ in 0..4 {
            state.switch_to_next(now, &mut fulfilled);
        }
        state
    }

    fn gossip_ctx(now: i64) -> GossipContext {
        GossipContext {
            now,
            network: NetworkId::Main,
            min_payment_proto: onyx_types::params::MIN_PAYMENT_PROTO_V1,
            our_outpoint: None,
            our_service_pubkey: None,
        }
    }

    #[test]
    fn request_gets_a_signed_reply_from_a_service_node() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let our_keys = service_keys(1);
        let local = LocalSigner {
            outpoint: test_outpoint(1),
            addr: addr_of(1),
            service_pubkey: our_keys.public,
            service_key: &our_keys.private,
        };

        let requester: SocketAddr = "66.1.1.1:8585".parse().unwrap();
        let request = Verify::request(addr_of(1), 4242, 199);
        registry.handle_verify(
            requester,
            request,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            Some(&local),
        );

        let sent = transport.sent_to(requester);
        assert_eq!(sent.len(), 1);
        let WireMessage::Verify(reply) = &sent[0] else {
            panic!("expected a verify reply");
        };
        assert!(reply.is_reply());
        let block_hash = chain.block_hash_at(199).unwrap();
        let message = reply.reply_message(&block_hash);
        assert!(verify_signature(
            message.as_bytes(),
            &reply.sig1,
            &our_keys.public
        ));
    }

    #[test]
    fn repeated_requests_are_misbehavior() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let our_keys = service_keys(1);
        let local = LocalSigner {
            outpoint: test_outpoint(1),
            addr: addr_of(1),
            service_pubkey: our_keys.public,
            service_key: &our_keys.private,
        };

        let requester: SocketAddr = "66.1.1.1:8585".parse().unwrap();
        for _ in 0..2 {
            registry.handle_verify(
                requester,
                Verify::request(addr_of(1), 4242, 199),
                &chain,
                &gossip_ctx(now),
                &sync,
                &mut fulfilled,
                &mut transport,
                Some(&local),
            );
        }
        assert_eq!(transport.misbehavior, vec![(requester, 20)]);
    }

    #[test]
    fn regular_nodes_ignore_verify_requests() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let requester: SocketAddr = "66.1.1.1:8585".parse().unwrap();
        registry.handle_verify(
            requester,
            Verify::request(addr_of(1), 4242, 199),
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            None,
        );
        assert!(transport.sent.is_empty());
        assert!(transport.misbehavior.is_empty());
    }

    #[test]
    fn valid_reply_verifies_node_and_broadcasts() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        // Node 1 is the audited node; we run node 2.
        seed_node(&mut registry, &sync, 1, addr_of(1), now);
        let our_keys = service_keys(2);
        let local = LocalSigner {
            outpoint: test_outpoint(2),
            addr: addr_of(2),
            service_pubkey: our_keys.public,
            service_key: &our_keys.private,
        };

        // We asked node 1 to verify itself.
        let src = addr_of(1);
        let request = Verify::request(src, 7777, 199);
        registry.we_asked_for_verification.insert(src, request.clone());
        fulfilled.add(src, "verify-request", now, 3600);

        // Node 1 replies with a valid proof.
        let block_hash = chain.block_hash_at(199).unwrap();
        let mut reply = request;
        let message = reply.reply_message(&block_hash);
        reply.sig1 = sign_message(message.as_bytes(), &service_keys(1).private);

        registry.handle_verify(
            src,
            reply,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            Some(&local),
        );

        let entry = registry.entry(&test_outpoint(1)).unwrap();
        assert_eq!(entry.pose_score, -1);
        assert!(transport
            .relayed
            .iter()
            .any(|inv| inv.kind == InvKind::Verify));
    }

    #[test]
    fn unsolicited_reply_is_misbehavior() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let src = addr_of(1);
        let mut reply = Verify::request(src, 7777, 199);
        reply.sig1 = Signature([1u8; 64]);

        registry.handle_verify(
            src,
            reply,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            None,
        );
        assert_eq!(transport.misbehavior, vec![(src, 20)]);
    }

    #[test]
    fn reply_with_wrong_nonce_is_misbehavior() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let src = addr_of(1);
        registry
            .we_asked_for_verification
            .insert(src, Verify::request(src, 7777, 199));
        fulfilled.add(src, "verify-request", now, 3600);

        let mut reply = Verify::request(src, 1234, 199); // wrong nonce
        reply.sig1 = Signature([1u8; 64]);
        registry.handle_verify(
            src,
            reply,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            None,
        );
        assert_eq!(transport.misbehavior, vec![(src, 20)]);
    }

    #[test]
    fn broadcast_verifies_and_punishes_impostors() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        // Node 1 (real) and node 3 (impostor) share an address; node 2 audits.
        seed_node(&mut registry, &sync, 1, addr_of(1), now);
        seed_node(&mut registry, &sync, 2, addr_of(2), now);
        seed_node(&mut registry, &sync, 3, addr_of(1), now);

        let block_hash = chain.block_hash_at(199).unwrap();
        let mut v = Verify::request(addr_of(1), 9999, 199);
        v.vin1 = test_outpoint(1);
        v.vin2 = test_outpoint(2);
        let m1 = v.reply_message(&block_hash);
        v.sig1 = sign_message(m1.as_bytes(), &service_keys(1).private);
        let m2 = v.broadcast_message(&block_hash);
        v.sig2 = sign_message(m2.as_bytes(), &service_keys(2).private);

        let relayer: SocketAddr = "66.2.2.2:8585".parse().unwrap();
        registry.handle_verify(
            relayer,
            v,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            None,
        );

        assert_eq!(registry.entry(&test_outpoint(1)).unwrap().pose_score, -1);
        assert_eq!(registry.entry(&test_outpoint(3)).unwrap().pose_score, 1);
        assert_eq!(registry.entry(&test_outpoint(2)).unwrap().pose_score, 0);
    }

    #[test]
    fn self_verification_broadcast_scores_100() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        let mut v = Verify::request(addr_of(1), 9999, 199);
        v.vin1 = test_outpoint(1);
        v.vin2 = test_outpoint(1);
        v.sig1 = Signature([1u8; 64]);
        v.sig2 = Signature([2u8; 64]);

        let relayer: SocketAddr = "66.2.2.2:8585".parse().unwrap();
        registry.handle_verify(
            relayer,
            v,
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            None,
        );
        assert_eq!(transport.misbehavior, vec![(relayer, 100)]);
    }

    #[test]
    fn same_addr_banning_escalates_to_pose_ban() {
        let now = 1_000_000;
        let mut chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();

        // Two nodes claim the same address; node 1 is PoSe-verified.
        seed_node(&mut registry, &sync, 1, addr_of(7), now);
        seed_node(&mut registry, &sync, 2, addr_of(7), now);
        for seed in [1u8, 2] {
            chain.add_utxo(
                test_outpoint(seed),
                onyx_chain::Utxo {
                    value: onyx_types::Amount::collateral(),
                    script: onyx_types::Script::p2pkh(&collateral_keys(seed).public),
                    height: 10,
                },
            );
        }
        registry.entry_mut(&test_outpoint(1)).unwrap().pose_score =
            -onyx_types::params::POSE_BAN_MAX_SCORE;

        for _ in 0..onyx_types::params::POSE_BAN_MAX_SCORE {
            registry.check_same_addr(&sync);
        }
        assert_eq!(
            registry.entry(&test_outpoint(2)).unwrap().pose_score,
            onyx_types::params::POSE_BAN_MAX_SCORE
        );

        // The next lifecycle check turns the score into a ban.
        registry.check_all(&chain, &gossip_ctx(now + 10), &sync);
        let banned = registry.entry(&test_outpoint(2)).unwrap();
        assert_eq!(banned.state, onyx_types::LifecycleState::PoSeBan);
        assert_eq!(banned.pose_ban_height, 200 + 2);
    }

    #[test]
    fn verification_round_challenges_lower_ranked_nodes() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        for seed in 1..=30u8 {
            seed_node(&mut registry, &sync, seed, addr_of(seed), now);
        }

        // Find whichever node ranks first and run the round as that node.
        let ranks = registry.ranks(&chain, 199, MIN_POSE_PROTO);
        assert_eq!(ranks.len(), 30);
        let top = &ranks[0].1;
        let top_seed = top.outpoint.txid.as_bytes()[0];
        let our_keys = service_keys(top_seed);
        let local = LocalSigner {
            outpoint: top.outpoint,
            addr: top.addr,
            service_pubkey: our_keys.public,
            service_key: &our_keys.private,
        };

        registry.do_full_verification_step(
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            Some(&local),
        );

        // Rank 1 starts at offset MAX_POSE_RANK, stepping by
        // MAX_POSE_CONNECTIONS: targets at ranks 11 and 21.
        assert_eq!(transport.sent.len(), 2);
        for (_, msg) in &transport.sent {
            let WireMessage::Verify(v) = msg else {
                panic!("expected verify request");
            };
            assert!(v.is_request());
            assert_eq!(v.block_height, 199);
        }
        assert_eq!(registry.we_asked_for_verification.len(), 2);
    }

    #[test]
    fn not_top_ranked_nodes_skip_the_round() {
        let now = 1_000_000;
        let chain = MemoryChain::with_tip(200);
        let sync = synced_state(now);
        let mut registry = Registry::new();
        let mut fulfilled = FulfilledRequests::new();
        let mut transport = NullTransport::new();

        for seed in 1..=30u8 {
            seed_node(&mut registry, &sync, seed, addr_of(seed), now);
        }
        let ranks = registry.ranks(&chain, 199, MIN_POSE_PROTO);
        let last = &ranks[29].1;
        let last_seed = last.outpoint.txid.as_bytes()[0];
        let our_keys = service_keys(last_seed);
        let local = LocalSigner {
            outpoint: last.outpoint,
            addr: last.addr,
            service_pubkey: our_keys.public,
            service_key: &our_keys.private,
        };

        registry.do_full_verification_step(
            &chain,
            &gossip_ctx(now),
            &sync,
            &mut fulfilled,
            &mut transport,
            Some(&local),
        );
        assert!(transport.sent.is_empty());
    }
}
