//! Winner selection: which node is next in the payment queue.

use crate::registry::Registry;
use crate::{NodeInfo, PaymentsView};
use onyx_chain::ChainView;
use onyx_crypto::U256;
use onyx_types::params::RANK_HASH_DEPTH;
use onyx_types::Outpoint;
use std::fmt;

/// Seconds of sig-time seniority required per registered node before a
/// fresh entry can win (2.6 minute block target).
const SENIORITY_SECONDS_PER_NODE: i64 = 156;

/// Why a node is excluded from the payment queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisqualifyReason {
    NotValidForPayment,
    OldProtocol(u32),
    /// Already elected within the look-ahead window.
    Scheduled,
    /// Announced too recently; must wait roughly one payment cycle.
    TooNew { sig_time: i64, qualifies_at: i64 },
    /// Collateral has fewer confirmations than there are nodes.
    YoungCollateral { age: u32, required: u32 },
}

impl fmt::Display for DisqualifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotValidForPayment => write!(f, "not valid for payment"),
            Self::OldProtocol(version) => write!(f, "old protocol {version}"),
            Self::Scheduled => write!(f, "already scheduled"),
            Self::TooNew { sig_time, qualifies_at } => {
                write!(f, "too new (sig_time={sig_time}, qualifies at {qualifies_at})")
            }
            Self::YoungCollateral { age, required } => {
                write!(f, "collateral age {age} < required {required}")
            }
        }
    }
}

impl Registry {
    /// Deterministically select the node to pay at `height`.
    ///
    /// Survivors of the disqualification filters are ordered by how long
    /// ago they were last paid; of the oldest tenth, the one scoring
    /// highest against the block hash at `height - 101` wins. Returns the
    /// winner and the survivor count.
    ///
    /// When the sig-time filter leaves fewer than a third of the enabled
    /// nodes (a network-wide restart wave), the selection reruns once with
    /// that filter disabled.
    pub fn next_in_queue_for_payment(
        &mut self,
        height: u32,
        filter_sig_time: bool,
        chain: &dyn ChainView,
        payments: &dyn PaymentsView,
        now: i64,
        min_proto: u32,
    ) -> (Option<NodeInfo>, usize) {
        let Some(tip) = chain.tip_height() else {
            return (None, 0);
        };
        let enabled = self.count_enabled(min_proto) as i64;

        let mut survivors: Vec<(u32, Outpoint)> = Vec::new();
        for entry in self.entries_mut() {
            let reason = if !entry.is_valid_for_payment() {
                Some(DisqualifyReason::NotValidForPayment)
            } else if entry.protocol_version < min_proto {
                Some(DisqualifyReason::OldProtocol(entry.protocol_version))
            } else if payments.is_scheduled(&entry.payee_script(), height, tip) {
                Some(DisqualifyReason::Scheduled)
            } else if filter_sig_time
                && entry.sig_time + enabled * SENIORITY_SECONDS_PER_NODE > now
            {
                Some(DisqualifyReason::TooNew {
                    sig_time: entry.sig_time,
                    qualifies_at: entry.sig_time + enabled * SENIORITY_SECONDS_PER_NODE,
                })
            } else {
                match entry.collateral_age(chain) {
                    Some(age) if (age as i64) >= enabled => None,
                    Some(age) => Some(DisqualifyReason::YoungCollateral {
                        age,
                        required: enabled as u32,
                    }),
                    None => Some(DisqualifyReason::YoungCollateral {
                        age: 0,
                        required: enabled as u32,
                    }),
                }
            };

            match reason {
                Some(reason) => {
                    tracing::debug!(
                        node = %entry.outpoint.to_short_string(),
                        %reason,
                        "not qualified for payment"
                    );
                }
                None => survivors.push((entry.last_paid_height, entry.outpoint)),
            }
        }

        let count = survivors.len();

        // A network upgrade restarts most nodes at once; don't starve the
        // queue while everyone's announce is young.
        if filter_sig_time && (count as i64) < enabled / 3 {
            return self.next_in_queue_for_payment(height, false, chain, payments, now, min_proto);
        }

        // Oldest paid first, outpoint as the deterministic tie-break.
        survivors.sort();

        let Some(block_hash) = chain.block_hash_at(height.saturating_sub(RANK_HASH_DEPTH)) else {
            tracing::warn!(height, "no block hash for payment election");
            return (None, count);
        };

        let tenth = ((enabled / 10) as usize).max(1);
        let mut best: Option<(U256, Outpoint)> = None;
        for (_, outpoint) in survivors.iter().take(tenth) {
            let Some(entry) = self.entry(outpoint) else {
                continue;
            };
            let score = entry.calculate_score(&block_hash);
            if best.as_ref().map_or(true, |(high, _)| score > *high) {
                best = Some((score, *outpoint));
            }
        }

        (
            best.and_then(|(_, outpoint)| self.node_info(&outpoint)),
            count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ServiceNodeEntry;
    use crate::NoPayments;
    use onyx_chain::{MemoryChain, Utxo};
    use onyx_crypto::keypair_from_seed;
    use onyx_messages::{Announce, Ping};
    use onyx_net::FulfilledRequests;
    use onyx_sync::SyncState;
    use onyx_types::params::{MIN_PAYMENT_PROTO_V1, PROTOCOL_VERSION};
    use onyx_types::{Amount, BlockHash, LifecycleState, Script, Signature, TxHash};

    fn test_outpoint(seed: u8) -> Outpoint {
        Outpoint::new(TxHash::new([seed; 32]), 0)
    }

    fn seeded_registry(chain: &mut MemoryChain, seeds: &[u8], now: i64) -> Registry {
        let sync = SyncState::new(now);
        let mut fulfilled = FulfilledRequests::new();
        for _ in 0..4 {
            sync.switch_to_next(now, &mut fulfilled);
        }
        let mut registry = Registry::new();
        for &seed in seeds {
            let ckp = keypair_from_seed(&[seed; 32]);
            let skp = keypair_from_seed(&[seed.wrapping_add(50); 32]);
            let op = test_outpoint(seed);
            chain.add_utxo(
                op,
                Utxo {
                    value: Amount::collateral(),
                    script: Script::p2pkh(&ckp.public),
                    height: 1,
                },
            );
            let mut ping = Ping::new(op, BlockHash::new([0xcd; 32]), now - 60);
            ping.sign(&skp.private);
            let mut ann = Announce {
                outpoint: op,
                addr: format!("52.30.0.{seed}:8585").parse().unwrap(),
                collateral_pubkey: ckp.public,
                service_pubkey: skp.public,
                sig: Signature::ZERO,
                // Old enough to clear the seniority filter for small
                // registries.
                sig_time: now - 100_000,
                protocol_version: PROTOCOL_VERSION,
                last_ping: Some(ping),
                recovery: false,
            };
            ann.sign(&ckp.private, now - 100_000);
            registry.register_local_announce(&ann, now, &sync);
            // The local path leaves entries Enabled with a fresh ping.
            registry.entry_mut(&op).unwrap().state = LifecycleState::Enabled;
        }
        registry
    }

    #[test]
    fn election_is_deterministic() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=30).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);

        let (first, count) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        let (second, _) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        assert_eq!(count, 30);
        let first = first.expect("winner");
        let second = second.expect("winner");
        assert_eq!(first.outpoint, second.outpoint);
    }

    #[test]
    fn winner_scores_highest_among_oldest_tenth() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=30).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);

        let (winner, _) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        let winner = winner.expect("winner");

        // All nodes have last_paid_height == 0, so the oldest tenth is the
        // first 3 by outpoint order.
        let block_hash = chain.block_hash_at(290 - RANK_HASH_DEPTH).unwrap();
        let mut best: Option<(U256, Outpoint)> = None;
        for seed in 1..=3u8 {
            let entry = registry.entry(&test_outpoint(seed)).unwrap();
            let score = entry.calculate_score(&block_hash);
            if best.as_ref().map_or(true, |(high, _)| score > *high) {
                best = Some((score, entry.outpoint));
            }
        }
        assert_eq!(winner.outpoint, best.unwrap().1);
    }

    #[test]
    fn recently_paid_nodes_rotate_to_the_back() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=20).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);

        // Nodes 1 and 2 were just paid; the oldest tenth (2 of 20) is now
        // nodes 3 and 4.
        registry.entry_mut(&test_outpoint(1)).unwrap().last_paid_height = 290;
        registry.entry_mut(&test_outpoint(2)).unwrap().last_paid_height = 289;

        let (winner, _) = registry.next_in_queue_for_payment(
            295,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        let winner = winner.expect("winner");
        assert!(winner.outpoint == test_outpoint(3) || winner.outpoint == test_outpoint(4));
    }

    #[test]
    fn sig_time_filter_relaxes_for_restart_waves() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=9).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);

        // Everyone just re-announced.
        for seed in &seeds {
            registry.entry_mut(&test_outpoint(*seed)).unwrap().sig_time = now - 10;
        }

        let (winner, count) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        // The filtered pass finds nobody, the retry without the filter
        // finds everyone.
        assert!(winner.is_some());
        assert_eq!(count, 9);
    }

    #[test]
    fn young_collateral_is_excluded() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=10).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);

        // Node 1's collateral confirmed 5 blocks ago; 10 nodes require
        // 10 confirmations.
        chain.add_utxo(
            test_outpoint(1),
            Utxo {
                value: Amount::collateral(),
                script: registry.entry(&test_outpoint(1)).unwrap().payee_script(),
                height: 295,
            },
        );
        registry.entry_mut(&test_outpoint(1)).unwrap().collateral_height = 295;

        let (_, count) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        assert_eq!(count, 9);
    }

    #[test]
    fn disabled_nodes_do_not_survive() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=10).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);
        registry.entry_mut(&test_outpoint(5)).unwrap().state = LifecycleState::Expired;

        let (_, count) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &NoPayments,
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        assert_eq!(count, 9);
    }

    struct SchedulerStub(Script);

    impl PaymentsView for SchedulerStub {
        fn block_has_payee(&self, _h: u32, _p: &Script, _m: usize) -> bool {
            false
        }
        fn is_scheduled(&self, payee: &Script, _not_height: u32, _tip: u32) -> bool {
            *payee == self.0
        }
    }

    #[test]
    fn scheduled_nodes_are_skipped() {
        let now = 10_000_000;
        let mut chain = MemoryChain::with_tip(300);
        let seeds: Vec<u8> = (1..=10).collect();
        let mut registry = seeded_registry(&mut chain, &seeds, now);
        let scheduled = registry.entry(&test_outpoint(2)).unwrap().payee_script();

        let (winner, count) = registry.next_in_queue_for_payment(
            290,
            true,
            &chain,
            &SchedulerStub(scheduled),
            now,
            MIN_PAYMENT_PROTO_V1,
        );
        assert_eq!(count, 9);
        assert_ne!(winner.unwrap().outpoint, test_outpoint(2));
    }
}
