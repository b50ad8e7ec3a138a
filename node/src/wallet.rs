//! Wallet seam: the only wallet operations the subsystem needs.

use onyx_crypto::keypair_from_seed;
use onyx_types::{Amount, KeyPair, Outpoint};

/// A wallet output suitable as service-node collateral, with the key pair
/// that can spend it.
pub struct CollateralOutput {
    pub outpoint: Outpoint,
    pub keypair: KeyPair,
}

/// What the local activation path asks of the wallet.
pub trait Wallet {
    fn is_locked(&self) -> bool;

    fn balance(&self) -> Amount;

    /// Find an unspent 1000 ONX output (optionally a specific one) and
    /// hand back its spending keys.
    fn collateral_output(&self, filter: Option<Outpoint>) -> Option<CollateralOutput>;

    /// Exclude an output from coin selection so the collateral is never
    /// spent accidentally.
    fn lock_coin(&mut self, outpoint: Outpoint);
}

/// Deterministic in-memory wallet for tests: collateral outputs are keyed
/// by a 32-byte seed, and locking is recorded.
#[derive(Default)]
pub struct NullWallet {
    pub locked: bool,
    pub balance: Amount,
    pub collaterals: Vec<(Outpoint, [u8; 32])>,
    pub locked_coins: Vec<Outpoint>,
}

impl NullWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collateral(outpoint: Outpoint, seed: [u8; 32]) -> Self {
        Self {
            locked: false,
            balance: Amount::collateral(),
            collaterals: vec![(outpoint, seed)],
            locked_coins: Vec::new(),
        }
    }
}

impl Wallet for NullWallet {
    fn is_locked(&self) -> bool {
        self.locked
    }

    fn balance(&self) -> Amount {
        self.balance
    }

    fn collateral_output(&self, filter: Option<Outpoint>) -> Option<CollateralOutput> {
        self.collaterals
            .iter()
            .find(|(outpoint, _)| filter.is_none() || filter == Some(*outpoint))
            .map(|(outpoint, seed)| CollateralOutput {
                outpoint: *outpoint,
                keypair: keypair_from_seed(seed),
            })
    }

    fn lock_coin(&mut self, outpoint: Outpoint) {
        if !self.locked_coins.contains(&outpoint) {
            self.locked_coins.push(outpoint);
        }
    }
}
