//! Chain oracle seam for the service-node subsystem.
//!
//! The blockchain itself is out of scope; everything the subsystem needs
//! from it is expressed by the [`ChainView`] trait: tip height, block hashes
//! and times at heights, UTXO existence, and coinbase readback. A
//! deterministic in-memory implementation is provided for tests.

pub mod memory;
pub mod reward;
pub mod view;

pub use memory::MemoryChain;
pub use reward::{is_block_value_valid, service_node_payment};
pub use view::{ChainView, Tx, TxOut, Utxo};
