//! Global constants for the wallet daemon: transaction-size estimates
//! and fixed identifier lengths referenced across the action engine.

/// Estimated size in bytes of a P2PKH unlocking script (DER signature +
/// sighash byte + compressed pubkey push), used when estimating a
/// not-yet-signed transaction's size for fee computation (§4.2 step 6).
pub const P2PKH_UNLOCKING_SCRIPT_ESTIMATE: u32 = 147;

/// Estimated size in bytes of a P2PKH locking script output (8-byte value
/// + varint + 25-byte script), used for change-output size estimation.
pub const P2PKH_OUTPUT_SIZE_ESTIMATE: u32 = 34;

/// Fixed overhead of an empty transaction: 4-byte version, 1-byte input
/// count, 1-byte output count, 4-byte lockTime.
pub const TX_BASE_SIZE_ESTIMATE: u32 = 10;

/// Recursion bound for BEEF proof-graph assembly (§4.3).
pub const BEEF_MAX_DEPTH: u32 = 32;

/// §3/§9: random reference/derivation/batch identifier lengths, in bytes
/// before base64 encoding.
pub const REFERENCE_LEN_BYTES: usize = 12;
pub const DERIVATION_COMPONENT_LEN_BYTES: usize = 16;
pub const BATCH_TAG_LEN_BYTES: usize = 16;

/// nLockTime value marking a transaction as final (no sequence-based
/// time-lock in effect).
pub const LOCKTIME_NO_LOCK: u32 = 0;
