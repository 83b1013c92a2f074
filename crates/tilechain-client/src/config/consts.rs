//! Defaults for client configuration.

// =============================================================================
// Identity
// =============================================================================

/// Key file looked up first.
pub const DEFAULT_PRIVATE_KEY_FILE: &str = "tilechain_private_key";
/// Mnemonic file used when no private key file exists.
pub const DEFAULT_MNEMONIC_FILE: &str = "tilechain_mnemonic";

// =============================================================================
// Transactions
// =============================================================================

/// Chain id signed into EIP-155 transactions.
pub const DEFAULT_CHAIN_ID: u64 = 31337;

pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

/// How long a submitted transaction or static call may take.
#[cfg(debug_assertions)]
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 15;

#[cfg(not(debug_assertions))]
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Connections
// =============================================================================

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Retries alloy's WebSocket backend performs on its own before giving up.
pub const DEFAULT_MAX_WS_RETRIES: u32 = 3;

// =============================================================================
// Caller-side retry
// =============================================================================

pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

// =============================================================================
// Contract binding
// =============================================================================

pub const DEFAULT_STATE_GETTER: &str = crate::tilemap::GET_STATE_METHOD;
pub const DEFAULT_STATE_SETTER: &str = crate::tilemap::SET_STATE_METHOD;
pub const DEFAULT_STATE_EVENT: &str = crate::tilemap::STATE_UPDATED_EVENT;
