//! Deterministic synthetic addresses.
//!
//! Escrow accounts, router reserves and scenario labels all need stable
//! 20-byte addresses that nobody holds a key for. We derive them the same
//! way every time: the first 20 bytes of `BLAKE3(namespace || 0x00 || seed)`.

use alloy_primitives::Address;

/// Namespace for human-readable labels (CLI scenarios, tests).
pub const LABEL_NAMESPACE: &str = "folio/label";

/// Namespace for token-exclusion escrow accounts.
pub const EXCLUSION_ESCROW_NAMESPACE: &str = "folio/exclusion-escrow";

/// Namespace for swap-router reserve accounts.
pub const ROUTER_RESERVE_NAMESPACE: &str = "folio/router-reserve";

/// Derives an address from a namespace and an arbitrary seed.
///
/// The `0x00` separator keeps `("ab", "c")` and `("a", "bc")` apart.
pub fn derive_address(namespace: &str, seed: &[u8]) -> Address {
    let mut preimage = Vec::with_capacity(namespace.len() + seed.len() + 1);
    preimage.extend_from_slice(namespace.as_bytes());
    preimage.push(0x00);
    preimage.extend_from_slice(seed);
    let digest = blake3::hash(&preimage);
    Address::from_slice(&digest.as_bytes()[..20])
}

/// Address for a human-readable label such as `"alice"` or `"USDC"`.
pub fn label(name: &str) -> Address {
    derive_address(LABEL_NAMESPACE, name.as_bytes())
}

/// Escrow account that holds proceeds of tokens removed from `vault`'s basket.
pub fn exclusion_escrow(vault: Address) -> Address {
    derive_address(EXCLUSION_ESCROW_NAMESPACE, vault.as_slice())
}

/// Reserve account backing the router at `router`.
pub fn router_reserve(router: Address) -> Address {
    derive_address(ROUTER_RESERVE_NAMESPACE, router.as_slice())
}
