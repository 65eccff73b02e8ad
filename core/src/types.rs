//! Shared primitive types used across the entire engine.

/// A member's cooperative code (e.g. "M0022").
pub type MemberCode = String;

/// A member-group name, normalized to trimmed uppercase before use as a key.
pub type GroupName = String;

/// Canonical key of a volume line (e.g. "GLOBAL_ACR", "TRI_DCA_SBS").
pub type FieldKey = String;

/// Database identifier of a contract.
pub type ContractId = i64;

/// Round a monetary amount to 2 decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Round a rate to 4 decimal places (display precision for effective rates).
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
