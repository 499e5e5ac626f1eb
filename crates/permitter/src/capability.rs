//! Capability discovery.
//!
//! A capability id is derived from the shape of an interface: every method
//! signature (name and parameter types) is hashed, the first four bytes of
//! each hash form the method selector, and the interface id is the XOR of
//! all its selectors. Two interfaces only share an id when they share every
//! method signature, so an unrelated implementation that happens to expose a
//! method with the same name is not mistaken for a permitter.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

/// A four-byte interface identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityId(pub [u8; 4]);

impl CapabilityId {
    /// Reserved id that no implementation may report as supported.
    pub const INVALID: Self = Self([0xff; 4]);

    /// Selector of a single method signature.
    pub fn selector(signature: &str) -> [u8; 4] {
        let digest = Sha256::digest(signature.as_bytes());
        [digest[0], digest[1], digest[2], digest[3]]
    }

    /// Derive an interface id from all of its method signatures.
    pub fn from_signatures<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = signatures.into_iter().fold([0u8; 4], |mut acc, sig| {
            let selector = Self::selector(sig.as_ref());
            for (a, s) in acc.iter_mut().zip(selector) {
                *a ^= s;
            }
            acc
        });
        Self(id)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityId({self})")
    }
}

/// Method signatures of the discovery interface itself.
pub const DISCOVERY_SIGNATURES: &[&str] = &["supportsCapability(bytes4)"];

/// Method signatures of the permitter interface.
pub const PERMITTER_SIGNATURES: &[&str] = &[
    "acquireIdentity(bytes32,bytes20,uint64,bytes,bytes)",
    "releaseIdentity(bytes32,bytes20,bytes,bytes)",
];

/// Method signatures of per-identity configuration.
pub const CONFIGURABLE_SIGNATURES: &[&str] = &["configureIdentity(bytes32,bytes)"];

/// Method signatures of batch pre-approval.
pub const APPROVER_SIGNATURES: &[&str] = &[
    "approveRequests(bytes32[],bytes20[],uint64[])",
    "approveReleases(bytes32[],bytes20[])",
    "revokeIdentity(bytes32,bytes20)",
];

pub static CAPABILITY_DISCOVERY: LazyLock<CapabilityId> =
    LazyLock::new(|| CapabilityId::from_signatures(DISCOVERY_SIGNATURES));

pub static PERMITTER: LazyLock<CapabilityId> =
    LazyLock::new(|| CapabilityId::from_signatures(PERMITTER_SIGNATURES));

pub static CONFIGURABLE: LazyLock<CapabilityId> =
    LazyLock::new(|| CapabilityId::from_signatures(CONFIGURABLE_SIGNATURES));

pub static APPROVER: LazyLock<CapabilityId> =
    LazyLock::new(|| CapabilityId::from_signatures(APPROVER_SIGNATURES));

/// Static declaration of the interfaces an implementation honors.
///
/// Answers must be pure and deterministic for a given implementation.
pub trait Capabilities {
    /// Interfaces implemented in addition to discovery itself.
    fn implemented(&self) -> Vec<CapabilityId>;

    fn supports_capability(&self, id: CapabilityId) -> bool {
        if id == CapabilityId::INVALID {
            return false;
        }
        id == *CAPABILITY_DISCOVERY || self.implemented().contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl Capabilities for Bare {
        fn implemented(&self) -> Vec<CapabilityId> {
            vec![*PERMITTER]
        }
    }

    #[test]
    fn well_known_ids_are_distinct() {
        let ids = [
            *CAPABILITY_DISCOVERY,
            *PERMITTER,
            *CONFIGURABLE,
            *APPROVER,
            CapabilityId::INVALID,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn id_is_order_independent() {
        let forward = CapabilityId::from_signatures(PERMITTER_SIGNATURES);
        let reversed = CapabilityId::from_signatures(PERMITTER_SIGNATURES.iter().rev());
        assert_eq!(forward, reversed);
    }

    #[test]
    fn same_name_different_shape_differs() {
        let lookalike = CapabilityId::from_signatures([
            "acquireIdentity(bytes32)",
            "releaseIdentity(bytes32,bytes20,bytes,bytes)",
        ]);
        assert_ne!(lookalike, *PERMITTER);
    }

    #[test]
    fn single_method_interface_is_its_selector() {
        let id = CapabilityId::from_signatures(DISCOVERY_SIGNATURES);
        assert_eq!(id.0, CapabilityId::selector(DISCOVERY_SIGNATURES[0]));
    }

    #[test]
    fn default_discovery_rules() {
        let bare = Bare;
        assert!(bare.supports_capability(*CAPABILITY_DISCOVERY));
        assert!(bare.supports_capability(*PERMITTER));
        assert!(!bare.supports_capability(*CONFIGURABLE));
        assert!(!bare.supports_capability(CapabilityId::INVALID));
        assert!(!bare.supports_capability(CapabilityId([1, 2, 3, 4])));
    }
}
