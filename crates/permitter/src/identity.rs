//! Identifiers and opaque request payloads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque, globally unique handle naming an identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IdentityId(pub [u8; 32]);

/// An opaque principal: a requester, a possessor, or both.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Account(pub [u8; 20]);

macro_rules! hex_id {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Size of the identifier in bytes.
            pub const SIZE: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from hex, with or without a `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes).map_err(|e| {
                    Error::Parse(format!("{}: expected {} hex bytes: {e}", stringify!($name), $len))
                })?;
                Ok(Self(bytes))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                Self::from_hex(&s)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

hex_id!(IdentityId, 32);
hex_id!(Account, 20);

/// Non-secret bytes that parameterize a decision.
///
/// Context is never proof of anything. Policies may bind it into signed
/// material but must not grant on its contents alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(#[serde(with = "hex_bytes")] Vec<u8>);

/// Proof material interpreted only by the policy that receives it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authorization(#[serde(with = "hex_bytes")] Vec<u8>);

macro_rules! byte_payload {
    ($name:ident) => {
        impl $name {
            pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            pub fn empty() -> Self {
                Self(Vec::new())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                hex::decode(s)
                    .map(Self)
                    .map_err(|e| Error::Parse(format!("{}: {e}", stringify!($name))))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(&self.0)
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }
        }
    };
}

byte_payload!(Context);
byte_payload!(Authorization);

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Authorization([{} bytes])", self.0.len())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hex_accepts_prefix() {
        let hex = "ab".repeat(32);
        let a: IdentityId = hex.parse().unwrap();
        let b: IdentityId = format!("0x{hex}").parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), format!("0x{hex}"));
    }

    #[test]
    fn account_rejects_wrong_length() {
        assert!(matches!(Account::from_hex("abcd"), Err(Error::Parse(_))));
        assert!(Account::from_hex(&"11".repeat(32)).is_err());
    }

    #[test]
    fn ids_serialize_as_hex_strings() {
        let account = Account([7u8; 20]);
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "07".repeat(20)));
        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn authorization_debug_hides_bytes() {
        let auth = Authorization::new(b"secret-token".to_vec());
        let debug = format!("{auth:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("12 bytes"));
    }

    #[test]
    fn payloads_serialize_as_hex() {
        let ctx = Context::new(vec![0xde, 0xad]);
        assert_eq!(serde_json::to_string(&ctx).unwrap(), "\"dead\"");
    }
}
