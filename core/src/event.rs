//! Nostr events as the scanner sees them.

use crate::error::ProtocolError;
use crate::kind::KindClass;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! hex32 {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| ProtocolError::BadHex {
                    field: $field,
                    value: s.to_string(),
                })?;
                Ok($name(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// First 16 hex characters, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex32!(
    /// Content-addressed event id (sha256 of the NIP-01 serialization).
    EventId,
    "id"
);
hex32!(
    /// x-only secp256k1 public key identifying an author or vendor.
    PublicKey,
    "pubkey"
);

/// An event received from a relay. Lives only until it is folded into the
/// vendor store or discarded as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// URL of the relay that delivered this copy.
    pub relay: String,
}

#[derive(Deserialize)]
struct WireEvent {
    id: String,
    pubkey: String,
    created_at: u64,
    kind: u16,
    #[serde(default)]
    tags: Vec<Vec<String>>,
    #[serde(default)]
    content: String,
}

impl RawEvent {
    /// Build an event and derive its id from the other fields.
    pub fn compose(
        pubkey: PublicKey,
        created_at: u64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let id = compute_id(&pubkey, created_at, kind, &tags, &content);
        RawEvent { id, pubkey, created_at, kind, tags, content, relay: String::new() }
    }

    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relay = relay.into();
        self
    }

    /// Decode the event object of an `EVENT` message. When `verify_id` is set
    /// the id is recomputed and a mismatch is rejected.
    pub fn from_wire(
        value: serde_json::Value,
        relay: &str,
        verify_id: bool,
    ) -> Result<Self, ProtocolError> {
        let wire: WireEvent =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let id = EventId::from_hex(&wire.id)?;
        let pubkey = PublicKey::from_hex(&wire.pubkey)?;
        if verify_id {
            let computed = compute_id(&pubkey, wire.created_at, wire.kind, &wire.tags, &wire.content);
            if computed != id {
                return Err(ProtocolError::IdMismatch {
                    claimed: id.to_hex(),
                    computed: computed.to_hex(),
                });
            }
        }
        Ok(RawEvent {
            id,
            pubkey,
            created_at: wire.created_at,
            kind: wire.kind,
            tags: wire.tags,
            content: wire.content,
            relay: relay.to_string(),
        })
    }

    pub fn class(&self) -> KindClass {
        KindClass::of(self.kind)
    }

    /// Second element of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }

    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }
}

/// NIP-01 event id: sha256 over `[0, pubkey, created_at, kind, tags, content]`.
pub fn compute_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    let canonical = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    EventId(digest.into())
}
