//! The NIP-01 messages exchanged during a scan.

use dvmscan_core::{FilterSet, ProtocolError, RawEvent};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        SubscriptionId(format!("dvmscan-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        SubscriptionId(s.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage<'a> {
    Req { subscription_id: &'a SubscriptionId, filters: &'a [FilterSet] },
    Close { subscription_id: &'a SubscriptionId },
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Req { subscription_id, filters } => {
                let mut arr = vec![json!("REQ"), json!(subscription_id.as_str())];
                arr.extend(filters.iter().map(FilterSet::to_nostr_filter));
                Value::Array(arr).to_string()
            }
            ClientMessage::Close { subscription_id } => {
                json!(["CLOSE", subscription_id.as_str()]).to_string()
            }
        }
    }
}

/// Relay to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event { subscription_id: SubscriptionId, event: RawEvent },
    /// End of stored events.
    Eose { subscription_id: SubscriptionId },
    Closed { subscription_id: SubscriptionId, message: String },
    Notice { message: String },
    /// OK, AUTH, COUNT and anything newer; not used by the scanner.
    Other { kind: String },
}

impl RelayMessage {
    pub fn parse(text: &str, relay: &str, verify_ids: bool) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;
        let Value::Array(mut arr) = value else {
            return Err(ProtocolError::Malformed("expected a JSON array".into()));
        };
        let kind = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing message type".into()))?
            .to_string();
        let sub_id = |arr: &[Value]| -> Result<SubscriptionId, ProtocolError> {
            arr.get(1)
                .and_then(Value::as_str)
                .map(SubscriptionId::from)
                .ok_or_else(|| ProtocolError::Malformed(format!("{kind} without subscription id")))
        };
        match kind.as_str() {
            "EVENT" => {
                let subscription_id = sub_id(&arr)?;
                if arr.len() < 3 {
                    return Err(ProtocolError::Malformed("EVENT without event object".into()));
                }
                let event = RawEvent::from_wire(arr.swap_remove(2), relay, verify_ids)?;
                Ok(RelayMessage::Event { subscription_id, event })
            }
            "EOSE" => Ok(RelayMessage::Eose { subscription_id: sub_id(&arr)? }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: sub_id(&arr)?,
                message: arr.get(2).and_then(Value::as_str).unwrap_or_default().to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: arr.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
            }),
            _ => Ok(RelayMessage::Other { kind: kind.clone() }),
        }
    }
}
