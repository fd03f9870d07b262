//! # Message Protocol
//!
//! Every message exchanged between game clients and the server is a flat
//! JSON object. The mandatory `protocol_type` field names the message kind and
//! selects the handler on the server; responses reuse the kind of the request
//! they answer.
//!
//! ```text
//! {"protocol_type":"create_account","username":"alice","password":"..."}
//! {"protocol_type":"create_account","success":true,"account_id":1}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::NetError;

/// Field carrying the message kind.
pub const PROTOCOL_TYPE: &str = "protocol_type";

// ============================================================================
// PROTOCOL TYPES
// ============================================================================

/// Message kinds understood by the game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    CreateAccount,
    CredentialCheck,
    CreateGame,
    SaveGame,
    GetGame,
    Matchmaker,
    CancelMatch,
    UpdateElo,
    GetTopElos,
    /// Server notice answering a kind it does not recognise.
    Breach,
}

impl ProtocolType {
    pub const ALL: [ProtocolType; 10] = [
        ProtocolType::CreateAccount,
        ProtocolType::CredentialCheck,
        ProtocolType::CreateGame,
        ProtocolType::SaveGame,
        ProtocolType::GetGame,
        ProtocolType::Matchmaker,
        ProtocolType::CancelMatch,
        ProtocolType::UpdateElo,
        ProtocolType::GetTopElos,
        ProtocolType::Breach,
    ];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolType::CreateAccount => "create_account",
            ProtocolType::CredentialCheck => "credential_check",
            ProtocolType::CreateGame => "create_game",
            ProtocolType::SaveGame => "save_game",
            ProtocolType::GetGame => "get_game",
            ProtocolType::Matchmaker => "matchmaker",
            ProtocolType::CancelMatch => "cancel_match",
            ProtocolType::UpdateElo => "update_elo",
            ProtocolType::GetTopElos => "get_top_elos",
            ProtocolType::Breach => "breach",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NetError::UnknownProtocolType {
                kind: s.to_string(),
            })
    }
}

impl From<ProtocolType> for String {
    fn from(kind: ProtocolType) -> Self {
        kind.as_str().to_string()
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

/// A flat field-name → value mapping exchanged over the wire.
///
/// Built with [`Message::new`] and [`Message::with`]:
///
/// ```ignore
/// let request = Message::new(ProtocolType::CreateAccount)
///     .with("username", "alice")
///     .with("password", "hunter2");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: Map<String, Value>,
}

impl Message {
    /// Create a message of the given kind with no other fields.
    pub fn new(kind: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(PROTOCOL_TYPE.to_string(), Value::String(kind.into()));
        Self { fields }
    }

    /// Create a message with no fields at all, not even a kind.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// The message kind, if present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(PROTOCOL_TYPE).and_then(Value::as_str)
    }

    /// The message kind, or `MissingDiscriminant`.
    pub fn require_kind(&self) -> Result<&str, NetError> {
        self.kind().ok_or(NetError::MissingDiscriminant)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Deserialize one field into `T`.
    ///
    /// Fails with `InvalidField` when the field is missing or has the wrong shape.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T, NetError> {
        let value = self.fields.get(key).ok_or_else(|| NetError::InvalidField {
            field: key.to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|_| NetError::InvalidField {
            field: key.to_string(),
        })
    }

    /// Like [`Message::field`] but a missing or `null` field yields `None`.
    pub fn optional_field<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, NetError> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.field(key).map(Some),
        }
    }

    /// The `success` flag of a response; absent means failure.
    pub fn success(&self) -> bool {
        self.fields
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to compact JSON bytes (no terminator).
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetError> {
        serde_json::to_vec(self).map_err(|e| NetError::MalformedMessage {
            reason: e.to_string(),
        })
    }

    /// Parse a JSON object from bytes. The kind is not checked here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| NetError::MalformedMessage {
                reason: e.to_string(),
            })?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(NetError::MalformedMessage {
                reason: format!("expected a JSON object, got {}", json_type_name(&other)),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// COMMON RESPONSES
// ============================================================================

/// `{protocol_type: kind, success: false, error: reason}`
pub fn failure(kind: &str, reason: impl fmt::Display) -> Message {
    Message::new(kind)
        .with("success", false)
        .with("error", reason.to_string())
}

/// Notice sent back when a client uses a kind the server does not handle.
pub fn breach_notice(offending_kind: &str) -> Message {
    Message::new(ProtocolType::Breach)
        .with("offending_type", offending_kind)
        .with("reason", format!("unknown protocol type `{}`", offending_kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_types_round_trip_through_their_wire_names() {
        for kind in ProtocolType::ALL {
            assert_eq!(kind.as_str().parse::<ProtocolType>().unwrap(), kind);
        }
        assert!(matches!(
            "teleport".parse::<ProtocolType>(),
            Err(NetError::UnknownProtocolType { kind }) if kind == "teleport"
        ));
    }

    #[test]
    fn typed_field_access() {
        let msg = Message::new(ProtocolType::GetGame)
            .with("game_id", 42)
            .with("board_state", "....")
            .with("missing", Value::Null);

        assert_eq!(msg.kind(), Some("get_game"));
        assert_eq!(msg.field::<i64>("game_id").unwrap(), 42);
        assert_eq!(msg.field::<String>("board_state").unwrap(), "....");
        assert_eq!(msg.optional_field::<i64>("missing").unwrap(), None);
        assert_eq!(msg.optional_field::<i64>("absent").unwrap(), None);
        assert_eq!(
            msg.field::<i64>("board_state"),
            Err(NetError::InvalidField {
                field: "board_state".to_string()
            })
        );
    }

    #[test]
    fn messages_without_kind_are_rejected() {
        let msg = Message::empty().with("username", "alice");
        assert_eq!(msg.require_kind(), Err(NetError::MissingDiscriminant));
    }

    #[test]
    fn from_bytes_requires_an_object() {
        assert!(Message::from_bytes(br#"{"protocol_type":"get_game"}"#).is_ok());
        assert!(matches!(
            Message::from_bytes(b"[1,2,3]"),
            Err(NetError::MalformedMessage { .. })
        ));
        assert!(matches!(
            Message::from_bytes(b"{not json"),
            Err(NetError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn breach_notice_names_the_offending_kind() {
        let notice = breach_notice("teleport");
        assert_eq!(notice.kind(), Some("breach"));
        assert_eq!(notice.field::<String>("offending_type").unwrap(), "teleport");
    }
}
