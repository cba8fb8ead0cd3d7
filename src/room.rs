//! Persisted room layout and room identifier generation.
//!
//! A created room is stored under `rooms/<id>` as:
//!
//! ```json
//! { "createdAt": { ".sv": "timestamp" }, "owner": "<user id>", "participants": {} }
//! ```
//!
//! The `createdAt` placeholder is resolved to epoch milliseconds by the store.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal prefix of automatically created default rooms.
pub const DEFAULT_ROOM_PREFIX: &str = "SalaAuto";

/// Inclusive lower bound of the default room suffix.
pub const DEFAULT_ROOM_SUFFIX_MIN: u16 = 100;

/// Exclusive upper bound of the default room suffix.
pub const DEFAULT_ROOM_SUFFIX_MAX: u16 = 999;

/// Length of identifiers produced by [`generate_room_id`].
pub const ROOM_ID_LEN: usize = 8;

/// Marker value a store replaces with its own clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerValue {
    #[serde(rename = ".sv")]
    pub sv: String,
}

impl ServerValue {
    /// The server-timestamp placeholder (`{".sv": "timestamp"}`).
    pub fn timestamp() -> Self {
        Self {
            sv: "timestamp".into(),
        }
    }

    /// Returns `true` if `value` is the JSON form of the timestamp placeholder.
    pub fn is_timestamp(value: &Value) -> bool {
        match value {
            Value::Object(map) => {
                map.len() == 1 && map.get(".sv").and_then(Value::as_str) == Some("timestamp")
            }
            _ => false,
        }
    }
}

/// A creation timestamp: the pending server placeholder as written, or the
/// resolved epoch milliseconds as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch, assigned by the store.
    Millis(i64),
    /// Not yet resolved; the store assigns the value on write.
    Server(ServerValue),
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::Server(ServerValue::timestamp())
    }
}

/// Metadata written once by the creator of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    /// When the room was created.
    pub created_at: Timestamp,
    /// Identity of the creating user.
    pub owner: String,
    /// Participants keyed by user id. Empty at creation.
    #[serde(default)]
    pub participants: BTreeMap<String, Value>,
}

impl RoomRecord {
    /// A fresh record owned by `owner` with a server-assigned timestamp.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            created_at: Timestamp::default(),
            owner: owner.into(),
            participants: BTreeMap::new(),
        }
    }
}

/// Generate a locally-unique room identifier: [`ROOM_ID_LEN`] lowercase hex
/// characters taken from a v4 UUID.
pub fn generate_room_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(ROOM_ID_LEN)
        .collect()
}

/// Generate the name of a default room: [`DEFAULT_ROOM_PREFIX`] followed by a
/// pseudo-random number in `[100, 999)`.
pub fn default_room_name() -> String {
    let suffix = rand::thread_rng().gen_range(DEFAULT_ROOM_SUFFIX_MIN..DEFAULT_ROOM_SUFFIX_MAX);
    format!("{DEFAULT_ROOM_PREFIX}{suffix}")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_serializes_to_store_layout() {
        let record = RoomRecord::new("user-1");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "createdAt": { ".sv": "timestamp" },
                "owner": "user-1",
                "participants": {}
            })
        );
    }

    #[test]
    fn resolved_record_reads_back_millis() {
        let stored = json!({
            "createdAt": 1_760_000_000_000_i64,
            "owner": "user-2",
            "participants": {}
        });
        let record: RoomRecord = serde_json::from_value(stored).unwrap();
        assert_eq!(record.created_at, Timestamp::Millis(1_760_000_000_000));
        assert_eq!(record.owner, "user-2");
        assert!(record.participants.is_empty());
    }

    #[test]
    fn missing_participants_defaults_to_empty() {
        let record: RoomRecord =
            serde_json::from_value(json!({ "createdAt": 5, "owner": "u" })).unwrap();
        assert!(record.participants.is_empty());
    }

    #[test]
    fn timestamp_placeholder_detection() {
        assert!(ServerValue::is_timestamp(&json!({ ".sv": "timestamp" })));
        assert!(!ServerValue::is_timestamp(&json!({ ".sv": "increment" })));
        assert!(!ServerValue::is_timestamp(
            &json!({ ".sv": "timestamp", "x": 1 })
        ));
        assert!(!ServerValue::is_timestamp(&json!("timestamp")));
    }

    #[test]
    fn room_ids_are_short_lowercase_hex() {
        for _ in 0..64 {
            let id = generate_room_id();
            assert_eq!(id.len(), ROOM_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
        assert_ne!(generate_room_id(), generate_room_id());
    }

    #[test]
    fn default_room_names_stay_in_range() {
        for _ in 0..500 {
            let name = default_room_name();
            let suffix: u16 = name
                .strip_prefix(DEFAULT_ROOM_PREFIX)
                .expect("prefix")
                .parse()
                .expect("numeric suffix");
            assert!((100..999).contains(&suffix), "suffix out of range: {suffix}");
        }
    }
}
