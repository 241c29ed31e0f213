//! Persisted session rows and the session payload they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Absolute expiry deadline for a row written at `now_ms` with `ttl_secs`.
pub fn expiry_deadline(now_ms: i64, ttl_secs: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_secs).unwrap_or(i64::MAX).saturating_mul(1000);
    now_ms.saturating_add(ttl_ms)
}

/// One row of the `sessions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier (primary key).
    pub id: String,

    /// Serialized [`SessionData`], replaced wholesale on every save.
    pub json: String,

    /// Expiry deadline in epoch milliseconds.
    pub expired_at: i64,

    /// Tombstone marker. `Some` once the session has been destroyed.
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Create a live record.
    pub fn new(id: impl Into<String>, json: impl Into<String>, expired_at: i64) -> Self {
        Self {
            id: id.into(),
            json: json.into(),
            expired_at,
            destroyed_at: None,
        }
    }

    /// Whether the row has been soft-deleted.
    pub fn is_tombstoned(&self) -> bool {
        self.destroyed_at.is_some()
    }

    /// Whether the row is visible to reads at `now_ms`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.destroyed_at.is_none() && self.expired_at > now_ms
    }

    /// Decode the payload, injecting the row id as `id`.
    pub fn decode(&self) -> Result<SessionData> {
        let mut data: SessionData = serde_json::from_str(&self.json)?;
        data.fields
            .insert("id".to_string(), Value::String(self.id.clone()));
        Ok(data)
    }
}

/// Cookie descriptor attached to every session.
///
/// Reads the lifetime from `originalMaxAge`, falling back to `maxAge`; it is
/// always written back as `originalMaxAge`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CookieWire")]
pub struct Cookie {
    /// Rolling lifetime in milliseconds.
    #[serde(rename = "originalMaxAge", skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,

    /// Fixed absolute expiration. When set, the cookie's own deadline governs
    /// and touching the session does not move the server-side deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    /// Remaining attributes (path, domain, httpOnly, ...), kept verbatim.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Cookie as found on the wire, where either lifetime key may be present.
#[derive(Deserialize)]
struct CookieWire {
    #[serde(default, rename = "originalMaxAge")]
    original_max_age: Option<i64>,
    #[serde(default, rename = "maxAge")]
    max_age: Option<i64>,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl From<CookieWire> for Cookie {
    fn from(wire: CookieWire) -> Self {
        Self {
            max_age: wire.original_max_age.or(wire.max_age),
            expires: wire.expires,
            attributes: wire.attributes,
        }
    }
}

impl Cookie {
    /// Whether the cookie carries a fixed expiration.
    pub fn has_fixed_expiry(&self) -> bool {
        self.expires.is_some()
    }
}

/// Application session payload as handed over by the session middleware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Cookie descriptor.
    #[serde(default)]
    pub cookie: Cookie,

    /// Application fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SessionData {
    /// Create an empty payload with a default cookie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie's rolling max-age in milliseconds.
    pub fn with_max_age(mut self, max_age_ms: i64) -> Self {
        self.cookie.max_age = Some(max_age_ms);
        self
    }

    /// Set a fixed cookie expiration.
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.cookie.expires = Some(expires);
        self
    }

    /// Get a field, deserialized into `T`.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.fields
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a field.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        self.fields
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// The injected session id, present on payloads returned by the store.
    pub fn id(&self) -> Option<&str> {
        self.fields.get("id").and_then(Value::as_str)
    }

    /// Encode for the `json` column.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
