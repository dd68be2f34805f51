//! Record model
//!
//! [`Record`] is a candidate delivered by the network layer, [`StoredValue`]
//! is a resident row, and [`Lookup`] distinguishes "never looked up" from
//! "confirmed absent" on reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::{RecordCategory, Semantics};

/// Why a raw candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecord {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// A versioned record as delivered by relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record id (content hash on the wire)
    pub id: String,
    /// Author identity
    #[serde(alias = "pubkey")]
    pub owner: String,
    /// Protocol kind; selects the category
    pub kind: u32,
    /// Embedded logical timestamp (seconds), the conflict-resolution clock
    pub created_at: i64,
    /// Slot identifier for parameterized categories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    /// Opaque payload
    #[serde(default)]
    pub content: Value,
}

impl Record {
    /// Validate a raw candidate and convert it into a record.
    ///
    /// Parameterized kinds must carry a discriminator (the empty string is
    /// a valid discriminator).
    pub fn from_value(value: &Value) -> Result<Self, MalformedRecord> {
        let obj = value.as_object().ok_or(MalformedRecord::NotAnObject)?;

        let id = required_str(obj, "id", None)?;
        let owner = required_str(obj, "owner", Some("pubkey"))?;

        let kind = obj
            .get("kind")
            .ok_or(MalformedRecord::MissingField("kind"))?
            .as_u64()
            .and_then(|k| u32::try_from(k).ok())
            .ok_or(MalformedRecord::InvalidField {
                field: "kind",
                reason: "not an unsigned 32-bit integer",
            })?;

        let created_at = obj
            .get("created_at")
            .ok_or(MalformedRecord::MissingField("created_at"))?
            .as_i64()
            .filter(|t| *t >= 0)
            .ok_or(MalformedRecord::InvalidField {
                field: "created_at",
                reason: "not a non-negative integer",
            })?;

        let discriminator = match obj.get("discriminator") {
            None | Some(Value::Null) => None,
            Some(Value::String(d)) => Some(d.clone()),
            Some(_) => {
                return Err(MalformedRecord::InvalidField {
                    field: "discriminator",
                    reason: "not a string",
                })
            }
        };

        let record = Record {
            id,
            owner,
            kind,
            created_at,
            discriminator,
            content: obj.get("content").cloned().unwrap_or(Value::Null),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check invariants that typed construction cannot enforce.
    pub fn validate(&self) -> Result<(), MalformedRecord> {
        if self.id.is_empty() {
            return Err(MalformedRecord::MissingField("id"));
        }
        if self.owner.is_empty() {
            return Err(MalformedRecord::MissingField("owner"));
        }
        if self.created_at < 0 {
            return Err(MalformedRecord::InvalidField {
                field: "created_at",
                reason: "negative",
            });
        }
        if self.semantics() == Semantics::Parameterized && self.discriminator.is_none() {
            return Err(MalformedRecord::MissingField("discriminator"));
        }
        Ok(())
    }

    /// The registered category for this record's kind, if any.
    pub fn category(&self) -> Option<RecordCategory> {
        RecordCategory::from_kind(self.kind)
    }

    /// Conflict semantics for this record's kind.
    pub fn semantics(&self) -> Semantics {
        self.category()
            .map(RecordCategory::semantics)
            .unwrap_or(Semantics::AppendOnly)
    }
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
    alias: Option<&'static str>,
) -> Result<String, MalformedRecord> {
    let raw = obj
        .get(field)
        .or_else(|| alias.and_then(|a| obj.get(a)))
        .ok_or(MalformedRecord::MissingField(field))?;
    match raw.as_str() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(MalformedRecord::MissingField(field)),
        None => Err(MalformedRecord::InvalidField {
            field,
            reason: "not a string",
        }),
    }
}

/// A resident row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue<T = Record> {
    /// Row key: logical key for versioned rows, record id otherwise
    pub key: String,
    /// `None` is an explicit "confirmed absent" tombstone
    pub value: Option<T>,
    /// Wall-clock insertion time (unix millis), used only for expiration
    pub added_at: i64,
    /// Logical key of the aggregate root this row belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
}

impl<T> StoredValue<T> {
    /// Whether this row is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Convert into a [`Lookup`], dropping row metadata.
    pub fn into_lookup(self) -> Lookup<T> {
        match self.value {
            Some(v) => Lookup::Present(v),
            None => Lookup::Absent,
        }
    }
}

/// Result of a point read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Lookup<T = Record> {
    /// Never looked up (or the partition does not exist yet)
    Unknown,
    /// Confirmed absent (tombstone)
    Absent,
    /// Present
    Present(T),
}

impl<T> Lookup<T> {
    /// The present value, if any.
    pub fn present(self) -> Option<T> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn as_ref(&self) -> Lookup<&T> {
        match self {
            Self::Unknown => Lookup::Unknown,
            Self::Absent => Lookup::Absent,
            Self::Present(v) => Lookup::Present(v),
        }
    }
}

impl<T> From<Option<StoredValue<T>>> for Lookup<T> {
    fn from(row: Option<StoredValue<T>>) -> Self {
        match row {
            Some(row) => row.into_lookup(),
            None => Lookup::Unknown,
        }
    }
}
