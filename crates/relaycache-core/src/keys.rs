//! Logical key scheme.
//!
//! A logical key names "the same entity" across versions: the owner alone,
//! or `owner:discriminator` for categories parameterized by a slot.

use crate::record::Record;
use crate::registry::Semantics;

/// Separator between owner and discriminator.
pub const KEY_SEPARATOR: char = ':';

/// Separator between a master's partition and its logical key in a link.
pub const LINK_SEPARATOR: char = '/';

/// Compute the logical key for an owner and optional discriminator.
///
/// `None` and `Some("")` are different keys: `"abc"` versus `"abc:"`.
pub fn logical_key(owner: &str, discriminator: Option<&str>) -> String {
    match discriminator {
        None => owner.to_string(),
        Some(d) => {
            let mut key = String::with_capacity(owner.len() + d.len() + 1);
            key.push_str(owner);
            key.push(KEY_SEPARATOR);
            key.push_str(d);
            key
        }
    }
}

/// Compute the row key a record is stored under for the given semantics.
///
/// Versioned records use their logical key; append-only records use their id.
/// Replaceable categories ignore the discriminator even when one is present.
pub fn storage_key(record: &Record, semantics: Semantics) -> String {
    match semantics {
        Semantics::Replaceable => logical_key(&record.owner, None),
        Semantics::Parameterized => logical_key(&record.owner, record.discriminator.as_deref()),
        Semantics::AppendOnly => record.id.clone(),
    }
}

/// The `master_key` value nested rows carry to reference a master.
///
/// Qualified by the master's partition: two categories may hold the same
/// logical key, and their aggregates must not share nested rows.
pub fn master_link(partition: &str, key: &str) -> String {
    let mut link = String::with_capacity(partition.len() + key.len() + 1);
    link.push_str(partition);
    link.push(LINK_SEPARATOR);
    link.push_str(key);
    link
}
