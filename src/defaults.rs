// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Cascading Defaults
//!
//! Every optional setting of an exchange or queue falls back independently:
//! the entity's own value first, then the value of the configured default entity,
//! then a hard-coded constant. Argument tables are merged with the default entries
//! applied first and the entity entries layered on top.

use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::Debug,
    hash::{Hash, Hasher},
};
use tracing::warn;

/// Declaration arguments (`x-message-ttl`, `x-match`, ...).
pub type Arguments = BTreeMap<String, Value>;

/// Records whether defaults were applied to an entity.
///
/// Two flags always compare equal and hash to nothing, so specs that differ only
/// in this flag stay equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultsApplied(bool);

impl DefaultsApplied {
    pub fn is_set(&self) -> bool {
        self.0
    }

    pub(crate) fn set(&mut self) {
        self.0 = true;
    }
}

impl PartialEq for DefaultsApplied {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for DefaultsApplied {}

impl Hash for DefaultsApplied {
    fn hash<H: Hasher>(&self, _: &mut H) {}
}

/// An entity that can have a default entity of the same type applied to it.
pub trait ApplyDefaults {
    /// Applies `defaults` in place. A no-op once defaults were applied.
    fn apply_defaults(&mut self, defaults: &Self);

    fn defaults_applied(&self) -> bool;
}

/// Returns a resolved copy of `entity`, leaving both arguments untouched.
pub fn resolve<T: ApplyDefaults + Clone>(entity: &T, defaults: &T) -> T {
    let mut resolved = entity.clone();
    resolved.apply_defaults(defaults);
    resolved
}

/// Picks the entity value, then the default entity value, then `fallback`.
pub(crate) fn pick<T: Copy + Debug>(
    entity: &str,
    property: &str,
    current: Option<T>,
    default: Option<T>,
    fallback: T,
) -> T {
    match current.or(default) {
        Some(value) => value,
        None => {
            warn!(
                entity = entity,
                property = property,
                fallback = ?fallback,
                "no configuration provided, applying fallback value"
            );
            fallback
        }
    }
}

/// Merges argument tables; on conflicting keys the entity value wins.
pub fn merge_arguments(current: &Arguments, defaults: &Arguments) -> Arguments {
    let mut merged = defaults.clone();
    merged.extend(current.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
