//! The per-owner reference record.

use std::collections::BTreeSet;

use cask_types::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The content ids one owner points to.
///
/// `refs` is replaced wholesale on every update; `ref_history` only grows.
/// A set `purge` timestamp marks the owner as deleted and its content as
/// eligible for the next sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    #[serde(rename = "_id")]
    pub owner: String,
    pub refs: BTreeSet<ContentId>,
    #[serde(rename = "refHistory")]
    pub ref_history: BTreeSet<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge: Option<DateTime<Utc>>,
}

impl ReferenceRecord {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            refs: BTreeSet::new(),
            ref_history: BTreeSet::new(),
            purge: None,
        }
    }

    /// Replace the current references, remembering them in the history.
    pub fn set_refs(&mut self, refs: BTreeSet<ContentId>) {
        self.ref_history.extend(refs.iter().copied());
        self.refs = refs;
    }

    pub fn is_purged(&self) -> bool {
        self.purge.is_some()
    }

    /// Every id this owner points to now or ever did.
    pub fn all_ids(&self) -> impl Iterator<Item = &ContentId> {
        self.refs.iter().chain(self.ref_history.iter())
    }
}
