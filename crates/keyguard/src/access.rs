//! Caller authorization.
//!
//! A [`CallerPolicy`] is the set of identities allowed to request secrets.
//! It is fail-closed: an empty policy denies everyone, and an entry that
//! pins a token digest denies callers that present no token or the wrong
//! one.

use std::collections::BTreeMap;

use crate::caller::{Caller, CallerId};
use crate::types::Digest;

/// One allowed caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyEntry {
    /// BLAKE3 digest the caller's token must hash to, if pinned.
    pub token_digest: Option<Digest>,
}

/// Set of callers permitted to acquire secrets.
///
/// Immutable once built; the guard swaps a whole policy on reload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallerPolicy {
    entries: BTreeMap<CallerId, PolicyEntry>,
}

impl CallerPolicy {
    /// Creates an empty policy, which denies every caller.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Creates a policy that allows the given callers by name.
    #[must_use]
    pub fn allow_callers(callers: impl IntoIterator<Item = CallerId>) -> Self {
        Self {
            entries: callers
                .into_iter()
                .map(|id| (id, PolicyEntry::default()))
                .collect(),
        }
    }

    /// Adds a caller allowed by name.
    #[must_use]
    pub fn with_caller(mut self, id: CallerId) -> Self {
        self.entries.insert(id, PolicyEntry::default());
        self
    }

    /// Adds a caller that must present a token hashing to `digest`.
    #[must_use]
    pub fn with_token_caller(mut self, id: CallerId, digest: Digest) -> Self {
        self.entries.insert(
            id,
            PolicyEntry {
                token_digest: Some(digest),
            },
        );
        self
    }

    /// Checks whether `caller` is authorized.
    #[must_use]
    pub fn authorizes(&self, caller: &Caller) -> bool {
        let Some(entry) = self.entries.get(caller.id()) else {
            return false;
        };

        match (&entry.token_digest, caller.token_digest()) {
            (None, _) => true,
            (Some(pinned), Some(presented)) => pinned.matches(&presented),
            (Some(_), None) => false,
        }
    }

    /// Returns true if the policy has an entry for `id`.
    #[must_use]
    pub fn contains(&self, id: &CallerId) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterates over the allowed caller ids.
    pub fn callers(&self) -> impl Iterator<Item = &CallerId> {
        self.entries.keys()
    }

    /// Returns the number of allowed callers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the policy denies everyone.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
