//! Three-level policy store
//!
//! Values may be set globally, per playback or per stream. A lookup takes the
//! stream value if set, else the playback value, else the global value, else
//! the policy default.

use crate::error::{Error, Result};
use crate::sync::lock;
use avpipe_common::policy::{Policy, PolicyValue};
use avpipe_common::{PlaybackId, StreamId};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Level a policy value is stored at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyScope {
    Global,
    Playback(PlaybackId),
    Stream(StreamId),
}

/// Sparse override record for one scope
#[derive(Debug, Clone, Default)]
struct PolicyRecord {
    values: [Option<PolicyValue>; Policy::ALL.len()],
}

#[derive(Debug, Default)]
pub struct PolicyStore {
    records: Mutex<HashMap<PolicyScope, PolicyRecord>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: PolicyScope, policy: Policy, value: PolicyValue) -> Result<()> {
        if policy.is_fixed() {
            return Err(Error::InvalidParameter(format!(
                "Policy {:?} cannot be set",
                policy
            )));
        }
        debug!("Policy {:?} = {} at {:?}", policy, value, scope);
        lock(&self.records).entry(scope).or_default().values[policy.index()] = Some(value);
        Ok(())
    }

    /// Resolve a policy for a stream of a playback
    pub fn value(&self, playback: Option<PlaybackId>, stream: Option<StreamId>, policy: Policy) -> PolicyValue {
        if policy.is_fixed() {
            return policy.default_value();
        }
        let records = lock(&self.records);
        let lookup = |scope: PolicyScope| records.get(&scope).and_then(|r| r.values[policy.index()]);

        stream
            .and_then(|s| lookup(PolicyScope::Stream(s)))
            .or_else(|| playback.and_then(|p| lookup(PolicyScope::Playback(p))))
            .or_else(|| lookup(PolicyScope::Global))
            .unwrap_or_else(|| policy.default_value())
    }

    /// Forget every value stored for a scope
    pub fn remove_scope(&self, scope: PolicyScope) {
        lock(&self.records).remove(&scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avpipe_common::policy::{POLICY_VALUE_DISCARD, POLICY_VALUE_PLAYOUT};

    #[test]
    fn test_default_when_unset() {
        let store = PolicyStore::new();
        assert_eq!(
            store.value(None, None, Policy::PlayoutOnDrain),
            Policy::PlayoutOnDrain.default_value()
        );
    }

    #[test]
    fn test_most_specific_level_wins() {
        let store = PolicyStore::new();
        let playback = PlaybackId::new();
        let stream = StreamId::new();
        let other_stream = StreamId::new();

        store.set(PolicyScope::Global, Policy::PlayoutOnDrain, POLICY_VALUE_DISCARD).unwrap();
        store
            .set(PolicyScope::Playback(playback), Policy::PlayoutOnDrain, POLICY_VALUE_PLAYOUT)
            .unwrap();
        store
            .set(PolicyScope::Stream(stream), Policy::PlayoutOnDrain, POLICY_VALUE_DISCARD)
            .unwrap();

        assert_eq!(store.value(Some(playback), Some(stream), Policy::PlayoutOnDrain), POLICY_VALUE_DISCARD);
        assert_eq!(
            store.value(Some(playback), Some(other_stream), Policy::PlayoutOnDrain),
            POLICY_VALUE_PLAYOUT
        );
        assert_eq!(store.value(None, None, Policy::PlayoutOnDrain), POLICY_VALUE_DISCARD);

        store.remove_scope(PolicyScope::Stream(stream));
        assert_eq!(store.value(Some(playback), Some(stream), Policy::PlayoutOnDrain), POLICY_VALUE_PLAYOUT);
    }

    #[test]
    fn test_fixed_policy_cannot_be_set() {
        let store = PolicyStore::new();
        let result = store.set(PolicyScope::Global, Policy::PlayoutAlwaysDiscard, POLICY_VALUE_PLAYOUT);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
