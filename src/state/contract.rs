//! Snapshot of a contract's storage with borsh-typed access

use crate::error::{RunnerError, RunnerResult};
use crate::types::StateItem;

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;

/// Key/value snapshot of contract storage, fixed at construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractState {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ContractState {
    /// Build a snapshot. When a key repeats, the last value wins.
    pub fn new(items: impl IntoIterator<Item = StateItem>) -> Self {
        let data = items
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect();
        Self { data }
    }

    /// Stored bytes, or an empty slice for unknown keys
    pub fn get_raw(&self, key: impl AsRef<[u8]>) -> &[u8] {
        self.data
            .get(key.as_ref())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Decode the value under `key` as `T`
    pub fn get<T: BorshDeserialize>(&self, key: impl AsRef<[u8]>) -> RunnerResult<T> {
        let key = key.as_ref();
        T::try_from_slice(self.get_raw(key)).map_err(|e| {
            RunnerError::Decode(format!(
                "state key {:?} does not match the requested type: {}",
                String::from_utf8_lossy(key),
                e
            ))
        })
    }

    /// Encode a value the way a contract would store it
    pub fn encode<T: BorshSerialize>(value: &T) -> RunnerResult<Vec<u8>> {
        borsh::to_vec(value).map_err(|e| RunnerError::Decode(e.to_string()))
    }

    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.data.contains_key(key.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.data.keys().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.data.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl FromIterator<StateItem> for ContractState {
    fn from_iter<I: IntoIterator<Item = StateItem>>(iter: I) -> Self {
        ContractState::new(iter)
    }
}
