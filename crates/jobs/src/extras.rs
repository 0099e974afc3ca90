use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OFFSET: &str = "offset";
pub const FINAL_FILTER: &str = "finalfilter";
pub const PRODUCER_PROFILE: &str = "producer_profile";
pub const RESIZE_PROFILE: &str = "resize_profile";
pub const RESULT_KEY: &str = "key";
pub const PROJECT_FILTER: &str = "projecttreefilter";

/// Free-form options travelling with a job and handed back with its result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobExtras(BTreeMap<String, String>);

impl JobExtras {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &str) -> Option<&str> { self.0.get(key).map(String::as_str) }

    pub fn contains(&self, key: &str) -> bool { self.0.contains_key(key) }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Only fills `key` when it is not already present.
    pub fn insert_default(&mut self, key: &str, value: impl Into<String>) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    /// Profile is taken from the clip rather than from the settings.
    pub fn uses_producer_profile(&self) -> bool { self.contains(PRODUCER_PROFILE) }

    pub fn resize_height(&self) -> Option<u32> {
        self.get(RESIZE_PROFILE).and_then(|h| h.trim().parse().ok()).filter(|h| *h > 0)
    }

    pub fn result_key(&self) -> Option<&str> { self.get(RESULT_KEY).filter(|k| !k.is_empty()) }

    pub fn is_project_filter(&self) -> bool { self.contains(PROJECT_FILTER) }

    pub fn as_map(&self) -> &BTreeMap<String, String> { &self.0 }
}

impl From<BTreeMap<String, String>> for JobExtras {
    fn from(map: BTreeMap<String, String>) -> Self { Self(map) }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobExtras {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
