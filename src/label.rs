use std::collections::{HashMap, HashSet};

use log::*;

// Tag keys exposed as label dimensions of the gauge, already normalized.
pub const SUPPORTED_TAGS: &[&str] = &["Version"];

/// Turns a tag key or resource name into a token that is safe to use
/// in a metric or label name.
pub fn normalize_name(name: &str) -> String {
    name.replace(['-', ':'], "_")
}

pub fn is_supported(name: &str) -> bool {
    let name = normalize_name(name);
    SUPPORTED_TAGS.iter().any(|t| *t == name)
}

/// Values for every supported tag, in `SUPPORTED_TAGS` order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    values: Vec<String>,
}

impl LabelSet {
    pub fn empty() -> Self {
        Self {
            values: vec![String::new(); SUPPORTED_TAGS.len()],
        }
    }

    /// Projects raw resource tags onto the supported set. Keys missing from
    /// `tags` map to "".
    pub fn project(tags: &HashMap<String, String>) -> Self {
        for key in tags.keys().filter(|k| !is_supported(k)) {
            trace!("Ignoring unsupported tag {key}");
        }

        Self {
            values: project_onto(SUPPORTED_TAGS, tags),
        }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        SUPPORTED_TAGS
            .iter()
            .position(|t| *t == name)
            .map(|idx| self.values[idx].as_str())
    }

    pub fn values(&self) -> Vec<&str> {
        self.values.iter().map(String::as_str).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        SUPPORTED_TAGS
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }
}

// When several raw keys normalize to the same supported name, the lexically
// smallest raw key wins.
fn project_onto(supported: &[&str], tags: &HashMap<String, String>) -> Vec<String> {
    let mut values = vec![String::new(); supported.len()];

    let mut keys: Vec<&String> = tags.keys().collect();
    keys.sort();

    let mut claimed = HashSet::new();
    for key in keys {
        let name = normalize_name(key);
        if let Some(idx) = supported.iter().position(|t| *t == name) {
            if claimed.insert(idx) {
                values[idx] = tags[key].clone();
            }
        }
    }

    values
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}
