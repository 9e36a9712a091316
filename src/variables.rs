//! Variable substitution for step payloads.

use std::borrow::Cow;
use std::collections::BTreeMap;

/// Flat mapping of substitution keys to replacement strings.
///
/// A payload refers to a key as `%(key)s`. Placeholders naming an unknown
/// key are left as they are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariableDefinitions {
    values: BTreeMap<String, String>,
}

impl VariableDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn substitute<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.values.is_empty() || !text.contains("%(") {
            return Cow::Borrowed(text);
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("%(") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(")s") {
                Some(end) if self.values.contains_key(&after[..end]) => {
                    result.push_str(&self.values[&after[..end]]);
                    rest = &after[end + 2..];
                }
                _ => {
                    result.push_str("%(");
                    rest = after;
                }
            }
        }
        result.push_str(rest);
        Cow::Owned(result)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableDefinitions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Substitute with optional definitions.
pub(crate) fn substitute<'a>(
    definitions: Option<&VariableDefinitions>,
    text: &'a str,
) -> Cow<'a, str> {
    match definitions {
        Some(defs) => defs.substitute(text),
        None => Cow::Borrowed(text),
    }
}
