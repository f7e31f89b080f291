//! Local-variable snapshots and the JSON fallback representation.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::result::{MAX_LOCALS, MAX_REPR_CHARS};

/// Names with this prefix are interpreter internals and never captured.
const RESERVED_PREFIX: &str = "__";

/// Replacement for a value that has no native JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fallback {
    pub repr: String,
    pub type_name: String,
}

/// A captured local: either plain JSON or a bounded `repr` fallback.
///
/// The wire form is untagged, so a program dict holding exactly the string
/// keys `repr` and `type_name` reads back as a [`Fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalValue {
    Fallback(Fallback),
    Native(Value),
}

impl LocalValue {
    /// Build a fallback, capping `repr` to [`MAX_REPR_CHARS`] characters.
    ///
    /// A cut repr ends with `…`, which counts toward the cap.
    pub fn fallback(repr: &str, type_name: impl Into<String>) -> Self {
        LocalValue::Fallback(Fallback {
            repr: cap_repr(repr),
            type_name: type_name.into(),
        })
    }
}

fn cap_repr(repr: &str) -> String {
    if repr.chars().count() <= MAX_REPR_CHARS {
        return repr.to_string();
    }
    let mut capped: String = repr.chars().take(MAX_REPR_CHARS - 1).collect();
    capped.push('…');
    capped
}

/// Ordered name → value bindings, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals(Vec<(String, LocalValue)>);

impl Locals {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&LocalValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocalValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, LocalValue)> for Locals {
    fn from_iter<I: IntoIterator<Item = (String, LocalValue)>>(iter: I) -> Self {
        Locals(iter.into_iter().collect())
    }
}

impl Serialize for Locals {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Locals {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LocalsVisitor;

        impl<'de> Visitor<'de> for LocalsVisitor {
            type Value = Locals;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of local variable names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Locals, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, LocalValue>()? {
                    entries.push((name, value));
                }
                Ok(Locals(entries))
            }
        }

        deserializer.deserialize_map(LocalsVisitor)
    }
}

/// Snapshot visible bindings in order.
///
/// Reserved names are skipped, at most [`MAX_LOCALS`] bindings are kept and
/// `convert` only runs for kept values. Extra bindings are dropped silently.
pub fn collect_locals<I, T, F>(bindings: I, mut convert: F) -> Locals
where
    I: IntoIterator<Item = (String, T)>,
    F: FnMut(T) -> LocalValue,
{
    bindings
        .into_iter()
        .filter(|(name, _)| !name.starts_with(RESERVED_PREFIX))
        .take(MAX_LOCALS)
        .map(|(name, value)| (name, convert(value)))
        .collect()
}
