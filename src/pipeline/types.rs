//! YAML scalar-flexibility types.
//!
//! The pipeline document accepts several shapes for the same field: a
//! command may be a shell string or a list, an environment may be a mapping
//! or a list of `KEY=VALUE` entries, and step sections are mappings whose
//! source key order is significant. The types here give each of those
//! shapes a dedicated serde implementation so the rest of the crate never
//! deals with raw [`serde_yaml::Value`]s.

use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A command line: either a single shell-lexed string or a list of parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    parts: Vec<String>,
}

impl Command {
    /// Creates a command from pre-split parts.
    #[must_use]
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Returns true when no command was specified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The command parts.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.parts
    }

    /// Consumes the command, returning its parts.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.parts
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.parts.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::String(s) => {
                let parts = shell_words::split(&s).map_err(de::Error::custom)?;
                Ok(Self { parts })
            }
            other => {
                let parts: Vec<String> =
                    serde_yaml::from_value(other).map_err(de::Error::custom)?;
                Ok(Self { parts })
            }
        }
    }
}

/// A string or an array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringOrSlice {
    parts: Vec<String>,
}

impl StringOrSlice {
    /// Creates a value from a list of parts.
    #[must_use]
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Returns true when the value holds no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// The parts as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.parts
    }

    /// Consumes the value, returning its parts.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.parts
    }

    /// Iterates over the parts.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(String::as_str)
    }
}

impl Serialize for StringOrSlice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.parts.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StringOrSlice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::String(s) => Ok(Self { parts: vec![s] }),
            other => {
                let parts: Vec<String> =
                    serde_yaml::from_value(other).map_err(de::Error::custom)?;
                Ok(Self { parts })
            }
        }
    }
}

/// An environment set: a YAML mapping or a list of `KEY=VALUE` entries.
///
/// Internally stored as sorted `KEY=VALUE` lines, the shape container
/// launches want. Serializes back to a mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap {
    parts: Vec<String>,
}

impl EnvMap {
    /// Builds an environment from key/value pairs, sorted by key.
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut parts: Vec<String> = pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        parts.sort();
        Self { parts }
    }

    /// Returns true when the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The `KEY=VALUE` lines.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.parts
    }

    /// Splits every entry into a `(key, value)` pair. Entries without an
    /// equals sign get an empty value.
    #[must_use]
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.parts
            .iter()
            .map(|part| match part.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (part.clone(), String::new()),
            })
            .collect()
    }
}

impl Serialize for EnvMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.parts.len()))?;
        for (key, value) in self.pairs() {
            map.serialize_entry(&key, &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EnvMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        match value {
            serde_yaml::Value::Sequence(_) => {
                let parts: Vec<String> =
                    serde_yaml::from_value(value).map_err(de::Error::custom)?;
                Ok(Self { parts })
            }
            serde_yaml::Value::Mapping(mapping) => {
                let mut parts = Vec::with_capacity(mapping.len());
                for (key, val) in mapping {
                    let key = key
                        .as_str()
                        .ok_or_else(|| de::Error::custom("environment keys must be strings"))?;
                    let val = scalar_to_string(&val)
                        .ok_or_else(|| de::Error::custom("environment values must be scalars"))?;
                    parts.push(format!("{key}={val}"));
                }
                parts.sort();
                Ok(Self { parts })
            }
            serde_yaml::Value::Null => Ok(Self::default()),
            _ => Err(de::Error::custom("expected a mapping or a sequence")),
        }
    }
}

/// An ordered, keyed collection of step bodies.
///
/// YAML mappings of step-key to step body, where the source order of the
/// keys is significant and must survive a marshal/parse round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    keys: Vec<String>,
    items: Vec<T>,
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl<T> Keyed<T> {
    /// Returns true when the collection has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// The keys in source order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Appends an entry, preserving order.
    pub fn push(&mut self, key: impl Into<String>, item: T) {
        self.keys.push(key.into());
        self.items.push(item);
    }

    /// Copies the collection and appends an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, item: T) -> Self {
        self.push(key, item);
        self
    }

    /// Iterates entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.keys.iter().map(String::as_str).zip(self.items.iter())
    }
}

impl<T: Serialize> Serialize for Keyed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.items.len()))?;
        for (key, item) in self.iter() {
            map.serialize_entry(key, item)?;
        }
        map.end()
    }
}

impl<'de, T: serde::de::DeserializeOwned> Deserialize<'de> for Keyed<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // serde_yaml mappings are insertion-ordered, which is what keeps
        // the source key order intact.
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        let mut out = Self::default();
        for (key, value) in mapping {
            let key = key
                .as_str()
                .ok_or_else(|| de::Error::custom("step keys must be strings"))?
                .to_string();
            let item: T = serde_yaml::from_value(value).map_err(de::Error::custom)?;
            out.push(key, item);
        }
        Ok(out)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_from_string() {
        let cmd: Command = serde_yaml::from_str("go build -v ./...").unwrap();
        assert_eq!(cmd.as_slice(), &["go", "build", "-v", "./..."]);
    }

    #[test]
    fn test_command_from_quoted_string() {
        let cmd: Command = serde_yaml::from_str(r#"'echo "hello world"'"#).unwrap();
        assert_eq!(cmd.as_slice(), &["echo", "hello world"]);
    }

    #[test]
    fn test_command_from_list() {
        let cmd: Command = serde_yaml::from_str("- go\n- build").unwrap();
        assert_eq!(cmd.as_slice(), &["go", "build"]);
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::new(vec!["a".into(), "b".into()]);
        let text = serde_yaml::to_string(&cmd).unwrap();
        assert_eq!(text, "- a\n- b\n");
        let back: Command = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_string_or_slice_scalar() {
        let v: StringOrSlice = serde_yaml::from_str("master").unwrap();
        assert_eq!(v.as_slice(), &["master"]);
    }

    #[test]
    fn test_string_or_slice_sequence() {
        let v: StringOrSlice = serde_yaml::from_str("- master\n- develop").unwrap();
        assert_eq!(v.as_slice(), &["master", "develop"]);
    }

    #[test]
    fn test_env_map_from_mapping_sorts() {
        let v: EnvMap = serde_yaml::from_str("B: two\nA: one").unwrap();
        assert_eq!(v.as_slice(), &["A=one", "B=two"]);
    }

    #[test]
    fn test_env_map_from_sequence() {
        let v: EnvMap = serde_yaml::from_str("- A=one\n- B=two").unwrap();
        assert_eq!(v.as_slice(), &["A=one", "B=two"]);
    }

    #[test]
    fn test_env_map_round_trip() {
        let v = EnvMap::from_pairs([("A".to_string(), "a".to_string()), ("B".to_string(), "b".to_string())]);
        let text = serde_yaml::to_string(&v).unwrap();
        assert_eq!(text, "A: a\nB: b\n");
        let back: EnvMap = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, v);
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Img {
        image: String,
    }

    #[test]
    fn test_keyed_preserves_source_order() {
        let v: Keyed<Img> = serde_yaml::from_str("k1:\n  image: img1\nk2:\n  image: img2").unwrap();
        assert_eq!(v.keys(), &["k1", "k2"]);
        let images: Vec<&str> = v.iter().map(|(_, i)| i.image.as_str()).collect();
        assert_eq!(images, vec!["img1", "img2"]);
    }

    #[test]
    fn test_keyed_round_trip_keeps_key_order() {
        let v = Keyed::default()
            .with("k1", Img { image: "img1".into() })
            .with("k2", Img { image: "img2".into() });
        let text = serde_yaml::to_string(&v).unwrap();
        let back: Keyed<Img> = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, v);
        assert_eq!(back.keys(), &["k1", "k2"]);
    }
}
