//! Header and trailer multimap.
//!
//! Keys are stored lower-cased, matching how gRPC metadata travels over
//! HTTP/2. Values of binary keys (suffix `-bin`) are kept as standard
//! base64 text so a `Metadata` stays printable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
    KeyAndValueRef, MetadataMap,
};
use tracing::warn;

const BINARY_SUFFIX: &str = "-bin";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Vec<String>>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping earlier values for the same key.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate keys in sorted order with all of their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Keep only the keys for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|key, _| keep(key));
    }

    /// Replace the values of every key present in `other`; other keys stay.
    pub fn merge_replacing(&mut self, other: &Metadata) {
        for (key, values) in &other.0 {
            self.0.insert(key.clone(), values.clone());
        }
    }

    /// Collect incoming call metadata.
    pub fn from_grpc(map: &MetadataMap) -> Self {
        let mut metadata = Self::new();
        for entry in map.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => match value.to_str() {
                    Ok(text) => metadata.append(key.as_str(), text),
                    Err(_) => warn!("Skipping non-printable metadata value for '{}'", key.as_str()),
                },
                KeyAndValueRef::Binary(key, value) => match value.to_bytes() {
                    Ok(bytes) => metadata.append(key.as_str(), BASE64.encode(bytes)),
                    Err(e) => warn!("Skipping undecodable binary metadata '{}': {}", key.as_str(), e),
                },
            }
        }
        metadata
    }

    /// Convert into outgoing metadata. Entries that are not valid gRPC
    /// metadata are skipped with a warning.
    pub fn to_grpc(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        for (key, values) in &self.0 {
            if key.ends_with(BINARY_SUFFIX) {
                let Ok(name) = key.parse::<BinaryMetadataKey>() else {
                    warn!("Skipping invalid binary metadata key '{}'", key);
                    continue;
                };
                for value in values {
                    match BASE64.decode(value) {
                        Ok(bytes) => {
                            map.append_bin(name.clone(), BinaryMetadataValue::from_bytes(&bytes));
                        }
                        Err(e) => {
                            warn!("Skipping invalid base64 value for binary metadata '{}': {}", key, e)
                        }
                    }
                }
            } else {
                let Ok(name) = key.parse::<AsciiMetadataKey>() else {
                    warn!("Skipping invalid metadata key '{}'", key);
                    continue;
                };
                for value in values {
                    match value.parse::<AsciiMetadataValue>() {
                        Ok(value) => {
                            map.append(name.clone(), value);
                        }
                        Err(_) => warn!("Skipping invalid metadata value for '{}'", key.as_str()),
                    }
                }
            }
        }
        map
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.append(key, value);
        }
        metadata
    }
}
