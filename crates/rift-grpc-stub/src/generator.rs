//! Synthetic response bodies.
//!
//! Values are produced from the output descriptor: lorem text for strings,
//! random numbers, the first enum value, RFC3339 times for timestamps.
//! A [`Generator`] overrides the value of every field whose dotted proto
//! path (`location.latitude`) matches its wildcard pattern.

use crate::message::Message;
use crate::request::Request;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, SecondsFormat, Utc};
use fake::faker::lorem::en::{Sentence, Words};
use fake::Fake;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor};
use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

const FLOAT_MAX: f64 = 10_000.0;
const WORDS_MIN: usize = 1;
const WORDS_MAX: usize = 25;
const REPEAT_MAX: usize = 5;
const STREAM_MAX: usize = 5;
const MAX_DEPTH: usize = 8;
const FIELD_SEP: &str = ".";

pub type GenerateFn = Arc<dyn Fn(&Request) -> Value + Send + Sync>;

/// Value source for the fields matching `pattern`.
#[derive(Clone)]
pub struct Generator {
    pattern: String,
    matcher: Option<Regex>,
    generate: GenerateFn,
}

impl Generator {
    pub fn new<F>(pattern: impl Into<String>, generate: F) -> Self
    where
        F: Fn(&Request) -> Value + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let matcher = match wildcard_regex(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Generator pattern '{}' never matches: {}", pattern, e);
                None
            }
        };
        Self {
            pattern,
            matcher,
            generate: Arc::new(generate),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the dotted field path matches the pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|regex| regex.is_match(path))
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Ordered generators; the first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct Generators(Vec<Generator>);

impl Generators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn find(&self, path: &str) -> Option<&Generator> {
        self.0.iter().find(|g| g.matches(path))
    }

    /// Messages for one matched call: one for unary and client-streaming
    /// methods, one to five for server-streaming outputs.
    pub fn messages(&self, request: &Request, method: &MethodDescriptor) -> Vec<Message> {
        let count = if method.is_server_streaming() {
            rand::thread_rng().gen_range(1..=STREAM_MAX)
        } else {
            1
        };
        (0..count)
            .map(|_| self.message(request, &method.output()))
            .collect()
    }

    pub fn message(&self, request: &Request, descriptor: &MessageDescriptor) -> Message {
        Message::from(self.fields(request, descriptor, &mut Vec::new()))
    }

    fn fields(
        &self,
        request: &Request,
        descriptor: &MessageDescriptor,
        parents: &mut Vec<String>,
    ) -> Map<String, Value> {
        let mut rng = rand::thread_rng();
        let mut message = Map::new();
        let mut oneofs = HashSet::new();

        for field in descriptor.fields() {
            let optional = field.field_descriptor_proto().proto3_optional();
            if let Some(oneof) = field.containing_oneof() {
                // Only one member of a real oneof may be set.
                if !optional && !oneofs.insert(oneof.name().to_string()) {
                    continue;
                }
            }

            let mut count = 1;
            if optional {
                count = rng.gen_range(0..2);
            }
            if field.is_list() {
                count = rng.gen_range(1..=REPEAT_MAX);
            }
            if field.is_map() {
                message.insert(field.name().to_string(), Value::Object(Map::new()));
                continue;
            }

            parents.push(field.name().to_string());
            let path = parents.join(FIELD_SEP);
            let values: Vec<Value> = (0..count)
                .filter_map(|_| match self.find(&path) {
                    Some(generator) => Some((generator.generate)(request)),
                    None => self.value(request, &field, parents),
                })
                .collect();
            parents.pop();

            if field.is_list() {
                message.insert(field.name().to_string(), Value::Array(values));
            } else if let Some(value) = values.into_iter().next() {
                message.insert(field.name().to_string(), value);
            }
        }
        message
    }

    fn value(
        &self,
        request: &Request,
        field: &FieldDescriptor,
        parents: &mut Vec<String>,
    ) -> Option<Value> {
        match field.kind() {
            Kind::Message(descriptor) => self.nested(request, &descriptor, parents),
            kind => Some(scalar(&kind)),
        }
    }

    fn nested(
        &self,
        request: &Request,
        descriptor: &MessageDescriptor,
        parents: &mut Vec<String>,
    ) -> Option<Value> {
        let mut rng = rand::thread_rng();
        match descriptor.full_name() {
            "google.protobuf.Timestamp" => {
                let offset = Duration::seconds(rng.gen_range(0..365 * 24 * 3600));
                Some(json!((Utc::now() - offset).to_rfc3339_opts(SecondsFormat::Nanos, true)))
            }
            "google.protobuf.Duration" => {
                Some(json!(format!("{}s", rng.gen_range(0..24 * 3600))))
            }
            "google.protobuf.DoubleValue"
            | "google.protobuf.FloatValue"
            | "google.protobuf.Int64Value"
            | "google.protobuf.UInt64Value"
            | "google.protobuf.Int32Value"
            | "google.protobuf.UInt32Value"
            | "google.protobuf.BoolValue"
            | "google.protobuf.StringValue"
            | "google.protobuf.BytesValue" => descriptor
                .get_field_by_name("value")
                .map(|inner| scalar(&inner.kind())),
            // Dynamic JSON shapes have no sensible random form.
            "google.protobuf.Any"
            | "google.protobuf.Struct"
            | "google.protobuf.Value"
            | "google.protobuf.ListValue"
            | "google.protobuf.FieldMask" => None,
            _ if parents.len() > MAX_DEPTH => None,
            _ => Some(Value::Object(self.fields(request, descriptor, parents))),
        }
    }
}

impl From<Vec<Generator>> for Generators {
    fn from(generators: Vec<Generator>) -> Self {
        Self(generators)
    }
}

impl FromIterator<Generator> for Generators {
    fn from_iter<I: IntoIterator<Item = Generator>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn scalar(kind: &Kind) -> Value {
    let mut rng = rand::thread_rng();
    match kind {
        Kind::Double | Kind::Float => json!(rng.gen_range(0.0..FLOAT_MAX)),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => json!(rng.gen::<i64>()),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => json!(rng.gen::<i32>()),
        Kind::Uint64 | Kind::Fixed64 => json!(rng.gen::<u64>()),
        Kind::Uint32 | Kind::Fixed32 => json!(rng.gen::<u32>()),
        Kind::Bool => json!(rng.gen::<bool>()),
        Kind::String => json!(Sentence(WORDS_MIN..WORDS_MAX + 1).fake::<String>()),
        Kind::Bytes => {
            let words: Vec<String> = Words(WORDS_MIN..WORDS_MAX + 1).fake();
            json!(BASE64.encode(words.join(" ")))
        }
        Kind::Enum(descriptor) => json!(descriptor.default_value().number()),
        Kind::Message(_) => Value::Null,
    }
}

/// Anchored regex for a glob where `*` spans any run of characters and `?`
/// exactly one.
fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source)
}
