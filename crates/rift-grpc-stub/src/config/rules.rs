//! Stub rules configuration.

use crate::generator::Generator;
use crate::matcher::Matcher;
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Mapping;
use std::collections::BTreeMap;
use tonic::{Code, Status};

/// One matcher, declared in configuration.
///
/// ```yaml
/// - method: /routeguide.RouteGuide/GetFeature
///   match:
///     headers: { session: XXX }
///     message: { /latitude: 10 }
///   headers: { x-stub: "1" }
///   responses:
///     - name: hello
///   status: { code: NOT_FOUND, message: missing }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StubRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Bare method name or `/package.Service/Method`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, rename = "match")]
    pub match_config: MatchConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub trailers: BTreeMap<String, String>,
    /// Response messages in their JSON form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusConfig>,
    /// Generated responses; each entry pins the fields matching a wildcard
    /// pattern to a constant value. Entries keep their document order and
    /// the first matching pattern wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<Mapping>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchConfig {
    /// Header key to a value that must be among the header's values.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON pointer into the request message to the expected value.
    #[serde(default)]
    pub message: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    pub code: CodeConfig,
    #[serde(default)]
    pub message: String,
}

/// A status code given by number (`5`) or name (`NOT_FOUND`, `NotFound`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CodeConfig {
    Number(i32),
    Name(String),
}

const MAX_CODE: i32 = 16;

impl CodeConfig {
    pub fn to_code(&self) -> Result<Code, anyhow::Error> {
        match self {
            CodeConfig::Number(n) if (0..=MAX_CODE).contains(n) => Ok(Code::from(*n)),
            CodeConfig::Number(n) => bail!("Invalid gRPC status code: {n}"),
            CodeConfig::Name(name) => {
                let wanted = match normalize(name).as_str() {
                    "canceled" => "cancelled".to_string(),
                    other => other.to_string(),
                };
                (0..=MAX_CODE)
                    .map(Code::from)
                    .find(|code| normalize(&format!("{code:?}")) == wanted)
                    .ok_or_else(|| anyhow!("Unknown gRPC status code name: '{name}'"))
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase()
}

impl StubRule {
    /// Short description for error messages.
    pub fn label(&self, index: usize) -> String {
        let target = self
            .method
            .as_deref()
            .or(self.service.as_deref())
            .unwrap_or("*");
        format!("#{index} ({target})")
    }

    pub fn validate(&self, index: usize) -> Result<(), anyhow::Error> {
        let label = self.label(index);
        if let Some(status) = &self.status {
            status
                .code
                .to_code()
                .map_err(|e| anyhow!("Stub {label}: {e}"))?;
        }
        if self.responses.iter().any(|r| !r.is_object()) {
            bail!("Stub {label}: every response must be a JSON object");
        }
        if !self.responses.is_empty() && self.dynamic.is_some() {
            bail!("Stub {label}: 'responses' and 'dynamic' are mutually exclusive");
        }
        if let Some(fields) = &self.dynamic {
            dynamic_fields(fields).map_err(|e| anyhow!("Stub {label}: {e}"))?;
        }
        if let Some(pointer) = self
            .match_config
            .message
            .keys()
            .find(|p| !p.starts_with('/'))
        {
            bail!("Stub {label}: message match key '{pointer}' is not a JSON pointer");
        }
        Ok(())
    }

    /// Build the matcher this rule describes. The matcher is not registered.
    pub fn to_matcher(&self) -> Result<Matcher, anyhow::Error> {
        let mut matcher = Matcher::new();
        if let Some(service) = &self.service {
            matcher = matcher.service(service.clone());
        }
        if let Some(method) = &self.method {
            matcher = matcher.method(method.clone());
        }
        for (key, value) in &self.match_config.headers {
            let (key, value) = (key.clone(), value.clone());
            matcher = matcher.matches(move |r| r.headers.get_all(&key).contains(&value));
        }
        for (pointer, value) in &self.match_config.message {
            let (pointer, value) = (pointer.clone(), value.clone());
            matcher = matcher.matches(move |r| r.message.get(&pointer) == Some(&value));
        }

        for (key, value) in &self.headers {
            matcher = matcher.header(key.clone(), value.clone());
        }
        for (key, value) in &self.trailers {
            matcher = matcher.trailer(key.clone(), value.clone());
        }
        for response in &self.responses {
            matcher = matcher.response(response.clone());
        }
        if let Some(fields) = &self.dynamic {
            let generators: Vec<Generator> = dynamic_fields(fields)?
                .into_iter()
                .map(|(pattern, value)| Generator::new(pattern, move |_| value.clone()))
                .collect();
            matcher = matcher.response_dynamic(generators);
        }
        if let Some(status) = &self.status {
            matcher = matcher.status(Status::new(status.code.to_code()?, status.message.clone()));
        }
        Ok(matcher)
    }
}

/// Pattern and value pairs of a `dynamic` block, in document order.
fn dynamic_fields(fields: &Mapping) -> Result<Vec<(String, Value)>, anyhow::Error> {
    fields
        .iter()
        .map(|(pattern, value)| {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| anyhow!("dynamic field pattern {pattern:?} is not a string"))?;
            let value = serde_json::to_value(value)
                .map_err(|e| anyhow!("dynamic field '{pattern}': {e}"))?;
            Ok((pattern.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::message::Message;
    use crate::metadata::Metadata;
    use crate::request::Request;
    use serde_json::json;
    use std::sync::Arc;

    fn code(yaml: &str) -> Result<Code, anyhow::Error> {
        serde_yaml::from_str::<CodeConfig>(yaml).unwrap().to_code()
    }

    #[test]
    fn test_code_by_number_and_name() {
        assert_eq!(code("5").unwrap(), Code::NotFound);
        assert_eq!(code("NOT_FOUND").unwrap(), Code::NotFound);
        assert_eq!(code("NotFound").unwrap(), Code::NotFound);
        assert_eq!(code("not_found").unwrap(), Code::NotFound);
        assert_eq!(code("CANCELED").unwrap(), Code::Cancelled);
        assert_eq!(code("UNAUTHENTICATED").unwrap(), Code::Unauthenticated);
        assert!(code("17").is_err());
        assert!(code("NOPE").is_err());
    }

    #[test]
    fn test_rule_builds_matcher() {
        let rule: StubRule = serde_yaml::from_str(
            r#"
method: /routeguide.RouteGuide/GetFeature
match:
  headers:
    session: XXX
  message:
    /latitude: 10
headers:
  x-stub: "1"
trailers:
  size: "213"
responses:
  - name: hello
"#,
        )
        .unwrap();
        rule.validate(0).unwrap();
        let matcher = rule.to_matcher().unwrap();

        let headers: Metadata = [("session", "XXX")].into_iter().collect();
        let request = |latitude: i64, headers: Metadata| {
            Arc::new(
                Request::new(
                    "routeguide.RouteGuide",
                    "GetFeature",
                    Message::from(json!({"latitude": latitude})),
                )
                .with_headers(headers),
            )
        };
        assert!(matcher.accepts(&[request(10, headers.clone())]));
        assert!(!matcher.accepts(&[request(11, headers.clone())]));
        assert!(!matcher.accepts(&[request(10, Metadata::new())]));

        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let response = matcher.respond(&request(10, headers), &method).unwrap();
        assert_eq!(response.headers.get("x-stub"), Some("1"));
        assert_eq!(response.trailers.get("size"), Some("213"));
        assert_eq!(response.messages[0]["name"], json!("hello"));
    }

    #[test]
    fn test_dynamic_rule_pins_fields() {
        let rule: StubRule = serde_yaml::from_str(
            r#"
method: GetFeature
dynamic:
  name: pinned
"#,
        )
        .unwrap();
        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let request = Request::new("routeguide.RouteGuide", "GetFeature", Message::new());
        let response = rule.to_matcher().unwrap().respond(&request, &method).unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0]["name"], json!("pinned"));
    }

    #[test]
    fn test_dynamic_rule_first_pattern_wins() {
        let rule: StubRule = serde_yaml::from_str(
            r#"
method: Hello
dynamic:
  create_time: "2001-01-01T00:00:00Z"
  "*_time": "2099-01-01T00:00:00Z"
  message: pinned
"#,
        )
        .unwrap();
        rule.validate(0).unwrap();
        let method = fixtures::method("hello.GrpcTestService", "Hello");
        let request = Request::new("hello.GrpcTestService", "Hello", Message::new());
        let response = rule.to_matcher().unwrap().respond(&request, &method).unwrap();
        assert_eq!(
            response.messages[0]["create_time"],
            json!("2001-01-01T00:00:00Z")
        );
        assert_eq!(response.messages[0]["message"], json!("pinned"));

        let patterns: Vec<String> = dynamic_fields(rule.dynamic.as_ref().unwrap())
            .unwrap()
            .into_iter()
            .map(|(pattern, _)| pattern)
            .collect();
        assert_eq!(patterns, ["create_time", "*_time", "message"]);
    }

    #[test]
    fn test_status_rule() {
        let rule: StubRule =
            serde_yaml::from_str("status: { code: ABORTED, message: aborted }").unwrap();
        let method = fixtures::method("routeguide.RouteGuide", "GetFeature");
        let request = Request::new("routeguide.RouteGuide", "GetFeature", Message::new());
        let response = rule.to_matcher().unwrap().respond(&request, &method).unwrap();
        let status = response.failure().unwrap();
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(status.message(), "aborted");
    }

    #[test]
    fn test_validate_rejects_bad_rules() {
        let cases = [
            "responses: [1]",
            "status: { code: 99 }",
            "match: { message: { latitude: 1 } }",
            "responses: [{name: a}]\ndynamic: {}",
            "dynamic: {1: x}",
        ];
        for yaml in cases {
            let rule: StubRule = serde_yaml::from_str(yaml).unwrap();
            assert!(rule.validate(3).is_err(), "{yaml}");
        }
    }
}
