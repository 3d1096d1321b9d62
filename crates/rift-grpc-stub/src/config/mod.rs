//! Configuration file for the `rift-grpc-stub` binary.

mod rules;

use crate::matcher::Matcher;
use crate::server::{StubServer, StubServerBuilder, TlsMaterial};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use rules::{CodeConfig, MatchConfig, StatusConfig, StubRule};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StubConfig {
    /// `FileDescriptorSet` files, e.g. from
    /// `protoc --include_imports --descriptor_set_out`.
    #[serde(default)]
    pub descriptor_sets: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub health_check: bool,

    #[serde(default = "default_reflection")]
    pub reflection: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_ms: Option<u64>,

    /// Matchers in priority order.
    #[serde(default)]
    pub stubs: Vec<StubRule>,
}

fn default_reflection() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn load(&self) -> Result<TlsMaterial, anyhow::Error> {
        let material = TlsMaterial::from_files(&self.cert, &self.key, self.ca_cert.as_deref())?;
        Ok(match &self.server_name {
            Some(name) => material.with_server_name(name.clone()),
            None => material,
        })
    }
}

impl StubConfig {
    /// Parse a YAML (or JSON) file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: StubConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(tls) = &self.tls {
            if tls.server_name.as_deref() == Some("") {
                anyhow::bail!("TLS server_name must not be empty");
            }
        }
        for (index, rule) in self.stubs.iter().enumerate() {
            rule.validate(index)?;
        }
        Ok(())
    }

    /// Server builder with everything but the stubs applied.
    pub fn builder(&self) -> Result<StubServerBuilder, anyhow::Error> {
        let mut builder = StubServer::builder();
        for path in &self.descriptor_sets {
            builder = builder.descriptor_set_file(path.clone());
        }
        if let Some(addr) = self.listen {
            builder = builder.listen_addr(addr);
        }
        if let Some(tls) = &self.tls {
            builder = builder.tls(tls.load()?);
        }
        if self.health_check {
            builder = builder.enable_health_check();
        }
        if !self.reflection {
            builder = builder.disable_reflection();
        }
        if let Some(ms) = self.grace_period_ms {
            builder = builder.grace_period(Duration::from_millis(ms));
        }
        Ok(builder)
    }

    /// Register every stub on `server`, in order.
    pub fn apply(&self, server: &StubServer) -> Result<Vec<Matcher>, anyhow::Error> {
        self.stubs
            .iter()
            .map(|rule| Ok(server.add_matcher(rule.to_matcher()?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_config() {
        let file = write_config(
            r#"
descriptor_sets:
  - protos/route_guide.bin
listen: 127.0.0.1:50051
health_check: true
grace_period_ms: 250
stubs:
  - method: GetFeature
    responses:
      - name: hello
  - service: routeguide.RouteGuide
    status:
      code: NOT_FOUND
      message: nothing here
"#,
        );
        let config = StubConfig::from_file(file.path()).unwrap();
        assert_eq!(config.descriptor_sets, vec![PathBuf::from("protos/route_guide.bin")]);
        assert_eq!(config.listen, Some("127.0.0.1:50051".parse().unwrap()));
        assert!(config.health_check);
        assert!(config.reflection);
        assert_eq!(config.grace_period_ms, Some(250));
        assert_eq!(config.stubs.len(), 2);
        assert_eq!(config.stubs[1].label(1), "#1 (routeguide.RouteGuide)");
    }

    #[test]
    fn test_json_is_accepted() {
        let file = write_config(r#"{"reflection": false, "stubs": [{"method": "Hello"}]}"#);
        let config = StubConfig::from_file(file.path()).unwrap();
        assert!(!config.reflection);
        assert_eq!(config.stubs[0].method.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_invalid_stub_fails_validation() {
        let file = write_config(
            r#"
stubs:
  - method: GetFeature
    status:
      code: NOT_A_CODE
"#,
        );
        let err = StubConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("#0 (GetFeature)"));
    }

    #[test]
    fn test_missing_tls_files_fail_builder() {
        let config: StubConfig = serde_yaml::from_str(
            r#"
tls:
  cert: /nonexistent/cert.pem
  key: /nonexistent/key.pem
"#,
        )
        .unwrap();
        assert!(config.builder().is_err());
    }

    #[test]
    fn test_tls_config_loads_testdata() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/testdata");
        let tls = TlsConfig {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
            ca_cert: Some(dir.join("cacert.pem")),
            server_name: Some("localhost".to_string()),
        };
        let material = tls.load().unwrap();
        assert!(material.ca_cert_pem.is_some());
        assert_eq!(material.server_name, "localhost");
    }
}
