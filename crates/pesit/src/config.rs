//! Server and client configuration (§6): TOML file, overridable by
//! `PESIT_*` environment variables layered on top of the typed config
//! structs.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_port() -> u16 {
    1763
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_read_timeout_ms() -> u64 {
    60_000
}
fn default_protocol_version() -> u8 {
    2
}
fn default_max_entity_size() -> u32 {
    8192
}
fn default_sync_interval_kb() -> u32 {
    100
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default = "default_max_entity_size")]
    pub max_entity_size: u32,
    #[serde(default = "default_true")]
    pub sync_points_enabled: bool,
    #[serde(default = "default_sync_interval_kb")]
    pub sync_interval_kb: u32,
    #[serde(default)]
    pub strict_partner_check: bool,
    #[serde(default)]
    pub strict_file_check: bool,
    pub receive_directory: PathBuf,
    pub send_directory: PathBuf,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Loads from an optional TOML file, then applies `PESIT_*` environment
    /// overrides (`PESIT_SERVER_PORT`, `PESIT_SERVER_BIND`, ...). CLI flags,
    /// if any, are applied by the caller on top of the returned value.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, crate::error::PesitError> {
        let mut cfg: Self = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| crate::error::PesitError::Config(format!("reading {}: {e}", p.display())))?;
                toml::from_str(&text)
                    .map_err(|e| crate::error::PesitError::Config(format!("parsing {}: {e}", p.display())))?
            }
            None => return Err(crate::error::PesitError::Config("no config file given and no default applies".into())),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PESIT_SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("PESIT_SERVER_BIND") {
            self.bind = v;
        }
        if let Ok(v) = std::env::var("PESIT_SERVER_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("PESIT_SERVER_STRICT_PARTNER_CHECK") {
            self.strict_partner_check = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("PESIT_SERVER_STRICT_FILE_CHECK") {
            self.strict_file_check = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    pub keystore: Option<PathBuf>,
    pub keystore_pass: Option<String>,
    pub truststore: Option<PathBuf>,
    pub truststore_pass: Option<String>,
    #[serde(default)]
    pub require_client_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub tls: TlsSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            protocol_version: default_protocol_version(),
            tls: TlsSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_minimal_toml(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("server.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "id = \"SRV\"").unwrap();
        writeln!(file, "receive_directory = \"/recv\"").unwrap();
        writeln!(file, "send_directory = \"/send\"").unwrap();
        path
    }

    // Mutates process-wide environment state, so it must not interleave
    // with other tests touching the same PESIT_SERVER_* variables.
    #[test]
    #[serial]
    fn load_applies_defaults_when_file_omits_optional_keys() {
        std::env::remove_var("PESIT_SERVER_PORT");
        std::env::remove_var("PESIT_SERVER_BIND");
        std::env::remove_var("PESIT_SERVER_MAX_CONNECTIONS");
        std::env::remove_var("PESIT_SERVER_STRICT_PARTNER_CHECK");
        std::env::remove_var("PESIT_SERVER_STRICT_FILE_CHECK");

        let dir = tempfile::tempdir().unwrap();
        let path = write_minimal_toml(&dir);
        let cfg = ServerConfig::load(Some(&path)).unwrap();

        assert_eq!(cfg.id, "SRV");
        assert_eq!(cfg.port, 1763);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.max_connections, 100);
        assert!(cfg.sync_points_enabled);
        assert!(!cfg.strict_partner_check);
    }

    #[test]
    #[serial]
    fn env_overrides_apply_on_top_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_minimal_toml(&dir);

        std::env::set_var("PESIT_SERVER_PORT", "9999");
        std::env::set_var("PESIT_SERVER_BIND", "10.0.0.1");
        std::env::set_var("PESIT_SERVER_STRICT_PARTNER_CHECK", "true");

        let cfg = ServerConfig::load(Some(&path)).unwrap();

        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.bind, "10.0.0.1");
        assert!(cfg.strict_partner_check);

        std::env::remove_var("PESIT_SERVER_PORT");
        std::env::remove_var("PESIT_SERVER_BIND");
        std::env::remove_var("PESIT_SERVER_STRICT_PARTNER_CHECK");
    }

    #[test]
    fn load_without_a_path_errors() {
        assert!(ServerConfig::load(None).is_err());
    }

    #[test]
    fn client_config_default_matches_documented_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.protocol_version, 2);
        assert_eq!(cfg.read_timeout(), Duration::from_millis(60_000));
    }
}
