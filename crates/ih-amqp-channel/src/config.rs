use std::time::Duration;

use serde::Deserialize;

/// Hub endpoint configuration, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Hub host name (e.g., `myhub.azure-devices.net`).
    pub host: String,
    /// AMQPS port (default 5671).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Skip server certificate validation. Development only.
    #[serde(default)]
    pub trust_all_certificates: bool,
    /// Trace transport frames into the log.
    #[serde(default)]
    pub verbose_trace: bool,
    /// Upper bound on waiting for a CBS response, in seconds.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
}

fn default_port() -> u16 {
    5671
}

fn default_auth_timeout() -> u64 {
    30
}

impl HubConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            trust_all_certificates: false,
            verbose_trace: false,
            auth_timeout_secs: default_auth_timeout(),
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config() {
        let config: HubConfig = toml::from_str(r#"host = "myhub.azure-devices.net""#).unwrap();
        assert_eq!(config.host, "myhub.azure-devices.net");
        assert_eq!(config.port, 5671);
        assert!(!config.trust_all_certificates);
        assert!(!config.verbose_trace);
        assert_eq!(config.auth_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
host = "localhost"
port = 5672
trust_all_certificates = true
verbose_trace = true
auth_timeout_secs = 5
"#;
        let config: HubConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.port, 5672);
        assert!(config.trust_all_certificates);
        assert!(config.verbose_trace);
        assert_eq!(config.auth_timeout_secs, 5);
    }
}
