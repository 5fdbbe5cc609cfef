//! TLS and tracing options handed to the transport when connecting.
//!
//! Server certificate validation is on unless the configuration opts out
//! explicitly with `trust_all_certificates = true`.

use crate::config::HubConfig;

/// How the transport validates the hub's server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Validate the certificate chain and host name.
    #[default]
    Verify,
    /// Accept any server certificate. Development only.
    TrustAll,
}

/// Options passed to [`crate::transport::ConnectionFactory::open_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectOptions {
    pub tls: TlsMode,
    /// Emit frame-level traces at TRACE level under the
    /// [`WIRE_TRACE_TARGET`] target.
    pub trace_frames: bool,
}

/// `tracing` target transports log frame traces under.
pub const WIRE_TRACE_TARGET: &str = "ih_amqp_channel::wire";

impl ConnectOptions {
    pub fn from_config(config: &HubConfig) -> Self {
        let tls = if config.trust_all_certificates {
            TlsMode::TrustAll
        } else {
            TlsMode::Verify
        };
        Self {
            tls,
            trace_frames: config.verbose_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(trust_all: bool, verbose: bool) -> HubConfig {
        HubConfig {
            host: "myhub.azure-devices.net".into(),
            port: 5671,
            trust_all_certificates: trust_all,
            verbose_trace: verbose,
            auth_timeout_secs: 30,
        }
    }

    #[test]
    fn verification_is_default() {
        let opts = ConnectOptions::from_config(&config(false, false));
        assert_eq!(opts.tls, TlsMode::Verify);
        assert!(!opts.trace_frames);
        assert_eq!(ConnectOptions::default().tls, TlsMode::Verify);
    }

    #[test]
    fn trust_all_requires_opt_in() {
        let opts = ConnectOptions::from_config(&config(true, true));
        assert_eq!(opts.tls, TlsMode::TrustAll);
        assert!(opts.trace_frames);
    }
}
