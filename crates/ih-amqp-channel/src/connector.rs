//! Hub connector: turns a [`HubConfig`] into an open transport connection.

use std::sync::Arc;

use tracing::{info, warn};

use ih_protocol::addresses;

use crate::config::HubConfig;
use crate::error::{AmqpError, AmqpResult};
use crate::tls::{ConnectOptions, TlsMode};
use crate::transport::{Address, Connection, ConnectionFactory};

/// Opens connections to one hub endpoint and names device resources on it.
#[derive(Clone)]
pub struct HubConnector {
    config: HubConfig,
    factory: Arc<dyn ConnectionFactory>,
}

impl HubConnector {
    pub fn new(config: HubConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        Address::new(&self.config.host, self.config.port)
    }

    /// `"{host}/devices/"`.
    pub fn resource_root(&self) -> String {
        addresses::resource_root(&self.config.host)
    }

    /// SAS audience of `device_id` on this hub.
    pub fn device_resource_uri(&self, device_id: &str) -> String {
        addresses::device_resource_uri(&self.config.host, device_id)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::from_config(&self.config)
    }

    /// Open a transport connection. Failures surface as
    /// [`AmqpError::Connect`] and are not retried.
    pub async fn connect(&self) -> AmqpResult<Arc<dyn Connection>> {
        let address = self.address();
        let options = self.connect_options();
        if options.tls == TlsMode::TrustAll {
            warn!(%address, "server certificate validation disabled");
        }

        let connection = self
            .factory
            .open_connection(&address, &options)
            .await
            .map_err(|e| match e {
                AmqpError::Connect(reason) => AmqpError::Connect(reason),
                other => AmqpError::Connect(other.to_string()),
            })?;

        info!(%address, "hub connection open");
        Ok(connection)
    }
}

impl std::fmt::Debug for HubConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
