use std::time::Duration;

use ih_protocol::token::{self, SharedAccessKey, SignedToken, TokenResult};

/// Immutable identity of one device on one hub.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: String,
    key: SharedAccessKey,
    resource_uri: String,
}

impl DeviceIdentity {
    /// Build an identity from a base64 device key. Fails with
    /// `TokenError::InvalidKey` if the key is not valid base64.
    pub fn new(
        device_id: impl Into<String>,
        device_key: &str,
        resource_uri: impl Into<String>,
    ) -> TokenResult<Self> {
        Ok(Self::with_key(
            device_id,
            SharedAccessKey::from_base64(device_key)?,
            resource_uri,
        ))
    }

    pub fn with_key(
        device_id: impl Into<String>,
        key: SharedAccessKey,
        resource_uri: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            key,
            resource_uri: resource_uri.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// SAS audience: `{host}/devices/{device_id}`.
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Sign a fresh token for this device's resource URI.
    pub fn sign_token(&self, ttl: Duration) -> TokenResult<SignedToken> {
        token::sign(&self.key, &self.resource_uri, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "c2VjcmV0LWRldmljZS1rZXktMDEyMzQ1Njc4OQ==";

    #[test]
    fn identity_signs_for_its_resource() {
        let id = DeviceIdentity::new("dev1", KEY, "hub/devices/dev1").unwrap();
        let token = id.sign_token(Duration::from_secs(180)).unwrap();
        assert_eq!(token.audience, "hub/devices/dev1");
        assert!(token.to_string().ends_with("&sr=hub%2Fdevices%2Fdev1"));
    }

    #[test]
    fn invalid_key_is_rejected() {
        assert!(DeviceIdentity::new("dev1", "***", "hub/devices/dev1").is_err());
    }

    #[test]
    fn debug_hides_key() {
        let id = DeviceIdentity::new("dev1", KEY, "hub/devices/dev1").unwrap();
        let debug = format!("{id:?}");
        assert!(debug.contains("dev1"));
        assert!(!debug.contains(KEY));
    }
}
