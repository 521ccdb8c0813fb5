//! Narrows [`fw_auth::TokenValidator`]'s `<S, D>` generic surface to a plain
//! trait object the session loop can hold as `Arc<dyn DeviceAuthenticator>`,
//! regardless of which store/directory pair the binary wires it to.

use async_trait::async_trait;
use fw_auth::{AuthError, DeviceDirectory, TokenStore, TokenValidator};

#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    async fn validate(&self, access_token: &str) -> Result<String, AuthError>;
}

#[async_trait]
impl<S: TokenStore, D: DeviceDirectory> DeviceAuthenticator for TokenValidator<S, D> {
    async fn validate(&self, access_token: &str) -> Result<String, AuthError> {
        TokenValidator::validate(self, access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_auth::{DeviceRecord, InMemoryTokenStore, TokenValidatorConfig};
    use std::collections::HashMap;

    struct FakeDirectory(HashMap<String, DeviceRecord>);

    #[async_trait]
    impl DeviceDirectory for FakeDirectory {
        async fn lookup(&self, device_id: &str) -> Option<DeviceRecord> {
            self.0.get(device_id).cloned()
        }
    }

    #[tokio::test]
    async fn validator_is_usable_as_a_dyn_device_authenticator() {
        let mut devices = HashMap::new();
        devices.insert(
            "device-1".to_string(),
            DeviceRecord {
                api_key: "secret".to_string(),
                enabled: true,
            },
        );
        let validator = TokenValidator::new(InMemoryTokenStore::default(), FakeDirectory(devices), TokenValidatorConfig::default());
        let pair = validator.issue("device-1", "secret").await.unwrap();

        let authenticator: &dyn DeviceAuthenticator = &validator;
        let device_id = authenticator.validate(&pair.access_token).await.unwrap();
        assert_eq!(device_id, "device-1");
    }
}
