//! Credential lookup seam.
//!
//! Cloud tiers ask for API keys through this trait instead of reading the
//! environment directly, so hosts can plug in their own secret storage and
//! tests can inject fixed keys. A missing key is a normal condition — the
//! tier reports unavailable — never an error.

use std::collections::HashMap;

/// Source of API keys, injected at construction.
pub trait CredentialSource: Send + Sync {
    /// Returns the API key for `service`, or `None` when not configured.
    fn get_api_key(&self, service: &str) -> Option<String>;
}

/// Reads keys from `VOXCAP_<SERVICE>_API_KEY` environment variables.
///
/// The service name is uppercased and dashes become underscores, so
/// `cloud-stt` maps to `VOXCAP_CLOUD_STT_API_KEY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn get_api_key(&self, service: &str) -> Option<String> {
        let var = format!(
            "VOXCAP_{}_API_KEY",
            service.to_uppercase().replace('-', "_")
        );
        std::env::var(var).ok().filter(|key| !key.is_empty())
    }
}

/// Fixed in-memory credentials, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, service: &str, key: &str) -> Self {
        self.keys.insert(service.to_string(), key.to_string());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn get_api_key(&self, service: &str) -> Option<String> {
        self.keys.get(service).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_return_configured_keys() {
        let creds = StaticCredentials::new().with_key("cloud-stt", "sk-123");

        assert_eq!(creds.get_api_key("cloud-stt").as_deref(), Some("sk-123"));
        assert_eq!(creds.get_api_key("other"), None);
    }

    #[test]
    fn env_source_maps_service_name_to_variable() {
        // SAFETY: no concurrent env access for this unique variable name.
        unsafe { std::env::set_var("VOXCAP_TEST_SVC_UNIQ_API_KEY", "abc") };
        let creds = EnvCredentialSource;

        assert_eq!(creds.get_api_key("test-svc-uniq").as_deref(), Some("abc"));

        unsafe { std::env::remove_var("VOXCAP_TEST_SVC_UNIQ_API_KEY") };
        assert_eq!(creds.get_api_key("test-svc-uniq"), None);
    }
}
