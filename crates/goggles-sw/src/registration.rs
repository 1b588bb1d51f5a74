//! Registration of the cache script against a scope.

use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// Where the cache script lives and which URLs it controls.
#[derive(Debug, Clone)]
pub struct CacheRegistration {
    pub script_url: Url,
    pub scope: Url,
}

impl CacheRegistration {
    /// Register `script_path` relative to `base`.
    ///
    /// Without an explicit scope the script's own directory is used.
    pub fn register(
        base: &Url,
        script_path: &str,
        scope: Option<&str>,
    ) -> Result<Self, ServiceWorkerError> {
        let script_url = base
            .join(script_path)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(format!("{script_path}: {e}")))?;

        if !matches!(script_url.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::SecurityError(format!(
                "script scheme '{}' is not http(s)",
                script_url.scheme()
            )));
        }

        let scope = match scope {
            Some(s) => script_url
                .join(s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(format!("{s}: {e}")))?,
            None => script_url
                .join("./")
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        };

        if scope.origin() != script_url.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {scope} is not same-origin with {script_url}"
            )));
        }

        debug!(script = %script_url, scope = %scope, "Registered offline cache");

        Ok(Self { script_url, scope })
    }

    /// Whether `url` falls under this registration's scope.
    pub fn controls(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin() && url.path().starts_with(self.scope.path())
    }
}
