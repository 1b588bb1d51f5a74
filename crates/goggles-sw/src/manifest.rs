//! The fixed asset list a generation must hold.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// An ordered set of asset paths under one generation tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub tag: String,
    pub assets: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(tag: impl Into<String>, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.into(),
            assets: assets.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve every asset against `scope`, keeping order and dropping duplicates.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        if self.tag.trim().is_empty() {
            return Err(ServiceWorkerError::InvalidManifest(
                "generation tag is empty".to_string(),
            ));
        }

        let mut urls: Vec<Url> = Vec::with_capacity(self.assets.len());
        for asset in &self.assets {
            let url = scope.join(asset).map_err(|e| {
                ServiceWorkerError::InvalidManifest(format!("{asset}: {e}"))
            })?;
            if url.origin() != scope.origin() {
                return Err(ServiceWorkerError::SecurityError(format!(
                    "asset {url} is outside origin {}",
                    scope.origin().ascii_serialization()
                )));
            }
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}
