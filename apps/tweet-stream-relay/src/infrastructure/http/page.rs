//! Client page served at `/`.

use std::path::Path;

use axum::body::Bytes;

use crate::infrastructure::config::ConfigError;

/// Page compiled into the binary.
const EMBEDDED_PAGE: &str = include_str!("../../../client/index.html");

/// The HTML page that opens the push channel in a browser.
#[derive(Debug, Clone)]
pub struct ClientPage {
    html: Bytes,
}

impl ClientPage {
    /// The page compiled into the binary.
    #[must_use]
    pub const fn embedded() -> Self {
        Self {
            html: Bytes::from_static(EMBEDDED_PAGE.as_bytes()),
        }
    }

    /// Load the page once, from `path` when given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ClientPage`] if the file cannot be read.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::embedded());
        };

        let html = tokio::fs::read(path)
            .await
            .map_err(|e| ConfigError::ClientPage {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), "Serving client page from file");

        Ok(Self {
            html: Bytes::from(html),
        })
    }

    /// Page contents.
    #[must_use]
    pub fn html(&self) -> Bytes {
        self.html.clone()
    }
}

impl Default for ClientPage {
    fn default() -> Self {
        Self::embedded()
    }
}
