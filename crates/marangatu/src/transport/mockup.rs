//! Offline transport serving canned portal responses from a directory.
//!
//! A request for `https://host/eset/perfil/menu?t3=…` is answered from the
//! first existing file among `eset/perfil/menu.json`, `eset/perfil/menu.html`,
//! `eset/perfil/menu/index.json`, `eset/perfil/menu/index.html` and
//! `eset/perfil/menu` under the mockup root. Method and body are ignored.

use super::{PortalRequest, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct MockupTransport {
    root: PathBuf,
}

impl MockupTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate files for a URL, in lookup order.
    pub fn candidates(&self, url: &str) -> Vec<PathBuf> {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.split('?').next().unwrap_or(url).to_string());
        let path = path.trim_start_matches('/');
        vec![
            self.root.join(format!("{path}.json")),
            self.root.join(format!("{path}.html")),
            self.root.join(path).join("index.json"),
            self.root.join(path).join("index.html"),
            self.root.join(path),
        ]
    }
}

#[async_trait]
impl Transport for MockupTransport {
    async fn request(&self, req: PortalRequest) -> Result<String, TransportError> {
        let candidates = self.candidates(&req.url);
        let Some(file) = candidates.iter().find(|p| p.is_file()) else {
            return Err(TransportError::MockupMissing {
                url: req.url,
                tried: candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };
        debug!(method = %req.method, file = %file.display(), "mockup response");
        Ok(tokio::fs::read_to_string(file).await?)
    }
}
