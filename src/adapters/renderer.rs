//! Placeholder asset renderer.
//!
//! Writes one deterministic JSON manifest per asset under
//! `<root>/<job_id>/`. Rendering the same asset twice overwrites it.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{AssetRenderer, AssetRequest, CollaboratorError, RenderedAsset};

#[derive(Debug, Clone)]
pub struct PlaceholderRenderer {
    root: PathBuf,
}

impl PlaceholderRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }
}

#[async_trait]
impl AssetRenderer for PlaceholderRenderer {
    async fn render(&self, job_id: Uuid, asset: &AssetRequest) -> Result<RenderedAsset, CollaboratorError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{}.json", asset.name));
        let manifest = serde_json::to_vec_pretty(asset)?;
        tokio::fs::write(&path, manifest).await?;

        Ok(RenderedAsset {
            name: asset.name.clone(),
            path,
            atlas: format!("{}_atlas", asset.kind),
        })
    }

    async fn purge(&self, job_id: Uuid) -> Result<(), CollaboratorError> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(%job_id, "Purged rendered assets");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_render_then_purge() {
        let temp = TempDir::new().unwrap();
        let renderer = PlaceholderRenderer::new(temp.path());
        let job_id = Uuid::new_v4();

        let asset = AssetRequest {
            name: "player".into(),
            kind: "sprite".into(),
            style: json!({"art_style": "pixel_retro"}),
        };
        let rendered = renderer.render(job_id, &asset).await.unwrap();
        assert!(rendered.path.exists());
        assert_eq!(rendered.atlas, "sprite_atlas");

        renderer.purge(job_id).await.unwrap();
        assert!(!renderer.job_dir(job_id).exists());
        // Purging twice is fine
        renderer.purge(job_id).await.unwrap();
    }
}
