use std::path::{Path, PathBuf};

use tabpilot_common::Result;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceAsset {
    pub path: PathBuf,
    pub content: String,
}

impl WorkspaceAsset {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceAssets {
    pub scripts: Vec<WorkspaceAsset>,
    pub styles: Vec<WorkspaceAsset>,
}

/// Per-domain storage of scripts and styles the agent has written for a site.
pub struct WorkspaceManager {
    storage_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    /// Directory for `domain`, created on demand.
    pub fn workspace_path(&self, domain: &str) -> Result<PathBuf> {
        let dir = self.storage_dir.join(domain);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn get_assets(&self, domain: &str) -> WorkspaceAssets {
        if !is_safe_domain(domain) {
            warn!(domain, "refusing asset lookup for unsafe domain");
            return WorkspaceAssets::default();
        }
        let dir = self.storage_dir.join(domain);
        WorkspaceAssets {
            scripts: read_assets(&dir.join("scripts"), "js"),
            styles: read_assets(&dir.join("styles"), "css"),
        }
    }
}

fn is_safe_domain(domain: &str) -> bool {
    !domain.is_empty() && !domain.contains(['/', '\\']) && !domain.contains("..")
}

fn read_assets(dir: &Path, extension: &str) -> Vec<WorkspaceAsset> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut assets: Vec<WorkspaceAsset> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == extension))
        .filter_map(|path| match std::fs::read_to_string(&path) {
            Ok(content) => Some(WorkspaceAsset { path, content }),
            Err(e) => {
                warn!("skipping unreadable asset {}: {e}", path.display());
                None
            }
        })
        .collect();
    assets.sort_by(|a, b| a.path.cmp(&b.path));
    assets
}
