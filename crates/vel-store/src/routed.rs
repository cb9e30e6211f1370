// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{normalize_path, FsBackend, StoreError};

/// Prefix-routed composite backend.
///
/// Routes each path to the backend registered for its longest matching
/// prefix, falling back to a default backend.  The canonical use is keeping
/// session scratch space (`/context/…`) in memory while `/memories/…`
/// persists to disk across sessions.
pub struct RoutedBackend {
    default: Arc<dyn FsBackend>,
    routes: Vec<(String, Arc<dyn FsBackend>)>,
}

impl RoutedBackend {
    pub fn new(default: Arc<dyn FsBackend>) -> Self {
        Self { default, routes: Vec::new() }
    }

    /// Route every path under `prefix` to `backend`.  Longest prefix wins.
    pub fn route(mut self, prefix: impl Into<String>, backend: Arc<dyn FsBackend>) -> Self {
        let prefix = prefix.into();
        self.routes.push((prefix, backend));
        // Longest prefix first so lookup can take the first match.
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    fn backend_for(&self, path: &str) -> &Arc<dyn FsBackend> {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, b)| b)
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl FsBackend for RoutedBackend {
    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let path = normalize_path(path)?;
        self.backend_for(&path).read(&path).await
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let path = normalize_path(path)?;
        self.backend_for(&path).write(&path, content).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = normalize_path(prefix)?;
        self.backend_for(&prefix).list(&prefix).await
    }

    async fn exists(&self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        self.backend_for(&path).exists(&path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let path = normalize_path(path)?;
        self.backend_for(&path).delete(&path).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{DiskBackend, MemoryBackend};

    #[tokio::test]
    async fn routes_memories_to_disk_and_rest_to_memory() {
        let tmp = TempDir::new().unwrap();
        let mem = Arc::new(MemoryBackend::new());
        let routed = RoutedBackend::new(mem.clone())
            .route("/memories", Arc::new(DiskBackend::new(tmp.path())));

        routed.write("/memories/AGENTS.md", "persist me").await.unwrap();
        routed.write("/context/scratch.txt", "ephemeral").await.unwrap();

        // /memories landed on disk, /context stayed in memory.
        assert!(tmp.path().join("memories/AGENTS.md").is_file());
        assert_eq!(mem.len(), 1);
        assert_eq!(routed.read("/memories/AGENTS.md").await.unwrap(), "persist me");
        assert_eq!(routed.read("/context/scratch.txt").await.unwrap(), "ephemeral");
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let a = Arc::new(MemoryBackend::new());
        let b = Arc::new(MemoryBackend::new());
        let routed = RoutedBackend::new(Arc::new(MemoryBackend::new()))
            .route("/m", a.clone())
            .route("/m/deep", b.clone());

        routed.write("/m/deep/x.txt", "v").await.unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(a.len(), 0);
    }
}
