// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{normalize_path, FsBackend, StoreError};

/// Disk-rooted backend.  Virtual paths map to files under `root`; the
/// normalizer rejects `..` so content can never escape it.
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let virt = normalize_path(path)?;
        // normalize_path guarantees a leading '/' and no '..' components.
        Ok(self.root.join(&virt[1..]))
    }

    fn io_err(path: &str, source: std::io::Error) -> StoreError {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound { path: path.to_string() }
        } else {
            StoreError::Io { path: path.to_string(), source }
        }
    }
}

#[async_trait]
impl FsBackend for DiskBackend {
    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let real = self.resolve(path)?;
        tokio::fs::read_to_string(&real)
            .await
            .map_err(|e| Self::io_err(path, e))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let real = self.resolve(path)?;
        if let Some(parent) = real.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(path, e))?;
        }
        debug!(path, bytes = content.len(), "disk backend write");
        tokio::fs::write(&real, content)
            .await
            .map_err(|e| Self::io_err(path, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = normalize_path(prefix)?;
        let mut out = Vec::new();
        collect_files(&self.root, &self.root, &mut out).await;
        out.retain(|p| p.starts_with(&prefix));
        out.sort();
        Ok(out)
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(real) => tokio::fs::try_exists(&real).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let real = self.resolve(path)?;
        tokio::fs::remove_file(&real)
            .await
            .map_err(|e| Self::io_err(path, e))
    }
}

/// Recursively collect file paths under `dir` as virtual paths relative to `root`.
async fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(cur) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&cur).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else if let Ok(rel) = p.strip_prefix(root) {
                let virt = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(format!("/{virt}"));
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
