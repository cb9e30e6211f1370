// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path not found: {path}")]
    NotFound { path: String },
    #[error("invalid path: {path}")]
    InvalidPath { path: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Abstract file store used by the harness for every persistent artifact.
///
/// Paths are virtual and `/`-separated.  Concurrent writes to the *same*
/// path are the backend's responsibility to serialize; the harness never
/// relies on atomic cross-path operations.
#[async_trait]
pub trait FsBackend: Send + Sync {
    /// Read the full content at `path`.
    async fn read(&self, path: &str) -> Result<String, StoreError>;

    /// Write `content` to `path`, creating intermediate directories and
    /// overwriting any existing content.
    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError>;

    /// List all paths that start with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Return `true` when `path` holds content.
    async fn exists(&self, path: &str) -> bool;

    /// Remove the content at `path`.  Removing a missing path is an error.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// Normalize a virtual path: ensure a single leading `/`, collapse empty
/// segments, and reject `..` traversal.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                return Err(StoreError::InvalidPath { path: path.to_string() });
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(StoreError::InvalidPath { path: path.to_string() });
    }
    Ok(format!("/{}", segments.join("/")))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
