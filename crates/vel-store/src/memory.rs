// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{normalize_path, FsBackend, StoreError};

/// In-memory backend.  Default for sessions that do not need persistence
/// and for tests.
#[derive(Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored paths (test observer).
    pub fn len(&self) -> usize {
        self.files.lock().expect("MemoryBackend lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FsBackend for MemoryBackend {
    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let path = normalize_path(path)?;
        self.files
            .lock()
            .expect("MemoryBackend lock poisoned")
            .get(&path)
            .cloned()
            .ok_or(StoreError::NotFound { path })
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let path = normalize_path(path)?;
        self.files
            .lock()
            .expect("MemoryBackend lock poisoned")
            .insert(path, content.to_string());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix = normalize_path(prefix)?;
        let files = self.files.lock().expect("MemoryBackend lock poisoned");
        Ok(files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        self.files
            .lock()
            .expect("MemoryBackend lock poisoned")
            .contains_key(&path)
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let path = normalize_path(path)?;
        self.files
            .lock()
            .expect("MemoryBackend lock poisoned")
            .remove(&path)
            .map(|_| ())
            .ok_or(StoreError::NotFound { path })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
