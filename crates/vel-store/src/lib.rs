// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Abstract filesystem backends.
//!
//! The harness reads and writes every persistent artifact — offloaded tool
//! results, conversation transcripts, agent memories — through the
//! [`FsBackend`] trait rather than touching `std::fs` directly.  Paths are
//! virtual, `/`-separated, and rooted at the backend (`/context/…`,
//! `/memories/…`); a backend is free to map them to RAM, a directory tree,
//! or a mix of both via [`RoutedBackend`].

mod backend;
mod disk;
mod memory;
mod routed;

pub use backend::{normalize_path, FsBackend, StoreError};
pub use disk::DiskBackend;
pub use memory::MemoryBackend;
pub use routed::RoutedBackend;
