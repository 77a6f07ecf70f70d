// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source text retrieval

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::{LoaderError, Result};
use crate::module_system::normalizer::is_absolute_url;

/// Retrieves the text stored at an address
#[async_trait]
pub trait FileLoader: Send + Sync {
    /// Fetch the text at `address`; fails when it is unreachable
    async fn fetch_text(&self, address: &str) -> Result<String>;
}

/// Reads sources from the local filesystem.
///
/// Accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Default)]
pub struct FsFileLoader;

impl FsFileLoader {
    /// Create a filesystem loader
    pub fn new() -> Self {
        Self
    }

    fn to_path(address: &str) -> Result<PathBuf> {
        if !is_absolute_url(address) {
            return Ok(PathBuf::from(address));
        }
        let url = Url::parse(address).map_err(|e| LoaderError::fetch(address, e.to_string()))?;
        if url.scheme() != "file" {
            return Err(LoaderError::fetch(
                address,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        url.to_file_path()
            .map_err(|_| LoaderError::fetch(address, "not a local file URL"))
    }
}

#[async_trait]
impl FileLoader for FsFileLoader {
    async fn fetch_text(&self, address: &str) -> Result<String> {
        let path = Self::to_path(address)?;
        debug!("Reading {}", path.display());
        fs::read_to_string(&path)
            .await
            .map_err(|e| LoaderError::fetch(address, e.to_string()))
    }
}

/// Serves sources from an in-memory table keyed by address
#[derive(Debug, Default)]
pub struct MemoryFileLoader {
    files: DashMap<String, String>,
}

impl MemoryFileLoader {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the text at `address`
    pub fn insert(&self, address: impl Into<String>, text: impl Into<String>) {
        self.files.insert(address.into(), text.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(self, address: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(address, text);
        self
    }

    /// Remove the text at `address`
    pub fn remove(&self, address: &str) -> Option<String> {
        self.files.remove(address).map(|(_, v)| v)
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FileLoader for MemoryFileLoader {
    async fn fetch_text(&self, address: &str) -> Result<String> {
        self.files
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoaderError::fetch(address, "no such file"))
    }
}
