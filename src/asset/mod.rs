//! Asset Manager Module
//!
//! The serving layer ships a static web console; the core only fixes the
//! read-only provider contract. Two implementations are included:
//! [`EmptyAssetManager`] for builds without a console, and
//! [`DirAssetManager`] serving files from a directory tree.

#[cfg(test)]
mod tests;

use std::{fs, io, path::PathBuf};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by asset reads.
#[derive(Debug, Error)]
pub enum AssetError {
    /// No asset at the requested path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// Contract
// ------------------------------------------------------------------------------------------------

/// Read-only provider of static assets.
pub trait AssetManager: Send + Sync {
    /// Reads an asset by its relative path.
    fn read(&self, relative_path: &str) -> Result<Vec<u8>, AssetError>;
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

/// Provider for builds without bundled assets; every read is
/// [`AssetError::NotFound`].
#[derive(Debug, Default)]
pub struct EmptyAssetManager;

impl AssetManager for EmptyAssetManager {
    fn read(&self, relative_path: &str) -> Result<Vec<u8>, AssetError> {
        Err(AssetError::NotFound(format!(
            "no asset at '{relative_path}'"
        )))
    }
}

/// Provider serving assets from a directory tree.
#[derive(Debug)]
pub struct DirAssetManager {
    /// Root directory of the asset tree.
    root: PathBuf,
}

impl DirAssetManager {
    /// Creates a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetManager for DirAssetManager {
    fn read(&self, relative_path: &str) -> Result<Vec<u8>, AssetError> {
        // Reject traversal out of the asset root.
        let relative = relative_path.trim_start_matches('/');
        if relative
            .split('/')
            .any(|segment| segment == ".." || segment.is_empty())
        {
            return Err(AssetError::NotFound(format!(
                "no asset at '{relative_path}'"
            )));
        }

        let path = self.root.join(relative);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AssetError::NotFound(format!(
                "no asset at '{relative_path}'"
            ))),
            Err(e) => Err(AssetError::Io(e)),
        }
    }
}
