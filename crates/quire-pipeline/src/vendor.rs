//! Copying third-party asset packages into the output tree.

use std::io;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::fsutil::{copy_dir, remove_path};

/// A package subdirectory to mirror into the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorPackage {
    /// Installed package name, e.g. `bootstrap`
    pub package: String,

    /// Subdirectory of the package root to copy, e.g. `dist`
    pub source: String,

    /// Destination relative to the output directory
    pub dest: String,
}

/// Errors that can occur while copying vendor packages.
#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("Package '{package}' not found in any node_modules above {}", searched.display())]
    NotFound { package: String, searched: PathBuf },

    #[error("Package '{package}' has no directory {}", path.display())]
    MissingSource { package: String, path: PathBuf },

    #[error("Failed to copy {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Vendor copy task panicked: {0}")]
    Join(String),
}

/// Finds installed packages the way node does: `node_modules/<name>` in
/// the start directory or any ancestor.
#[derive(Debug, Clone)]
pub struct PackageResolver {
    start: PathBuf,
}

impl PackageResolver {
    /// Resolve packages starting from `start`.
    pub fn new(start: impl Into<PathBuf>) -> Self {
        Self {
            start: start.into(),
        }
    }

    /// Root directory of an installed package.
    pub fn resolve(&self, package: &str) -> Result<PathBuf, VendorError> {
        let start = self
            .start
            .canonicalize()
            .unwrap_or_else(|_| self.start.clone());

        start
            .ancestors()
            .map(|dir| dir.join("node_modules").join(package))
            .find(|candidate| candidate.join("package.json").is_file() || candidate.is_dir())
            .ok_or_else(|| VendorError::NotFound {
                package: package.to_string(),
                searched: start.clone(),
            })
    }
}

/// Outcome of copying one package.
#[derive(Debug, Clone)]
pub struct VendorCopy {
    /// Package name
    pub package: String,

    /// Directory files were written to
    pub dest: PathBuf,

    /// Number of files copied
    pub files: usize,
}

/// Copies vendor packages into an output directory.
#[derive(Debug, Clone)]
pub struct VendorCopier {
    resolver: PackageResolver,
    output_dir: PathBuf,
}

impl VendorCopier {
    /// Create a copier writing under `output_dir`.
    pub fn new(resolver: PackageResolver, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            output_dir: output_dir.into(),
        }
    }

    /// Copy one package, removing any previous copy at the destination first.
    pub fn copy_package(&self, package: &VendorPackage) -> Result<VendorCopy, VendorError> {
        let root = self.resolver.resolve(&package.package)?;
        let src = root.join(&package.source);
        if !src.is_dir() {
            return Err(VendorError::MissingSource {
                package: package.package.clone(),
                path: src,
            });
        }

        let dest = self.output_dir.join(&package.dest);
        remove_path(&dest).map_err(|source| io_error(&dest, source))?;
        let files = copy_dir(&src, &dest).map_err(|source| io_error(&dest, source))?;

        tracing::debug!(
            "Copied {} files from {} to {}",
            files,
            src.display(),
            dest.display()
        );

        Ok(VendorCopy {
            package: package.package.clone(),
            dest,
            files,
        })
    }

    /// Copy all packages concurrently.
    ///
    /// Every copy runs to completion; the first error is returned.
    pub async fn copy_all(&self, packages: &[VendorPackage]) -> Result<Vec<VendorCopy>, VendorError> {
        let copies = packages.iter().cloned().map(|package| {
            let copier = self.clone();
            tokio::task::spawn_blocking(move || copier.copy_package(&package))
        });

        let mut results = Vec::with_capacity(packages.len());
        for joined in join_all(copies).await {
            let copy = joined.map_err(|e| VendorError::Join(e.to_string()))??;
            results.push(copy);
        }

        Ok(results)
    }
}

fn io_error(path: &Path, source: io::Error) -> VendorError {
    VendorError::Io {
        path: path.to_path_buf(),
        source,
    }
}
