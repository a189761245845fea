//! Private, version-unique copies of the agent library.
//!
//! A target process that has mapped a library keeps that mapping keyed by
//! path. Overwriting the file behind an already-mapped path and loading it
//! again corrupts the mapping, so every build stages to its own file name and
//! an existing staged file is never rewritten.

pub mod naming;

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, info_span};

use crate::config::{validate_version_token, GlobalConfig};
use crate::{AppError, Result};

pub use naming::Platform;

/// A staged, version-tagged copy of the agent library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLibrary {
    /// Absolute path of the staged copy.
    pub path: PathBuf,
    /// Version token embedded in the file name.
    pub version: String,
    /// Whether this call created the file (as opposed to finding it).
    pub freshly_staged: bool,
}

impl StagedLibrary {
    /// SHA-256 of the staged bytes, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read.
    pub fn sha256(&self) -> Result<String> {
        file_sha256(&self.path)
    }
}

/// Produces staged copies of the bundled agent library.
#[derive(Debug, Clone)]
pub struct LibraryStager {
    bundled_dir: PathBuf,
    staging_dir: PathBuf,
    base_name: String,
    platform: Platform,
}

impl LibraryStager {
    /// Construct a stager for the current platform.
    #[must_use]
    pub fn new(
        bundled_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
    ) -> Self {
        Self {
            bundled_dir: bundled_dir.into(),
            staging_dir: staging_dir.into(),
            base_name: base_name.into(),
            platform: Platform::current(),
        }
    }

    /// Construct a stager from the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the bundled library directory cannot be
    /// resolved.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Ok(Self::new(
            config.bundled_library_dir()?,
            config.staging_dir(),
            config.library_base_name.clone(),
        ))
    }

    /// Override the platform used for naming.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Location of the canonical bundled library.
    #[must_use]
    pub fn bundled_path(&self) -> PathBuf {
        self.bundled_dir
            .join(self.platform.library_file_name(&self.base_name))
    }

    /// Location a given version is staged to.
    #[must_use]
    pub fn staged_path(&self, version: &str) -> PathBuf {
        self.staging_dir
            .join(self.platform.versioned_file_name(&self.base_name, version))
    }

    /// Stage the bundled library for `build_version`.
    ///
    /// Idempotent: an existing staged file for the same version is returned
    /// as-is and its bytes are never touched. New copies are written to a
    /// temporary file in the staging directory and linked into place with a
    /// non-clobbering rename, so a concurrent stager cannot observe a partial
    /// file or overwrite one.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if `build_version` is not a valid version token.
    /// - `AppError::LibraryNotFound` if the bundled library is absent.
    /// - `AppError::StagingIo` if copying fails.
    pub fn stage(&self, build_version: &str) -> Result<StagedLibrary> {
        validate_version_token(build_version)?;

        let destination = self.staged_path(build_version);
        let _span = info_span!(
            "stage_library",
            version = build_version,
            destination = %destination.display(),
        )
        .entered();

        if destination.exists() {
            debug!("staged library already present");
            return Ok(StagedLibrary {
                path: destination,
                version: build_version.to_owned(),
                freshly_staged: false,
            });
        }

        let source = self.bundled_path();
        let mut reader = match File::open(&source) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::LibraryNotFound { path: source });
            }
            Err(err) => return Err(staging_io(&source, err)),
        };
        let permissions = reader
            .metadata()
            .map_err(|err| staging_io(&source, err))?
            .permissions();

        fs::create_dir_all(&self.staging_dir).map_err(|err| staging_io(&self.staging_dir, err))?;

        let mut temp =
            NamedTempFile::new_in(&self.staging_dir).map_err(|err| staging_io(&destination, err))?;
        io::copy(&mut reader, temp.as_file_mut()).map_err(|err| staging_io(&destination, err))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| staging_io(&destination, err))?;
        // The target runtime may run as another user; keep the bundled file's mode.
        fs::set_permissions(temp.path(), permissions)
            .map_err(|err| staging_io(&destination, err))?;

        let freshly_staged = match temp.persist_noclobber(&destination) {
            Ok(_) => true,
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("lost staging race; keeping the existing copy");
                false
            }
            Err(err) => return Err(staging_io(&destination, err.error)),
        };

        if freshly_staged {
            info!(source = %source.display(), "staged agent library");
        }

        Ok(StagedLibrary {
            path: destination,
            version: build_version.to_owned(),
            freshly_staged,
        })
    }
}

fn staging_io(path: &Path, source: io::Error) -> AppError {
    AppError::StagingIo {
        path: path.to_owned(),
        source,
    }
}

/// SHA-256 of a file's contents, hex encoded.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be read.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|err| AppError::Io(format!("cannot open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| AppError::Io(format!("cannot read {}: {err}", path.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
