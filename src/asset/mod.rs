//! Decryption of RPG Maker MV/MZ loose assets.
//!
//! Encrypted images and audio start with a 16-byte `RPGMV` header, followed by the
//! original file whose first 16 bytes are XOR-ed with the game's key. Everything after
//! that block is stored as is. MV and MZ share the cipher and differ only in the file
//! extensions they use.

mod key;

pub use key::{EncryptionKey, FileSignature, KeyFinder, DEFAULT_SIGNATURES, KEY_LENGTH};

use crate::{
    error::{Error, IoResultExt, Result},
    fs::{lowercase_extension, walk_files, write_atomic},
    report::{fraction, Reporter},
};
use log::{debug, info, warn};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    fs::{metadata, read, remove_file},
    path::{Path, PathBuf},
};
use strum_macros::Display;

/// Header that precedes every encrypted asset: `RPGMV`, padding and format version `03 01`.
pub const HEADER: [u8; 16] = [
    0x52, 0x50, 0x47, 0x4D, 0x56, 0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const MV_EXTENSIONS: &[(&str, &str)] = &[("rpgmvp", "png"), ("rpgmvo", "ogg"), ("rpgmvm", "m4a")];
const MZ_EXTENSIONS: &[(&str, &str)] = &[("png_", "png"), ("ogg_", "ogg"), ("m4a_", "m4a")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scheme {
    #[strum(to_string = "MV")]
    Mv,
    #[strum(to_string = "MZ")]
    Mz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Remove each encrypted file once its decrypted copy is written.
    pub delete_originals: bool,
    /// Write decrypted files under this directory, mirroring their location relative
    /// to the decrypted directory. `None` writes them next to the encrypted files.
    pub output_dir: Option<PathBuf>,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            delete_originals: false,
            output_dir: None,
        }
    }
}

/// Result of a directory batch. Failed files don't abort the batch; they are collected here.
#[derive(Debug, Default)]
pub struct DecryptSummary {
    pub decrypted: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, Error)>,
}

impl Scheme {
    pub const ALL: [Scheme; 2] = [Scheme::Mv, Scheme::Mz];

    pub fn marker(self) -> &'static [u8] {
        &HEADER
    }

    pub fn marker_len(self) -> usize {
        self.marker().len()
    }

    /// `(encrypted, original)` extension pairs.
    pub fn extensions(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Scheme::Mv => MV_EXTENSIONS,
            Scheme::Mz => MZ_EXTENSIONS,
        }
    }

    /// The scheme an encrypted extension belongs to, case-insensitively.
    pub fn from_extension(extension: &str) -> Option<Scheme> {
        Scheme::ALL
            .into_iter()
            .find(|scheme: &Scheme| scheme.original_extension(extension).is_some())
    }

    pub fn from_path(path: &Path) -> Option<Scheme> {
        Scheme::from_extension(&lowercase_extension(path)?)
    }

    pub fn original_extension(self, extension: &str) -> Option<&'static str> {
        self.extensions()
            .iter()
            .find(|(encrypted, _)| encrypted.eq_ignore_ascii_case(extension))
            .map(|(_, original)| *original)
    }

    pub fn is_encrypted_path(self, path: &Path) -> bool {
        lowercase_extension(path).is_some_and(|ext: String| self.original_extension(&ext).is_some())
    }

    /// Path of the decrypted file: the same path with the original extension restored.
    pub fn decrypted_path(self, path: &Path) -> PathBuf {
        match lowercase_extension(path).and_then(|ext: String| self.original_extension(&ext)) {
            Some(original) => path.with_extension(original),
            None => path.to_path_buf(),
        }
    }

    pub fn has_marker(self, data: &[u8]) -> bool {
        data.starts_with(self.marker())
    }

    /// Drops the header and unmasks the following 16 bytes.
    ///
    /// The header contents are not verified; check [`Scheme::has_marker`] first,
    /// as XOR-ing an already decrypted file corrupts it.
    pub fn decrypt(self, data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
        let body: &[u8] = data.get(self.marker_len()..).ok_or(Error::TruncatedAsset {
            len: data.len(),
            required: self.marker_len(),
        })?;

        let mut decrypted: Vec<u8> = body.to_vec();
        key.apply(&mut decrypted);
        Ok(decrypted)
    }

    /// Decrypts one file next to itself and returns the path written.
    ///
    /// Files without the header are rejected with [`Error::MissingMarker`], so running
    /// this twice on the same file can't double-decrypt it.
    pub fn decrypt_file<P: AsRef<Path>>(self, path: P, key: &EncryptionKey) -> Result<PathBuf> {
        let path: &Path = path.as_ref();
        let output_path: PathBuf = self.decrypted_path(path);

        self.decrypt_file_to(path, &output_path, key)?;
        Ok(output_path)
    }

    /// Like [`Scheme::decrypt_file`], but writes the result to `output_path`.
    pub fn decrypt_file_to<P: AsRef<Path>, Q: AsRef<Path>>(
        self,
        path: P,
        output_path: Q,
        key: &EncryptionKey,
    ) -> Result<()> {
        let (path, output_path): (&Path, &Path) = (path.as_ref(), output_path.as_ref());
        let data: Vec<u8> = read(path).at(path)?;

        if !self.has_marker(&data) {
            return Err(Error::MissingMarker {
                path: path.to_path_buf(),
            });
        }

        let decrypted: Vec<u8> = self.decrypt(&data, key)?;

        write_atomic(output_path, &decrypted)?;
        debug!("Decrypted {} -> {}", path.display(), output_path.display());

        Ok(())
    }

    fn decrypt_entry(
        self,
        directory: &Path,
        path: &Path,
        key: &EncryptionKey,
        options: &DecryptOptions,
    ) -> Result<PathBuf> {
        let output_path: PathBuf = match &options.output_dir {
            Some(output_dir) => {
                let relative: &Path = path.strip_prefix(directory).unwrap_or(path);
                self.decrypted_path(&output_dir.join(relative))
            }
            None => self.decrypted_path(path),
        };

        self.decrypt_file_to(path, &output_path, key)?;

        if options.delete_originals && output_path != path {
            remove_file(path).at(path)?;
        }

        Ok(output_path)
    }

    /// Decrypts every file of this scheme under `directory`.
    ///
    /// Only a missing or unreadable `directory` fails the call. Failures of single files
    /// are logged, reported and returned in [`DecryptSummary::failures`].
    pub fn decrypt_directory<P: AsRef<Path>, R: Reporter>(
        self,
        key: &EncryptionKey,
        directory: P,
        options: &DecryptOptions,
        mut reporter: R,
    ) -> Result<DecryptSummary> {
        let directory: &Path = directory.as_ref();
        metadata(directory).at(directory)?;

        let files: Vec<PathBuf> = walk_files(directory, options.recursive)
            .filter(|path: &PathBuf| self.is_encrypted_path(path))
            .collect();
        let total: usize = files.len();

        info!("Decrypting {total} {self} files in {}", directory.display());

        #[cfg(feature = "rayon")]
        let results: Vec<(&PathBuf, Result<PathBuf>)> = files
            .par_iter()
            .map(|path: &PathBuf| (path, self.decrypt_entry(directory, path, key, options)))
            .collect();

        #[cfg(not(feature = "rayon"))]
        let results = files
            .iter()
            .map(|path: &PathBuf| (path, self.decrypt_entry(directory, path, key, options)));

        let mut summary: DecryptSummary = DecryptSummary::default();

        for (index, (path, result)) in results.into_iter().enumerate() {
            match result {
                Ok(output_path) => {
                    reporter.log(&format!("Decrypted {}", output_path.display()));
                    summary.decrypted.push(output_path);
                }
                Err(err) => {
                    warn!("Skipping {}: {err}", path.display());
                    reporter.log(&format!("Failed to decrypt {}: {err}", path.display()));
                    summary.failures.push((path.clone(), err));
                }
            }

            reporter.progress(fraction(index + 1, total));
        }

        info!(
            "Decrypted {} files, {} failed",
            summary.decrypted.len(),
            summary.failures.len()
        );
        Ok(summary)
    }
}
