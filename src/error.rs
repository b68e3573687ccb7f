//! Error type shared by the archive parser and the asset decrypter.

use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The input does not start with the `RGSSAD` signature.
    #[error("Unknown archive header {found:02X?}. Expected: RGSSAD.")]
    UnsupportedFormat { found: Vec<u8> },

    /// The signature matched, but the version byte is neither 1 nor 3.
    #[error("Unsupported archive version {0}. Expected 1 (XP/VX) or 3 (VX Ace).")]
    UnsupportedVersion(u8),

    #[error("{} is neither an RPG Maker archive nor a directory of encrypted assets.", path.display())]
    UnrecognizedInput { path: PathBuf },

    #[error("Archive is corrupted at offset {offset:#x}: {reason}.")]
    CorruptArchive { offset: u64, reason: String },

    /// Key recovery finished with some key bytes still undetermined.
    #[error("Encryption key not found in {}; undetermined key bytes: {missing:?}.", path.display())]
    KeyNotFound { path: PathBuf, missing: Vec<usize> },

    /// Two candidate files disagree on a key byte.
    #[error(
        "{} disagrees on key byte {index}: expected {expected:#04x}, found {found:#04x}.",
        path.display()
    )]
    KeyConflict {
        path: PathBuf,
        index: usize,
        expected: u8,
        found: u8,
    },

    #[error("Invalid encryption key: {0}.")]
    InvalidKey(String),

    /// The file does not carry the encrypted asset header, e.g. it was already decrypted.
    #[error("{} is not an encrypted asset: header is missing.", path.display())]
    MissingMarker { path: PathBuf },

    #[error("Encrypted asset is {len} bytes long, but its header alone takes {required}.")]
    TruncatedAsset { len: usize, required: usize },

    #[error("Entry `{name}` at offset {offset:#x} would be written outside of the output directory.")]
    UnsafePath { name: String, offset: u64 },

    /// Failure while materializing a single archive entry.
    #[error("Failed to extract `{name}` (offset {offset:#x}): {source}")]
    Entry {
        name: String,
        offset: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches the offending path to bare I/O errors.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Error {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Error::CorruptArchive {
            offset: offset as u64,
            reason: reason.into(),
        }
    }
}
