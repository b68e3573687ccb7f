use super::Scheme;
use crate::{
    error::{Error, Result},
    fs::{lowercase_extension, walk_files},
};
use log::{debug, info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    fs::{read, File},
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

pub const KEY_LENGTH: usize = 16;

/// Locations of the project settings that hold the key, relative to the game directory.
const SYSTEM_JSON_PATHS: [&str; 2] = ["www/data/System.json", "data/System.json"];

/// The 16-byte key of an MV/MZ game. `Display` prints it as 32 hex digits,
/// the way `System.json` stores it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EncryptionKey([u8; KEY_LENGTH]);

impl EncryptionKey {
    pub const fn new(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes: Vec<u8> =
            hex::decode(hex.trim()).map_err(|err| Error::InvalidKey(format!("`{hex}`: {err}")))?;
        Self::try_from(bytes.as_slice())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// XORs the leading block of `data` with the key, without rotation.
    pub(crate) fn apply(&self, data: &mut [u8]) {
        for (byte, mask) in data.iter_mut().zip(self.0) {
            *byte ^= mask;
        }
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        <[u8; KEY_LENGTH]>::try_from(bytes).map(Self).map_err(|_| {
            Error::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })
    }
}

impl FromStr for EncryptionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({self})")
    }
}

/// Known leading bytes of an unencrypted file type.
///
/// `bytes` are expected at `offset` within the first [`KEY_LENGTH`] bytes of the
/// original file; anything past the key block is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Extension of the original file, e.g. `png`.
    pub extension: &'static str,
    pub offset: usize,
    pub bytes: &'static [u8],
}

impl FileSignature {
    /// PNG magic, then the length and type of the mandatory first `IHDR` chunk.
    pub const PNG: FileSignature = FileSignature::new(
        "png",
        0,
        &[
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
            0x52,
        ],
    );

    /// `OggS` capture pattern, stream version 0, beginning-of-stream flag and a zero granule position.
    pub const OGG: FileSignature = FileSignature::new(
        "ogg",
        0,
        &[
            0x4F, 0x67, 0x67, 0x53, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
    );

    /// The `ftyp` box type that follows the 4-byte box size.
    pub const M4A: FileSignature = FileSignature::new("m4a", 4, b"ftyp");

    pub const fn new(extension: &'static str, offset: usize, bytes: &'static [u8]) -> Self {
        Self {
            extension,
            offset,
            bytes,
        }
    }

    /// Key indices this signature determines.
    fn range(&self) -> std::ops::Range<usize> {
        let start: usize = self.offset.min(KEY_LENGTH);
        let end: usize = (self.offset + self.bytes.len()).min(KEY_LENGTH);
        start..end
    }
}

pub const DEFAULT_SIGNATURES: [FileSignature; 3] =
    [FileSignature::PNG, FileSignature::OGG, FileSignature::M4A];

/// Recovers the key of an MV/MZ game directory.
///
/// The key is taken from `System.json` when the game ships one. Otherwise it is
/// reconstructed from encrypted assets: the masked block of each file is XOR-ed with
/// the known signature of its original type, and candidates are combined until all
/// 16 bytes are known.
#[derive(Debug, Clone)]
pub struct KeyFinder {
    signatures: Vec<FileSignature>,
    system_json: bool,
}

impl Default for KeyFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyFinder {
    pub fn new() -> Self {
        Self {
            signatures: DEFAULT_SIGNATURES.to_vec(),
            system_json: true,
        }
    }

    /// Replaces the table of known plaintext signatures.
    pub fn signatures(mut self, signatures: Vec<FileSignature>) -> Self {
        self.signatures = signatures;
        self
    }

    /// Whether to read `encryptionKey` from `System.json` before looking at assets.
    pub fn system_json(mut self, enabled: bool) -> Self {
        self.system_json = enabled;
        self
    }

    /// Finds the key for `directory`.
    ///
    /// Candidates are visited in file-name order, so the result is deterministic.
    /// Unreadable candidates, candidates without the `RPGMV` header and candidates too
    /// short for their signature are skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyConflict`] if two candidates disagree on a key byte.
    /// - [`Error::KeyNotFound`] if some key bytes remain unknown after all candidates.
    pub fn find_key<P: AsRef<Path>>(&self, directory: P) -> Result<EncryptionKey> {
        let directory: &Path = directory.as_ref();

        if self.system_json {
            if let Some(key) = key_from_system_json(directory) {
                return Ok(key);
            }
        }

        let mut known: [Option<u8>; KEY_LENGTH] = [None; KEY_LENGTH];

        for path in walk_files(directory, true) {
            let Some((scheme, signature)) = self.signature_for(&path) else {
                continue;
            };

            let header: Vec<u8> = match read_header(&path, scheme.marker_len() + KEY_LENGTH) {
                Ok(header) => header,
                Err(err) => {
                    warn!("Skipping unreadable candidate {}: {err}", path.display());
                    continue;
                }
            };

            if !scheme.has_marker(&header) {
                debug!("Skipping {}: no {scheme} header", path.display());
                continue;
            }

            let masked: &[u8] = &header[scheme.marker_len()..];
            let range = signature.range();

            if masked.len() < range.end {
                debug!(
                    "Skipping {}: {} bytes are too short for the {} signature",
                    path.display(),
                    masked.len(),
                    signature.extension
                );
                continue;
            }

            for index in range.clone() {
                let byte: u8 = masked[index] ^ signature.bytes[index - signature.offset];

                match known[index] {
                    Some(expected) if expected != byte => {
                        return Err(Error::KeyConflict {
                            path,
                            index,
                            expected,
                            found: byte,
                        });
                    }
                    _ => known[index] = Some(byte),
                }
            }

            debug!(
                "{} determined key bytes {}..{}",
                path.display(),
                range.start,
                range.end
            );

            if let Some(bytes) = known.iter().copied().collect::<Option<Vec<u8>>>() {
                let key: EncryptionKey = EncryptionKey::try_from(bytes.as_slice())?;
                info!("Recovered encryption key {key} from {}", directory.display());
                return Ok(key);
            }
        }

        let missing: Vec<usize> = (0..KEY_LENGTH).filter(|&i| known[i].is_none()).collect();

        Err(Error::KeyNotFound {
            path: directory.to_path_buf(),
            missing,
        })
    }

    fn signature_for(&self, path: &Path) -> Option<(Scheme, &FileSignature)> {
        let extension: String = lowercase_extension(path)?;
        let scheme: Scheme = Scheme::from_extension(&extension)?;
        let original: &str = scheme.original_extension(&extension)?;

        self.signatures
            .iter()
            .find(|signature: &&FileSignature| signature.extension.eq_ignore_ascii_case(original))
            .map(|signature: &FileSignature| (scheme, signature))
    }
}

fn read_header(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let mut header: Vec<u8> = Vec::with_capacity(len);
    File::open(path)?.take(len as u64).read_to_end(&mut header)?;
    Ok(header)
}

fn key_from_system_json(directory: &Path) -> Option<EncryptionKey> {
    for relative in SYSTEM_JSON_PATHS {
        let path: PathBuf = directory.join(relative);

        let Ok(content) = read(&path) else {
            continue;
        };
        let content: &[u8] = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&content);

        let system: Value = match serde_json::from_slice(content) {
            Ok(system) => system,
            Err(err) => {
                warn!("Ignoring malformed {}: {err}", path.display());
                continue;
            }
        };

        match system.get("encryptionKey").and_then(Value::as_str) {
            Some(hex) => match EncryptionKey::from_hex(hex) {
                Ok(key) => {
                    info!("Read encryption key {key} from {}", path.display());
                    return Some(key);
                }
                Err(err) => warn!("Ignoring key in {}: {err}", path.display()),
            },
            None => debug!("{} has no encryptionKey", path.display()),
        }
    }

    None
}
