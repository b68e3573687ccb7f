//! # rpgm-decrypter-lib
//!
//! Decrypts RPG Maker games: extracts `RGSSAD` archives of XP, VX and VX Ace,
//! and decrypts the loose image and audio assets of MV and MZ.
//!
//! ## Usage
//!
//! Let the library detect what it got:
//!
//! ```no_run
//! use rpgm_decrypter_lib::Decrypter;
//!
//! let outcome = Decrypter::new().decrypt("C:/Game/Game.rgss3a", "C:/Game/Extracted", ())?;
//! println!("{}: {} files", outcome.format, outcome.files);
//! # Ok::<(), rpgm_decrypter_lib::Error>(())
//! ```
//!
//! Or drive the pieces directly:
//!
//! ```no_run
//! use rpgm_decrypter_lib::{Archive, ExtractOptions, KeyFinder, DecryptOptions, Scheme};
//!
//! let archive = Archive::open("C:/Game/Game.rgssad")?;
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//! archive.extract("C:/Game", &ExtractOptions::default(), ())?;
//!
//! let key = KeyFinder::new().find_key("C:/MvGame")?;
//! Scheme::Mv.decrypt_directory(&key, "C:/MvGame", &DecryptOptions::default(), ())?;
//! # Ok::<(), rpgm_decrypter_lib::Error>(())
//! ```
//!
//! Nothing here spawns threads or installs a logger: messages go through the [`log`]
//! facade, and front-ends receive per-file updates through a [`Reporter`].

mod archive;
mod asset;
mod cursor;
mod detect;
mod error;
mod fs;
mod mask;
mod report;

pub use archive::{Archive, ArchiveVersion, Entry, ExtractOptions, FailurePolicy, SIGNATURE};
pub use asset::{
    DecryptOptions, DecryptSummary, EncryptionKey, FileSignature, KeyFinder, Scheme,
    DEFAULT_SIGNATURES, HEADER, KEY_LENGTH,
};
pub use detect::{detect, Engine, FormatKind};
pub use error::{Error, Result};
pub use mask::MagicKey;
pub use report::Reporter;

use log::info;
use std::path::{Path, PathBuf};

/// What [`Decrypter::decrypt`] did.
#[derive(Debug)]
pub struct Outcome {
    pub format: FormatKind,
    /// Files written.
    pub files: usize,
    /// Key of an MV/MZ game.
    pub key: Option<EncryptionKey>,
    /// Assets that failed to decrypt; archive extraction reports failures as errors instead.
    pub failures: Vec<(PathBuf, Error)>,
}

/// Detects the input format and runs the matching decrypter.
#[derive(Debug, Clone, Default)]
pub struct Decrypter {
    extract_options: ExtractOptions,
    decrypt_options: DecryptOptions,
    key_finder: KeyFinder,
}

impl Decrypter {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, overwrites files that already exist in the output directory.
    pub fn set_force(&mut self, force: bool) -> &mut Self {
        self.extract_options.force = force;
        self
    }

    pub fn set_extract_options(&mut self, options: ExtractOptions) -> &mut Self {
        self.extract_options = options;
        self
    }

    /// Options for MV/MZ assets. The output directory is always the one passed to [`Decrypter::decrypt`].
    pub fn set_decrypt_options(&mut self, options: DecryptOptions) -> &mut Self {
        self.decrypt_options = options;
        self
    }

    pub fn set_key_finder(&mut self, key_finder: KeyFinder) -> &mut Self {
        self.key_finder = key_finder;
        self
    }

    /// Extracts archive bytes to `output_path`.
    pub fn extract<P: AsRef<Path>>(&self, archive: &[u8], output_path: P) -> Result<usize> {
        Archive::from_bytes(archive)?.extract(output_path, &self.extract_options, ())
    }

    /// Decrypts the archive file or MV/MZ game directory at `input` into `output`.
    ///
    /// Archives are extracted entry by entry. For MV/MZ games the key is recovered from
    /// `input`, and the decrypted assets are written under `output` with the same layout;
    /// unencrypted game files are not copied.
    pub fn decrypt<P: AsRef<Path>, Q: AsRef<Path>, R: Reporter>(
        &self,
        input: P,
        output: Q,
        mut reporter: R,
    ) -> Result<Outcome> {
        let (input, output): (&Path, &Path) = (input.as_ref(), output.as_ref());
        let format: FormatKind = detect(input);

        info!("Decrypting {} as {format}", input.display());
        reporter.log(&format!("Version: {format}"));
        reporter.log(&format!("Output directory: {}", output.display()));

        match format {
            FormatKind::Archive(_) => {
                let archive: Archive = Archive::open(input)?;
                let files: usize = archive.extract(output, &self.extract_options, &mut reporter)?;

                reporter.log(&format!("Extracted {files} files from archive"));

                Ok(Outcome {
                    format,
                    files,
                    key: None,
                    failures: Vec::new(),
                })
            }
            FormatKind::Assets(scheme) => {
                let key: EncryptionKey = self.key_finder.find_key(input)?;
                reporter.log(&format!("Found encryption key: {key}"));

                let options: DecryptOptions = DecryptOptions {
                    output_dir: Some(output.to_path_buf()),
                    ..self.decrypt_options.clone()
                };
                let summary: DecryptSummary =
                    scheme.decrypt_directory(&key, input, &options, &mut reporter)?;

                reporter.log(&format!("Decrypted {} files", summary.decrypted.len()));

                Ok(Outcome {
                    format,
                    files: summary.decrypted.len(),
                    key: Some(key),
                    failures: summary.failures,
                })
            }
            FormatKind::Unknown => Err(Error::UnrecognizedInput {
                path: input.to_path_buf(),
            }),
        }
    }
}

/// Extracts archive bytes to `output_path`. Existing files are kept unless `force` is `true`.
///
/// Returns the number of files written.
pub fn extract_archive<P: AsRef<Path>>(archive: &[u8], output_path: P, force: bool) -> Result<usize> {
    let options: ExtractOptions = ExtractOptions {
        force,
        ..Default::default()
    };

    Archive::from_bytes(archive)?.extract(output_path, &options, ())
}
