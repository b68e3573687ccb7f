//! Classification of a game path into an archive version or an asset scheme.

use crate::{
    archive::{ArchiveVersion, SIGNATURE},
    asset::Scheme,
    fs::{lowercase_extension, walk_files},
};
use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{fmt, fs::File, io::Read, path::Path};
use strum_macros::Display;

/// RPG Maker releases that ship `RGSSAD` archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Engine {
    #[strum(to_string = "RPG Maker XP")]
    Xp,
    #[strum(to_string = "RPG Maker VX")]
    Vx,
    #[strum(to_string = "RPG Maker VX Ace")]
    VxAce,
}

impl Engine {
    pub fn archive_version(self) -> ArchiveVersion {
        match self {
            Engine::Xp | Engine::Vx => ArchiveVersion::V1,
            Engine::VxAce => ArchiveVersion::V3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FormatKind {
    /// A single archive file.
    Archive(Engine),
    /// A directory of MV/MZ encrypted assets.
    Assets(Scheme),
    Unknown,
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatKind::Archive(engine) => write!(f, "{engine}"),
            FormatKind::Assets(scheme) => write!(f, "RPG Maker {scheme}"),
            FormatKind::Unknown => f.write_str("Unknown version"),
        }
    }
}

/// Detects what `path` contains. Never fails: anything unreadable is [`FormatKind::Unknown`].
///
/// Files are matched by their `RGSSAD` signature and version byte. Version 1 is
/// shared by XP and VX, so the `.rgss2a` extension tells VX apart.
/// Directories are searched recursively for encrypted asset extensions; the first
/// match in file-name order decides the scheme.
pub fn detect<P: AsRef<Path>>(path: P) -> FormatKind {
    let path: &Path = path.as_ref();

    let kind: FormatKind = if path.is_file() {
        detect_archive(path)
    } else if path.is_dir() {
        detect_assets(path)
    } else {
        FormatKind::Unknown
    };

    debug!("Detected {kind} at {}", path.display());
    kind
}

fn detect_archive(path: &Path) -> FormatKind {
    let mut header: [u8; 8] = [0; 8];

    let read: bool = File::open(path)
        .and_then(|mut file: File| file.read_exact(&mut header))
        .is_ok();

    if !read || &header[..SIGNATURE.len()] != SIGNATURE {
        return FormatKind::Unknown;
    }

    match ArchiveVersion::from_byte(header[7]) {
        Some(ArchiveVersion::V1) => {
            if lowercase_extension(path).as_deref() == Some("rgss2a") {
                FormatKind::Archive(Engine::Vx)
            } else {
                FormatKind::Archive(Engine::Xp)
            }
        }
        Some(ArchiveVersion::V3) => FormatKind::Archive(Engine::VxAce),
        None => FormatKind::Unknown,
    }
}

fn detect_assets(directory: &Path) -> FormatKind {
    walk_files(directory, true)
        .find_map(|path| Scheme::from_path(&path))
        .map_or(FormatKind::Unknown, FormatKind::Assets)
}
