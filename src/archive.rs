//! Reader for `RGSSAD` archives (`.rgssad`, `.rgss2a`, `.rgss3a`).

use crate::{
    cursor::Cursor,
    error::{Error, IoResultExt, Result},
    fs::{relative_entry_path, write_atomic},
    mask::MagicKey,
    report::{fraction, Reporter},
};
use log::{debug, info, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::HashSet,
    fs::read,
    path::{Path, PathBuf},
};
use strum_macros::Display;

pub const SIGNATURE: &[u8; 6] = b"RGSSAD";

/// Container layout, selected by the byte following the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArchiveVersion {
    /// Version 1, used by XP (`.rgssad`) and VX (`.rgss2a`).
    #[strum(to_string = "XP/VX")]
    V1,
    /// Version 3, used by VX Ace (`.rgss3a`).
    #[strum(to_string = "VXAce")]
    V3,
}

impl ArchiveVersion {
    pub fn from_byte(version: u8) -> Option<Self> {
        match version {
            1 => Some(ArchiveVersion::V1),
            3 => Some(ArchiveVersion::V3),
            _ => None,
        }
    }
}

/// A file stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entry {
    name: String,
    offset: usize,
    size: usize,
    key: MagicKey,
}

impl Entry {
    /// Name as stored in the archive, usually with `\` separators.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the body within the archive.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Key that unmasks the first word of the body.
    pub fn key(&self) -> MagicKey {
        self.key
    }
}

/// What to do when a single entry fails to extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop and return the error of the failed entry.
    #[default]
    Abort,
    /// Log the failure and continue with the next entry.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Overwrite files that already exist in the output directory.
    pub force: bool,
    /// Recreate the directories embedded in entry names. When `false`, every file
    /// lands directly in the output directory.
    pub preserve_paths: bool,
    pub on_error: FailurePolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            force: false,
            preserve_paths: true,
            on_error: FailurePolicy::Abort,
        }
    }
}

enum Extracted {
    Written,
    Exists,
}

/// A parsed archive.
///
/// Parsing reads the whole entry table up front and validates that every entry
/// lies within the archive, so reading entries afterwards never goes out of bounds.
/// Entries carry their own keys and can be read in any order.
pub struct Archive<'a> {
    data: Cow<'a, [u8]>,
    version: ArchiveVersion,
    entries: Vec<Entry>,
}

impl Archive<'static> {
    /// Reads and parses the archive at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path: &Path = path.as_ref();
        let data: Vec<u8> = read(path).at(path)?;

        debug!("Read {} bytes from {}", data.len(), path.display());
        Self::parse(Cow::Owned(data), MagicKey::XP_VX)
    }

    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        Self::parse(Cow::Owned(data), MagicKey::XP_VX)
    }
}

impl<'a> Archive<'a> {
    pub fn from_bytes(data: &'a [u8]) -> Result<Self> {
        Self::parse(Cow::Borrowed(data), MagicKey::XP_VX)
    }

    /// Parses an archive whose XP/VX starting key differs from `0xDEADCAFE`.
    ///
    /// VX Ace archives store their own seed, so `seed` is ignored for them.
    pub fn with_seed<D: Into<Cow<'a, [u8]>>>(data: D, seed: u32) -> Result<Self> {
        Self::parse(data.into(), MagicKey::new(seed))
    }

    fn parse(data: Cow<'a, [u8]>, seed: MagicKey) -> Result<Self> {
        let (version, entries) = {
            let mut cursor: Cursor = Cursor::new(&data);

            let header: &[u8] = &data[..data.len().min(SIGNATURE.len())];
            if header != SIGNATURE {
                return Err(Error::UnsupportedFormat {
                    found: header.to_vec(),
                });
            }

            cursor.advance(SIGNATURE.len() + 1, "header")?;
            let version_byte: u8 = cursor.read_byte("version")?;

            let version: ArchiveVersion = ArchiveVersion::from_byte(version_byte)
                .ok_or(Error::UnsupportedVersion(version_byte))?;

            let entries: Vec<Entry> = match version {
                ArchiveVersion::V1 => read_entries_v1(&mut cursor, seed)?,
                ArchiveVersion::V3 => read_entries_v3(&mut cursor)?,
            };

            (version, entries)
        };

        info!("Parsed {version} archive with {} entries", entries.len());

        Ok(Self {
            data,
            version,
            entries,
        })
    }

    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds an entry by name; `/` and `\` are interchangeable.
    pub fn find(&self, name: &str) -> Option<&Entry> {
        let wanted: String = name.replace('\\', "/");

        self.entries
            .iter()
            .rev()
            .find(|entry: &&Entry| entry.name.replace('\\', "/") == wanted)
    }

    /// Returns the decrypted body of `entry`.
    pub fn read_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        let body: &[u8] = entry
            .offset
            .checked_add(entry.size)
            .and_then(|end: usize| self.data.get(entry.offset..end))
            .ok_or_else(|| {
                Error::corrupt(
                    entry.offset,
                    format!("entry `{}` ends past the archive", entry.name),
                )
            })?;

        let mut decrypted: Vec<u8> = body.to_vec();
        let _ = entry.key.apply(&mut decrypted);
        Ok(decrypted)
    }

    /// Decrypts entries lazily as `(relative path, contents)` pairs.
    pub fn files(&self) -> impl Iterator<Item = Result<(PathBuf, Vec<u8>)>> + '_ {
        self.entries
            .iter()
            .map(move |entry: &Entry| -> Result<(PathBuf, Vec<u8>)> {
                let path: PathBuf =
                    relative_entry_path(&entry.name, true).ok_or_else(|| Error::UnsafePath {
                        name: entry.name.clone(),
                        offset: entry.offset as u64,
                    })?;

                Ok((path, self.read_entry(entry)?))
            })
    }

    /// Extracts every entry into `output_path` and returns the number of files written.
    ///
    /// Entries skipped because their file already exists (without `force`) or because
    /// they failed under [`FailurePolicy::Skip`] are not counted.
    pub fn extract<P: AsRef<Path>, R: Reporter>(
        &self,
        output_path: P,
        options: &ExtractOptions,
        mut reporter: R,
    ) -> Result<usize> {
        let output_path: &Path = output_path.as_ref();
        let total: usize = self.entries.len();

        let mut written: HashSet<PathBuf> = HashSet::with_capacity(total);
        let mut count: usize = 0;

        for (index, entry) in self.entries.iter().enumerate() {
            match self.extract_entry(entry, output_path, options, &mut written) {
                Ok(Extracted::Written) => {
                    count += 1;
                    debug!("Extracted {} ({} bytes)", entry.name, entry.size);
                    reporter.log(&format!("Extracted {}", entry.name));
                }
                Ok(Extracted::Exists) => {
                    warn!(
                        "{} already exists; skipping. Enable `force` to overwrite it.",
                        entry.name
                    );
                    reporter.log(&format!("Skipped {}: file already exists", entry.name));
                }
                Err(err) => {
                    let err: Error = Error::Entry {
                        name: entry.name.clone(),
                        offset: entry.offset as u64,
                        source: Box::new(err),
                    };

                    match options.on_error {
                        FailurePolicy::Abort => return Err(err),
                        FailurePolicy::Skip => {
                            warn!("{err}");
                            reporter.log(&err.to_string());
                        }
                    }
                }
            }

            reporter.progress(fraction(index + 1, total));
        }

        info!(
            "Extracted {count} of {total} entries to {}",
            output_path.display()
        );
        Ok(count)
    }

    fn extract_entry(
        &self,
        entry: &Entry,
        output_path: &Path,
        options: &ExtractOptions,
        written: &mut HashSet<PathBuf>,
    ) -> Result<Extracted> {
        let relative: PathBuf = relative_entry_path(&entry.name, options.preserve_paths)
            .ok_or_else(|| Error::UnsafePath {
                name: entry.name.clone(),
                offset: entry.offset as u64,
            })?;

        let path: PathBuf = output_path.join(relative);

        // Duplicates within the archive overwrite each other in table order.
        if !options.force && !written.contains(&path) && path.exists() {
            return Ok(Extracted::Exists);
        }

        let decrypted: Vec<u8> = self.read_entry(entry)?;
        write_atomic(&path, &decrypted)?;
        written.insert(path);

        Ok(Extracted::Written)
    }
}

fn decode_name(bytes: Vec<u8>, offset: usize) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| Error::corrupt(offset, "filename is not valid UTF-8"))
}

/// XP/VX: the table is interleaved with the bodies and runs to the end of the data.
/// Every field advances the key, so each body starts with whatever key the table left.
fn read_entries_v1(cursor: &mut Cursor, seed: MagicKey) -> Result<Vec<Entry>> {
    let mut key: MagicKey = seed;
    let mut entries: Vec<Entry> = Vec::with_capacity(1024);

    while !cursor.is_at_end() {
        let length: usize = key.decrypt_u32(cursor.read_u32("filename length")?, true) as usize;

        let name_offset: usize = cursor.pos();
        let name_bytes: &[u8] = cursor.advance(length, "filename")?;
        let name: String = decode_name(key.decrypt_name_rolling(name_bytes), name_offset)?;

        let size: usize = key.decrypt_u32(cursor.read_u32("file size")?, true) as usize;
        let offset: usize = cursor.pos();

        cursor.advance(size, &format!("body of `{name}`"))?;

        entries.push(Entry {
            name,
            offset,
            size,
            key,
        });
    }

    Ok(entries)
}

/// VX Ace: a contiguous table of `offset, size, key, name length, name` records,
/// terminated by a zero offset. The header key never advances.
fn read_entries_v3(cursor: &mut Cursor) -> Result<Vec<Entry>> {
    let mut key: MagicKey = MagicKey::from_vxace_seed(cursor.read_u32("seed")?);
    let mut entries: Vec<Entry> = Vec::with_capacity(1024);

    loop {
        let record_offset: usize = cursor.pos();

        let offset: usize = key.decrypt_u32(cursor.read_u32("entry offset")?, false) as usize;
        let size: usize = key.decrypt_u32(cursor.read_u32("entry size")?, false) as usize;
        let entry_key: MagicKey =
            MagicKey::new(key.decrypt_u32(cursor.read_u32("entry key")?, false));
        let length: usize = key.decrypt_u32(cursor.read_u32("filename length")?, false) as usize;

        if offset == 0 {
            break;
        }

        let name_offset: usize = cursor.pos();
        let name_bytes: &[u8] = cursor.advance(length, "filename")?;
        let name: String = decode_name(key.decrypt_name_cyclic(name_bytes), name_offset)?;

        if offset.checked_add(size).map_or(true, |end: usize| end > cursor.len()) {
            return Err(Error::corrupt(
                record_offset,
                format!(
                    "entry `{name}` spans {offset:#x}..+{size:#x}, past the end of the archive ({:#x} bytes)",
                    cursor.len()
                ),
            ));
        }

        entries.push(Entry {
            name,
            offset,
            size,
            key: entry_key,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_v1_entry(out: &mut Vec<u8>, key: &mut MagicKey, name: &str, body: &[u8]) {
        out.extend_from_slice(&(name.len() as u32 ^ key.value()).to_le_bytes());
        *key = key.advance();

        for byte in name.bytes() {
            out.push(byte ^ (key.value() & 0xFF) as u8);
            *key = key.advance();
        }

        out.extend_from_slice(&(body.len() as u32 ^ key.value()).to_le_bytes());
        *key = key.advance();

        let mut body = body.to_vec();
        let _ = key.apply(&mut body);
        out.extend_from_slice(&body);
    }

    fn v1_archive(seed: u32, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = b"RGSSAD\0\x01".to_vec();
        let mut key = MagicKey::new(seed);

        for (name, body) in files {
            push_v1_entry(&mut out, &mut key, name, body);
        }

        out
    }

    fn v3_archive(seed: u32, files: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let key = MagicKey::from_vxace_seed(seed);
        let mut out = b"RGSSAD\0\x03".to_vec();
        out.extend_from_slice(&seed.to_le_bytes());

        let table_len: usize = files.iter().map(|(name, _, _)| 16 + name.len()).sum::<usize>() + 16;
        let mut offset = out.len() + table_len;

        for (name, body, file_key) in files {
            for value in [offset as u32, body.len() as u32, *file_key, name.len() as u32] {
                out.extend_from_slice(&(value ^ key.value()).to_le_bytes());
            }
            out.extend(key.decrypt_name_cyclic(name.as_bytes()));
            offset += body.len();
        }

        out.extend_from_slice(&key.value().to_le_bytes().repeat(4));

        for (_, body, file_key) in files {
            let mut body = body.to_vec();
            let _ = MagicKey::new(*file_key).apply(&mut body);
            out.extend_from_slice(&body);
        }

        out
    }

    #[test]
    fn rejects_foreign_signature() {
        match Archive::from_bytes(b"PK\x03\x04rest") {
            Err(Error::UnsupportedFormat { found }) => assert_eq!(found, b"PK\x03\x04re"),
            other => panic!("unexpected {:?}", other.map(|a| a.len())),
        }
    }

    #[test]
    fn rejects_unknown_version() {
        assert!(matches!(
            Archive::from_bytes(b"RGSSAD\0\x02"),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn truncated_header_is_corrupt() {
        assert!(matches!(
            Archive::from_bytes(b"RGSSAD\0"),
            Err(Error::CorruptArchive { offset: 7, .. })
        ));
    }

    #[test]
    fn empty_v1_archive_has_no_entries() {
        let archive = Archive::from_bytes(b"RGSSAD\0\x01").unwrap();
        assert!(archive.is_empty());
        assert_eq!(archive.version(), ArchiveVersion::V1);
    }

    #[test]
    fn v1_entries_and_bodies() {
        let data = v1_archive(
            0xDEADCAFE,
            &[
                ("Data\\Actors.rxdata", b"\x04\x08[\x00"),
                ("Graphics\\x.png", b"odd"),
            ],
        );
        let archive = Archive::from_bytes(&data).unwrap();

        assert_eq!(archive.len(), 2);
        assert_eq!(archive.entries()[0].name(), "Data\\Actors.rxdata");
        assert_eq!(archive.read_entry(&archive.entries()[1]).unwrap(), b"odd");

        let actors = archive.find("Data/Actors.rxdata").unwrap();
        assert_eq!(archive.read_entry(actors).unwrap(), b"\x04\x08[\x00");
    }

    #[test]
    fn v1_entry_key_is_state_at_body_start() {
        let data = v1_archive(0xDEADCAFE, &[("a", b"12345678"), ("b", b"")]);
        let archive = Archive::from_bytes(&data).unwrap();

        // length, one name byte and size each advance the key once.
        let expected = MagicKey::XP_VX.advance().advance().advance();
        assert_eq!(archive.entries()[0].key(), expected);
        assert_eq!(archive.entries()[0].offset(), 8 + 4 + 1 + 4);
    }

    #[test]
    fn v1_body_overrun_is_corrupt() {
        let mut data = v1_archive(0xDEADCAFE, &[("a.txt", b"hello")]);
        data.truncate(data.len() - 2);

        assert!(matches!(
            Archive::from_bytes(&data),
            Err(Error::CorruptArchive { .. })
        ));
    }

    #[test]
    fn v3_entries_and_bodies() {
        let data = v3_archive(
            0x1234_5678,
            &[
                ("Data\\Scripts.rvdata2", b"scripts!", 0xCAFEBABE),
                ("Audio\\BGM\\x.ogg", b"OggS", 7),
            ],
        );
        let archive = Archive::from_bytes(&data).unwrap();

        assert_eq!(archive.version(), ArchiveVersion::V3);
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.entries()[1].name(), "Audio\\BGM\\x.ogg");
        assert_eq!(archive.entries()[0].key(), MagicKey::new(0xCAFEBABE));

        let bodies: Vec<Vec<u8>> = archive.files().map(|file| file.unwrap().1).collect();
        assert_eq!(bodies, vec![b"scripts!".to_vec(), b"OggS".to_vec()]);
    }

    #[test]
    fn v3_entry_past_end_is_corrupt() {
        let mut data = v3_archive(1, &[("a", b"abcdef", 9)]);
        data.truncate(data.len() - 1);

        assert!(matches!(
            Archive::from_bytes(&data),
            Err(Error::CorruptArchive { offset: 12, .. })
        ));
    }

    #[test]
    fn v3_missing_terminator_is_corrupt() {
        let data = v3_archive(1, &[]);
        assert!(Archive::from_bytes(&data).unwrap().is_empty());
        assert!(matches!(
            Archive::from_bytes(&data[..data.len() - 4]),
            Err(Error::CorruptArchive { .. })
        ));
    }

    #[test]
    fn custom_seed_changes_v1_stream() {
        let data = v1_archive(0xDEADBEEF, &[("a.txt", b"hello")]);

        assert!(Archive::from_bytes(&data).is_err());

        let archive = Archive::with_seed(data.as_slice(), 0xDEADBEEF).unwrap();
        assert_eq!(archive.read_entry(&archive.entries()[0]).unwrap(), b"hello");
    }

    #[test]
    fn duplicate_names_overwrite_in_order() {
        let data = v1_archive(0xDEADCAFE, &[("a.txt", b"first"), ("a.txt", b"second")]);
        let archive = Archive::from_bytes(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let count = archive
            .extract(dir.path(), &ExtractOptions::default(), ())
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"second");
        assert_eq!(archive.find("a.txt").unwrap().size(), 6);
    }

    #[test]
    fn existing_files_are_kept_without_force() {
        let data = v1_archive(0xDEADCAFE, &[("a.txt", b"new")]);
        let archive = Archive::from_bytes(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();

        let count = archive
            .extract(dir.path(), &ExtractOptions::default(), ())
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"old");

        let options = ExtractOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(archive.extract(dir.path(), &options, ()).unwrap(), 1);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn unsafe_name_aborts_or_skips() {
        let data = v1_archive(0xDEADCAFE, &[("..\\evil.txt", b"x"), ("ok.txt", b"y")]);
        let archive = Archive::from_bytes(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();

        match archive.extract(dir.path(), &ExtractOptions::default(), ()) {
            Err(Error::Entry { name, source, .. }) => {
                assert_eq!(name, "..\\evil.txt");
                assert!(matches!(*source, Error::UnsafePath { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dir.path().join("ok.txt").exists());

        let options = ExtractOptions {
            on_error: FailurePolicy::Skip,
            ..Default::default()
        };
        assert_eq!(archive.extract(dir.path(), &options, ()).unwrap(), 1);
        assert!(dir.path().join("ok.txt").exists());
    }

    #[test]
    fn flattened_extraction_drops_directories() {
        let data = v1_archive(0xDEADCAFE, &[("Data\\deep\\x.bin", b"1")]);
        let archive = Archive::from_bytes(&data).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let options = ExtractOptions {
            preserve_paths: false,
            ..Default::default()
        };
        archive.extract(dir.path(), &options, ()).unwrap();

        assert_eq!(std::fs::read(dir.path().join("x.bin")).unwrap(), b"1");
    }
}
