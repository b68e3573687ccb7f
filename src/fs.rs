use crate::error::{IoResultExt, Result};
use log::warn;
use std::{
    ffi::OsStr,
    fs::create_dir_all,
    io::Write,
    path::{Component, Path, PathBuf},
};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};

/// Writes `data` to a temporary file next to `path` and renames it over `path`,
/// so a failed write never leaves a truncated file behind.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent: &Path = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    create_dir_all(parent).at(parent)?;

    let mut temp: NamedTempFile = NamedTempFile::new_in(parent).at(parent)?;
    temp.write_all(data).at(temp.path())?;
    temp.persist(path).map_err(|err| err.error).at(path)?;

    Ok(())
}

/// Turns an archive entry name into a relative path.
///
/// Both `\` and `/` separate components. Returns `None` for names that are empty,
/// absolute, or climb out with `..`.
pub(crate) fn relative_entry_path(name: &str, preserve_paths: bool) -> Option<PathBuf> {
    let mut relative: PathBuf = PathBuf::new();

    for part in name.split(['\\', '/']) {
        if part.is_empty() || part == "." {
            continue;
        }

        let mut components = Path::new(part).components();

        match (components.next(), components.next()) {
            (Some(Component::Normal(component)), None) => relative.push(component),
            _ => return None,
        }
    }

    if name.starts_with(['\\', '/']) || relative.as_os_str().is_empty() {
        return None;
    }

    if preserve_paths {
        Some(relative)
    } else {
        relative.file_name().map(PathBuf::from)
    }
}

/// Regular files under `root` in file-name order. Unreadable directories are logged and skipped.
pub(crate) fn walk_files(root: &Path, recursive: bool) -> impl Iterator<Item = PathBuf> {
    let max_depth: usize = if recursive { usize::MAX } else { 1 };

    WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry: walkdir::Result<DirEntry>| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable path: {err}");
                None
            }
        })
        .filter(|entry: &DirEntry| entry.file_type().is_file())
        .map(DirEntry::into_path)
}

pub(crate) fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_become_components() {
        assert_eq!(
            relative_entry_path("Graphics\\Pictures\\title.png", true),
            Some(PathBuf::from("Graphics").join("Pictures").join("title.png"))
        );
    }

    #[test]
    fn flattening_keeps_file_name() {
        assert_eq!(
            relative_entry_path("Data/Map001.rxdata", false),
            Some(PathBuf::from("Map001.rxdata"))
        );
    }

    #[test]
    fn escaping_names_are_rejected() {
        assert_eq!(relative_entry_path("..\\evil.txt", true), None);
        assert_eq!(relative_entry_path("/etc/passwd", true), None);
        assert_eq!(relative_entry_path("", true), None);
        assert_eq!(relative_entry_path("a/../../b", true), None);
    }

    #[test]
    fn walk_is_sorted_and_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        std::fs::write(dir.path().join("sub").join("c.txt"), b"").unwrap();

        let names = |recursive| -> Vec<String> {
            walk_files(dir.path(), recursive)
                .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };

        assert_eq!(names(true), ["a.txt", "b.txt", "c.txt"]);
        assert_eq!(names(false), ["a.txt", "b.txt"]);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
