//! Hardened extraction of user supplied zip archives.
//!
//! Every entry is validated textually before anything touches the filesystem,
//! then the resolved target is canonicalized and checked against the
//! destination root. Symlink entries are refused outright.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::sanitize;

/// Name of the side-file recording the inferred root folder.
pub const ARCHIVE_INFO_FILE: &str = "_archive_info.json";

const JUNK_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    /// Extracted regular files relative to the destination, `/` separated.
    pub files: Vec<String>,
    /// Most frequent top-level segment, or the archive stem.
    pub root_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub root_name: String,
}

/// Extracts `archive_path` into `dest_dir`, refusing anything that could land
/// outside of it.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<ExtractedArchive, IngestError> {
    let _span = tracing::info_span!(
        "ingest.extract",
        archive = %sanitize::redact_path(archive_path)
    )
    .entered();

    let file = File::open(archive_path).map_err(|e| IngestError::Io {
        path: archive_path.to_path_buf(),
        source: e,
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| zip_error(archive_path, e))?;
    if archive.is_empty() {
        return Err(IngestError::Empty);
    }

    std::fs::create_dir_all(dest_dir).map_err(|e| IngestError::Io {
        path: dest_dir.to_path_buf(),
        source: e,
    })?;
    let base = dest_dir.canonicalize().map_err(|e| IngestError::Io {
        path: dest_dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    let mut root_segments: BTreeMap<String, usize> = BTreeMap::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| zip_error(archive_path, e))?;
        let name = entry.name().to_string();

        let segments = match safe_segments(&name)? {
            Some(segments) => segments,
            None => continue,
        };

        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            return Err(IngestError::SymlinkEntry { name });
        }

        let relative = segments.join("/");
        let target = base.join(&relative);
        ensure_within(&base, &target, &name)?;

        if entry.is_dir() {
            create_dir(&target)?;
            ensure_within(&base, &target, &name)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            create_dir(parent)?;
            ensure_within(&base, parent, &name)?;
        }

        let out = File::create(&target).map_err(|e| IngestError::Io {
            path: target.clone(),
            source: e,
        })?;
        let mut writer = BufWriter::new(out);
        std::io::copy(&mut entry, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| IngestError::Io {
                path: target.clone(),
                source: e,
            })?;

        let file_name = segments.last().map(String::as_str).unwrap_or_default();
        if is_junk(file_name) {
            log::debug!("Extracted metadata file {} (not listed)", relative);
            continue;
        }

        if let Some(top) = segments.first() {
            *root_segments.entry(top.clone()).or_insert(0) += 1;
        }
        files.push(relative);
    }

    let root_name = most_frequent(&root_segments).unwrap_or_else(|| {
        archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    });

    write_archive_info(dest_dir, &root_name)?;

    log::info!(
        "Extracted {} file(s) from {} (root '{}')",
        files.len(),
        sanitize::redact_path(archive_path),
        root_name
    );

    Ok(ExtractedArchive { files, root_name })
}

/// Reads the side-file written by [`extract`].
pub fn read_archive_info(dest_dir: &Path) -> Result<Option<ArchiveInfo>, IngestError> {
    let path = dest_dir.join(ARCHIVE_INFO_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IngestError::Io { path, source: e }),
    };

    match serde_json::from_str(&content) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            log::warn!("Ignoring malformed {}: {}", ARCHIVE_INFO_FILE, e);
            Ok(None)
        }
    }
}

fn write_archive_info(dest_dir: &Path, root_name: &str) -> Result<(), IngestError> {
    let path = dest_dir.join(ARCHIVE_INFO_FILE);
    let info = ArchiveInfo {
        root_name: root_name.to_string(),
    };
    let json = serde_json::to_vec(&info).map_err(|e| IngestError::Io {
        path: path.clone(),
        source: e.into(),
    })?;
    std::fs::write(&path, json).map_err(|e| IngestError::Io { path, source: e })
}

/// Splits an entry name into plain segments, rejecting absolute names and
/// parent traversal. Returns `None` for entries with no usable name.
fn safe_segments(name: &str) -> Result<Option<Vec<String>>, IngestError> {
    let unsafe_entry = || IngestError::UnsafeEntry {
        name: name.to_string(),
    };

    if name.starts_with('/') || name.starts_with('\\') || has_drive_prefix(name) {
        return Err(unsafe_entry());
    }

    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(unsafe_entry());
    }

    let mut segments = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry())
            }
        }
    }

    if segments.is_empty() {
        Ok(None)
    } else {
        Ok(Some(segments))
    }
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_junk(file_name: &str) -> bool {
    file_name.starts_with("._") || JUNK_FILES.contains(&file_name)
}

/// Canonicalizes the deepest existing ancestor of `target` and requires it to
/// stay under `base`.
fn ensure_within(base: &Path, target: &Path, name: &str) -> Result<(), IngestError> {
    let mut ancestor = target;
    let existing = loop {
        if ancestor.exists() {
            break ancestor;
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => {
                return Err(IngestError::EscapesDestination {
                    name: name.to_string(),
                })
            }
        }
    };

    let canonical = existing.canonicalize().map_err(|e| IngestError::Io {
        path: existing.to_path_buf(),
        source: e,
    })?;

    if canonical.starts_with(base) {
        Ok(())
    } else {
        log::warn!("Archive entry {} resolves outside the destination", name);
        Err(IngestError::EscapesDestination {
            name: name.to_string(),
        })
    }
}

fn create_dir(path: &Path) -> Result<(), IngestError> {
    std::fs::create_dir_all(path).map_err(|e| IngestError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Highest count wins; ties go to the lexicographically smallest segment.
fn most_frequent(counts: &BTreeMap<String, usize>) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for (segment, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((segment, count)),
        }
    }
    best.map(|(segment, _)| segment.clone())
}

fn zip_error(archive_path: &Path, error: zip::result::ZipError) -> IngestError {
    match error {
        zip::result::ZipError::Io(e) => IngestError::Io {
            path: archive_path.to_path_buf(),
            source: e,
        },
        other => IngestError::BadFormat(other.to_string()),
    }
}
