//! Discovery of processable inputs inside an extracted upload.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::IngestError;

/// Stem fragments marking files produced by an earlier enhancement run.
const SKIPPED_STEM_FRAGMENTS: &[&str] = &["_enhanced", "_hq", "temp"];
const SKIPPED_PARENTS: &[&str] = &["tmp", "enhanced-audios"];

/// Returns input files under `dir` relative to it, sorted, `/` separated.
///
/// Only the top level is scanned unless `recursive` is set. Extensions are
/// compared case-insensitively and must include the leading dot.
pub fn find_inputs(
    dir: &Path,
    recursive: bool,
    extensions: &[String],
) -> Result<Vec<String>, IngestError> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false);

    let mut found = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| IngestError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_candidate(path, extensions) {
            continue;
        }

        if let Ok(relative) = path.strip_prefix(dir) {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            found.push(parts.join("/"));
        }
    }

    found.sort();
    Ok(found)
}

/// Flat scan first; falls back to a recursive scan when the top level holds
/// nothing. Returns the inputs and whether the recursive scan was used.
pub fn find_inputs_with_fallback(
    dir: &Path,
    recursive: bool,
    extensions: &[String],
) -> Result<(Vec<String>, bool), IngestError> {
    let inputs = find_inputs(dir, recursive, extensions)?;
    if !inputs.is_empty() || recursive {
        return Ok((inputs, recursive));
    }

    let nested = find_inputs(dir, true, extensions)?;
    let used_recursive = !nested.is_empty();
    if used_recursive {
        log::debug!("No top-level inputs; using {} nested file(s)", nested.len());
    }
    Ok((nested, used_recursive))
}

fn is_candidate(path: &Path, extensions: &[String]) -> bool {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };

    if file_name.starts_with("._") {
        return false;
    }

    let extension = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
        None => return false,
    };
    if !extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return false;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if SKIPPED_STEM_FRAGMENTS.iter().any(|frag| stem.contains(frag)) {
        return false;
    }

    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    !SKIPPED_PARENTS.contains(&parent)
}
