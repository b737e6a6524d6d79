//! Helpers for turning untrusted names into safe strings.
//!
//! Log lines and span fields only ever carry file names, never full upload
//! paths; download names and job ids are restricted to a plain character set.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Suggested filename for the bundled outputs of a job.
///
/// Everything outside `[A-Za-z0-9_-]` becomes `-`; an empty result falls back
/// to the job id.
pub fn download_name(archive_name: &str, job_id: &str) -> String {
    let safe: String = archive_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();

    if safe.is_empty() {
        format!("{}-enhanced.zip", job_id)
    } else {
        format!("{}-enhanced.zip", safe)
    }
}

/// Job ids double as snapshot file names, so they must be one plain path
/// component.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 128
        && job_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/srv/uploads/abc/input.zip")),
            "input.zip"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_download_name_replaces_unsafe_chars() {
        assert_eq!(
            download_name("My Session (v2)", "abc"),
            "My-Session--v2--enhanced.zip"
        );
        assert_eq!(download_name("take_01", "abc"), "take_01-enhanced.zip");
    }

    #[test]
    fn test_download_name_falls_back_to_job_id() {
        assert_eq!(download_name("", "abc123"), "abc123-enhanced.zip");
    }

    #[test]
    fn test_job_id_validation() {
        assert!(is_valid_job_id("0f9c2d7e4b1a4c7e9d8f0a1b2c3d4e5f"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("../etc"));
        assert!(!is_valid_job_id("a/b"));
        assert!(!is_valid_job_id("a.json"));
    }
}
