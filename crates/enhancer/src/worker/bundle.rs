//! Bundling of a job's outputs into a single downloadable zip.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::JobError;

/// True when `dir` contains at least one regular file at any depth.
pub fn has_outputs(dir: &Path) -> bool {
    WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

/// Zips every file under `source_dir` into `zip_path`, keeping paths relative
/// to `source_dir`. The archive is assembled next to its destination and
/// renamed into place. Returns the number of files written.
pub fn create_output_archive(source_dir: &Path, zip_path: &Path) -> Result<usize, JobError> {
    let bundle_err = |reason: String| JobError::Bundle {
        path: zip_path.to_path_buf(),
        reason,
    };

    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| bundle_err(e.to_string()))?;
    }

    let partial = partial_path(zip_path);
    let file = File::create(&partial).map_err(|e| bundle_err(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let result = (|| -> Result<usize, JobError> {
        let mut count = 0;
        for entry in WalkDir::new(source_dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| bundle_err(e.to_string()))?;
            let Ok(relative) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_file() {
                debug!("Adding {} to output archive", name);
                zip.start_file(name, options)
                    .map_err(|e| bundle_err(e.to_string()))?;
                let mut reader = BufReader::new(
                    File::open(entry.path()).map_err(|e| bundle_err(e.to_string()))?,
                );
                std::io::copy(&mut reader, &mut zip).map_err(|e| bundle_err(e.to_string()))?;
                count += 1;
            }
        }
        Ok(count)
    })();

    let count = match result {
        Ok(count) => count,
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
    };

    let finished = zip
        .finish()
        .map_err(|e| bundle_err(e.to_string()))
        .and_then(|writer| {
            writer
                .into_inner()
                .map_err(|e| bundle_err(e.error().to_string()))
        })
        .and_then(|file| file.sync_all().map_err(|e| bundle_err(e.to_string())))
        .and_then(|_| std::fs::rename(&partial, zip_path).map_err(|e| bundle_err(e.to_string())));

    if let Err(e) = finished {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    Ok(count)
}

fn partial_path(zip_path: &Path) -> PathBuf {
    let mut name = zip_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    zip_path.with_file_name(name)
}
