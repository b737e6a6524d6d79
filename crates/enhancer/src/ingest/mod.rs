//! Ingestion of uploaded archives: safe extraction and input discovery.

pub mod archive;
pub mod discover;

pub use archive::{extract, read_archive_info, ArchiveInfo, ExtractedArchive, ARCHIVE_INFO_FILE};
pub use discover::{find_inputs, find_inputs_with_fallback};
