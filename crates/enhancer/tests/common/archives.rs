//! Builders for upload archives.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Writes a zip with the given regular file entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("Failed to create zip");
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).expect("Failed to start entry");
        writer.write_all(data).expect("Failed to write entry");
    }
    writer.finish().expect("Failed to finish zip");
}

/// Writes a zip holding a single symlink entry.
pub fn write_symlink_zip(path: &Path, name: &str, target: &str) {
    let file = File::create(path).expect("Failed to create zip");
    let mut writer = ZipWriter::new(file);
    writer
        .add_symlink(name, target, SimpleFileOptions::default())
        .expect("Failed to add symlink");
    writer.finish().expect("Failed to finish zip");
}

/// A typical upload: one album folder with three tracks.
pub fn album_zip(path: &Path) {
    write_zip(
        path,
        &[
            ("album/a.wav", b"RIFF-a"),
            ("album/b.wav", b"RIFF-b"),
            ("album/c.mp3", b"ID3-c"),
        ],
    );
}
