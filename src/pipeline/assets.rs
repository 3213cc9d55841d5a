//! Image assets: unpack uploaded photo archives and list static images.
//!
//! Archive extraction and directory listing are blocking file-system work,
//! so the async entry point [`extract_archive`] moves it onto tokio's
//! blocking pool the same way rendering does.

use crate::error::CertBatchError;
use image::ImageFormat;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// True for jpg, jpeg, png, gif and bmp files (by extension, case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    matches!(
        ImageFormat::from_path(path),
        Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::Bmp)
    )
}

/// Unpack `archive` into `dest` on the blocking pool.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, CertBatchError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&archive, &dest))
        .await
        .map_err(|e| CertBatchError::Internal(format!("Extraction task panicked: {}", e)))?
}

/// Unpack every file entry of a zip archive into `dest`, flattened.
///
/// Directory structure is discarded and each entry is written as
/// `<basename><lowercased extension>`. When two entries flatten to the same
/// name the one extracted last wins. Directory entries are skipped.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf, CertBatchError> {
    let fail = |detail: String| CertBatchError::AssetExtraction {
        path: archive.to_path_buf(),
        detail,
    };

    fs::create_dir_all(dest).map_err(|e| fail(format!("create '{}': {}", dest.display(), e)))?;

    let file = fs::File::open(archive).map_err(|e| fail(e.to_string()))?;
    let mut zip = ZipArchive::new(file).map_err(|e| fail(e.to_string()))?;

    let mut written = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| fail(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(flat) = flatten_entry_name(entry.name()) else {
            warn!("Skipping archive entry with no file name: {:?}", entry.name());
            continue;
        };

        let target = dest.join(&flat);
        let mut out = fs::File::create(&target)
            .map_err(|e| fail(format!("write '{}': {}", target.display(), e)))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| fail(format!("write '{}': {}", target.display(), e)))?;
        written += 1;
    }

    debug!("Extracted {} files from {}", written, archive.display());
    Ok(dest.to_path_buf())
}

/// `photos/2024/S1.JPG` → `S1.jpg`. Returns `None` for an empty basename.
fn flatten_entry_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    match base.rfind('.') {
        Some(dot) if dot > 0 => Some(format!(
            "{}{}",
            &base[..dot],
            base[dot..].to_lowercase()
        )),
        _ => Some(base.to_string()),
    }
}

/// Files in `dir`, sorted by file name. A missing directory yields nothing.
fn sorted_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Image files of a static-image folder, in file-name order.
pub fn load_static_images(dir: Option<&Path>) -> Vec<PathBuf> {
    match dir {
        Some(d) => sorted_files(d)
            .into_iter()
            .filter(|p| is_image_file(p))
            .collect(),
        None => Vec::new(),
    }
}

/// First image in `dir` whose file name contains `identifier`, ignoring case.
pub fn find_by_identifier(dir: &Path, identifier: &str) -> Option<PathBuf> {
    let needle = identifier.to_lowercase();
    sorted_files(dir).into_iter().find(|p| {
        is_image_file(p)
            && p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains(&needle))
                .unwrap_or(false)
    })
}
