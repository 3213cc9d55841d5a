//! Input checks: make sure every supplied file is what it claims to be
//! before anything is unpacked, parsed, or written.
//!
//! The spreadsheet and each upload are checked for existence and
//! readability. The photo archive must start with a zip signature (local
//! file header `PK\x03\x04`, or `PK\x05\x06` for an empty archive) and the
//! logo/signature must have an image extension, so a mislabelled upload
//! fails with a clear message instead of a decoder error halfway through
//! the batch.

use crate::error::{CertBatchError, UploadRole};
use crate::pipeline::assets::is_image_file;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Zip local-file header signature.
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
/// End-of-central-directory signature; an archive with no entries starts here.
const ZIP_EMPTY_MAGIC: [u8; 4] = *b"PK\x05\x06";

/// Validate that the spreadsheet exists and can be opened for reading.
pub fn check_spreadsheet(path: &Path) -> Result<(), CertBatchError> {
    if !path.is_file() {
        return Err(CertBatchError::Ingest {
            path: path.to_path_buf(),
            detail: "file not found".into(),
        });
    }
    match std::fs::File::open(path) {
        Ok(_) => {
            debug!("Resolved spreadsheet: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(CertBatchError::Ingest {
            path: path.to_path_buf(),
            detail: "permission denied".into(),
        }),
        Err(e) => Err(CertBatchError::Ingest {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

/// An upload counts as present when it names an existing, non-empty file.
pub fn is_present(path: Option<&Path>) -> bool {
    match path {
        Some(p) => std::fs::metadata(p)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false),
        None => false,
    }
}

/// Check a present upload's format for its role.
pub fn check_upload(role: UploadRole, path: &Path) -> Result<(), CertBatchError> {
    match role {
        UploadRole::PhotoArchive => check_archive(path),
        UploadRole::Logo | UploadRole::Signature => {
            if is_image_file(path) {
                Ok(())
            } else {
                Err(CertBatchError::InvalidUpload {
                    role,
                    path: path.to_path_buf(),
                    detail: "expected a jpg, jpeg, png, gif or bmp image".into(),
                })
            }
        }
    }
}

fn check_archive(path: &Path) -> Result<(), CertBatchError> {
    let invalid = |detail: String| CertBatchError::InvalidUpload {
        role: UploadRole::PhotoArchive,
        path: path.to_path_buf(),
        detail,
    };

    let mut f = std::fs::File::open(path).map_err(|e| invalid(e.to_string()))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)
        .map_err(|_| invalid("file is too short to be a zip archive".into()))?;
    if magic != ZIP_MAGIC && magic != ZIP_EMPTY_MAGIC {
        return Err(invalid(format!(
            "not a zip archive (magic bytes {:02x?})",
            magic
        )));
    }
    Ok(())
}
