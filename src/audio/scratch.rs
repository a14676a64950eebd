//! # Scratch Files
//!
//! Per-request temporary files for the conversion pipeline. Each request
//! creates exactly two scratch paths (raw upload, normalized WAV); both must
//! be gone by the time the request finishes, whatever happened in between.
//!
//! ## Cleanup Guarantee:
//! Removal happens in `Drop`, so it runs on success, on structured failure,
//! on request cancellation (the handler future is dropped), and on unwind.
//! Removal failures are logged at debug level and otherwise ignored.

use std::env;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A uniquely named temporary file path that removes itself on drop.
///
/// The file is not created by `allocate`; the path is reserved by uniqueness
/// of the uuid component, and whoever writes to it (the handler, ffmpeg)
/// creates it. Dropping the guard removes whatever ended up on disk.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Reserve a unique path in the OS temp directory with the given
    /// extension (without the leading dot).
    pub fn allocate(extension: &str) -> Self {
        let filename = format!("transcribe-{}.{}", Uuid::new_v4(), extension);
        Self {
            path: env::temp_dir().join(filename),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            // Missing file is the common case when a stage never ran
            tracing::debug!("Scratch cleanup skipped for {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_paths_are_unique() {
        let a = ScratchFile::allocate("ogg");
        let b = ScratchFile::allocate("ogg");
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_drop_removes_written_file() {
        let path = {
            let scratch = ScratchFile::allocate("bin");
            std::fs::write(scratch.path(), b"payload").unwrap();
            assert!(scratch.path().exists());
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let scratch = ScratchFile::allocate("wav");
        // Never written; drop must not panic
        drop(scratch);
    }

    #[test]
    fn test_extension_is_applied() {
        let scratch = ScratchFile::allocate("wav");
        assert_eq!(
            scratch.path().extension().and_then(|e| e.to_str()),
            Some("wav")
        );
    }
}
