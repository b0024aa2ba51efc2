//! # Scoped Upload Storage
//!
//! Each analysis request writes its upload into one uniquely named temporary file.
//! The file lives exactly as long as the [`ScopedUpload`] value: it is removed by
//! [`ScopedUpload::close`], or by the destructor on any other exit path (early return,
//! error, panic unwinding).

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Prefix of every upload file, handy when inspecting a temp directory.
pub const UPLOAD_PREFIX: &str = "bpm-upload-";

/// Container extensions we pass through to the decoder as a format hint.
const KNOWN_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "oga", "m4a", "mp4", "aac", "aif", "aiff", "caf", "mkv", "webm",
];

#[derive(Debug)]
pub struct ScopedUpload {
    file: NamedTempFile,
    size: usize,
}

impl ScopedUpload {
    /// Write `bytes` to a fresh temp file in `dir` (or the OS temp dir) and make sure they
    /// have reached storage before returning.
    ///
    /// If any step fails the partially written file is removed before the error is returned.
    pub fn persist(bytes: &[u8], suffix: &str, dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(UPLOAD_PREFIX).suffix(suffix);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        file.write_all(bytes)?;
        file.flush()?;
        file.as_file().sync_all()?;

        Ok(Self { file, size: bytes.len() })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of bytes written to the file.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Remove the file now, reporting failures instead of ignoring them like `Drop` does.
    pub fn close(self) -> io::Result<()> {
        self.file.close()
    }
}

/// Pick the temp-file suffix for an upload.
///
/// The client's filename extension is used when it names a container we know, otherwise
/// `default` (".mp3"). Anything else in the client filename is ignored.
pub fn suffix_for(filename: Option<&str>, default: &str) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| default.to_string())
}
