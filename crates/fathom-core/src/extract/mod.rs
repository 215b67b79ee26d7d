//! Per-file content extraction.
//!
//! Turns an absolute path into an `ExtractedBody`: a text body plus trailing
//! metadata blocks (OCR, EXIF, git log). Dispatch is by extension with a
//! small content sniff for binary rejection.
//!
//! ## Failure semantics
//!
//! Extraction never fails a batch. Every per-file problem -- unreadable
//! file, binary content, oversized input, OCR engine missing -- is reported
//! as `Extraction::Skipped(path, reason)` and counted by the indexer.

pub mod gitlog;
pub mod image;
pub mod pdf;

use std::io::Read;
use std::path::Path;

use crate::config::IndexingConfig;
use crate::types::{ExtractedBody, ExtractorKind, Language, MetadataBlock};

/// How many leading bytes the binary sniff inspects.
const SNIFF_BYTES: usize = 8 * 1024;

/// NUL density above this fraction marks a file as binary.
const NUL_DENSITY_LIMIT: f64 = 0.01;

/// Outcome of extracting one file.
#[derive(Debug)]
pub enum Extraction {
    /// The file produced an indexable body.
    Body(ExtractedBody),
    /// The file was skipped; the job continues.
    Skipped {
        /// Path that was skipped.
        path: std::path::PathBuf,
        /// Why it was skipped.
        reason: String,
    },
}

impl Extraction {
    fn skipped(path: &Path, reason: impl Into<String>) -> Self {
        Self::Skipped {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Extract the textual content of a file.
///
/// Runs to completion on a worker thread; it performs blocking I/O and
/// (for images) spawns the OCR engine.
pub fn extract(path: &Path, config: &IndexingConfig) -> Extraction {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if config.excluded_extensions.iter().any(|e| *e == ext) {
        return Extraction::skipped(path, format!("excluded extension .{ext}"));
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return Extraction::skipped(path, format!("stat failed: {e}")),
    };
    if metadata.len() > config.max_file_size {
        return Extraction::skipped(
            path,
            format!("file too large ({} bytes)", metadata.len()),
        );
    }

    let mut extraction = match ext.as_str() {
        "pdf" => pdf::extract(path),
        "png" | "jpg" | "jpeg" | "bmp" | "tiff" | "tif" | "gif" | "webp" => {
            if config.ocr_enabled {
                image::extract(path)
            } else {
                Extraction::skipped(path, "OCR disabled")
            }
        }
        _ => extract_text(path),
    };

    // Git enrichment applies to any successfully extracted body.
    if config.git_enrichment {
        if let Extraction::Body(ref mut body) = extraction {
            if let Some(log) = gitlog::recent_subjects(path, gitlog::DEFAULT_COMMIT_COUNT) {
                body.metadata_blocks.push(MetadataBlock {
                    kind: crate::types::ChunkKind::GitLog,
                    text: log,
                });
            }
        }
    }

    extraction
}

/// Decode a text-family file, rejecting binary content.
fn extract_text(path: &Path) -> Extraction {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => return Extraction::skipped(path, format!("open failed: {e}")),
    };

    let mut head = vec![0u8; SNIFF_BYTES];
    let n = match file.read(&mut head) {
        Ok(n) => n,
        Err(e) => return Extraction::skipped(path, format!("read failed: {e}")),
    };
    head.truncate(n);

    if nul_density(&head) > NUL_DENSITY_LIMIT {
        return Extraction::skipped(path, "binary content (NUL density)");
    }

    let mut rest = Vec::new();
    if let Err(e) = file.read_to_end(&mut rest) {
        return Extraction::skipped(path, format!("read failed: {e}"));
    }
    head.extend_from_slice(&rest);

    let text = String::from_utf8_lossy(&head).into_owned();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    Extraction::Body(ExtractedBody {
        text,
        language: Language::from_extension(&ext.to_lowercase()),
        extractor: ExtractorKind::Text,
        metadata_blocks: Vec::new(),
    })
}

/// Fraction of NUL bytes in the sniffed prefix.
fn nul_density(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let nuls = bytes.iter().filter(|&&b| b == 0).count();
    nuls as f64 / bytes.len() as f64
}
