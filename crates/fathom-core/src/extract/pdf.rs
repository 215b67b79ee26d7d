//! PDF text extraction.
//!
//! Linearizes each page and concatenates them with a form-feed sentinel so
//! downstream consumers can still locate page boundaries.

use std::path::Path;

use crate::types::{ExtractedBody, ExtractorKind, Language};

use super::Extraction;

/// Sentinel inserted between pages.
pub const PAGE_BREAK: char = '\u{000C}';

/// Extract linearized text from a PDF, page by page.
pub fn extract(path: &Path) -> Extraction {
    let pages = match pdf_extract::extract_text_by_pages(path) {
        Ok(pages) => pages,
        Err(e) => {
            return Extraction::Skipped {
                path: path.to_path_buf(),
                reason: format!("pdf extraction failed: {e}"),
            }
        }
    };

    let text = pages.join(&PAGE_BREAK.to_string());
    if text.trim().is_empty() {
        return Extraction::Skipped {
            path: path.to_path_buf(),
            reason: "pdf contains no extractable text".into(),
        };
    }

    tracing::debug!(path = %path.display(), pages = pages.len(), "extracted pdf");

    Extraction::Body(ExtractedBody {
        text,
        language: Language::Plain,
        extractor: ExtractorKind::Pdf,
        metadata_blocks: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pdf_is_skipped() {
        match extract(Path::new("/nonexistent/report.pdf")) {
            Extraction::Skipped { reason, .. } => assert!(reason.contains("pdf")),
            Extraction::Body(_) => panic!("missing file should be skipped"),
        }
    }

    #[test]
    fn test_page_break_sentinel_is_form_feed() {
        assert_eq!(PAGE_BREAK, '\u{000C}');
    }
}
