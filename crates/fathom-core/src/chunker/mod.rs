//! Language-aware chunking of extracted bodies.
//!
//! Splits an `ExtractedBody` into ordered fragments. Boundaries are chosen
//! per language family:
//!
//! - **Code**: top-level declarations via tree-sitter; oversized
//!   declarations fall back to byte windows within the declaration.
//! - **Markup** (markdown/adoc/rst): headings, with the heading line kept
//!   as the first line of the next fragment.
//! - **Config** (yaml/toml/ini): top-level keys and sections.
//! - **Everything else**: fixed byte windows.
//!
//! Overlap applies only to window-based splits, never to structural ones.
//! No fragment exceeds the hard cap. Trailing OCR/EXIF/gitlog blocks are
//! each emitted as their own fragment tagged with their chunk kind.

pub mod code;
pub mod text;

use crate::config::ChunkingConfig;
use crate::types::{ChunkKind, ExtractedBody, Language};

/// A fragment before embedding: text plus its byte range in the body.
#[derive(Debug, Clone)]
pub struct RawFragment {
    /// Position within the file, starting at 0.
    pub ordinal: u32,
    /// Byte offset of the fragment start in the extracted body.
    pub offset_start: u64,
    /// Byte offset one past the fragment end.
    pub offset_end: u64,
    /// Fragment text.
    pub text: String,
    /// Content kind tag.
    pub kind: ChunkKind,
    /// Language of the owning body.
    pub language: Language,
}

/// Split an extracted body into ordered fragments.
pub fn chunk_body(body: &ExtractedBody, config: &ChunkingConfig) -> Vec<RawFragment> {
    let target = config.target_for(body.language);
    let hard_cap = config.hard_cap_bytes;
    let overlap = config.overlap_bytes.min(target / 2);

    let kind = if body.language.is_code() {
        ChunkKind::Code
    } else if body.language.is_config() {
        ChunkKind::Config
    } else {
        ChunkKind::Doc
    };

    let ranges = if body.text.trim().is_empty() {
        Vec::new()
    } else if body.language.is_code() {
        code::split(&body.text, body.language, target, overlap)
    } else if body.language.is_markup() {
        text::split_at_headings(&body.text, body.language, target, overlap)
    } else if body.language.is_config() && body.language != Language::Json {
        text::split_at_sections(&body.text, body.language, target, overlap)
    } else {
        text::windows(&body.text, 0, body.text.len(), target, overlap)
    };

    let mut fragments = Vec::with_capacity(ranges.len() + body.metadata_blocks.len());
    let mut ordinal: u32 = 0;

    for range in ranges {
        let slice = &body.text[range.clone()];
        if slice.trim().is_empty() {
            continue;
        }
        fragments.push(RawFragment {
            ordinal,
            offset_start: range.start as u64,
            offset_end: range.end as u64,
            text: slice.to_string(),
            kind,
            language: body.language,
        });
        ordinal += 1;
    }

    // Trailing enrichment blocks, one fragment each; oversized blocks
    // window-split but keep their tag.
    for block in &body.metadata_blocks {
        for range in text::windows(&block.text, 0, block.text.len(), hard_cap, overlap) {
            let slice = &block.text[range];
            if slice.trim().is_empty() {
                continue;
            }
            fragments.push(RawFragment {
                ordinal,
                offset_start: 0,
                offset_end: block.text.len() as u64,
                text: slice.to_string(),
                kind: block.kind,
                language: body.language,
            });
            ordinal += 1;
        }
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtractorKind, MetadataBlock};

    fn body(text: &str, language: Language) -> ExtractedBody {
        ExtractedBody {
            text: text.into(),
            language,
            extractor: ExtractorKind::Text,
            metadata_blocks: Vec::new(),
        }
    }

    #[test]
    fn test_ordinals_start_at_zero_in_file_order() {
        let config = ChunkingConfig {
            size_override: Some(64),
            ..ChunkingConfig::default()
        };
        let text = "lorem ipsum dolor sit amet ".repeat(20);
        let fragments = chunk_body(&body(&text, Language::Plain), &config);
        assert!(fragments.len() > 1);
        for (i, frag) in fragments.iter().enumerate() {
            assert_eq!(frag.ordinal, i as u32);
        }
    }

    #[test]
    fn test_no_fragment_exceeds_hard_cap() {
        let config = ChunkingConfig::default();
        let text = "x".repeat(50_000);
        let fragments = chunk_body(&body(&text, Language::Plain), &config);
        assert!(!fragments.is_empty());
        for frag in &fragments {
            assert!(frag.text.len() <= config.hard_cap_bytes);
        }
    }

    #[test]
    fn test_window_splits_overlap() {
        let config = ChunkingConfig {
            size_override: Some(200),
            overlap_bytes: 50,
            ..ChunkingConfig::default()
        };
        let text = "abcdefghij".repeat(100);
        let fragments = chunk_body(&body(&text, Language::Plain), &config);
        assert!(fragments.len() > 2);
        for pair in fragments.windows(2) {
            assert!(pair[1].offset_start < pair[0].offset_end, "windows must overlap");
        }
    }

    #[test]
    fn test_markdown_splits_at_headings() {
        let config = ChunkingConfig::default();
        let text = "# Intro\n\nsome prose here\n\n# Details\n\nmore prose here\n";
        let fragments = chunk_body(&body(text, Language::Markdown), &config);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].text.starts_with("# Intro"));
        assert!(fragments[1].text.starts_with("# Details"));
        assert!(fragments.iter().all(|f| f.kind == ChunkKind::Doc));
    }

    #[test]
    fn test_metadata_blocks_become_tagged_fragments() {
        let config = ChunkingConfig::default();
        let mut b = body("plain body", Language::Plain);
        b.metadata_blocks.push(MetadataBlock {
            kind: ChunkKind::GitLog,
            text: "fix: handle empty walk\nfeat: add debounce".into(),
        });
        b.metadata_blocks.push(MetadataBlock {
            kind: ChunkKind::Ocr,
            text: "RECEIPT TOTAL 42.00".into(),
        });

        let fragments = chunk_body(&b, &config);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].kind, ChunkKind::Doc);
        assert_eq!(fragments[1].kind, ChunkKind::GitLog);
        assert_eq!(fragments[2].kind, ChunkKind::Ocr);
        // Ordinals keep counting across block boundaries.
        assert_eq!(fragments[2].ordinal, 2);
    }

    #[test]
    fn test_empty_body_with_blocks_yields_block_fragments_only() {
        let config = ChunkingConfig::default();
        let mut b = body("", Language::Plain);
        b.metadata_blocks.push(MetadataBlock {
            kind: ChunkKind::Ocr,
            text: "scanned text".into(),
        });
        let fragments = chunk_body(&b, &config);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].ordinal, 0);
        assert_eq!(fragments[0].kind, ChunkKind::Ocr);
    }
}
