//! Declaration-boundary splitting for source code.
//!
//! Parses the file with tree-sitter and cuts at the start of each top-level
//! named node (function, struct, class, impl, namespace, ...). Consecutive
//! small declarations are packed up to the target size; a declaration that
//! alone exceeds the target is window-split within itself. Files that fail
//! to parse fall back to plain byte windows.

use std::ops::Range;

use crate::types::Language;

use super::text;

/// Split source code at top-level declaration boundaries.
pub fn split(source: &str, language: Language, target: usize, overlap: usize) -> Vec<Range<usize>> {
    let Some(grammar) = grammar_for(language) else {
        return text::windows(source, 0, source.len(), target, overlap);
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar).is_err() {
        return text::windows(source, 0, source.len(), target, overlap);
    }

    let Some(tree) = parser.parse(source, None) else {
        tracing::debug!(language = %language, "tree-sitter parse failed, using windows");
        return text::windows(source, 0, source.len(), target, overlap);
    };

    let mut segments = Vec::new();
    let mut prev = 0usize;
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let start = child.start_byte().min(source.len());
        if start > prev {
            segments.push(prev..start);
            prev = start;
        }
    }
    if prev < source.len() {
        segments.push(prev..source.len());
    }

    if segments.is_empty() {
        return text::windows(source, 0, source.len(), target, overlap);
    }

    text::pack_segments(source, &segments, target, overlap)
}

/// Grammar for a supported code language.
fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
        Language::C => Some(tree_sitter_c::LANGUAGE.into()),
        Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
        _ => None,
    }
}
