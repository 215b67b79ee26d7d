//! Structural and window splitters for prose, markup, and config formats.
//!
//! All functions return byte ranges into the source text. Structural
//! splitters never apply overlap; `windows` does.

use std::ops::Range;

use crate::types::Language;

/// Split markup text at headings. The heading line stays with the section
/// that follows it. Sections larger than `target` fall back to windows.
pub fn split_at_headings(
    text: &str,
    language: Language,
    target: usize,
    overlap: usize,
) -> Vec<Range<usize>> {
    let boundaries = heading_offsets(text, language);
    split_at_boundaries(text, &boundaries, target, overlap)
}

/// Split a config file at top-level keys / sections. Oversized sections
/// fall back to windows.
pub fn split_at_sections(
    text: &str,
    language: Language,
    target: usize,
    overlap: usize,
) -> Vec<Range<usize>> {
    let boundaries = section_offsets(text, language);
    split_at_boundaries(text, &boundaries, target, overlap)
}

/// Fixed-size byte windows over `[start, end)` with overlap at window
/// boundaries. Ranges are snapped to UTF-8 char boundaries.
pub fn windows(text: &str, start: usize, end: usize, target: usize, overlap: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    if start >= end || target == 0 {
        return ranges;
    }

    let step = target.saturating_sub(overlap).max(1);
    let mut pos = start;
    loop {
        let window_end = snap_to_char_boundary(text, (pos + target).min(end));
        let window_start = snap_to_char_boundary(text, pos);
        if window_end > window_start {
            ranges.push(window_start..window_end);
        }
        if window_end >= end {
            break;
        }
        pos += step;
    }
    ranges
}

/// Cut the text at the boundary offsets. Each section becomes its own
/// fragment; a section larger than `target` is window-split within itself.
fn split_at_boundaries(
    text: &str,
    boundaries: &[usize],
    target: usize,
    overlap: usize,
) -> Vec<Range<usize>> {
    if text.is_empty() {
        return Vec::new();
    }
    if boundaries.is_empty() {
        return windows(text, 0, text.len(), target, overlap);
    }

    // Segment the text at the boundary offsets, covering the whole body.
    let mut segments = Vec::new();
    let mut prev = 0;
    for &b in boundaries {
        if b > prev {
            segments.push(prev..b);
        }
        prev = b;
    }
    if prev < text.len() {
        segments.push(prev..text.len());
    }

    let mut out = Vec::new();
    for seg in segments {
        if seg.end - seg.start > target {
            out.extend(windows(text, seg.start, seg.end, target, overlap));
        } else {
            out.push(seg);
        }
    }
    out
}

/// Pack consecutive segments into fragments up to `target`; a single
/// segment larger than `target` is window-split within itself (the only
/// place overlap applies).
pub(crate) fn pack_segments(
    text: &str,
    segments: &[Range<usize>],
    target: usize,
    overlap: usize,
) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut acc: Option<Range<usize>> = None;

    for seg in segments {
        if seg.end - seg.start > target {
            if let Some(range) = acc.take() {
                out.push(range);
            }
            out.extend(windows(text, seg.start, seg.end, target, overlap));
            continue;
        }

        match acc.take() {
            None => acc = Some(seg.clone()),
            Some(range) => {
                if seg.end - range.start <= target {
                    acc = Some(range.start..seg.end);
                } else {
                    out.push(range);
                    acc = Some(seg.clone());
                }
            }
        }
    }
    if let Some(range) = acc {
        out.push(range);
    }
    out
}

/// Offsets of heading lines for the given markup dialect.
fn heading_offsets(text: &str, language: Language) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut line_start = 0;
    let mut prev_line: Option<(usize, &str)> = None;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let is_heading = match language {
            Language::Markdown => trimmed.starts_with('#'),
            Language::Asciidoc => trimmed.starts_with('='),
            // reStructuredText underlines the heading with punctuation; the
            // boundary sits at the heading line above the adornment.
            Language::Rst => false,
            _ => trimmed.starts_with('#'),
        };

        if is_heading && line_start > 0 {
            offsets.push(line_start);
        }

        if language == Language::Rst {
            if let Some((prev_start, prev_text)) = prev_line {
                if is_rst_adornment(trimmed) && !prev_text.trim().is_empty() && prev_start > 0 {
                    offsets.push(prev_start);
                }
            }
        }

        prev_line = Some((line_start, trimmed));
        line_start += line.len();
    }

    offsets
}

/// A line of three or more repeated punctuation characters.
fn is_rst_adornment(line: &str) -> bool {
    let line = line.trim_end();
    if line.len() < 3 {
        return false;
    }
    let mut chars = line.chars();
    let Some(first) = chars.next() else { return false };
    first.is_ascii_punctuation() && chars.all(|c| c == first)
}

/// Offsets where a top-level key or section begins.
fn section_offsets(text: &str, language: Language) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut line_start = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let is_boundary = match language {
            Language::Yaml => is_yaml_top_level_key(trimmed),
            Language::Toml | Language::Ini => {
                trimmed.starts_with('[') || is_bare_assignment(trimmed)
            }
            _ => false,
        };
        if is_boundary && line_start > 0 {
            offsets.push(line_start);
        }
        line_start += line.len();
    }

    offsets
}

/// An unindented `key:` line that isn't a comment or list item.
fn is_yaml_top_level_key(line: &str) -> bool {
    if line.is_empty() || line.starts_with([' ', '\t', '#', '-']) {
        return false;
    }
    line.split_once(':').is_some()
}

/// An unindented `key = value` line (TOML/INI without a section header).
fn is_bare_assignment(line: &str) -> bool {
    if line.is_empty() || line.starts_with([' ', '\t', '#', ';']) {
        return false;
    }
    line.split_once('=').is_some()
}

/// Largest char boundary not past `pos`.
fn snap_to_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_cover_whole_text() {
        let text = "abcdef".repeat(100);
        let ranges = windows(&text, 0, text.len(), 100, 20);
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(text.len()));
        for r in &ranges {
            assert!(r.end - r.start <= 100);
        }
    }

    #[test]
    fn test_windows_respect_char_boundaries() {
        let text = "é".repeat(200); // 2 bytes per char
        let ranges = windows(&text, 0, text.len(), 33, 8);
        for r in ranges {
            assert!(text.is_char_boundary(r.start));
            assert!(text.is_char_boundary(r.end));
        }
    }

    #[test]
    fn test_markdown_heading_offsets() {
        let text = "# One\nbody\n## Two\nbody\nplain\n# Three\n";
        let offsets = heading_offsets(text, Language::Markdown);
        assert_eq!(offsets.len(), 2);
        assert!(text[offsets[0]..].starts_with("## Two"));
        assert!(text[offsets[1]..].starts_with("# Three"));
    }

    #[test]
    fn test_rst_heading_offsets() {
        let text = "Intro\n=====\nbody text\n\nNext Part\n---------\nmore\n";
        let offsets = heading_offsets(text, Language::Rst);
        assert_eq!(offsets.len(), 1);
        assert!(text[offsets[0]..].starts_with("Next Part"));
    }

    #[test]
    fn test_yaml_section_offsets() {
        let text = "server:\n  host: x\n  port: 1\nlogging:\n  level: info\n";
        let offsets = section_offsets(text, Language::Yaml);
        assert_eq!(offsets.len(), 1);
        assert!(text[offsets[0]..].starts_with("logging:"));
    }

    #[test]
    fn test_toml_section_offsets() {
        let text = "top = 1\n\n[server]\nhost = \"x\"\n\n[logging]\nlevel = \"info\"\n";
        let offsets = section_offsets(text, Language::Toml);
        assert_eq!(offsets.len(), 2);
        assert!(text[offsets[0]..].starts_with("[server]"));
        assert!(text[offsets[1]..].starts_with("[logging]"));
    }

    #[test]
    fn test_pack_segments_merges_small_segments() {
        let text = "aaaa bbbb cccc dddd";
        let segments = vec![0..5, 5..10, 10..15, 15..19];
        let packed = pack_segments(text, &segments, 10, 0);
        assert_eq!(packed, vec![0..10, 10..19]);
    }

    #[test]
    fn test_pack_segments_windows_oversized_segment() {
        let text = "x".repeat(50);
        let segments = vec![0..50];
        let packed = pack_segments(&text, &segments, 20, 5);
        assert!(packed.len() > 2);
        for r in &packed {
            assert!(r.end - r.start <= 20);
        }
    }

    #[test]
    fn test_no_overlap_for_structural_splits() {
        let text = "# A\nbody\n# B\nbody\n";
        let ranges = split_at_headings(text, Language::Markdown, 800, 150);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "structural splits never overlap");
        }
    }
}
