//! Core domain types shared across all fathom-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Provider identity
// ---------------------------------------------------------------------------

/// Where embedding inference happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// ONNX inference on this machine.
    Local,
    /// HTTP endpoint with bearer auth.
    Remote,
}

/// The (kind, model, dimension) triple a container is bound to at creation.
///
/// Immutable for the container's lifetime; changing it requires creating a
/// new container or an explicit rebuild that clears all rows first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Local or remote inference.
    pub kind: ProviderKind,
    /// Model name (e.g. "jina-embeddings-v2-base-code").
    pub model: String,
    /// Output embedding dimension.
    pub dimension: usize,
}

impl ProviderIdentity {
    /// Human-readable label shown in status output.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            ProviderKind::Local => "local",
            ProviderKind::Remote => "remote",
        };
        format!("{kind}:{} ({}d)", self.model, self.dimension)
    }
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Detected file language, used to pick chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Rust (.rs)
    Rust,
    /// Python (.py)
    Python,
    /// JavaScript (.js, .jsx)
    JavaScript,
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// Go (.go)
    Go,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .hpp)
    Cpp,
    /// Markdown (.md, .mdx)
    Markdown,
    /// AsciiDoc (.adoc)
    Asciidoc,
    /// reStructuredText (.rst)
    Rst,
    /// YAML (.yml, .yaml)
    Yaml,
    /// TOML (.toml)
    Toml,
    /// INI-style configuration (.ini, .cfg, .conf)
    Ini,
    /// JSON data (.json, .jsonc)
    Json,
    /// Anything else that decodes as text.
    Plain,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "go" => Self::Go,
            "java" | "kt" | "kts" | "scala" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Self::Cpp,
            "md" | "mdx" | "markdown" => Self::Markdown,
            "adoc" | "asciidoc" => Self::Asciidoc,
            "rst" => Self::Rst,
            "yml" | "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            "ini" | "cfg" | "conf" | "properties" | "env" => Self::Ini,
            "json" | "jsonc" => Self::Json,
            _ => Self::Plain,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Markdown => "markdown",
            Self::Asciidoc => "asciidoc",
            Self::Rst => "rst",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Ini => "ini",
            Self::Json => "json",
            Self::Plain => "plain",
        }
    }

    /// Parse from a stored string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "rust" => Self::Rust,
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "go" => Self::Go,
            "java" => Self::Java,
            "c" => Self::C,
            "cpp" => Self::Cpp,
            "markdown" => Self::Markdown,
            "asciidoc" => Self::Asciidoc,
            "rst" => Self::Rst,
            "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            "ini" => Self::Ini,
            "json" => Self::Json,
            _ => Self::Plain,
        }
    }

    /// Returns true if this language has a tree-sitter grammar wired in.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            Self::Rust
                | Self::Python
                | Self::JavaScript
                | Self::TypeScript
                | Self::Go
                | Self::Java
                | Self::C
                | Self::Cpp
        )
    }

    /// Returns true if this is a heading-structured document format.
    pub fn is_markup(&self) -> bool {
        matches!(self, Self::Markdown | Self::Asciidoc | Self::Rst)
    }

    /// Returns true if this is a key/section-structured config format.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Yaml | Self::Toml | Self::Ini | Self::Json)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Extraction types
// ---------------------------------------------------------------------------

/// Which extractor handled (or refused) a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// UTF-8 decode with replacement.
    Text,
    /// Linearized per-page PDF text.
    Pdf,
    /// OCR plus EXIF enrichment.
    ImageOcr,
    /// Binary or excluded extension; nothing indexed.
    BinarySkip,
}

impl ExtractorKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Pdf => "pdf",
            Self::ImageOcr => "image_ocr",
            Self::BinarySkip => "binary_skip",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "pdf" => Self::Pdf,
            "image_ocr" => Self::ImageOcr,
            _ => Self::BinarySkip,
        }
    }
}

/// A trailing enrichment block appended to an extracted body.
#[derive(Debug, Clone)]
pub struct MetadataBlock {
    /// How the block should be tagged when chunked.
    pub kind: ChunkKind,
    /// Block text (one fragment each).
    pub text: String,
}

/// The output of content extraction for one file.
#[derive(Debug, Clone)]
pub struct ExtractedBody {
    /// Main text body.
    pub text: String,
    /// Detected language of the body.
    pub language: Language,
    /// Which extractor produced this body.
    pub extractor: ExtractorKind,
    /// Trailing OCR / EXIF / gitlog blocks, each emitted as its own fragment.
    pub metadata_blocks: Vec<MetadataBlock>,
}

// ---------------------------------------------------------------------------
// File records and fragments
// ---------------------------------------------------------------------------

/// Freshness metadata for an indexed file, scoped to one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path.
    pub path: PathBuf,
    /// Modification time (seconds since epoch) at time of indexing.
    pub mtime: i64,
    /// xxh3 content hash at time of indexing.
    pub content_hash: u64,
    /// Which extractor handled the file.
    pub extractor: ExtractorKind,
    /// Detected language.
    pub language: Language,
}

/// What kind of content a fragment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Source code split at declaration boundaries.
    Code,
    /// Prose / markup split at headings.
    Doc,
    /// Configuration split at top-level keys.
    Config,
    /// Text recognized from an image.
    Ocr,
    /// User- or agent-supplied note.
    Annotation,
    /// Trailing git history block.
    GitLog,
}

impl ChunkKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Doc => "doc",
            Self::Config => "config",
            Self::Ocr => "ocr",
            Self::Annotation => "annotation",
            Self::GitLog => "gitlog",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "code" => Self::Code,
            "config" => Self::Config,
            "ocr" => Self::Ocr,
            "annotation" => Self::Annotation,
            "gitlog" => Self::GitLog,
            _ => Self::Doc,
        }
    }
}

/// A single embedded and indexed unit: a byte-range slice of one extracted body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Stable identifier: `<path>#<ordinal>` for file fragments,
    /// `annotation:<id>` for annotations.
    pub id: String,
    /// Owning file path (or the `annotation:<id>` pseudo-path).
    pub path: PathBuf,
    /// Position within the file, starting at 0.
    pub ordinal: u32,
    /// Byte offset of the fragment start in the extracted body.
    pub offset_start: u64,
    /// Byte offset one past the fragment end.
    pub offset_end: u64,
    /// Text payload (post-extraction, pre-embedding).
    pub text: String,
    /// Embedding vector; dimension equals the container's bound dimension.
    pub vector: Vec<f32>,
    /// Content kind tag.
    pub kind: ChunkKind,
    /// Language of the owning body.
    pub language: Language,
    /// Owning file's mtime at indexing time (seconds since epoch).
    pub mtime: i64,
}

impl Fragment {
    /// Build the stable identifier for a file fragment.
    pub fn file_id(path: &std::path::Path, ordinal: u32) -> String {
        format!("{}#{ordinal}", path.display())
    }
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// Who attached an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationSource {
    /// A human, via the UI or CLI.
    User,
    /// An AI agent, via MCP.
    Agent,
}

impl AnnotationSource {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "agent" => Self::Agent,
            _ => Self::User,
        }
    }
}

/// A note attached to a file path, embedded and indexed alongside fragments.
///
/// Independent of the file's lifecycle: it persists even if the file is
/// deleted, until explicitly removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Path the note is about.
    pub path: PathBuf,
    /// Who supplied the note.
    pub source: AnnotationSource,
    /// The note text.
    pub note: String,
    /// Creation time (seconds since epoch).
    pub created_at: i64,
}

impl Annotation {
    /// The pseudo-path under which this annotation is indexed, so that
    /// per-file dedup never lets it displace a file result.
    pub fn pseudo_path(&self) -> PathBuf {
        PathBuf::from(format!("annotation:{}", self.id))
    }
}

// ---------------------------------------------------------------------------
// Search types
// ---------------------------------------------------------------------------

/// A search request. Transient; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Raw query text.
    pub query: String,
    /// Container to search; the active container when absent.
    pub container: Option<String>,
    /// Maximum results to return (capped at 50).
    pub top_k: Option<usize>,
    /// Extension allow-list (without dots), e.g. `["md", "rs"]`.
    pub file_extensions: Option<Vec<String>>,
    /// Only return results under this path prefix.
    pub path_prefix: Option<PathBuf>,
    /// Snippet length in bytes (capped at 10000).
    pub context_bytes: Option<usize>,
    /// Drop results scoring below this threshold (0-100).
    pub min_score: Option<f32>,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Owning path (a real file, or `annotation:<id>`).
    pub path: PathBuf,
    /// Snippet of the matched fragment, truncated to the requested context.
    pub snippet: String,
    /// Relevance score in [0, 100].
    pub score: f32,
    /// Ordinal of the matched fragment within its file.
    pub ordinal: u32,
}

// ---------------------------------------------------------------------------
// Indexing job types
// ---------------------------------------------------------------------------

/// Counts reported when an indexing job finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    /// Files discovered by the walk.
    pub files_seen: usize,
    /// Files extracted, chunked, embedded, and committed.
    pub files_indexed: usize,
    /// Files skipped (binary, excluded, or failed extraction).
    pub files_skipped: usize,
    /// Files removed from the index because they vanished from disk.
    pub files_deleted: usize,
    /// Total fragments written.
    pub fragments_written: usize,
}

/// Events emitted through the engine's side channel, consumed by the UI
/// and MCP collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum IndexEvent {
    /// Periodic progress during an indexing job.
    IndexingProgress {
        /// Files committed so far.
        current: usize,
        /// Total files in the job.
        total: usize,
        /// Path currently being processed.
        path: PathBuf,
    },
    /// Terminal event for an indexing job.
    IndexingComplete {
        /// Human-readable completion message.
        message: String,
    },
    /// The local embedding model finished its lazy load.
    ModelLoaded,
    /// The local embedding model failed to load.
    ModelLoadError {
        /// Why the load failed.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Watcher types
// ---------------------------------------------------------------------------

/// Reduced filesystem event set consumed by the watcher loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file appeared.
    Created(PathBuf),
    /// A file's content changed.
    Modified(PathBuf),
    /// A file vanished.
    Removed(PathBuf),
    /// A file moved; processed as `Removed(from)` + `Created(to)`.
    Renamed {
        /// Old path.
        from: PathBuf,
        /// New path.
        to: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Status / diff types
// ---------------------------------------------------------------------------

/// Aggregate status for one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Number of indexed files.
    pub total_files: usize,
    /// Number of stored fragments.
    pub total_chunks: usize,
    /// Indexed root paths.
    pub indexed_paths: Vec<PathBuf>,
    /// Label of the bound embedding provider.
    pub provider_label: String,
}

/// Time windows accepted by the `diff` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffWindow {
    /// Last 30 minutes.
    ThirtyMinutes,
    /// Last 2 hours.
    TwoHours,
    /// Last day.
    OneDay,
    /// Last 7 days.
    SevenDays,
}

impl DiffWindow {
    /// Parse from the wire form ("30m", "2h", "1d", "7d").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "30m" => Some(Self::ThirtyMinutes),
            "2h" => Some(Self::TwoHours),
            "1d" => Some(Self::OneDay),
            "7d" => Some(Self::SevenDays),
            _ => None,
        }
    }

    /// Window length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::ThirtyMinutes => 30 * 60,
            Self::TwoHours => 2 * 60 * 60,
            Self::OneDay => 24 * 60 * 60,
            Self::SevenDays => 7 * 24 * 60 * 60,
        }
    }
}

/// One recently changed path reported by `diff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    /// Changed path.
    pub path: PathBuf,
    /// Modification time (seconds since epoch).
    pub mtime: i64,
    /// Optional preview of the file's first fragment.
    pub preview: Option<String>,
}

/// One entry returned by `list_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListing {
    /// Indexed path.
    pub path: PathBuf,
    /// File size in bytes at listing time (0 if the file vanished).
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("rs"), Language::Rust);
        assert_eq!(Language::from_extension("tsx"), Language::TypeScript);
        assert_eq!(Language::from_extension("adoc"), Language::Asciidoc);
        assert_eq!(Language::from_extension("yml"), Language::Yaml);
        assert_eq!(Language::from_extension("xyz"), Language::Plain);
    }

    #[test]
    fn test_language_families() {
        assert!(Language::Rust.is_code());
        assert!(Language::Markdown.is_markup());
        assert!(Language::Toml.is_config());
        assert!(!Language::Plain.is_code());
        assert!(!Language::Plain.is_markup());
        assert!(!Language::Plain.is_config());
    }

    #[test]
    fn test_chunk_kind_round_trip() {
        for kind in [
            ChunkKind::Code,
            ChunkKind::Doc,
            ChunkKind::Config,
            ChunkKind::Ocr,
            ChunkKind::Annotation,
            ChunkKind::GitLog,
        ] {
            assert_eq!(ChunkKind::from_str_lossy(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_fragment_file_id_is_stable() {
        let a = Fragment::file_id(Path::new("/tmp/a.md"), 3);
        let b = Fragment::file_id(Path::new("/tmp/a.md"), 3);
        assert_eq!(a, b);
        assert_eq!(a, "/tmp/a.md#3");
    }

    #[test]
    fn test_annotation_pseudo_path() {
        let ann = Annotation {
            id: "abc-123".into(),
            path: PathBuf::from("/tmp/a.md"),
            source: AnnotationSource::User,
            note: "check this".into(),
            created_at: 0,
        };
        assert_eq!(ann.pseudo_path(), PathBuf::from("annotation:abc-123"));
    }

    #[test]
    fn test_diff_window_parse() {
        assert_eq!(DiffWindow::parse("30m"), Some(DiffWindow::ThirtyMinutes));
        assert_eq!(DiffWindow::parse("7d"), Some(DiffWindow::SevenDays));
        assert_eq!(DiffWindow::parse("1y"), None);
        assert_eq!(DiffWindow::TwoHours.seconds(), 7200);
    }
}
