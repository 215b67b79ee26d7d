//! SQLite persistence: fragment rows, vectors, and FTS5 full-text index.
//!
//! One database file holds every container. Each container owns an aligned
//! set of tables (fragments, FTS5 shadow, file records, annotations) whose
//! names are derived from the container name; dropping a container drops
//! its tables in one transaction, leaving no orphan rows.
//!
//! ## Concurrency
//!
//! SQLite runs in WAL mode for concurrent reads during writes. The
//! connection lives behind a mutex: shared-readable at the engine level,
//! single-writer per container as the spec requires.
//!
//! ## Invariants
//!
//! - The vector column and the FTS index always agree on membership; every
//!   write path touches both inside one transaction.
//! - Every stored vector has the container's bound dimension; mismatches
//!   are rejected before any row is written.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{FathomError, FathomResult};
use crate::provider::cosine_similarity;
use crate::types::{
    Annotation, AnnotationSource, ChunkKind, ExtractorKind, FileRecord, Fragment, Language,
};

/// Table-name bundle for one container.
#[derive(Debug, Clone)]
pub struct ContainerTables {
    suffix: String,
}

impl ContainerTables {
    /// Derive the stable table suffix for a container name.
    pub fn for_name(container: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(container.as_bytes());
        let digest = hasher.finalize();
        Self {
            suffix: hex::encode(&digest[..4]),
        }
    }

    /// The raw hex suffix; also used for sidecar file names.
    pub fn suffix_str(&self) -> &str {
        &self.suffix
    }

    fn fragments(&self) -> String {
        format!("fragments_{}", self.suffix)
    }

    fn fts(&self) -> String {
        format!("fts_{}", self.suffix)
    }

    fn files(&self) -> String {
        format!("files_{}", self.suffix)
    }

    fn annotations(&self) -> String {
        format!("annotations_{}", self.suffix)
    }
}

/// A retrieval candidate produced by `ann_search` / `fts_search`.
///
/// `score` orders candidates within one list (cosine similarity for dense,
/// negated BM25 rank for lexical); fusion consumes ranks, not magnitudes.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Stable fragment identifier.
    pub fragment_id: String,
    /// Owning path (or `annotation:<id>`).
    pub path: PathBuf,
    /// Fragment ordinal within its file.
    pub ordinal: u32,
    /// Fragment text.
    pub text: String,
    /// Content kind tag.
    pub kind: ChunkKind,
    /// List-local ordering score (higher is better).
    pub score: f32,
}

/// SQLite-backed fragment store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(db_path: &Path) -> FathomResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> FathomResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Create the backing tables for a container if they don't exist.
    pub fn create_container(&self, tables: &ContainerTables) -> FathomResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {frags} (
                fragment_id TEXT PRIMARY KEY,
                path        TEXT NOT NULL,
                ordinal     INTEGER NOT NULL,
                offset_start INTEGER NOT NULL,
                offset_end  INTEGER NOT NULL,
                text        TEXT NOT NULL,
                vector      BLOB NOT NULL,
                chunk_kind  TEXT NOT NULL,
                language    TEXT NOT NULL,
                mtime       INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {frags}_path_idx ON {frags}(path);
            CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5(
                fragment_id UNINDEXED,
                text
            );
            CREATE TABLE IF NOT EXISTS {files} (
                path         TEXT PRIMARY KEY,
                mtime        INTEGER NOT NULL,
                content_hash INTEGER NOT NULL,
                extractor    TEXT NOT NULL,
                language     TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {anns} (
                id         TEXT PRIMARY KEY,
                path       TEXT NOT NULL,
                source     TEXT NOT NULL,
                note       TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
            frags = tables.fragments(),
            fts = tables.fts(),
            files = tables.files(),
            anns = tables.annotations(),
        ))?;
        Ok(())
    }

    /// Drop every backing table of a container in one transaction.
    pub fn drop_container(&self, tables: &ContainerTables) -> FathomResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {frags};
             DROP TABLE IF EXISTS {fts};
             DROP TABLE IF EXISTS {files};
             DROP TABLE IF EXISTS {anns};",
            frags = tables.fragments(),
            fts = tables.fts(),
            files = tables.files(),
            anns = tables.annotations(),
        ))?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every row from a container's tables, keeping the schema.
    pub fn clear_container(&self, tables: &ContainerTables) -> FathomResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DELETE FROM {frags};
             DELETE FROM {fts};
             DELETE FROM {files};",
            frags = tables.fragments(),
            fts = tables.fts(),
            files = tables.files(),
        ))?;
        tx.commit()?;
        Ok(())
    }

    /// Insert or replace fragments by identifier; atomic per call.
    pub fn upsert_fragments(
        &self,
        tables: &ContainerTables,
        fragments: &[Fragment],
        expected_dimension: usize,
    ) -> FathomResult<()> {
        verify_dimensions(fragments, expected_dimension)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_fragments(&tx, tables, fragments)?;
        tx.commit()?;
        Ok(())
    }

    /// Atomically replace every fragment of a file with a new version and
    /// refresh its file record. Either all fragments of the new version are
    /// visible or none; the old version vanishes in the same commit.
    pub fn replace_file(
        &self,
        tables: &ContainerTables,
        record: &FileRecord,
        fragments: &[Fragment],
        expected_dimension: usize,
    ) -> FathomResult<()> {
        verify_dimensions(fragments, expected_dimension)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        delete_path_rows(&tx, tables, &record.path)?;
        insert_fragments(&tx, tables, fragments)?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (path, mtime, content_hash, extractor, language)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                tables.files()
            ),
            params![
                record.path.display().to_string(),
                record.mtime,
                record.content_hash as i64,
                record.extractor.as_str(),
                record.language.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Refresh a file record without touching its fragments. Used when the
    /// mtime advanced but the content hash is unchanged.
    pub fn update_file_record(
        &self,
        tables: &ContainerTables,
        record: &FileRecord,
    ) -> FathomResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (path, mtime, content_hash, extractor, language)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                tables.files()
            ),
            params![
                record.path.display().to_string(),
                record.mtime,
                record.content_hash as i64,
                record.extractor.as_str(),
                record.language.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Remove all fragments owned by `path` plus its file record. Idempotent.
    pub fn delete_by_path(&self, tables: &ContainerTables, path: &Path) -> FathomResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = delete_path_rows(&tx, tables, path)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Dense search: top-k fragments by cosine similarity to the query
    /// vector, optionally restricted to one chunk kind.
    pub fn ann_search(
        &self,
        tables: &ContainerTables,
        query: &[f32],
        k: usize,
        kind: Option<ChunkKind>,
    ) -> FathomResult<Vec<Candidate>> {
        let conn = self.conn.lock();
        let sql = match kind {
            Some(_) => format!(
                "SELECT fragment_id, path, ordinal, text, vector, chunk_kind
                 FROM {} WHERE chunk_kind = ?1",
                tables.fragments()
            ),
            None => format!(
                "SELECT fragment_id, path, ordinal, text, vector, chunk_kind FROM {}",
                tables.fragments()
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(Candidate, Vec<u8>)> {
            Ok((
                Candidate {
                    fragment_id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    ordinal: row.get::<_, i64>(2)? as u32,
                    text: row.get(3)?,
                    kind: ChunkKind::from_str_lossy(&row.get::<_, String>(5)?),
                    score: 0.0,
                },
                row.get(4)?,
            ))
        };

        let rows: Vec<(Candidate, Vec<u8>)> = match kind {
            Some(kind) => stmt
                .query_map(params![kind.as_str()], map_row)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<rusqlite::Result<_>>()?,
        };

        let mut candidates: Vec<Candidate> = rows
            .into_iter()
            .filter_map(|(mut candidate, blob)| {
                let vector = decode_vector(&blob);
                if vector.len() != query.len() {
                    return None;
                }
                candidate.score = cosine_similarity(query, &vector);
                Some(candidate)
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Lexical search: top-k fragments by BM25 over the FTS index.
    ///
    /// `match_expr` is a prepared FTS5 expression (quoted, OR-joined).
    pub fn fts_search(
        &self,
        tables: &ContainerTables,
        match_expr: &str,
        k: usize,
    ) -> FathomResult<Vec<Candidate>> {
        if match_expr.trim().is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let sql = format!(
            "SELECT f.fragment_id, f.path, f.ordinal, f.text, f.chunk_kind, bm25({fts}) AS rank
             FROM {fts} JOIN {frags} f ON f.fragment_id = {fts}.fragment_id
             WHERE {fts} MATCH ?1
             ORDER BY rank
             LIMIT ?2",
            fts = tables.fts(),
            frags = tables.fragments(),
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![match_expr, k as i64], |row| {
            Ok(Candidate {
                fragment_id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                ordinal: row.get::<_, i64>(2)? as u32,
                text: row.get(3)?,
                kind: ChunkKind::from_str_lossy(&row.get::<_, String>(4)?),
                // BM25 is smaller-is-better; negate so every candidate list
                // orders descending.
                score: -row.get::<_, f64>(5)? as f32,
            })
        })?;

        let candidates: Vec<Candidate> = rows.collect::<rusqlite::Result<_>>()?;
        Ok(candidates)
    }

    /// Iterate the file records of a container for freshness checks.
    pub fn scan_file_records(&self, tables: &ContainerTables) -> FathomResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, mtime, content_hash, extractor, language FROM {}",
            tables.files()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: PathBuf::from(row.get::<_, String>(0)?),
                mtime: row.get(1)?,
                content_hash: row.get::<_, i64>(2)? as u64,
                extractor: ExtractorKind::from_str_lossy(&row.get::<_, String>(3)?),
                language: Language::from_str_lossy(&row.get::<_, String>(4)?),
            })
        })?;
        let records: Vec<FileRecord> = rows.collect::<rusqlite::Result<_>>()?;
        Ok(records)
    }

    /// Look up one file record by path.
    pub fn file_record(
        &self,
        tables: &ContainerTables,
        path: &Path,
    ) -> FathomResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, mtime, content_hash, extractor, language FROM {} WHERE path = ?1",
            tables.files()
        ))?;
        let mut rows = stmt.query_map(params![path.display().to_string()], |row| {
            Ok(FileRecord {
                path: PathBuf::from(row.get::<_, String>(0)?),
                mtime: row.get(1)?,
                content_hash: row.get::<_, i64>(2)? as u64,
                extractor: ExtractorKind::from_str_lossy(&row.get::<_, String>(3)?),
                language: Language::from_str_lossy(&row.get::<_, String>(4)?),
            })
        })?;
        rows.next().transpose().map_err(FathomError::from)
    }

    /// All fragments owned by one path, in ordinal order.
    pub fn fragments_for_path(
        &self,
        tables: &ContainerTables,
        path: &Path,
    ) -> FathomResult<Vec<Fragment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT fragment_id, path, ordinal, offset_start, offset_end, text, vector,
                    chunk_kind, language, mtime
             FROM {} WHERE path = ?1 ORDER BY ordinal",
            tables.fragments()
        ))?;
        let rows = stmt.query_map(params![path.display().to_string()], |row| {
            Ok(Fragment {
                id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                ordinal: row.get::<_, i64>(2)? as u32,
                offset_start: row.get::<_, i64>(3)? as u64,
                offset_end: row.get::<_, i64>(4)? as u64,
                text: row.get(5)?,
                vector: decode_vector(&row.get::<_, Vec<u8>>(6)?),
                kind: ChunkKind::from_str_lossy(&row.get::<_, String>(7)?),
                language: Language::from_str_lossy(&row.get::<_, String>(8)?),
                mtime: row.get(9)?,
            })
        })?;
        let fragments: Vec<Fragment> = rows.collect::<rusqlite::Result<_>>()?;
        Ok(fragments)
    }

    /// Count of (files, fragments) in a container. Annotation fragments are
    /// excluded from the fragment count.
    pub fn counts(&self, tables: &ContainerTables) -> FathomResult<(usize, usize)> {
        let conn = self.conn.lock();
        let files: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", tables.files()),
            [],
            |row| row.get(0),
        )?;
        let fragments: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE chunk_kind != 'annotation'",
                tables.fragments()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok((files as usize, fragments as usize))
    }

    // -----------------------------------------------------------------
    // Annotations
    // -----------------------------------------------------------------

    /// Store an annotation record plus its embedded fragment.
    pub fn insert_annotation(
        &self,
        tables: &ContainerTables,
        annotation: &Annotation,
        fragment: &Fragment,
        expected_dimension: usize,
    ) -> FathomResult<()> {
        verify_dimensions(std::slice::from_ref(fragment), expected_dimension)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, path, source, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                tables.annotations()
            ),
            params![
                annotation.id,
                annotation.path.display().to_string(),
                annotation.source.as_str(),
                annotation.note,
                annotation.created_at,
            ],
        )?;
        insert_fragments(&tx, tables, std::slice::from_ref(fragment))?;
        tx.commit()?;
        Ok(())
    }

    /// Annotations for one path, or all annotations when `path` is `None`.
    pub fn list_annotations(
        &self,
        tables: &ContainerTables,
        path: Option<&Path>,
    ) -> FathomResult<Vec<Annotation>> {
        let conn = self.conn.lock();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Annotation> {
            Ok(Annotation {
                id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                source: AnnotationSource::from_str_lossy(&row.get::<_, String>(2)?),
                note: row.get(3)?,
                created_at: row.get(4)?,
            })
        };

        let annotations: Vec<Annotation> = match path {
            Some(path) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, path, source, note, created_at FROM {}
                     WHERE path = ?1 ORDER BY created_at",
                    tables.annotations()
                ))?;
                let rows = stmt.query_map(params![path.display().to_string()], map_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, path, source, note, created_at FROM {} ORDER BY created_at",
                    tables.annotations()
                ))?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        Ok(annotations)
    }

    /// Remove an annotation and its fragment. Returns false when the id is
    /// unknown.
    pub fn delete_annotation(&self, tables: &ContainerTables, id: &str) -> FathomResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", tables.annotations()),
            params![id],
        )?;
        delete_path_rows(&tx, tables, Path::new(&format!("annotation:{id}")))?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Run a SQLite integrity check.
    pub fn check_integrity(&self) -> FathomResult<bool> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

/// Deterministic candidate ordering: score descending, ties broken by
/// fragment ordinal then lexicographic path.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.path.cmp(&b.path))
    });
}

fn verify_dimensions(fragments: &[Fragment], expected: usize) -> FathomResult<()> {
    for fragment in fragments {
        if fragment.vector.len() != expected {
            return Err(FathomError::ProviderMismatch {
                details: format!(
                    "fragment '{}' has a {}-dim vector, container is bound to {}",
                    fragment.id,
                    fragment.vector.len(),
                    expected
                ),
            });
        }
    }
    Ok(())
}

/// Insert fragments into both indexes. Caller holds the transaction.
fn insert_fragments(
    tx: &rusqlite::Transaction<'_>,
    tables: &ContainerTables,
    fragments: &[Fragment],
) -> FathomResult<()> {
    for fragment in fragments {
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (fragment_id, path, ordinal, offset_start,
                     offset_end, text, vector, chunk_kind, language, mtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                tables.fragments()
            ),
            params![
                fragment.id,
                fragment.path.display().to_string(),
                fragment.ordinal,
                fragment.offset_start as i64,
                fragment.offset_end as i64,
                fragment.text,
                encode_vector(&fragment.vector),
                fragment.kind.as_str(),
                fragment.language.as_str(),
                fragment.mtime,
            ],
        )?;
        // The FTS table has no primary key; emulate the replace.
        tx.execute(
            &format!("DELETE FROM {} WHERE fragment_id = ?1", tables.fts()),
            params![fragment.id],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} (fragment_id, text) VALUES (?1, ?2)",
                tables.fts()
            ),
            params![fragment.id, fragment.text],
        )?;
    }
    Ok(())
}

/// Delete both-index rows for a path plus its file record. Caller holds the
/// transaction. Returns the number of fragments removed.
fn delete_path_rows(
    tx: &rusqlite::Transaction<'_>,
    tables: &ContainerTables,
    path: &Path,
) -> FathomResult<usize> {
    let path_str = path.display().to_string();
    tx.execute(
        &format!(
            "DELETE FROM {fts} WHERE fragment_id IN
                 (SELECT fragment_id FROM {frags} WHERE path = ?1)",
            fts = tables.fts(),
            frags = tables.fragments(),
        ),
        params![path_str],
    )?;
    let removed = tx.execute(
        &format!("DELETE FROM {} WHERE path = ?1", tables.fragments()),
        params![path_str],
    )?;
    tx.execute(
        &format!("DELETE FROM {} WHERE path = ?1", tables.files()),
        params![path_str],
    )?;
    Ok(removed)
}

/// Encode a vector as little-endian f32 bytes.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a vector.
fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 4;

    fn fragment(path: &str, ordinal: u32, text: &str, vector: Vec<f32>) -> Fragment {
        Fragment {
            id: Fragment::file_id(Path::new(path), ordinal),
            path: PathBuf::from(path),
            ordinal,
            offset_start: 0,
            offset_end: text.len() as u64,
            text: text.into(),
            vector,
            kind: ChunkKind::Doc,
            language: Language::Plain,
            mtime: 100,
        }
    }

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            mtime: 100,
            content_hash: 42,
            extractor: ExtractorKind::Text,
            language: Language::Plain,
        }
    }

    fn store_with_container() -> (Store, ContainerTables) {
        let store = Store::open_in_memory().expect("open");
        let tables = ContainerTables::for_name("Default");
        store.create_container(&tables).expect("create");
        (store, tables)
    }

    #[test]
    fn test_vector_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (store, tables) = store_with_container();
        let frags = vec![fragment("/a.txt", 0, "alpha text", vec![1.0, 0.0, 0.0, 0.0])];
        store.upsert_fragments(&tables, &frags, DIM).expect("upsert");
        store.upsert_fragments(&tables, &frags, DIM).expect("upsert again");

        let stored = store
            .fragments_for_path(&tables, Path::new("/a.txt"))
            .expect("read");
        assert_eq!(stored.len(), 1);

        let hits = store.fts_search(&tables, "\"alpha\"", 10).expect("fts");
        assert_eq!(hits.len(), 1, "FTS must not duplicate on re-upsert");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (store, tables) = store_with_container();
        let frags = vec![fragment("/a.txt", 0, "alpha", vec![1.0, 0.0])];
        let err = store.upsert_fragments(&tables, &frags, DIM).unwrap_err();
        assert!(matches!(err, FathomError::ProviderMismatch { .. }));
    }

    #[test]
    fn test_delete_by_path_is_idempotent_and_removes_both_indexes() {
        let (store, tables) = store_with_container();
        let frags = vec![
            fragment("/a.txt", 0, "alpha body", vec![1.0, 0.0, 0.0, 0.0]),
            fragment("/a.txt", 1, "alpha tail", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        store
            .replace_file(&tables, &record("/a.txt"), &frags, DIM)
            .expect("replace");

        assert_eq!(
            store.delete_by_path(&tables, Path::new("/a.txt")).expect("delete"),
            2
        );
        assert_eq!(
            store.delete_by_path(&tables, Path::new("/a.txt")).expect("redelete"),
            0
        );
        assert!(store.fts_search(&tables, "\"alpha\"", 10).expect("fts").is_empty());
        assert!(store
            .ann_search(&tables, &[1.0, 0.0, 0.0, 0.0], 10, None)
            .expect("ann")
            .is_empty());
        assert!(store
            .file_record(&tables, Path::new("/a.txt"))
            .expect("record")
            .is_none());
    }

    #[test]
    fn test_replace_file_swaps_versions_atomically() {
        let (store, tables) = store_with_container();
        let v1 = vec![
            fragment("/a.txt", 0, "old one", vec![1.0, 0.0, 0.0, 0.0]),
            fragment("/a.txt", 1, "old two", vec![0.0, 1.0, 0.0, 0.0]),
            fragment("/a.txt", 2, "old three", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        store
            .replace_file(&tables, &record("/a.txt"), &v1, DIM)
            .expect("v1");

        let v2 = vec![fragment("/a.txt", 0, "new body", vec![0.0, 0.0, 0.0, 1.0])];
        store
            .replace_file(&tables, &record("/a.txt"), &v2, DIM)
            .expect("v2");

        let stored = store
            .fragments_for_path(&tables, Path::new("/a.txt"))
            .expect("read");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "new body");
        assert!(store.fts_search(&tables, "\"old\"", 10).expect("fts").is_empty());
    }

    #[test]
    fn test_ann_search_orders_by_cosine() {
        let (store, tables) = store_with_container();
        let frags = vec![
            fragment("/far.txt", 0, "far", vec![0.0, 1.0, 0.0, 0.0]),
            fragment("/near.txt", 0, "near", vec![0.9, 0.1, 0.0, 0.0]),
            fragment("/exact.txt", 0, "exact", vec![1.0, 0.0, 0.0, 0.0]),
        ];
        store.upsert_fragments(&tables, &frags, DIM).expect("upsert");

        let hits = store
            .ann_search(&tables, &[1.0, 0.0, 0.0, 0.0], 2, None)
            .expect("ann");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, PathBuf::from("/exact.txt"));
        assert_eq!(hits[1].path, PathBuf::from("/near.txt"));
    }

    #[test]
    fn test_ann_search_kind_filter() {
        let (store, tables) = store_with_container();
        let mut ann = fragment("annotation:x", 0, "note text", vec![1.0, 0.0, 0.0, 0.0]);
        ann.kind = ChunkKind::Annotation;
        ann.id = "annotation:x".into();
        let doc = fragment("/a.txt", 0, "doc text", vec![1.0, 0.0, 0.0, 0.0]);
        store
            .upsert_fragments(&tables, &[ann, doc], DIM)
            .expect("upsert");

        let hits = store
            .ann_search(&tables, &[1.0, 0.0, 0.0, 0.0], 10, Some(ChunkKind::Annotation))
            .expect("ann");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, ChunkKind::Annotation);
    }

    #[test]
    fn test_fts_search_matches_keywords() {
        let (store, tables) = store_with_container();
        let frags = vec![
            fragment("/a.txt", 0, "the meeting about server cost overruns", vec![1.0, 0.0, 0.0, 0.0]),
            fragment("/b.txt", 0, "holiday photos from the beach", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        store.upsert_fragments(&tables, &frags, DIM).expect("upsert");

        let hits = store
            .fts_search(&tables, "\"server\" OR \"costs\"", 10)
            .expect("fts");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, PathBuf::from("/a.txt"));
    }

    #[test]
    fn test_empty_match_expr_returns_nothing() {
        let (store, tables) = store_with_container();
        assert!(store.fts_search(&tables, "  ", 10).expect("fts").is_empty());
    }

    #[test]
    fn test_drop_container_leaves_no_rows() {
        let (store, tables) = store_with_container();
        let frags = vec![fragment("/a.txt", 0, "alpha", vec![1.0, 0.0, 0.0, 0.0])];
        store.upsert_fragments(&tables, &frags, DIM).expect("upsert");
        store.drop_container(&tables).expect("drop");

        // The tables are gone entirely; any query against them now fails.
        assert!(store.counts(&tables).is_err());

        // Recreating yields an empty container.
        store.create_container(&tables).expect("recreate");
        let (files, fragments) = store.counts(&tables).expect("counts");
        assert_eq!((files, fragments), (0, 0));
    }

    #[test]
    fn test_annotation_lifecycle() {
        let (store, tables) = store_with_container();
        let annotation = Annotation {
            id: "id-1".into(),
            path: PathBuf::from("/a.txt"),
            source: AnnotationSource::Agent,
            note: "re-check quarterly invoice numbers".into(),
            created_at: 7,
        };
        let mut frag = fragment("annotation:id-1", 0, &annotation.note, vec![1.0, 0.0, 0.0, 0.0]);
        frag.id = "annotation:id-1".into();
        frag.kind = ChunkKind::Annotation;

        store
            .insert_annotation(&tables, &annotation, &frag, DIM)
            .expect("insert");

        let listed = store
            .list_annotations(&tables, Some(Path::new("/a.txt")))
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source, AnnotationSource::Agent);

        assert!(store.delete_annotation(&tables, "id-1").expect("delete"));
        assert!(!store.delete_annotation(&tables, "id-1").expect("redelete"));
        assert!(store
            .list_annotations(&tables, None)
            .expect("list all")
            .is_empty());
        // The embedded fragment went with it.
        assert!(store
            .ann_search(&tables, &[1.0, 0.0, 0.0, 0.0], 10, Some(ChunkKind::Annotation))
            .expect("ann")
            .is_empty());
    }

    #[test]
    fn test_scan_file_records() {
        let (store, tables) = store_with_container();
        store
            .replace_file(&tables, &record("/a.txt"), &[], DIM)
            .expect("a");
        store
            .replace_file(&tables, &record("/b.txt"), &[], DIM)
            .expect("b");

        let records = store.scan_file_records(&tables).expect("scan");
        assert_eq!(records.len(), 2);
    }
}
