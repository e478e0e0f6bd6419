use crate::chunking::{ChunkingConfig, SentenceChunker};
use crate::embeddings::Embedder;
use crate::error::{CacheError, ExtractionFailure, IngestError};
use crate::extractor::PdfExtractor;
use crate::fingerprint::fingerprint_file;
use crate::index::VectorIndex;
use crate::models::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "index.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Describes what a cache entry was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub fingerprint: Fingerprint,
    pub source_name: String,
    pub embedding_model: String,
    pub chunking: ChunkingConfig,
    pub segment_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Maps document fingerprints to persisted indexes under one root directory.
///
/// Each entry lives in `<root>/<fingerprint>/`; a rebuild replaces the files
/// in place, so there is never more than one entry per fingerprint.
pub struct IndexCache<X> {
    root: PathBuf,
    extractor: X,
    chunker: SentenceChunker,
}

impl<X: PdfExtractor> IndexCache<X> {
    pub fn new(root: impl Into<PathBuf>, extractor: X, chunker: SentenceChunker) -> Self {
        Self {
            root: root.into(),
            extractor,
            chunker,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_hex())
    }

    /// Returns the cached index for `document`, building and persisting it on
    /// a miss. Unusable cache entries are logged and rebuilt.
    pub fn get_or_build<E>(&self, document: &Path, embedder: &E) -> Result<VectorIndex, IngestError>
    where
        E: Embedder + ?Sized,
    {
        let fingerprint = fingerprint_file(document).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                IngestError::Extraction(ExtractionFailure::NotFound(document.to_path_buf()))
            } else {
                IngestError::Fingerprint {
                    path: document.to_path_buf(),
                    source,
                }
            }
        })?;
        let entry = self.entry_dir(&fingerprint);

        match self.load(&fingerprint, embedder) {
            Ok(Some(index)) => {
                info!(
                    %fingerprint,
                    path = %entry.display(),
                    segments = index.len(),
                    "loaded index from cache"
                );
                return Ok(index);
            }
            Ok(None) => info!(%fingerprint, "no cached index found, building new index"),
            Err(CacheError::Stale(reason)) => {
                info!(%fingerprint, %reason, "cached index is stale, rebuilding")
            }
            Err(CacheError::Io(error)) => {
                warn!(%fingerprint, %error, "cached index is unreadable, rebuilding")
            }
            Err(error) => warn!(%fingerprint, %error, "cached index is corrupt, rebuilding"),
        }

        let text = self.extractor.extract_text(document)?;
        let segments = self.chunker.chunk(text.as_str());
        if segments.is_empty() {
            return Err(IngestError::Chunking(document.to_path_buf()));
        }
        info!(segments = segments.len(), "split text into segments");

        let index = VectorIndex::build(segments, embedder)?;
        match self.persist(&fingerprint, document, &index) {
            Ok(()) => info!(%fingerprint, path = %entry.display(), "persisted index to cache"),
            Err(error) => warn!(%fingerprint, %error, "failed to persist index, continuing uncached"),
        }
        Ok(index)
    }

    fn load<E>(&self, fingerprint: &Fingerprint, embedder: &E) -> Result<Option<VectorIndex>, CacheError>
    where
        E: Embedder + ?Sized,
    {
        let entry = self.entry_dir(fingerprint);
        let manifest_bytes = match fs::read(entry.join(MANIFEST_FILE)) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %entry.display(), "cache miss");
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let manifest: CacheManifest = serde_json::from_slice(&manifest_bytes)?;

        if &manifest.fingerprint != fingerprint {
            return Err(CacheError::Corrupt(format!(
                "manifest fingerprint {} does not match {}",
                manifest.fingerprint, fingerprint
            )));
        }
        if manifest.embedding_model != embedder.model_id() {
            return Err(CacheError::Stale(format!(
                "built with embedding model {}, configured {}",
                manifest.embedding_model,
                embedder.model_id()
            )));
        }
        if manifest.chunking != self.chunker.config() {
            return Err(CacheError::Stale(format!(
                "built with chunk size {}/{}, configured {}/{}",
                manifest.chunking.chunk_size,
                manifest.chunking.chunk_overlap,
                self.chunker.config().chunk_size,
                self.chunker.config().chunk_overlap
            )));
        }

        let index = VectorIndex::deserialize(&fs::read(entry.join(INDEX_FILE))?)?;
        if index.len() != manifest.segment_count || index.embedding_model() != manifest.embedding_model
        {
            return Err(CacheError::Corrupt(format!(
                "index holds {} segments from {}, manifest records {} from {}",
                index.len(),
                index.embedding_model(),
                manifest.segment_count,
                manifest.embedding_model
            )));
        }

        Ok(Some(index))
    }

    fn persist(
        &self,
        fingerprint: &Fingerprint,
        document: &Path,
        index: &VectorIndex,
    ) -> Result<(), CacheError> {
        let entry = self.entry_dir(fingerprint);
        fs::create_dir_all(&entry)?;

        match fs::remove_file(entry.join(MANIFEST_FILE)) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => return Err(error.into()),
            _ => {}
        }

        write_replacing(&entry.join(INDEX_FILE), &index.serialize()?)?;

        let manifest = CacheManifest {
            fingerprint: fingerprint.clone(),
            source_name: document
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            embedding_model: index.embedding_model().to_string(),
            chunking: self.chunker.config(),
            segment_count: index.len(),
            created_at: Utc::now(),
        };
        write_replacing(&entry.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)?;
        Ok(())
    }
}

/// Writes through a sibling temp file and renames it over `path`.
fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, bytes)?;
    fs::rename(&temp, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })
}
