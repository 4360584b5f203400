use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rxguard_core::{GuidelinePassage, RetrievalService, ServiceError, Settings};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::chunker::FixedSizeChunker;
use crate::embedder::embedder_for;
use crate::error::IndexError;
use crate::index::GuidelineIndex;
use crate::loader::load_corpus;
use crate::types::EmbeddingModel;

#[derive(Debug, Clone)]
pub struct GuidelineStoreConfig {
    pub guideline_dir: PathBuf,
    pub vector_store_path: PathBuf,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&Settings> for GuidelineStoreConfig {
    fn from(s: &Settings) -> Self {
        Self {
            guideline_dir: s.guideline_dir.clone(),
            vector_store_path: s.vector_store_path.clone(),
            embedding_model: s.embedding_model.clone(),
            chunk_size: s.chunk_size,
            chunk_overlap: s.chunk_overlap,
        }
    }
}

/// Lazily initialised, process-wide guideline index.
///
/// The first search loads the persisted index or builds it from the corpus.
/// Concurrent callers share one in-flight initialisation; a failed attempt
/// leaves the store unloaded so the next search tries again.
pub struct GuidelineStore {
    config: GuidelineStoreConfig,
    embedder: Arc<dyn EmbeddingModel>,
    index: OnceCell<Arc<GuidelineIndex>>,
    initializations: Arc<AtomicUsize>,
}

impl GuidelineStore {
    pub fn new(config: GuidelineStoreConfig) -> Result<Self, IndexError> {
        let embedder: Arc<dyn EmbeddingModel> = Arc::from(embedder_for(&config.embedding_model)?);
        Ok(Self {
            config,
            embedder,
            index: OnceCell::new(),
            initializations: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, IndexError> {
        Self::new(GuidelineStoreConfig::from(settings))
    }

    pub fn is_loaded(&self) -> bool {
        self.index.initialized()
    }

    /// Number of load-or-build attempts made so far.
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub async fn index(&self) -> Result<Arc<GuidelineIndex>, IndexError> {
        self.index
            .get_or_try_init(|| async {
                let config = self.config.clone();
                let embedder = Arc::clone(&self.embedder);
                let counter = Arc::clone(&self.initializations);
                tokio::task::spawn_blocking(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    load_or_build(&config, embedder.as_ref())
                })
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?
                .map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    /// Force initialisation ahead of the first case; returns the chunk count.
    pub async fn warm(&self) -> Result<usize, IndexError> {
        Ok(self.index().await?.len())
    }
}

fn load_or_build(
    config: &GuidelineStoreConfig,
    embedder: &dyn EmbeddingModel,
) -> Result<GuidelineIndex, IndexError> {
    if GuidelineIndex::exists(&config.vector_store_path) {
        let index = GuidelineIndex::load(&config.vector_store_path, embedder.id())?;
        info!(
            path = %config.vector_store_path.display(),
            chunks = index.len(),
            "Loaded persisted guideline index"
        );
        return Ok(index);
    }

    info!(dir = %config.guideline_dir.display(), "Building guideline index from corpus");
    let documents = load_corpus(&config.guideline_dir)?;
    let chunker = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap);
    let index = GuidelineIndex::build(
        &documents,
        &chunker,
        embedder,
        config.chunk_size,
        config.chunk_overlap,
    )?;
    index.save(&config.vector_store_path)?;
    Ok(index)
}

#[async_trait]
impl RetrievalService for GuidelineStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<GuidelinePassage>, ServiceError> {
        let index = self.index().await.map_err(|e| {
            warn!(error = %e, "Guideline index unavailable");
            ServiceError::from(e)
        })?;
        let embedding = self.embedder.embed(query)?;
        let passages = index.search(&embedding, k);
        debug!(k, returned = passages.len(), "Guideline search complete");
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_corpus(dir: &Path) {
        std::fs::write(
            dir.join("renal.txt"),
            "Metformin dosing in renal impairment.\x0cAvoid ibuprofen and NSAIDs in chronic kidney disease.",
        )
        .unwrap();
        std::fs::write(dir.join("cardio.md"), "Beta blockers after myocardial infarction.").unwrap();
    }

    fn config(corpus: &Path, store: &Path) -> GuidelineStoreConfig {
        GuidelineStoreConfig {
            guideline_dir: corpus.to_path_buf(),
            vector_store_path: store.to_path_buf(),
            embedding_model: "hashing-384".into(),
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }

    #[tokio::test]
    async fn first_search_builds_and_persists() {
        let corpus = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        write_corpus(corpus.path());

        let store = GuidelineStore::new(config(corpus.path(), store_dir.path())).unwrap();
        assert!(!store.is_loaded());

        let hits = store.search("ibuprofen chronic kidney disease", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("ibuprofen"));
        assert_eq!(hits[0].page, 1);
        assert!(store.is_loaded());
        assert!(GuidelineIndex::exists(store_dir.path()));

        store.search("metformin", 1).await.unwrap();
        assert_eq!(store.initializations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_searches_share_one_build() {
        let corpus = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        write_corpus(corpus.path());
        let store = Arc::new(GuidelineStore::new(config(corpus.path(), store_dir.path())).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.search("ibuprofen", 3).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(store.initializations(), 1);
    }

    #[tokio::test]
    async fn persisted_index_is_reused_without_corpus() {
        let corpus = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        write_corpus(corpus.path());
        GuidelineStore::new(config(corpus.path(), store_dir.path()))
            .unwrap()
            .warm()
            .await
            .unwrap();

        let missing = corpus.path().join("gone");
        let store = GuidelineStore::new(config(&missing, store_dir.path())).unwrap();
        assert_eq!(store.warm().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_build_can_be_retried() {
        let corpus = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = GuidelineStore::new(config(corpus.path(), store_dir.path())).unwrap();

        let err = store.search("ibuprofen", 3).await.unwrap_err();
        assert!(matches!(err, ServiceError::CorpusUnavailable(_)));
        assert!(!store.is_loaded());

        write_corpus(corpus.path());
        assert!(store.search("ibuprofen", 3).await.is_ok());
        assert_eq!(store.initializations(), 2);
    }

    #[tokio::test]
    async fn model_mismatch_is_unavailable() {
        let corpus = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        write_corpus(corpus.path());
        GuidelineStore::new(config(corpus.path(), store_dir.path()))
            .unwrap()
            .warm()
            .await
            .unwrap();

        let mut other = config(corpus.path(), store_dir.path());
        other.embedding_model = "hashing-64".into();
        let store = GuidelineStore::new(other).unwrap();
        let err = store.search("ibuprofen", 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::CorpusUnavailable(_)));
    }

    #[test]
    fn unknown_model_is_rejected_up_front() {
        let mut cfg = config(Path::new("."), Path::new("."));
        cfg.embedding_model = "text-embedding-3-small".into();
        assert!(matches!(GuidelineStore::new(cfg), Err(IndexError::UnknownModel(_))));
    }
}
