//! Local semantic embeddings via fastembed (ONNX, no external API calls).
//!
//! Default model: BAAI/bge-small-en-v1.5 — 384 dimensions natively, matching
//! the default dimension the Vector Index Adapter is configured for. Unlike
//! nomic-embed-text-v1.5's Matryoshka truncation, no post-hoc dimension
//! reduction is needed here.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbeddingError, EmbeddingProvider};

/// Native output dimension of the default embedding model.
pub const EMBEDDING_DIMENSIONS: usize = 384;

const MAX_TEXT_LENGTH: usize = 8192;
const BATCH_SIZE: usize = 32;

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(dirs) = directories::ProjectDirs::from("dev", "memoria", "memoria") {
        return dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create fastembed cache dir {:?}: {}", dir, e);
        }
        let options = InitOptions::new(EmbeddingModel::BGESmallENV15)
            .with_show_download_progress(true)
            .with_cache_dir(dir);
        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize bge-small-en-v1.5: {e}"))
    });

    match result {
        Ok(m) => m.lock().map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
        Err(e) => Err(EmbeddingError::ModelInit(e.clone())),
    }
}

/// The [`EmbeddingProvider`] backed by a process-wide lazily-initialized
/// fastembed model. Cheap to construct; construction does not itself touch
/// the model.
#[derive(Default)]
pub struct LocalEmbeddingProvider;

impl LocalEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Force model initialization (e.g. at server startup) so the first
    /// real request isn't the one paying the download/load cost.
    pub fn warm_up(&self) -> Result<(), EmbeddingError> {
        model().map(|_| ())
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let mut m = model()?;
        let truncated = if text.len() > MAX_TEXT_LENGTH { &text[..MAX_TEXT_LENGTH] } else { text };
        let mut out = m
            .embed(vec![truncated], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
        out.pop().ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".into()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut m = model()?;
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t })
                .collect();
            let embeddings = m
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            all.extend(embeddings);
        }
        Ok(all)
    }
}
