//! Doc Index - retrieval-augmented documentation with cached embeddings.
//!
//! On startup the configured source pages are fetched, chunked and
//! embedded; embeddings persist in `${CACHE_DIR}/docs-cache.json` keyed by
//! source URL and content hash, so an unchanged page never re-embeds. When
//! no source is reachable the index seeds itself from a built-in minimal
//! corpus and stays operational. The chunk list is read-mostly; refresh
//! takes the write lock exclusively.

pub mod cache;
pub mod chunker;
pub mod corpus;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use self::cache::{CachedChunk, CachedDoc, DocCache, DocsCacheFile, content_hash};
use self::chunker::{ChunkDraft, ChunkType, chunk_document};
use self::corpus::BUILTIN_CORPUS;
use super::llm::{ChatGateway, LLMError};
use crate::config::DocsConfig;

/// Chunks per embeddings request
const EMBED_BATCH: usize = 64;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DocIndexError {
    #[error("Failed to fetch {url}: {error}")]
    Fetch { url: String, error: String },

    #[error(transparent)]
    Embed(#[from] LLMError),
}

#[derive(Debug, Clone)]
struct DocChunk {
    content: String,
    chunk_type: ChunkType,
    embedding: Vec<f32>,
}

/// One search result handed to the agent and the client
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocSearchHit {
    pub content: String,
    pub score: f64,
    pub doc_type: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocIndexStatus {
    pub ready: bool,
    pub chunk_count: usize,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
    pub fallback_active: bool,
    pub cache_file: String,
}

pub struct DocIndex {
    gateway: Arc<dyn ChatGateway>,
    http_client: reqwest::Client,
    cache: DocCache,
    sources: Vec<String>,
    chunk_chars: usize,
    top_k: usize,
    max_cache_age_days: i64,
    cache_state: Mutex<DocsCacheFile>,
    chunks: RwLock<Vec<DocChunk>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    fallback_active: AtomicBool,
}

impl DocIndex {
    pub fn new(gateway: Arc<dyn ChatGateway>, cfg: &DocsConfig) -> Self {
        let cache = DocCache::new(&cfg.cache_dir);
        let cache_state = Mutex::new(cache.load());
        Self {
            gateway,
            http_client: reqwest::Client::new(),
            cache,
            sources: cfg.sources.clone(),
            chunk_chars: cfg.chunk_chars,
            top_k: cfg.top_k,
            max_cache_age_days: cfg.max_cache_age_days,
            cache_state,
            chunks: RwLock::new(Vec::new()),
            last_refresh: RwLock::new(None),
            fallback_active: AtomicBool::new(false),
        }
    }

    /// Build the index once at startup; never fails the process
    pub async fn init(&self) {
        let count = self.refresh(false).await;
        tracing::info!(
            "Doc index initialized with {} chunks (fallback: {})",
            count,
            self.fallback_active.load(Ordering::Relaxed)
        );
    }

    /// Re-fetch every source, re-embedding only what changed (or everything
    /// when `force` is set). Returns the resulting chunk count.
    pub async fn refresh(&self, force: bool) -> usize {
        let mut state = self.cache_state.lock().await;
        let mut new_chunks: Vec<DocChunk> = Vec::new();
        let now = Utc::now();

        for url in &self.sources {
            match self.fetch_source(url).await {
                Ok(content) => {
                    let hash = content_hash(&content);
                    let reusable = !force
                        && state.docs.get(url).is_some_and(|cached| {
                            cached.content_hash == hash
                                && cached.age_days(now) < self.max_cache_age_days
                                && cached.is_consistent()
                        });

                    if reusable {
                        let cached = &state.docs[url];
                        tracing::info!("Doc source {} unchanged, reusing cached embeddings", url);
                        new_chunks.extend(cached_to_chunks(cached));
                        continue;
                    }

                    let drafts = chunk_document(&content, self.chunk_chars);
                    match self.embed_drafts(&drafts).await {
                        Ok(embeddings) => {
                            tracing::info!("Embedded {} chunks from {}", drafts.len(), url);
                            state.docs.insert(
                                url.clone(),
                                CachedDoc {
                                    content_hash: hash,
                                    content,
                                    chunks: drafts
                                        .iter()
                                        .map(|d| CachedChunk {
                                            content: d.content.clone(),
                                            chunk_type: d.chunk_type,
                                        })
                                        .collect(),
                                    embeddings: embeddings.clone(),
                                    timestamp: now,
                                },
                            );
                            new_chunks.extend(drafts.into_iter().zip(embeddings).map(
                                |(draft, embedding)| DocChunk {
                                    content: draft.content,
                                    chunk_type: draft.chunk_type,
                                    embedding,
                                },
                            ));
                        },
                        Err(e) => {
                            tracing::warn!("Embedding {} failed: {}", url, e);
                            if let Some(cached) = state.docs.get(url) {
                                tracing::warn!("Falling back to stale cache for {}", url);
                                new_chunks.extend(cached_to_chunks(cached));
                            }
                        },
                    }
                },
                Err(e) => {
                    tracing::warn!("{}", e);
                    if let Some(cached) = state.docs.get(url) {
                        tracing::warn!("Using cached copy of unreachable source {}", url);
                        new_chunks.extend(cached_to_chunks(cached));
                    }
                },
            }
        }

        let fallback = new_chunks.is_empty();
        if fallback {
            tracing::warn!("No documentation source available, seeding built-in corpus");
            new_chunks = self.seed_builtin_corpus().await;
        }
        self.fallback_active.store(fallback, Ordering::Relaxed);

        state.last_check = Some(now);
        if let Err(e) = self.cache.save(&state) {
            tracing::warn!("Failed to persist doc cache: {}", e);
        }
        drop(state);

        let count = new_chunks.len();
        *self.chunks.write().await = new_chunks;
        *self.last_refresh.write().await = Some(now);
        count
    }

    /// Embed the query and return the top-K chunks by cosine similarity
    pub async fn search(&self, query: &str) -> Vec<DocSearchHit> {
        let chunks = self.chunks.read().await;
        if chunks.is_empty() {
            return Vec::new();
        }

        let query_embedding = match self.gateway.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Query embedding failed, skipping doc retrieval: {}", e);
                return Vec::new();
            },
        };

        let mut scored: Vec<(f64, &DocChunk)> = chunks
            .iter()
            .filter_map(|chunk| {
                let score = cosine_similarity(&query_embedding, &chunk.embedding)?;
                Some((score, chunk))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(self.top_k)
            .map(|(score, chunk)| DocSearchHit {
                content: chunk.content.clone(),
                score,
                doc_type: chunk.chunk_type.as_str().to_string(),
            })
            .collect()
    }

    pub async fn status(&self) -> DocIndexStatus {
        DocIndexStatus {
            ready: !self.chunks.read().await.is_empty(),
            chunk_count: self.chunks.read().await.len(),
            sources: self.sources.clone(),
            last_refresh: *self.last_refresh.read().await,
            fallback_active: self.fallback_active.load(Ordering::Relaxed),
            cache_file: self.cache.path().display().to_string(),
        }
    }

    /// Purge the on-disk embedding cache; the in-memory index stays live
    pub async fn clear_cache(&self) -> bool {
        let mut state = self.cache_state.lock().await;
        *state = DocsCacheFile::default();
        self.cache.clear()
    }

    /// Persist the cache state; called on shutdown
    pub async fn flush(&self) {
        let state = self.cache_state.lock().await;
        if let Err(e) = self.cache.save(&state) {
            tracing::warn!("Failed to flush doc cache on shutdown: {}", e);
        }
    }

    async fn fetch_source(&self, url: &str) -> Result<String, DocIndexError> {
        let response = self
            .http_client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| DocIndexError::Fetch { url: url.to_string(), error: e.to_string() })?;

        if !response.status().is_success() {
            return Err(DocIndexError::Fetch {
                url: url.to_string(),
                error: format!("status {}", response.status()),
            });
        }

        response
            .text()
            .await
            .map_err(|e| DocIndexError::Fetch { url: url.to_string(), error: e.to_string() })
    }

    async fn embed_drafts(&self, drafts: &[ChunkDraft]) -> Result<Vec<Vec<f32>>, LLMError> {
        let mut embeddings = Vec::with_capacity(drafts.len());
        for batch in drafts.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            embeddings.extend(self.gateway.embed(&texts).await?);
        }
        Ok(embeddings)
    }

    /// Built-in corpus with best-effort embeddings; zero vectors keep the
    /// index alive even when the embeddings provider is down
    async fn seed_builtin_corpus(&self) -> Vec<DocChunk> {
        let texts: Vec<String> = BUILTIN_CORPUS.iter().map(|(text, _)| text.to_string()).collect();
        let embeddings = match self.gateway.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!("Embedding built-in corpus failed: {}", e);
                vec![Vec::new(); texts.len()]
            },
        };

        BUILTIN_CORPUS
            .iter()
            .zip(embeddings)
            .map(|((text, chunk_type), embedding)| DocChunk {
                content: text.to_string(),
                chunk_type: *chunk_type,
                embedding,
            })
            .collect()
    }
}

fn cached_to_chunks(cached: &CachedDoc) -> Vec<DocChunk> {
    cached
        .chunks
        .iter()
        .zip(cached.embeddings.iter())
        .map(|(chunk, embedding)| DocChunk {
            content: chunk.content.clone(),
            chunk_type: chunk.chunk_type,
            embedding: embedding.clone(),
        })
        .collect()
}

/// None when either vector is empty or zero-norm
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("similarity");
        assert!(orthogonal.abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
    }
}
