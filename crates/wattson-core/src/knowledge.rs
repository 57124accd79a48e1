//! In-memory historical knowledge store
//!
//! Linear cosine-similarity search over stored cases, with optional JSON
//! persistence so precedent survives restarts.

use crate::diagnosis::signature::cosine_similarity;
use crate::error::Result;
use crate::ports::{HistoricalCase, KnowledgeStore, SimilarCase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// On-disk layout
#[derive(Serialize, Deserialize, Default)]
struct KnowledgeData {
    cases: Vec<HistoricalCase>,
}

/// Knowledge store backed by a vector of cases
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    cases: Arc<RwLock<Vec<HistoricalCase>>>,
    storage_path: Option<PathBuf>,
}

impl InMemoryKnowledgeStore {
    /// Memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist to `path`, loading whatever is already there
    pub async fn with_storage(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cases = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let data: KnowledgeData = serde_json::from_str(&content)?;
            tracing::info!(
                path = %path.display(),
                cases = data.cases.len(),
                "Loaded knowledge store"
            );
            data.cases
        } else {
            Vec::new()
        };

        Ok(Self {
            cases: Arc::new(RwLock::new(cases)),
            storage_path: Some(path),
        })
    }

    pub async fn len(&self) -> usize {
        self.cases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cases.read().await.is_empty()
    }

    pub async fn cases(&self) -> Vec<HistoricalCase> {
        self.cases.read().await.clone()
    }

    async fn save_to_disk(&self) -> Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        let data = KnowledgeData {
            cases: self.cases.read().await.clone(),
        };
        let content = serde_json::to_string_pretty(&data)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn find_similar(&self, embedding: &[f64], k: usize) -> Result<Vec<SimilarCase>> {
        let cases = self.cases.read().await;
        let mut scored: Vec<SimilarCase> = cases
            .iter()
            .map(|case| SimilarCase {
                similarity: cosine_similarity(embedding, &case.signature),
                case: case.clone(),
            })
            .filter(|s| s.similarity > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.case.recorded_at.cmp(&a.case.recorded_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn store(&self, case: HistoricalCase) -> Result<()> {
        {
            let mut cases = self.cases.write().await;
            match cases.iter_mut().find(|c| c.id == case.id) {
                Some(existing) => *existing = case,
                None => cases.push(case),
            }
        }
        self.save_to_disk().await
    }
}
