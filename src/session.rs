use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::{ArchiveApi, ClientError};
use crate::records::{ArticleDetail, ArticleSummary, Magazine};

/// In-memory state for one logged-in run: the archive client plus three
/// memoization maps. Entries live until the next login; they are never
/// refreshed within a session. Shared across every worker via `Arc`.
pub struct Session {
    client: Arc<dyn ArchiveApi>,
    magazines_by_year: Mutex<HashMap<String, Vec<Magazine>>>,
    articles_by_magazine: Mutex<HashMap<String, Vec<ArticleSummary>>>,
    article_details: Mutex<HashMap<String, ArticleDetail>>,
}

impl Session {
    pub fn new(client: Arc<dyn ArchiveApi>) -> Self {
        Self {
            client,
            magazines_by_year: Mutex::new(HashMap::new()),
            articles_by_magazine: Mutex::new(HashMap::new()),
            article_details: Mutex::new(HashMap::new()),
        }
    }

    /// Logs in and drops every cache; a fresh login starts a fresh view of
    /// the archive.
    pub async fn login(&self) -> Result<(), ClientError> {
        self.magazines_by_year.lock().await.clear();
        self.articles_by_magazine.lock().await.clear();
        self.article_details.lock().await.clear();
        self.client.login().await
    }

    pub async fn years(&self) -> Result<Vec<String>, ClientError> {
        self.client.fetch_years().await
    }

    pub async fn magazines(&self, year: &str) -> Result<Vec<Magazine>, ClientError> {
        if let Some(found) = self.magazines_by_year.lock().await.get(year) {
            return Ok(found.clone());
        }

        let mut magazines = self.client.fetch_magazines(year).await?;
        // Some payloads omit the year; the cache key is authoritative.
        for magazine in &mut magazines {
            if magazine.year.is_none() {
                magazine.year = Some(year.to_owned());
            }
        }

        // check-then-insert per key; if two fetches raced, the first insert
        // wins and the duplicate result is discarded.
        let mut cache = self.magazines_by_year.lock().await;
        let stored = cache.entry(year.to_owned()).or_insert(magazines);
        Ok(stored.clone())
    }

    pub async fn articles(&self, magazine_id: &str) -> Result<Vec<ArticleSummary>, ClientError> {
        if let Some(found) = self.articles_by_magazine.lock().await.get(magazine_id) {
            return Ok(found.clone());
        }

        let articles = self.client.fetch_articles(magazine_id).await?;
        let mut cache = self.articles_by_magazine.lock().await;
        let stored = cache.entry(magazine_id.to_owned()).or_insert(articles);
        Ok(stored.clone())
    }

    /// Detail lookup with gap-filling from the list-view record. Enrichment
    /// happens on every lookup, including cache hits, so a caller always gets
    /// a detail at least as complete as its `base`; the cached entry itself
    /// is only enriched once, at insert time.
    pub async fn article_detail(
        &self,
        article_id: &str,
        base: Option<&ArticleSummary>,
    ) -> Result<ArticleDetail, ClientError> {
        {
            let details = self.article_details.lock().await;
            if let Some(found) = details.get(article_id) {
                let mut detail = found.clone();
                drop(details);
                if let Some(base) = base {
                    detail.enrich_from(base);
                }
                return Ok(detail);
            }
        }

        let mut detail = self.client.fetch_article_detail(article_id).await?;
        if let Some(base) = base {
            detail.enrich_from(base);
        }

        let mut cache = self.article_details.lock().await;
        let stored = cache.entry(article_id.to_owned()).or_insert(detail);
        Ok(stored.clone())
    }
}
