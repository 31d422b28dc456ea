//! In-memory article catalogue served by the demo host.
//!
//! Writes go through [`ArticleService`], which notifies the content version
//! after every successful mutation so cached renderings are dropped.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use super::error::AppError;
use crate::cache::ContentVersion;

const MAX_SLUG_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub slug: String,
    pub title: String,
    pub body: String,
    pub revision: u64,
}

/// Payload accepted when creating or replacing an article.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticleInput {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticleSummary {
    pub slug: String,
    pub title: String,
    pub revision: u64,
}

impl From<&Article> for ArticleSummary {
    fn from(article: &Article) -> Self {
        Self {
            slug: article.slug.clone(),
            title: article.title.clone(),
            revision: article.revision,
        }
    }
}

#[derive(Clone)]
pub struct ArticleService {
    articles: Arc<RwLock<BTreeMap<String, Article>>>,
    versions: Arc<ContentVersion>,
}

impl ArticleService {
    pub fn new(versions: Arc<ContentVersion>) -> Self {
        Self {
            articles: Arc::new(RwLock::new(BTreeMap::new())),
            versions,
        }
    }

    pub async fn list(&self) -> Vec<ArticleSummary> {
        self.articles
            .read()
            .await
            .values()
            .map(ArticleSummary::from)
            .collect()
    }

    pub async fn get(&self, slug: &str) -> Result<Article, AppError> {
        self.articles
            .read()
            .await
            .get(slug)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Create or replace an article, then advance the content version.
    pub async fn upsert(&self, slug: &str, input: ArticleInput) -> Result<Article, AppError> {
        validate_slug(slug)?;
        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }

        let article = {
            let mut articles = self.articles.write().await;
            let revision = articles.get(slug).map_or(1, |existing| existing.revision + 1);
            let article = Article {
                slug: slug.to_string(),
                title: title.to_string(),
                body: input.body,
                revision,
            };
            articles.insert(slug.to_string(), article.clone());
            article
        };

        let evicted = self.versions.content_changed()?;
        info!(
            target = "vercache::content",
            slug,
            revision = article.revision,
            evicted,
            "article saved"
        );
        Ok(article)
    }

    pub async fn delete(&self, slug: &str) -> Result<(), AppError> {
        let removed = self.articles.write().await.remove(slug);
        if removed.is_none() {
            return Err(AppError::NotFound);
        }

        let evicted = self.versions.content_changed()?;
        info!(target = "vercache::content", slug, evicted, "article deleted");
        Ok(())
    }
}

fn validate_slug(slug: &str) -> Result<(), AppError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(AppError::validation(format!(
            "slug must be between 1 and {MAX_SLUG_LEN} characters"
        )));
    }
    if !slug
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Err(AppError::validation(
            "slug may only contain lowercase letters, digits and hyphens",
        ));
    }
    Ok(())
}
