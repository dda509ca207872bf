// src/recipe.rs
use async_trait::async_trait;
use tracing::{error, info};

use crate::job::{Job, JobHandler};

/// The collaborator that does the actual scraping: fetch one recipe by URL
/// and persist it wherever the engine stores recipes.
#[async_trait]
pub trait RecipeFetcher: Send + Sync {
    async fn fetch(&self, recipe_url: &str) -> anyhow::Result<()>;
}

/// Handler for `{"recipe_url": ...}` jobs.
///
/// Field validation happens here, not in the queue: a job missing its
/// `recipe_url` is logged and dropped, and a failed fetch is logged rather
/// than bubbled up, so neither ever looks like a worker failure.
pub struct GetRecipeHandler<F> {
    fetcher: F,
}

impl<F: RecipeFetcher> GetRecipeHandler<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: RecipeFetcher> JobHandler for GetRecipeHandler<F> {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let mut missing_fields = Vec::new();
        if job.get_str("recipe_url").is_none() {
            missing_fields.push("recipe_url");
        }
        if !missing_fields.is_empty() {
            error!(?missing_fields, job = %job, "missing fields");
            return Ok(());
        }
        let recipe_url = match job.get_str("recipe_url") {
            Some(url) => url,
            None => return Ok(()),
        };

        if let Err(e) = self.fetcher.fetch(recipe_url).await {
            error!(recipe_url, error = ?e, "failed to retrieve recipe");
            return Ok(());
        }
        info!(recipe_url, "retrieved recipe");
        Ok(())
    }
}
