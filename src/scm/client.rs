//! # Bitbucket Server REST client
//!
//! Thin client over the Bitbucket Server 1.0 REST API, authenticated with
//! fixed basic-auth credentials. The base URL is injectable so tests can
//! point it at a mock server.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the Bitbucket client.
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("request to Bitbucket failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bitbucket returned status {status} for {operation}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
    },
    #[error("Bitbucket response is missing field '{field}'")]
    MissingField { field: &'static str },
}

/// REST client for one Bitbucket Server instance.
#[derive(Clone)]
pub struct BitbucketClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl BitbucketClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn repo_url(&self, project: &str, slug: &str) -> String {
        format!(
            "{}/rest/api/1.0/projects/{}/repos/{}",
            self.base_url, project, slug
        )
    }

    /// Display name of the repository's default branch.
    pub async fn default_branch(&self, project: &str, slug: &str) -> Result<String, ScmError> {
        let url = format!("{}/branches/default", self.repo_url(project, slug));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScmError::UnexpectedStatus {
                operation: "default branch lookup",
                status: response.status().as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        body.get("displayId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(ScmError::MissingField { field: "displayId" })
    }

    /// Raw file content at the repository root, as text. A missing file is
    /// reported through `UnexpectedStatus`; callers that parse the content
    /// permissively treat that as "no config".
    pub async fn raw_file(&self, project: &str, slug: &str, path: &str) -> Result<String, ScmError> {
        let url = format!("{}/raw/{}", self.repo_url(project, slug), path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScmError::UnexpectedStatus {
                operation: "raw file fetch",
                status: response.status().as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    /// Post a comment on a pull request.
    pub async fn add_comment(
        &self,
        project: &str,
        slug: &str,
        pull_request_id: i64,
        text: &str,
    ) -> Result<(), ScmError> {
        let url = format!(
            "{}/pull-requests/{}/comments",
            self.repo_url(project, slug),
            pull_request_id
        );

        debug!(project = %project, slug = %slug, pull_request_id, "Posting pull request comment");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScmError::UnexpectedStatus {
                operation: "comment",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /// Register a user as a reviewer on a pull request.
    pub async fn add_reviewer(
        &self,
        project: &str,
        slug: &str,
        pull_request_id: i64,
        username: &str,
    ) -> Result<(), ScmError> {
        let url = format!(
            "{}/pull-requests/{}/participants",
            self.repo_url(project, slug),
            pull_request_id
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({
                "user": { "name": username },
                "role": "REVIEWER",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScmError::UnexpectedStatus {
                operation: "add reviewer",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    /// Remove a user from a pull request's participant list.
    pub async fn remove_reviewer(
        &self,
        project: &str,
        slug: &str,
        pull_request_id: i64,
        username: &str,
    ) -> Result<(), ScmError> {
        let url = format!(
            "{}/pull-requests/{}/participants/{}",
            self.repo_url(project, slug),
            pull_request_id,
            username
        );

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScmError::UnexpectedStatus {
                operation: "remove reviewer",
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
