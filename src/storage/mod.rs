//! Object storage gateway interface.
//!
//! The worker never talks to a cloud SDK directly — it consumes a narrow
//! download/metadata contract so tests can substitute a local fixture
//! store. `HttpStorage` is the production implementation against the
//! storage gateway service.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Attribution metadata attached to a stored archive object.
///
/// `user_id`, `bot_type` and the execution id are required for the task to
/// enter processing; `meeting_title` is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMetadata {
    pub user_id: String,
    pub bot_type: String,
    pub execution_id: String,
    pub meeting_title: Option<String>,
}

impl TaskMetadata {
    /// Parse the raw metadata map from the storage gateway.
    ///
    /// Upstream writers sometimes store the literal string "None" for
    /// absent values; treat that and the empty string as missing.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let field = |key: &str| -> Option<String> {
            map.get(key)
                .filter(|v| !v.is_empty() && v.as_str() != "None")
                .cloned()
        };

        let user_id = field("user_id")
            .ok_or_else(|| PipelineError::MetadataMissing("user_id".to_string()))?;
        let bot_type = field("bot_type")
            .ok_or_else(|| PipelineError::MetadataMissing("bot_type".to_string()))?;
        let execution_id =
            field("id").ok_or_else(|| PipelineError::MetadataMissing("id".to_string()))?;

        Ok(Self {
            user_id,
            bot_type,
            execution_id,
            meeting_title: field("meeting_title"),
        })
    }
}

/// Read-side contract against object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Download the object at `key` to `dest` on the local filesystem.
    async fn download(&self, key: &str, dest: &Path) -> Result<(), PipelineError>;

    /// Fetch the object's user metadata, or `None` if the object is absent.
    async fn get_metadata(
        &self,
        key: &str,
    ) -> Result<Option<HashMap<String, String>>, PipelineError>;
}

/// HTTP implementation against the storage gateway:
/// `GET {base}/objects/{key}` for content,
/// `GET {base}/objects/{key}/metadata` for the metadata map.
pub struct HttpStorage {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpStorage {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        info!("Initialized storage gateway client: {}", base_url);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    async fn download(&self, key: &str, dest: &Path) -> Result<(), PipelineError> {
        let url = format!("{}/objects/{}", self.base_url, key);
        debug!("Downloading {} to {:?}", url, dest);

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::DownloadFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::DownloadFailure(format!(
                "storage gateway returned {} for {}",
                response.status(),
                key
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::DownloadFailure(e.to_string()))?;

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| PipelineError::DownloadFailure(e.to_string()))?;

        debug!("Downloaded {} bytes for {}", bytes.len(), key);
        Ok(())
    }

    async fn get_metadata(
        &self,
        key: &str,
    ) -> Result<Option<HashMap<String, String>>, PipelineError> {
        let url = format!("{}/objects/{}/metadata", self.base_url, key);

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::DownloadFailure(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(PipelineError::DownloadFailure(format!(
                "metadata request returned {} for {}",
                response.status(),
                key
            )));
        }

        let map = response
            .json::<HashMap<String, String>>()
            .await
            .map_err(|e| PipelineError::DownloadFailure(e.to_string()))?;

        Ok(Some(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_map() -> HashMap<String, String> {
        HashMap::from([
            ("user_id".to_string(), "user-42".to_string()),
            ("bot_type".to_string(), "zoom".to_string()),
            ("id".to_string(), "exec-7".to_string()),
            ("meeting_title".to_string(), "Weekly sync".to_string()),
        ])
    }

    #[test]
    fn test_metadata_parses_all_fields() {
        let meta = TaskMetadata::from_map(&full_map()).unwrap();
        assert_eq!(meta.user_id, "user-42");
        assert_eq!(meta.bot_type, "zoom");
        assert_eq!(meta.execution_id, "exec-7");
        assert_eq!(meta.meeting_title, Some("Weekly sync".to_string()));
    }

    #[test]
    fn test_metadata_title_is_optional() {
        let mut map = full_map();
        map.remove("meeting_title");
        let meta = TaskMetadata::from_map(&map).unwrap();
        assert_eq!(meta.meeting_title, None);
    }

    #[test]
    fn test_metadata_missing_required_field() {
        let mut map = full_map();
        map.remove("bot_type");
        let err = TaskMetadata::from_map(&map).unwrap_err();
        assert!(matches!(err, PipelineError::MetadataMissing(_)));
        assert!(err.to_string().contains("bot_type"));
    }

    #[test]
    fn test_metadata_none_string_treated_as_absent() {
        let mut map = full_map();
        map.insert("user_id".to_string(), "None".to_string());
        let err = TaskMetadata::from_map(&map).unwrap_err();
        assert!(err.to_string().contains("user_id"));
    }

    #[test]
    fn test_metadata_empty_string_treated_as_absent() {
        let mut map = full_map();
        map.insert("meeting_title".to_string(), String::new());
        let meta = TaskMetadata::from_map(&map).unwrap();
        assert_eq!(meta.meeting_title, None);
    }
}
