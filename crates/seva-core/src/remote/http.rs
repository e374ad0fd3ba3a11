//! HTTP client for the remote document store.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{RemoteDocument, RemoteStore};

const HTTP_TIMEOUT_SECS: u64 = 10;

/// reqwest-backed [`RemoteStore`] implementation.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    store: String,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    /// Build a client for `base_url` and logical store name.
    pub fn new(base_url: impl Into<String>, store: impl Into<String>) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::InvalidInput("remote base URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "remote base URL must include http:// or https://".to_string(),
            ));
        }
        let store = normalize_text_option(Some(store.into()))
            .ok_or_else(|| Error::InvalidInput("remote store name must not be empty".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Transport(error.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            client,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/v1/{}/{collection}", self.base_url, self.store)
    }

    async fn error_from_response(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = compact_text(&body);
        if body.is_empty() {
            Error::Transport(format!("HTTP {status}"))
        } else {
            Error::Transport(format!("HTTP {status}: {body}"))
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>> {
        let response = self
            .client
            .get(format!("{}/{id}", self.collection_url(collection)))
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let doc = response
            .json::<RemoteDocument>()
            .await
            .map_err(|error| Error::Transport(format!("invalid document payload: {error}")))?;
        Ok(Some(doc))
    }

    async fn upsert(&self, collection: &str, doc: &RemoteDocument) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/{}", self.collection_url(collection), doc.id))
            .json(doc)
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<RemoteDocument>> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .query(&[("field", field), ("value", value), ("limit", "1")])
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let mut docs = response
            .json::<Vec<RemoteDocument>>()
            .await
            .map_err(|error| Error::Transport(format!("invalid query response: {error}")))?;
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.swap_remove(0))
        })
    }

    async fn list_since(
        &self,
        collection: &str,
        updated_since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .query(&[
                ("updated_since", updated_since.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<Vec<RemoteDocument>>()
            .await
            .map_err(|error| Error::Transport(format!("invalid list response: {error}")))
    }
}
