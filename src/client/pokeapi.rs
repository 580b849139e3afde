//! PokeAPI HTTP client
//!
//! Provides `PokeApiClient`, a thin reqwest wrapper that turns HTTP and
//! transport failures into [`FetchError`]s the retry layer can classify.

use super::{ResourcePage, ResourceSource};
use crate::error::FetchError;
use crate::model::{ResourceKey, ResourceKind};
use eyre::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("dexsync/", env!("CARGO_PKG_VERSION"));

/// Client for the public PokeAPI (or anything serving the same layout).
///
/// # Example
/// ```no_run
/// use pokedex_sync::client::PokeApiClient;
/// use std::time::Duration;
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("https://pokeapi.co/api/v2/")?;
/// let client = PokeApiClient::try_new(url, Duration::from_secs(30))?;
/// let total = client.test_connection().await?;
/// println!("{} creatures available", total);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PokeApiClient {
    client: Client,
    url: Url,
}

impl PokeApiClient {
    /// Create a client rooted at `url`.
    ///
    /// Every request carries `timeout`; a request that exceeds it fails with a
    /// transient error.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn try_new(url: Url, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, "application/json".parse()?);
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    /// Get the API root.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Absolute URL of the detail document for `key`.
    pub fn resource_url(&self, key: &ResourceKey) -> Result<Url, FetchError> {
        self.url.join(&key.path()).map_err(|e| {
            FetchError::permanent(format!("cannot build URL for {}: {}", key, e))
        })
    }

    /// Verify the API is reachable.
    ///
    /// Requests the first entry of the creature listing and returns the total
    /// number of creatures the API reports.
    pub async fn test_connection(&self) -> Result<u64> {
        let page = self
            .list(ResourceKind::Creature, 0, 1)
            .await
            .wrap_err_with(|| format!("Failed to reach {}", self.url))?;
        Ok(page.count)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        log::trace!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("GET {} returned {}: {}", url, status, excerpt(&body));
            return Err(classify_status(status, message));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(&url, e))?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Permanent {
            status: Some(status.as_u16()),
            message: format!("malformed JSON from {}: {}", url, e),
        })
    }
}

impl ResourceSource for PokeApiClient {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, FetchError> {
        let url = self.resource_url(key)?;
        self.get_json(url, &[]).await
    }

    async fn list(
        &self,
        kind: ResourceKind,
        offset: usize,
        limit: usize,
    ) -> Result<ResourcePage, FetchError> {
        let url = self
            .url
            .join(&format!("{}/", kind.path()))
            .map_err(|e| FetchError::permanent(format!("cannot build listing URL: {}", e)))?;
        self.get_json(
            url,
            &[("offset", offset.to_string()), ("limit", limit.to_string())],
        )
        .await
    }
}

/// Classify a non-success HTTP status.
///
/// 5xx, 429 and 408 are worth retrying; every other status is permanent.
pub fn classify_status(status: StatusCode, message: String) -> FetchError {
    let code = Some(status.as_u16());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchError::Transient {
            status: code,
            message,
        }
    } else {
        FetchError::Permanent {
            status: code,
            message,
        }
    }
}

fn classify_transport(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_builder() || err.is_redirect() {
        FetchError::permanent(format!("request to {} failed: {}", url, err))
    } else {
        // Timeouts, refused connections and truncated bodies
        FetchError::transient(format!("request to {} failed: {}", url, err))
    }
}

fn excerpt(body: &str) -> &str {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PokeApiClient {
        let url = Url::parse("https://pokeapi.co/api/v2/").unwrap();
        PokeApiClient::try_new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_resource_url() {
        let client = client();
        let url = client.resource_url(&ResourceKey::creature(25)).unwrap();
        assert_eq!(url.as_str(), "https://pokeapi.co/api/v2/pokemon/25/");

        let url = client
            .resource_url(&ResourceKey::new(ResourceKind::Species, "pikachu"))
            .unwrap();
        assert_eq!(url.as_str(), "https://pokeapi.co/api/v2/pokemon-species/pikachu/");
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));

        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());

        let err = classify_status(StatusCode::NOT_FOUND, "gone".into());
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(404));
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), 200);
        assert_eq!(excerpt("short"), "short");
    }
}
