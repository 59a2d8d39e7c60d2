//! etcd v2 keys API over HTTP.
//!
//!   PUT    /v2/keys/<key>                      value=<v>
//!   DELETE /v2/keys/<key>?recursive=true
//!   GET    /v2/keys/<key>?recursive=true
//!   GET    /v2/keys/<key>?wait=true&recursive=true[&waitIndex=N]
//!   GET    /v2/keys/                           (X-Etcd-Index header only)
//!
//! Endpoints are tried in order until one answers. Each attempt must
//! produce response headers within the header timeout; a watch body may
//! then stay open until the next change.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{KeyStore, RegistryError, StoreNode};

/// etcd error codes we react to.
const ERROR_KEY_NOT_FOUND: u32 = 100;
const ERROR_EVENT_INDEX_CLEARED: u32 = 401;

/// Store-wide index reported on every response.
const ETCD_INDEX_HEADER: &str = "x-etcd-index";

#[derive(Deserialize)]
struct EtcdResponse {
    #[serde(default)]
    node: Option<StoreNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: String,
    #[serde(default)]
    index: u64,
}

pub struct EtcdStore {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    header_timeout: Duration,
}

impl EtcdStore {
    pub fn new(endpoints: &[String], header_timeout: Duration) -> Result<Self, RegistryError> {
        if endpoints.is_empty() {
            return Err(RegistryError::InvalidEndpoint(String::new()));
        }
        let endpoints = endpoints
            .iter()
            .map(|e| Url::parse(e).map_err(|_| RegistryError::InvalidEndpoint(e.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoints,
            header_timeout,
        })
    }

    fn keys_url(endpoint: &Url, key: &str) -> Result<Url, RegistryError> {
        let key = key.trim_start_matches('/');
        endpoint
            .join(&format!("v2/keys/{key}"))
            .map_err(|_| RegistryError::InvalidEndpoint(endpoint.to_string()))
    }

    /// Send to the first endpoint that produces headers in time.
    async fn send<F>(&self, key: &str, build: F) -> Result<reqwest::Response, RegistryError>
    where
        F: Fn(&reqwest::Client, Url) -> reqwest::RequestBuilder,
    {
        let mut last_error = String::from("no endpoints");
        for endpoint in &self.endpoints {
            let request = build(&self.client, Self::keys_url(endpoint, key)?);
            match tokio::time::timeout(self.header_timeout, request.send()).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "registry endpoint failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::debug!(endpoint = %endpoint, "registry endpoint timed out");
                    last_error = format!("{endpoint}: no response within {:?}", self.header_timeout);
                }
            }
        }
        Err(RegistryError::Unavailable(last_error))
    }

    async fn request<F>(&self, key: &str, build: F) -> Result<StoreNode, RegistryError>
    where
        F: Fn(&reqwest::Client, Url) -> reqwest::RequestBuilder,
    {
        decode(self.send(key, build).await?).await
    }
}

async fn decode(response: reqwest::Response) -> Result<StoreNode, RegistryError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

    if status.is_success() {
        let parsed: EtcdResponse =
            serde_json::from_slice(&body).map_err(|e| RegistryError::Decode(e.to_string()))?;
        return Ok(parsed.node.unwrap_or_default());
    }

    Err(match serde_json::from_slice::<EtcdErrorBody>(&body) {
        Ok(err) if err.error_code == ERROR_KEY_NOT_FOUND => RegistryError::KeyNotFound(err.cause),
        Ok(err) if err.error_code == ERROR_EVENT_INDEX_CLEARED => {
            RegistryError::IndexCleared(err.index)
        }
        Ok(err) => RegistryError::Store {
            code: err.error_code,
            message: err.message,
        },
        Err(_) => RegistryError::Store {
            code: u32::from(status.as_u16()),
            message: String::from_utf8_lossy(&body).into_owned(),
        },
    })
}

#[async_trait]
impl KeyStore for EtcdStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.request(key, |client, url| client.put(url).form(&[("value", value)]))
            .await
            .map(|_| ())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), RegistryError> {
        self.request(key, |client, url| {
            client
                .delete(url)
                .query(&[("recursive", recursive.to_string())])
        })
        .await
        .map(|_| ())
    }

    async fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, RegistryError> {
        self.request(key, |client, url| {
            client
                .get(url)
                .query(&[("recursive", recursive.to_string())])
        })
        .await
    }

    async fn wait(&self, key: &str, after_index: Option<u64>) -> Result<u64, RegistryError> {
        let node = self
            .request(key, |client, url| {
                let mut query = vec![
                    ("wait", "true".to_string()),
                    ("recursive", "true".to_string()),
                ];
                if let Some(index) = after_index {
                    query.push(("waitIndex", (index + 1).to_string()));
                }
                client.get(url).query(&query)
            })
            .await?;
        Ok(node.modified_index)
    }

    async fn current_index(&self) -> Result<u64, RegistryError> {
        let response = self.send("", |client, url| client.get(url)).await?;
        response
            .headers()
            .get(ETCD_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| RegistryError::Decode(format!("missing {ETCD_INDEX_HEADER} header")))
    }
}
