//! Remote metadata sources.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::config::SourceConfig;
use super::error::{AllowlistError, AllowlistResult};

/// A source of trusted CIDR entries.
#[async_trait]
pub trait MetaSource: Send + Sync {
    /// Fetch the raw CIDR entries of the trusted category.
    ///
    /// Entries are returned unparsed; the resolver applies the
    /// skip-on-invalid policy.
    async fn fetch(&self) -> AllowlistResult<Vec<String>>;

    /// Human readable location of the source, for diagnostics.
    fn endpoint(&self) -> &str;
}

/// Metadata document returned by the endpoint: category name → value.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct MetaDocument {
    categories: Map<String, Value>,
}

impl MetaDocument {
    /// Decode a document from a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the decoder message if the body is not a JSON object.
    pub fn from_slice(body: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    }

    /// Entries listed under `category`.
    ///
    /// The key is matched exactly first, then ASCII case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns a message if the category is missing, is not an array, or
    /// holds anything other than strings.
    pub fn entries(&self, category: &str) -> Result<Vec<String>, String> {
        let value = self
            .categories
            .get(category)
            .or_else(|| {
                self.categories
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(category))
                    .map(|(_, value)| value)
            })
            .ok_or_else(|| format!("missing '{category}' category"))?;

        if !value.is_array() {
            return Err(format!(
                "'{category}' category is not an array (found {})",
                json_type(value)
            ));
        }

        Vec::<String>::deserialize(value).map_err(|e| format!("'{category}' category: {e}"))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Fetches the metadata document over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpMetaSource {
    client: reqwest::Client,
    url: String,
    category: String,
}

impl HttpMetaSource {
    /// Build a source with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`AllowlistError::RequestBuild`] if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &SourceConfig) -> AllowlistResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AllowlistError::RequestBuild {
                url: config.url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            category: config.category.clone(),
        })
    }

    fn network_error(&self, e: &reqwest::Error) -> AllowlistError {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else {
            e.to_string()
        };
        AllowlistError::Network {
            url: self.url.clone(),
            message,
        }
    }
}

#[async_trait]
impl MetaSource for HttpMetaSource {
    async fn fetch(&self) -> AllowlistResult<Vec<String>> {
        let request =
            self.client
                .get(&self.url)
                .build()
                .map_err(|e| AllowlistError::RequestBuild {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| self.network_error(&e))?
            .error_for_status()
            .map_err(|e| self.network_error(&e))?;

        let body = response.bytes().await.map_err(|e| self.network_error(&e))?;
        debug!(url = %self.url, bytes = body.len(), "Fetched metadata document");

        MetaDocument::from_slice(&body)
            .and_then(|doc| doc.entries(&self.category))
            .map_err(|message| AllowlistError::Decode {
                url: self.url.clone(),
                message,
            })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// A source returning a fixed result.
///
/// Useful for hosts that pin a snapshot of the published ranges, and for
/// exercising the gate without network access. Counts how often it was
/// fetched.
#[derive(Debug)]
pub struct FixedMetaSource {
    result: AllowlistResult<Vec<String>>,
    fetches: AtomicU64,
}

impl FixedMetaSource {
    /// Source that always yields `entries`.
    #[must_use]
    pub fn entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            result: Ok(entries.into_iter().map(Into::into).collect()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Source that always fails with `error`.
    #[must_use]
    pub fn failing(error: AllowlistError) -> Self {
        Self {
            result: Err(error),
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of fetches served so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetaSource for FixedMetaSource {
    async fn fetch(&self) -> AllowlistResult<Vec<String>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.result.clone()
    }

    fn endpoint(&self) -> &str {
        "fixed"
    }
}

#[async_trait]
impl<T: MetaSource + ?Sized> MetaSource for std::sync::Arc<T> {
    async fn fetch(&self) -> AllowlistResult<Vec<String>> {
        (**self).fetch().await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
