use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, ORIGIN, REFERER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Endpoints;
use crate::error::FetchError;
use crate::model::{Author, PageLink, Summary, TableOfContents};

/// Everything the pipeline needs from the vendor.
///
/// Implementations never retry; a failure is reported once and the caller
/// decides whether it is fatal.
#[allow(async_fn_in_trait)]
pub trait ContentSource {
    async fn summary(&self, isbn: &str) -> Result<Summary, FetchError>;

    async fn author(&self, author_id: &str) -> Result<Author, FetchError>;

    async fn toc(&self, isbn: &str) -> Result<TableOfContents, FetchError>;

    /// Raw HTML of one section.
    async fn page(&self, isbn: &str, chapter_id: &str, section_id: &str)
        -> Result<String, FetchError>;

    /// Binary body of an absolute URL (images, cover).
    async fn asset(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Absolute URL of an asset path relative to the product.
    fn asset_url(&self, isbn: &str, relative: &str) -> String;
}

pub struct HttpFetcher {
    client: Client,
    endpoints: Endpoints,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(endpoints: Endpoints, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, endpoints, token))
    }

    pub fn with_client(client: Client, endpoints: Endpoints, token: Option<String>) -> Self {
        Self {
            client,
            endpoints,
            token,
        }
    }

    async fn get_bytes(&self, url: &str, authorized: bool) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(ORIGIN, self.endpoints.origin.as_str())
            .header(REFERER, format!("{}/", self.endpoints.origin));

        if authorized {
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        let response = request.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        Ok(body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, authorized: bool) -> Result<T, FetchError> {
        let body = self.get_bytes(url, authorized).await?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl ContentSource for HttpFetcher {
    async fn summary(&self, isbn: &str) -> Result<Summary, FetchError> {
        self.get_json(&self.endpoints.summary_url(isbn), false).await
    }

    async fn author(&self, author_id: &str) -> Result<Author, FetchError> {
        self.get_json(&self.endpoints.author_url(author_id), false).await
    }

    async fn toc(&self, isbn: &str) -> Result<TableOfContents, FetchError> {
        self.get_json(&self.endpoints.toc_url(isbn), false).await
    }

    async fn page(&self, isbn: &str, chapter_id: &str, section_id: &str) -> Result<String, FetchError> {
        let link: PageLink = self
            .get_json(&self.endpoints.page_url(isbn, chapter_id, section_id), true)
            .await?;

        if link.data.is_empty() {
            return Err(FetchError::MissingField(format!(
                "page link for {}/{}",
                chapter_id, section_id
            )));
        }

        // The signed link carries its own authorization.
        let body = self.get_bytes(&link.data, false).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.get_bytes(url, false).await
    }

    fn asset_url(&self, isbn: &str, relative: &str) -> String {
        self.endpoints.asset_url(isbn, relative)
    }
}
