//! Datalith HTTP Client
//!
//! A native Rust client for the Datalith binary-object store.
//!
//! # Quick Start
//!
//! ```no_run
//! use datalith_client::{DatalithClient, PutResourceOptions, Timeouts};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), datalith_client::Error> {
//!     let client = DatalithClient::new("http://127.0.0.1:1111")?;
//!
//!     // Upload
//!     let resource = client
//!         .put_resource(
//!             "hello, store",
//!             &PutResourceOptions::new().file_name("hello.txt"),
//!         )
//!         .await?;
//!
//!     // Download
//!     if let Some(file) = client.get_resource(&resource.id, &Timeouts::new()).await? {
//!         println!("{} ({:?} bytes)", file.content_type, file.content_length);
//!         let body = file.bytes().await?;
//!         assert_eq!(body, "hello, store");
//!     }
//!
//!     // Delete
//!     assert!(client.delete_resource(&resource.id, None).await?);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - Streaming uploads of resources and images, from any byte stream,
//!   `AsyncRead`, or push-style producer
//! - Streaming downloads, optionally of a derived image resolution
//! - Request and idle timeouts per client and per call
//! - Typed errors for every protocol outcome
//!
//! # Configuration
//!
//! Use the builder pattern for custom configuration:
//!
//! ```no_run
//! use datalith_client::DatalithClientBuilder;
//!
//! let client = DatalithClientBuilder::new("http://127.0.0.1:1111/api")
//!     .request_timeout(120_000)
//!     .idle_timeout(10_000)
//!     .user_agent("uploader/1.0")
//!     .build()
//!     .unwrap();
//! ```

mod codec;
mod config;
mod error;
mod file;
mod governor;
mod image;
mod resource;
pub mod stream;
mod transfer;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, DEFAULT_IDLE_TIMEOUT_MS, MAX_TIMEOUT_MS, Timeouts};
pub use error::Error;
pub use file::File;
pub use image::{
    ConvertImageOptions, GetImageOptions, Image, ImageDimensions, ImageSize, PutImageOptions,
};
pub use resource::{PutResourceOptions, Resource};
pub use stream::{ByteStream, Cancelled, ChunkSender};

use std::fmt;

use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, Url};

use crate::governor::Governor;
use crate::transfer::{Exchange, Outcome};

/// Request header declaring the size of an upload.
pub(crate) const X_FILE_LENGTH: HeaderName = HeaderName::from_static("x-file-length");

const DEFAULT_USER_AGENT: &str = concat!("datalith-client/", env!("CARGO_PKG_VERSION"));

/// The four API roots, all derived from the base URL.
#[derive(Debug, Clone)]
struct Roots {
    /// `o/`: upload, delete and convert resources.
    operate: Url,
    /// `i/o/`: upload and delete images.
    operate_image: Url,
    /// `f/`: fetch resources.
    fetch: Url,
    /// `i/f/`: fetch images.
    fetch_image: Url,
}

impl Roots {
    fn new(base: &Url) -> Result<Self, Error> {
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| Error::Configuration(format!("invalid API root {path}: {e}")))
        };
        Ok(Self {
            operate: join("o/")?,
            operate_image: join("i/o/")?,
            fetch: join("f/")?,
            fetch_image: join("i/f/")?,
        })
    }
}

/// Parse a base URL and make its path end with `/`, so that the roots
/// resolve beneath it.
fn normalize_base_url(base_url: &str) -> Result<Url, Error> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::Configuration(format!("invalid base URL {base_url:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::Configuration(format!(
            "base URL {base_url:?} cannot have a path"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// `root` with `id` appended as one path segment.
fn object_url(root: &Url, id: &str) -> Result<Url, Error> {
    let mut url = root.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Configuration(format!("{root} cannot have a path")))?
        .pop_if_empty()
        .push(id);
    Ok(url)
}

/// HTTP client for the Datalith store.
///
/// Cloning is cheap; clones share the connection pool. Calls may run
/// concurrently.
#[derive(Debug, Clone)]
pub struct DatalithClient {
    client: Client,
    base_url: Url,
    roots: Roots,
    timeouts: Timeouts,
    user_agent: HeaderValue,
}

/// Builder for configuring a [`DatalithClient`].
#[derive(Debug)]
pub struct DatalithClientBuilder {
    base_url: String,
    timeouts: Timeouts,
    user_agent: Option<String>,
    client: Option<Client>,
}

impl DatalithClientBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: base_url.as_ref().to_owned(),
            timeouts: Timeouts::new(),
            user_agent: None,
            client: None,
        }
    }

    /// Set the default timeouts of every call. Unset fields keep their
    /// defaults: no request timeout and a
    /// [`DEFAULT_IDLE_TIMEOUT_MS`] idle timeout.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the default total request timeout in milliseconds.
    #[must_use]
    pub fn request_timeout(mut self, millis: u64) -> Self {
        self.timeouts.request_timeout = Some(millis);
        self
    }

    /// Set the default idle timeout in milliseconds.
    #[must_use]
    pub fn idle_timeout(mut self, millis: u64) -> Self {
        self.timeouts.idle_timeout = Some(millis);
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Use a custom reqwest Client.
    ///
    /// Useful for configuring TLS, proxies, or other advanced settings. Do not
    /// set a client-wide timeout on it; the store client enforces its own.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<DatalithClient, Error> {
        let timeouts = self
            .timeouts
            .or(Timeouts::new().idle_timeout(DEFAULT_IDLE_TIMEOUT_MS));
        timeouts.validate()?;

        let base_url = normalize_base_url(&self.base_url)?;
        let roots = Roots::new(&base_url)?;

        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| Error::Configuration(format!("invalid user agent: {e}")))?;

        let client = match self.client {
            Some(c) => c,
            None => Client::builder()
                .build()
                .map_err(|e| Error::Configuration(e.to_string()))?,
        };

        Ok(DatalithClient {
            client,
            base_url,
            roots,
            timeouts,
            user_agent,
        })
    }
}

impl DatalithClient {
    /// Create a new client with default configuration.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use datalith_client::DatalithClient;
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111").unwrap();
    /// ```
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, Error> {
        DatalithClientBuilder::new(base_url).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder(base_url: impl AsRef<str>) -> DatalithClientBuilder {
        DatalithClientBuilder::new(base_url)
    }

    /// Create a client from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder = DatalithClientBuilder::new(&config.base_url).timeouts(config.timeouts());
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        builder.build()
    }

    /// The normalized base URL, always ending with `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The client-wide default timeouts.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Start a governor for one call, with unset fields of `timeouts` taken
    /// from the client defaults.
    fn governor(&self, timeouts: &Timeouts) -> Result<Governor, Error> {
        Governor::new(&timeouts.or(self.timeouts))
    }

    fn exchange(&self, method: Method, url: Url) -> Exchange {
        Exchange::new(method, url).header(USER_AGENT, self.user_agent.clone())
    }

    /// DELETE `url`; `false` when the store had nothing there.
    async fn delete(&self, url: Url, request_timeout: Option<u64>) -> Result<bool, Error> {
        let governor = self.governor(&Timeouts {
            request_timeout,
            idle_timeout: None,
        })?;
        match transfer::execute(&self.client, self.exchange(Method::DELETE, url), &governor)
            .await?
        {
            Outcome::Found(response) => {
                transfer::discard(response, &governor).await;
                if governor.complete() {
                    Ok(true)
                } else {
                    Err(Error::Timeout)
                }
            }
            Outcome::Absent => Ok(false),
        }
    }
}

/// Query string of a store call, applied in insertion order.
#[derive(Debug, Default)]
pub(crate) struct Query {
    params: Vec<(&'static str, Option<String>)>,
}

impl Query {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add `name=value` if `value` is set.
    pub(crate) fn opt(mut self, name: &'static str, value: Option<impl fmt::Display>) -> Self {
        if let Some(value) = value {
            self.params.push((name, Some(value.to_string())));
        }
        self
    }

    /// Add a bare `name` without a value.
    pub(crate) fn flag(mut self, name: &'static str) -> Self {
        self.params.push((name, None));
        self
    }

    pub(crate) fn apply(self, url: &mut Url) {
        if self.params.is_empty() {
            return;
        }
        let mut pairs = url.query_pairs_mut();
        for (name, value) in self.params {
            match value {
                Some(value) => pairs.append_pair(name, &value),
                None => pairs.append_key_only(name),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockServer;

    #[test]
    fn roots_resolve_under_base_path() {
        for base in ["http://store.local:1111/api", "http://store.local:1111/api/"] {
            let client = DatalithClient::new(base).unwrap();
            assert_eq!(client.base_url().as_str(), "http://store.local:1111/api/");
            assert_eq!(client.roots.operate.as_str(), "http://store.local:1111/api/o/");
            assert_eq!(
                client.roots.operate_image.as_str(),
                "http://store.local:1111/api/i/o/"
            );
            assert_eq!(client.roots.fetch.as_str(), "http://store.local:1111/api/f/");
            assert_eq!(
                client.roots.fetch_image.as_str(),
                "http://store.local:1111/api/i/f/"
            );
        }
    }

    #[test]
    fn roots_at_host_root() {
        let client = DatalithClient::new("http://store.local:1111").unwrap();
        assert_eq!(client.roots.fetch.as_str(), "http://store.local:1111/f/");

        let url = object_url(&client.roots.fetch_image, "abc").unwrap();
        assert_eq!(url.as_str(), "http://store.local:1111/i/f/abc");
    }

    #[test]
    fn accepts_parsed_urls() {
        let base = Url::parse("http://store.local/api?x=1#top").unwrap();
        let client = DatalithClient::new(&base).unwrap();
        assert_eq!(client.base_url().as_str(), "http://store.local/api/");
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for base in ["", "store.local", "mailto:someone@example.com"] {
            let err = DatalithClient::new(base).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{base:?}");
        }
    }

    #[test]
    fn default_timeouts() {
        let client = DatalithClient::new("http://store.local").unwrap();
        assert_eq!(client.timeouts().request_timeout, None);
        assert_eq!(
            client.timeouts().idle_timeout,
            Some(DEFAULT_IDLE_TIMEOUT_MS)
        );

        let client = DatalithClient::builder("http://store.local")
            .request_timeout(1_000)
            .idle_timeout(0)
            .build()
            .unwrap();
        assert_eq!(client.timeouts().request_timeout, Some(1_000));
        assert_eq!(client.timeouts().idle_timeout, Some(0));
    }

    #[test]
    fn build_validates_timeouts() {
        let err = DatalithClient::builder("http://store.local")
            .request_timeout(MAX_TIMEOUT_MS + 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTimeout(_)));
    }

    #[test]
    fn from_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "http://store.local/api"
            request_timeout = 60000
            "#,
        )
        .unwrap();
        let client = DatalithClient::from_config(&config).unwrap();

        assert_eq!(client.roots.operate.as_str(), "http://store.local/api/o/");
        assert_eq!(client.timeouts().request_timeout, Some(60_000));
        assert_eq!(
            client.timeouts().idle_timeout,
            Some(DEFAULT_IDLE_TIMEOUT_MS)
        );
    }

    #[test]
    fn query_keeps_order_and_skips_unset() {
        let mut url = Url::parse("http://store.local/o/abc").unwrap();
        Query::new()
            .flag("convert-image")
            .opt("max_width", Some(64))
            .opt("max_height", None::<u32>)
            .opt("center_crop", Some("4:3"))
            .apply(&mut url);
        assert_eq!(
            url.as_str(),
            "http://store.local/o/abc?convert-image&max_width=64&center_crop=4%3A3"
        );

        let mut url = Url::parse("http://store.local/o/").unwrap();
        Query::new().opt("file_name", None::<&str>).apply(&mut url);
        assert_eq!(url.as_str(), "http://store.local/o/");
    }

    #[tokio::test]
    async fn sends_user_agent() {
        let server = MockServer::start().await;
        let client = DatalithClient::builder(&server.base_url)
            .user_agent("uploader/1.0")
            .build()
            .unwrap();
        let handle = tokio::spawn(async move { server.respond_once(404, &[], b"").await });

        assert!(!client.delete_image("img-1", None).await.unwrap());
        let request = handle.await.unwrap().to_ascii_lowercase();

        assert!(request.starts_with("delete /i/o/img-1 "));
        assert!(request.contains("user-agent: uploader/1.0\r\n"));
    }

    #[tokio::test]
    async fn default_user_agent_names_the_crate() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(200, &[], b"").await });

        assert!(client.delete_resource("res-1", None).await.unwrap());
        let request = handle.await.unwrap();

        assert!(request.contains(DEFAULT_USER_AGENT));
    }
}
