use chrono::{DateTime, Utc};
use reqwest::Method;
use tracing::{debug, instrument};

use crate::file::File;
use crate::stream::ByteStream;
use crate::transfer::{self, Outcome};
use crate::{DatalithClient, Error, Query, Timeouts, X_FILE_LENGTH, codec, object_url};

/// A stored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Store-assigned identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// MIME type, as detected or declared on upload.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: u64,
    /// File name, as given on upload or chosen by the store.
    pub file_name: String,
    /// Whether the store may expire the resource on its own.
    pub is_temporary: bool,
}

/// Options for [`DatalithClient::put_resource`].
#[derive(Debug, Clone, Default)]
pub struct PutResourceOptions {
    /// File name to record. The store picks one when absent.
    pub file_name: Option<String>,
    /// MIME type to record instead of the detected one.
    pub file_type: Option<String>,
    /// Declared upload size, sent as `x-file-length`. A hint only.
    pub file_size: Option<u64>,
    /// Let the store expire the resource on its own.
    pub temporary: Option<bool>,
    /// Per-call timeouts, layered over the client defaults.
    pub timeouts: Timeouts,
}

impl PutResourceOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file name.
    #[must_use]
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Record this MIME type instead of the detected one.
    #[must_use]
    pub fn file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    /// Declare the upload size in bytes.
    #[must_use]
    pub fn file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    /// Mark the resource as temporary.
    #[must_use]
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = Some(temporary);
        self
    }

    /// Override the client timeouts for this call.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

impl DatalithClient {
    // =========================================================================
    // Resources
    // =========================================================================

    /// Upload a resource.
    ///
    /// The body is streamed as it is produced; nothing is buffered beyond the
    /// chunk in flight.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), datalith_client::Error> {
    /// use datalith_client::{ByteStream, DatalithClient, PutResourceOptions};
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111")?;
    /// let body = ByteStream::spawn(|sender| async move {
    ///     for line in ["a,b\n", "1,2\n"] {
    ///         sender.send(line).await?;
    ///     }
    ///     Ok(())
    /// });
    /// let resource = client
    ///     .put_resource(
    ///         body,
    ///         &PutResourceOptions::new()
    ///             .file_name("table.csv")
    ///             .file_type("text/csv")
    ///             .temporary(true),
    ///     )
    ///     .await?;
    /// println!("stored {} ({} bytes)", resource.id, resource.file_size);
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip_all)]
    pub async fn put_resource(
        &self,
        body: impl Into<ByteStream>,
        options: &PutResourceOptions,
    ) -> Result<Resource, Error> {
        let governor = self.governor(&options.timeouts)?;

        let mut url = self.roots.operate.clone();
        Query::new()
            .opt("file_name", options.file_name.as_deref())
            .opt("file_type", options.file_type.as_deref())
            .opt("temporary", options.temporary)
            .apply(&mut url);

        let mut exchange = self.exchange(Method::PUT, url).body(body.into());
        if let Some(size) = options.file_size {
            exchange = exchange.header(X_FILE_LENGTH, size.into());
        }

        let resource = match transfer::execute(&self.client, exchange, &governor).await? {
            Outcome::Found(response) => {
                codec::decode_resource(&transfer::read_body(response, &governor).await?)?
            }
            Outcome::Absent => return Err(Error::UnknownStatus(404)),
        };
        debug!(id = %resource.id, file_size = resource.file_size, "resource stored");
        Ok(resource)
    }

    /// Fetch a resource. Returns `None` if the store has no resource with
    /// this id.
    ///
    /// The returned [`File`] holds the connection until its data is read to
    /// the end or dropped.
    #[instrument(level = "debug", skip(self, timeouts))]
    pub async fn get_resource(
        &self,
        id: &str,
        timeouts: &Timeouts,
    ) -> Result<Option<File>, Error> {
        let url = object_url(&self.roots.fetch, id)?;
        self.fetch_file(url, false, timeouts).await
    }

    /// Delete a resource. Returns `false` if it did not exist.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), datalith_client::Error> {
    /// use datalith_client::DatalithClient;
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111")?;
    /// if !client.delete_resource("1f2e3d", Some(5_000)).await? {
    ///     println!("already gone");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_resource(
        &self,
        id: &str,
        request_timeout: Option<u64>,
    ) -> Result<bool, Error> {
        let url = object_url(&self.roots.operate, id)?;
        self.delete(url, request_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockServer;

    const RESOURCE_JSON: &[u8] = br#"{"id":"res-1","created_at":"2024-03-01T12:00:00Z","file_type":"text/csv","file_size":8,"file_name":"table.csv","is_temporary":true}"#;

    #[tokio::test]
    async fn put_resource_streams_body_and_decodes_record() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle =
            tokio::spawn(async move { server.respond_once(200, &[], RESOURCE_JSON).await });

        let body = ByteStream::spawn(|sender| async move {
            sender.send("a,b\n").await?;
            sender.send("1,2\n").await?;
            Ok(())
        });
        let options = PutResourceOptions::new()
            .file_name("table.csv")
            .file_type("text/csv")
            .file_size(8)
            .temporary(true);
        let resource = client.put_resource(body, &options).await.unwrap();
        let request = handle.await.unwrap();

        assert_eq!(resource.id, "res-1");
        assert_eq!(resource.file_size, 8);
        assert!(resource.is_temporary);
        assert!(request.starts_with(
            "PUT /o/?file_name=table.csv&file_type=text%2Fcsv&temporary=true "
        ));
        assert!(request.to_ascii_lowercase().contains("x-file-length: 8\r\n"));
        assert!(request.contains("a,b\n"));
        assert!(request.contains("1,2\n"));
    }

    #[tokio::test]
    async fn put_without_options_has_no_query() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle =
            tokio::spawn(async move { server.respond_once(200, &[], RESOURCE_JSON).await });

        client
            .put_resource("x", &PutResourceOptions::new())
            .await
            .unwrap();
        let request = handle.await.unwrap();

        assert!(request.starts_with("PUT /o/ HTTP/1.1\r\n"));
        assert!(!request.to_ascii_lowercase().contains("x-file-length"));
    }

    #[tokio::test]
    async fn put_resource_too_large() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(413, &[], b"").await });

        let err = client
            .put_resource("too big", &PutResourceOptions::new())
            .await
            .unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, Error::PayloadTooLarge));
    }

    #[tokio::test]
    async fn rejected_upload_with_stalled_body_returns_promptly() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move {
            server.respond_partial(400, &[], b"bad ", 100).await;
        });

        let options = PutResourceOptions::new().timeouts(Timeouts::new().idle_timeout(200));
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(4),
            client.put_resource("x", &options),
        )
        .await
        .expect("the status should be reported before the body ends")
        .unwrap_err();
        handle.await.unwrap();

        assert!(err.is_bad_request());
    }

    #[tokio::test]
    async fn stalled_record_hits_idle_timeout() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move {
            server
                .respond_partial(200, &[], br#"{"id":"res-1","#, 200)
                .await;
        });

        let options = PutResourceOptions::new().timeouts(Timeouts::new().idle_timeout(200));
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(4),
            client.put_resource("x", &options),
        )
        .await
        .expect("the idle timeout should apply to the reply")
        .unwrap_err();
        handle.await.unwrap();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn malformed_record_is_reported() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(200, &[], b"[]").await });

        let err = client
            .put_resource("x", &PutResourceOptions::new())
            .await
            .unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, Error::Malformed(_)));
    }

    #[tokio::test]
    async fn get_unknown_resource_is_none() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(404, &[], b"").await });

        let file = client
            .get_resource("nope", &Timeouts::new())
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(file.is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(200, &[], b"").await });
        assert!(client.delete_resource("res-1", None).await.unwrap());
        assert!(handle.await.unwrap().starts_with("DELETE /o/res-1 "));

        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(404, &[], b"").await });
        assert!(!client.delete_resource("res-1", Some(5_000)).await.unwrap());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ids_are_single_path_segments() {
        let server = MockServer::start().await;
        let client = DatalithClient::new(&server.base_url).unwrap();
        let handle = tokio::spawn(async move { server.respond_once(404, &[], b"").await });

        client
            .get_resource("a/b c", &Timeouts::new())
            .await
            .unwrap();
        let request = handle.await.unwrap();

        assert!(request.starts_with("GET /f/a%2Fb%20c "));
    }
}
