use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Method, Url};
use tracing::debug;

use crate::codec;
use crate::image::{ImageDimensions, ImageSize};
use crate::stream::ByteStream;
use crate::transfer::{self, Exchange, Outcome};
use crate::{DatalithClient, Error, Timeouts};

/// Response metadata of a fetch, decoded before the body is handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeaders {
    pub(crate) etag: String,
    pub(crate) date: DateTime<Utc>,
    pub(crate) content_type: String,
    pub(crate) content_length: Option<u64>,
    pub(crate) content_disposition: Option<String>,
    pub(crate) dimensions: ImageDimensions,
}

/// A payload fetched from the store.
///
/// `data` streams the body straight off the connection under the request
/// and idle timeouts of the fetch. It can be read once. Dropping it, or the
/// whole `File`, before the end closes the connection.
#[derive(Debug)]
pub struct File {
    /// Cache validation token.
    pub etag: String,
    /// Server time of the response.
    pub date: DateTime<Utc>,
    /// MIME type of the payload.
    pub content_type: String,
    /// Declared payload size. Absent when the store does not know it yet, as
    /// with freshly derived image renditions.
    pub content_length: Option<u64>,
    /// Value of the `content-disposition` header, if any.
    pub content_disposition: Option<String>,
    /// Pixel size of an image rendition.
    pub dimensions: ImageDimensions,
    /// The payload.
    pub data: ByteStream,
}

impl File {
    fn new(headers: FileHeaders, data: ByteStream) -> Self {
        Self {
            etag: headers.etag,
            date: headers.date,
            content_type: headers.content_type,
            content_length: headers.content_length,
            content_disposition: headers.content_disposition,
            dimensions: headers.dimensions,
            data,
        }
    }

    /// Pixel size, when the store reported one.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.dimensions.size()
    }

    /// Read the whole payload into memory.
    ///
    /// Fails with [`Error::Timeout`] if a deadline passes while reading.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        Ok(self.data.read_to_end().await?)
    }

    /// Give up on the payload and release the connection.
    pub fn cancel_data(self) {
        debug!(etag = %self.etag, "payload cancelled before the end");
        drop(self.data);
    }

    /// Take the payload stream, dropping the metadata.
    pub fn into_data(self) -> ByteStream {
        self.data
    }
}

impl DatalithClient {
    /// GET `url` and hand back its body as a [`File`], or `None` on 404.
    pub(crate) async fn fetch_file(
        &self,
        url: Url,
        image: bool,
        timeouts: &Timeouts,
    ) -> Result<Option<File>, Error> {
        let governor = self.governor(timeouts)?;
        let response = match transfer::execute(
            &self.client,
            self.exchange(Method::GET, url),
            &governor,
        )
        .await?
        {
            Outcome::Found(response) => response,
            Outcome::Absent => return Ok(None),
        };

        // Dropping `response` on a decode failure closes the connection.
        let headers = codec::decode_file_headers(response.headers(), image)?;
        let data = transfer::body_stream(response, &governor);
        Ok(Some(File::new(headers, data)))
    }
}
