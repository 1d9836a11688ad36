use chrono::{DateTime, Utc};
use reqwest::Method;
use tracing::{debug, instrument};

use crate::file::File;
use crate::stream::ByteStream;
use crate::transfer::{self, Outcome};
use crate::{
    DatalithClient, Error, Query, Timeouts, X_FILE_LENGTH, codec, object_url, validate,
};

/// Pixel dimensions of an image. Both sides are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageSize {
    /// Returns `None` if either side is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// What a fetch said about the pixel size of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDimensions {
    /// The payload was fetched as a resource, not an image.
    NotAnImage,
    /// An image fetch whose response carried no size.
    Unreported,
    /// An image fetch with both `x-image-width` and `x-image-height`.
    Reported(ImageSize),
}

impl ImageDimensions {
    /// The reported size, if any.
    pub fn size(self) -> Option<ImageSize> {
        match self {
            Self::Reported(size) => Some(size),
            Self::NotAnImage | Self::Unreported => None,
        }
    }

    /// Whether the payload was fetched as an image.
    pub fn is_image(self) -> bool {
        !matches!(self, Self::NotAnImage)
    }
}

/// An image stored by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Store-assigned identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// File name base, without extension or resolution suffix.
    pub image_stem: String,
    /// Size of the `1x` rendition.
    pub image_size: ImageSize,
}

/// Options for [`DatalithClient::put_image`].
#[derive(Debug, Clone, Default)]
pub struct PutImageOptions {
    /// File name recorded with the image; its stem names the renditions.
    pub file_name: Option<String>,
    /// Declared upload size, sent as `x-file-length`.
    pub file_size: Option<u64>,
    /// Upper bound on the width of the `1x` rendition, in pixels.
    pub max_width: Option<u32>,
    /// Upper bound on the height of the `1x` rendition, in pixels.
    pub max_height: Option<u32>,
    /// Crop ratio such as `16:9`.
    pub center_crop: Option<String>,
    /// Keep the uploaded file next to the derived renditions.
    pub save_original_file: Option<bool>,
    /// Per-call timeouts, layered over the client defaults.
    pub timeouts: Timeouts,
}

impl PutImageOptions {
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

    /// Declare the upload size in bytes.
    #[must_use]
    pub fn file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }

    /// Bound the rendition width.
    #[must_use]
    pub fn max_width(mut self, max_width: u32) -> Self {
        self.max_width = Some(max_width);
        self
    }

    /// Bound the rendition height.
    #[must_use]
    pub fn max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }

    /// Crop to a ratio such as `16:9` around the center.
    #[must_use]
    pub fn center_crop(mut self, center_crop: impl Into<String>) -> Self {
        self.center_crop = Some(center_crop.into());
        self
    }

    /// Keep the uploaded file as the `original` rendition.
    #[must_use]
    pub fn save_original_file(mut self, save: bool) -> Self {
        self.save_original_file = Some(save);
        self
    }

    /// Override the client timeouts for this call.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Options for [`DatalithClient::get_image`].
#[derive(Debug, Clone, Default)]
pub struct GetImageOptions {
    /// `original` or a multiplier such as `2x`.
    pub resolution: Option<String>,
    /// Let the store answer with the closest available rendition.
    pub fallback: Option<bool>,
    /// Per-call timeouts, layered over the client defaults.
    pub timeouts: Timeouts,
}

impl GetImageOptions {
    /// Create empty options; the `1x` rendition is fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `original` or a multiplier rendition such as `2x`.
    #[must_use]
    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Accept the closest rendition when the requested one is missing.
    #[must_use]
    pub fn fallback(mut self, fallback: bool) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Override the client timeouts for this call.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Options for [`DatalithClient::convert_resource_to_image`].
#[derive(Debug, Clone, Default)]
pub struct ConvertImageOptions {
    /// Upper bound on the width of the `1x` rendition, in pixels.
    pub max_width: Option<u32>,
    /// Upper bound on the height of the `1x` rendition, in pixels.
    pub max_height: Option<u32>,
    /// Crop ratio such as `16:9`.
    pub center_crop: Option<String>,
    /// Total timeout in milliseconds.
    pub request_timeout: Option<u64>,
}

impl ConvertImageOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the rendition width.
    #[must_use]
    pub fn max_width(mut self, max_width: u32) -> Self {
        self.max_width = Some(max_width);
        self
    }

    /// Bound the rendition height.
    #[must_use]
    pub fn max_height(mut self, max_height: u32) -> Self {
        self.max_height = Some(max_height);
        self
    }

    /// Crop to a ratio such as `16:9` around the center.
    #[must_use]
    pub fn center_crop(mut self, center_crop: impl Into<String>) -> Self {
        self.center_crop = Some(center_crop.into());
        self
    }

    /// Set the total timeout in milliseconds.
    #[must_use]
    pub fn request_timeout(mut self, millis: u64) -> Self {
        self.request_timeout = Some(millis);
        self
    }
}

impl DatalithClient {
    // =========================================================================
    // Images
    // =========================================================================

    /// Upload an image. The store derives the renditions from it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), datalith_client::Error> {
    /// use datalith_client::{ByteStream, DatalithClient, PutImageOptions};
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111")?;
    /// let file = tokio::fs::File::open("photo.png").await.unwrap();
    /// let image = client
    ///     .put_image(
    ///         ByteStream::from_reader(file),
    ///         &PutImageOptions::new().file_name("photo.png").max_width(512),
    ///     )
    ///     .await?;
    /// println!("{} is {}x{}", image.id, image.image_size.width, image.image_size.height);
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip_all)]
    pub async fn put_image(
        &self,
        body: impl Into<ByteStream>,
        options: &PutImageOptions,
    ) -> Result<Image, Error> {
        if let Some(center_crop) = &options.center_crop {
            validate::center_crop(center_crop)?;
        }
        let governor = self.governor(&options.timeouts)?;

        let mut url = self.roots.operate_image.clone();
        Query::new()
            .opt("file_name", options.file_name.as_deref())
            .opt("max_width", options.max_width)
            .opt("max_height", options.max_height)
            .opt("center_crop", options.center_crop.as_deref())
            .opt("save_original_file", options.save_original_file)
            .apply(&mut url);

        let mut exchange = self.exchange(Method::PUT, url).body(body.into());
        if let Some(size) = options.file_size {
            exchange = exchange.header(X_FILE_LENGTH, size.into());
        }

        let image = match transfer::execute(&self.client, exchange, &governor).await? {
            Outcome::Found(response) => {
                codec::decode_image(&transfer::read_body(response, &governor).await?)?
            }
            Outcome::Absent => return Err(Error::UnknownStatus(404)),
        };
        debug!(id = %image.id, "image stored");
        Ok(image)
    }

    /// Fetch an image rendition. Returns `None` if the store has no image
    /// with this id.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), datalith_client::Error> {
    /// use datalith_client::{DatalithClient, GetImageOptions};
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111")?;
    /// let options = GetImageOptions::new().resolution("2x").fallback(true);
    /// if let Some(file) = client.get_image("1f2e3d", &options).await? {
    ///     println!("{} {:?}", file.content_type, file.image_size());
    ///     let bytes = file.bytes().await?;
    ///     println!("{} bytes", bytes.len());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip(self, options))]
    pub async fn get_image(
        &self,
        id: &str,
        options: &GetImageOptions,
    ) -> Result<Option<File>, Error> {
        if let Some(resolution) = &options.resolution {
            validate::resolution(resolution)?;
        }

        let mut url = object_url(&self.roots.fetch_image, id)?;
        Query::new()
            .opt("resolution", options.resolution.as_deref())
            .opt("fallback", options.fallback)
            .apply(&mut url);

        self.fetch_file(url, true, &options.timeouts).await
    }

    /// Delete an image. Returns `false` if it did not exist.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_image(
        &self,
        id: &str,
        request_timeout: Option<u64>,
    ) -> Result<bool, Error> {
        let url = object_url(&self.roots.operate_image, id)?;
        self.delete(url, request_timeout).await
    }

    /// Turn a stored resource into an image.
    ///
    /// Unlike fetches and deletes, an unknown id fails with
    /// [`Error::NotFound`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> Result<(), datalith_client::Error> {
    /// use datalith_client::{ConvertImageOptions, DatalithClient};
    ///
    /// let client = DatalithClient::new("http://127.0.0.1:1111")?;
    /// let options = ConvertImageOptions::new().max_width(256).center_crop("1:1");
    /// let image = client.convert_resource_to_image("1f2e3d", &options).await?;
    /// println!("{}", image.image_stem);
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(level = "debug", skip(self, options))]
    pub async fn convert_resource_to_image(
        &self,
        id: &str,
        options: &ConvertImageOptions,
    ) -> Result<Image, Error> {
        if let Some(center_crop) = &options.center_crop {
            validate::center_crop(center_crop)?;
        }
        let governor = self.governor(&Timeouts {
            request_timeout: options.request_timeout,
            idle_timeout: None,
        })?;

        let mut url = object_url(&self.roots.operate, id)?;
        Query::new()
            .flag("convert-image")
            .opt("max_width", options.max_width)
            .opt("max_height", options.max_height)
            .opt("center_crop", options.center_crop.as_deref())
            .apply(&mut url);

        let exchange = self.exchange(Method::PUT, url);
        match transfer::execute(&self.client, exchange, &governor).await? {
            Outcome::Found(response) => {
                codec::decode_image(&transfer::read_body(response, &governor).await?)
            }
            Outcome::Absent => Err(Error::NotFound),
        }
    }
}
