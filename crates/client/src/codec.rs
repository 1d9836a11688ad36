//! Decoding of store responses into [`Resource`], [`Image`] and [`File`]
//! metadata.
//!
//! Put and convert calls answer with a JSON record; fetch calls describe the
//! payload in response headers.

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderName};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::file::FileHeaders;
use crate::image::{Image, ImageDimensions, ImageSize};
use crate::resource::Resource;

/// Header carrying the width of a fetched image rendition.
pub(crate) const X_IMAGE_WIDTH: HeaderName = HeaderName::from_static("x-image-width");
/// Header carrying the height of a fetched image rendition.
pub(crate) const X_IMAGE_HEIGHT: HeaderName = HeaderName::from_static("x-image-height");

/// `created_at` as the store sends it: epoch milliseconds or RFC 3339 text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    fn into_datetime(self) -> Result<DateTime<Utc>, Error> {
        match self {
            Self::Millis(millis) => DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| Error::Malformed(format!("created_at out of range: {millis}"))),
            Self::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| Error::Malformed(format!("invalid created_at {text:?}: {e}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceRecord {
    id: String,
    created_at: WireTimestamp,
    file_type: String,
    file_size: u64,
    file_name: String,
    is_temporary: bool,
}

#[derive(Debug, Deserialize)]
struct ImageRecord {
    id: String,
    created_at: WireTimestamp,
    image_width: u32,
    image_height: u32,
    image_stem: String,
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Malformed(e.to_string()))
}

/// Decode the JSON answer of a resource upload.
pub(crate) fn decode_resource(body: &[u8]) -> Result<Resource, Error> {
    let record: ResourceRecord = decode_json(body)?;
    Ok(Resource {
        id: record.id,
        created_at: record.created_at.into_datetime()?,
        file_type: record.file_type,
        file_size: record.file_size,
        file_name: record.file_name,
        is_temporary: record.is_temporary,
    })
}

/// Decode the JSON answer of an image upload or conversion.
pub(crate) fn decode_image(body: &[u8]) -> Result<Image, Error> {
    let record: ImageRecord = decode_json(body)?;
    let image_size = ImageSize::new(record.image_width, record.image_height).ok_or_else(|| {
        Error::Malformed(format!(
            "image size must be positive, got {}x{}",
            record.image_width, record.image_height
        ))
    })?;
    Ok(Image {
        id: record.id,
        created_at: record.created_at.into_datetime()?,
        image_stem: record.image_stem,
        image_size,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>, Error> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| Error::Malformed(format!("{name} header is not visible ASCII")))
        })
        .transpose()
}

fn required_header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<&'a str, Error> {
    header_str(headers, name)?.ok_or_else(|| Error::Malformed(format!("missing {name} header")))
}

fn numeric_header<T: std::str::FromStr>(
    headers: &HeaderMap,
    name: &HeaderName,
) -> Result<Option<T>, Error> {
    header_str(headers, name)?
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| Error::Malformed(format!("invalid {name} header: {value:?}")))
        })
        .transpose()
}

/// Decode the headers of a fetch answer.
///
/// `etag`, `date` and `content-type` are required. For image fetches the
/// rendition size is reported only when both dimension headers are present.
pub(crate) fn decode_file_headers(headers: &HeaderMap, image: bool) -> Result<FileHeaders, Error> {
    let etag = required_header(headers, &header::ETAG)?.to_owned();

    let raw_date = required_header(headers, &header::DATE)?;
    let date = DateTime::parse_from_rfc2822(raw_date)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Malformed(format!("invalid date header {raw_date:?}: {e}")))?;

    let content_type = required_header(headers, &header::CONTENT_TYPE)?.to_owned();
    let content_length = numeric_header::<u64>(headers, &header::CONTENT_LENGTH)?;
    let content_disposition =
        header_str(headers, &header::CONTENT_DISPOSITION)?.map(str::to_owned);

    let dimensions = if image {
        let width = numeric_header::<u32>(headers, &X_IMAGE_WIDTH)?;
        let height = numeric_header::<u32>(headers, &X_IMAGE_HEIGHT)?;
        match (width, height) {
            (Some(width), Some(height)) => ImageSize::new(width, height)
                .map(ImageDimensions::Reported)
                .ok_or_else(|| {
                    Error::Malformed(format!("image size must be positive, got {width}x{height}"))
                })?,
            _ => ImageDimensions::Unreported,
        }
    } else {
        ImageDimensions::NotAnImage
    };

    Ok(FileHeaders {
        etag,
        date,
        content_type,
        content_length,
        content_disposition,
        dimensions,
    })
}
