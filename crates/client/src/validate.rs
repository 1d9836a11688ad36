//! Client-side checks for image request parameters.
//!
//! Both checks run before any network I/O so a malformed value never reaches
//! the store.

use std::sync::LazyLock;

use regex::Regex;

use crate::Error;

/// `<number>:<number>`, each side an optionally negative decimal.
static CENTER_CROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?[0-9]+\.?[0-9]*:-?[0-9]+\.?[0-9]*$").expect("center crop regex is valid")
});

/// `<n>x` with `n` a positive integer without leading zeros.
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*x$").expect("resolution regex is valid"));

/// The resolution that selects the uploaded file as-is.
pub const ORIGINAL_RESOLUTION: &str = "original";

/// Check a center-crop ratio such as `16:9` or `1.5:1`.
pub fn center_crop(value: &str) -> Result<(), Error> {
    if CENTER_CROP_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidCenterCrop(value.to_owned()))
    }
}

/// Check an image resolution: `original` or a multiplier such as `1x`, `3x`.
pub fn resolution(value: &str) -> Result<(), Error> {
    if value == ORIGINAL_RESOLUTION || RESOLUTION_RE.is_match(value) {
        Ok(())
    } else {
        Err(Error::InvalidResolution(value.to_owned()))
    }
}
