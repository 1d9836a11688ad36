//! One HTTP exchange with the store, classified into the client's outcomes.

use std::io;

use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode, Url};
use tracing::{debug, instrument, warn};

use crate::Error;
use crate::governor::{Governor, IdlePolicy};
use crate::stream::ByteStream;

/// A request waiting to be sent.
#[derive(Debug)]
pub(crate) struct Exchange {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<ByteStream>,
}

impl Exchange {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub(crate) fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Stream `body` as the request body, under the governor's idle deadline
    /// from the moment the request is sent.
    pub(crate) fn body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }
}

/// A non-failing result of [`execute`].
#[derive(Debug)]
pub(crate) enum Outcome {
    /// `200 OK`; the body is still unread.
    Found(Response),
    /// `404 Not Found`; the body has been drained.
    Absent,
}

/// Send `exchange` and classify the response status.
///
/// If `governor` fires before the status is known the result is
/// [`Error::Timeout`]. Any other failure after the response head arrived
/// drains the body, within the governor's deadlines, before the error is
/// returned.
#[instrument(level = "debug", skip_all, fields(method = %exchange.method, url = %exchange.url))]
pub(crate) async fn execute(
    client: &Client,
    exchange: Exchange,
    governor: &Governor,
) -> Result<Outcome, Error> {
    let Exchange {
        method,
        url,
        headers,
        body,
    } = exchange;

    let mut request = client.request(method.clone(), url).headers(headers);
    if let Some(body) = body {
        let governed = governor.govern(body, IdlePolicy::Immediate, false);
        request = request.body(reqwest::Body::wrap_stream(governed));
    }

    debug!("sending request");
    let response = tokio::select! {
        biased;
        () = governor.expired() => return Err(Error::Timeout),
        result = request.send() => result.map_err(|e| transport_error(&e, governor))?,
    };

    let status = response.status();
    debug!(status = status.as_u16(), "response received");

    if governor.is_fired() {
        discard(response, governor).await;
        return Err(Error::Timeout);
    }

    let error = match status {
        StatusCode::OK => return Ok(Outcome::Found(response)),
        StatusCode::NOT_FOUND => {
            discard(response, governor).await;
            governor.complete();
            return Ok(Outcome::Absent);
        }
        StatusCode::BAD_REQUEST => Error::BadRequest,
        StatusCode::PAYLOAD_TOO_LARGE if method == Method::PUT => Error::PayloadTooLarge,
        other => {
            warn!(status = other.as_u16(), "store answered with an unexpected status");
            Error::UnknownStatus(other.as_u16())
        }
    };

    discard(response, governor).await;
    Err(error)
}

/// Read a `200` body fully.
///
/// The idle deadline arms as soon as the head has arrived, so a reply that
/// stalls before its first byte still times out.
pub(crate) async fn read_body(response: Response, governor: &Governor) -> Result<Bytes, Error> {
    let body = governed_body(response, governor, IdlePolicy::Immediate, true)
        .read_to_end()
        .await?;
    Ok(body)
}

/// Hand a `200` body to the caller as a governed stream.
///
/// The idle deadline arms with the first chunk. Reaching the end of the
/// stream completes the exchange.
pub(crate) fn body_stream(response: Response, governor: &Governor) -> ByteStream {
    governed_body(response, governor, IdlePolicy::AfterFirstChunk, true)
}

/// Drain a body the caller will never see so the connection is released.
///
/// The drain runs under both deadlines. A read error or a missed deadline
/// drops the response instead, which closes the connection. Either way the
/// outcome is ignored.
pub(crate) async fn discard(response: Response, governor: &Governor) {
    let drained = governed_body(response, governor, IdlePolicy::Immediate, false)
        .read_to_end()
        .await;
    if let Err(error) = drained {
        debug!(%error, "response body abandoned");
    }
}

fn governed_body(
    response: Response,
    governor: &Governor,
    policy: IdlePolicy,
    finishes_exchange: bool,
) -> ByteStream {
    let chunks = response.bytes_stream().map_err(io::Error::other);
    governor.govern(ByteStream::new(chunks), policy, finishes_exchange)
}

fn transport_error(error: &reqwest::Error, governor: &Governor) -> Error {
    if governor.is_fired() || error.is_timeout() {
        Error::Timeout
    } else {
        Error::Connection(error.to_string())
    }
}
