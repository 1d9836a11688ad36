//! Request and idle timeouts for one exchange.
//!
//! A [`Governor`] holds two deadlines: an absolute one for the whole exchange
//! and a rolling one that every body chunk pushes back. Either may fire the
//! governor's cancellation signal, at most once. Marking the governor
//! [completed](Governor::complete) first disarms it for good.
//!
//! ```text
//!            complete()
//!   Active ─────────────▶ Completed
//!     │
//!     │ total or idle deadline
//!     ▼
//!   Fired ──▶ signal cancelled
//! ```

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::time::{Instant, Sleep, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::stream::ByteStream;
use crate::{Error, Timeouts};

/// Stand-in deadline for an unbounded request timeout.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const FIRED: u8 = 2;

/// When the idle deadline is first armed on a governed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdlePolicy {
    /// Armed when the stream is governed, so a producer that never emits its
    /// first chunk still times out.
    Immediate,
    /// Armed by the first chunk.
    AfterFirstChunk,
}

/// Lifecycle of a [`Governor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GovernorState {
    Active,
    Completed,
    Fired,
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    signal: CancellationToken,
}

#[derive(Debug, Clone)]
pub(crate) struct Governor {
    shared: Arc<Shared>,
    deadline: Instant,
    idle: Option<Duration>,
}

impl Governor {
    /// Start the clock. Fails with [`Error::InvalidTimeout`] before anything
    /// is armed.
    pub(crate) fn new(timeouts: &Timeouts) -> Result<Self, Error> {
        timeouts.validate()?;

        let now = Instant::now();
        let deadline = timeouts
            .request_duration()
            .and_then(|total| now.checked_add(total))
            .unwrap_or_else(|| now + FAR_FUTURE);

        Ok(Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ACTIVE),
                signal: CancellationToken::new(),
            }),
            deadline,
            idle: timeouts.idle_duration().map(|idle| idle.min(FAR_FUTURE)),
        })
    }

    pub(crate) fn state(&self) -> GovernorState {
        match self.shared.state.load(Ordering::Acquire) {
            ACTIVE => GovernorState::Active,
            COMPLETED => GovernorState::Completed,
            _ => GovernorState::Fired,
        }
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.state() == GovernorState::Fired
    }

    /// The one-shot cancellation signal, cancelled when the governor fires.
    pub(crate) fn signal(&self) -> &CancellationToken {
        &self.shared.signal
    }

    /// Disarm after a normal finish. Returns `false` if the governor already
    /// fired.
    pub(crate) fn complete(&self) -> bool {
        self.transition(COMPLETED) || self.state() == GovernorState::Completed
    }

    /// Fire the signal. Returns `false` if the governor is no longer active.
    pub(crate) fn fire(&self) -> bool {
        if !self.transition(FIRED) {
            return false;
        }
        warn!("transfer timed out, aborting exchange");
        self.shared.signal.cancel();
        true
    }

    fn transition(&self, to: u8) -> bool {
        self.shared
            .state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resolves once the governor has fired, firing it at the total deadline.
    ///
    /// Never resolves if the governor completes first.
    pub(crate) async fn expired(&self) {
        tokio::select! {
            biased;
            () = self.signal().cancelled() => {}
            () = sleep_until(self.deadline) => {
                self.fire();
                if !self.is_fired() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Put `stream` under both deadlines.
    ///
    /// When either deadline passes the stream yields a `TimedOut` error, fires
    /// the governor and drops `stream`. With `finishes_exchange`, reaching the
    /// end of `stream` completes the governor.
    pub(crate) fn govern(
        &self,
        stream: ByteStream,
        policy: IdlePolicy,
        finishes_exchange: bool,
    ) -> ByteStream {
        let idle_timer = match policy {
            IdlePolicy::Immediate => self.idle.map(|idle| Box::pin(sleep(idle))),
            IdlePolicy::AfterFirstChunk => None,
        };

        ByteStream::new(Governed {
            inner: Some(stream),
            governor: self.clone(),
            total: Some(Box::pin(sleep_until(self.deadline))),
            idle_timer,
            finishes_exchange,
        })
    }
}

struct Governed {
    inner: Option<ByteStream>,
    governor: Governor,
    total: Option<Pin<Box<Sleep>>>,
    idle_timer: Option<Pin<Box<Sleep>>>,
    finishes_exchange: bool,
}

impl Governed {
    /// Drop the source and both timers.
    fn release(&mut self) {
        self.inner = None;
        self.total = None;
        self.idle_timer = None;
    }

    fn rearm_idle(&mut self) {
        let Some(idle) = self.governor.idle else {
            return;
        };
        let next = Instant::now() + idle;
        match self.idle_timer.as_mut() {
            Some(timer) => timer.as_mut().reset(next),
            None => self.idle_timer = Some(Box::pin(sleep_until(next))),
        }
    }

    fn deadline_passed(&mut self, cx: &mut Context<'_>) -> bool {
        let total = self
            .total
            .as_mut()
            .is_some_and(|timer| timer.as_mut().poll(cx).is_ready());
        let idle = self
            .idle_timer
            .as_mut()
            .is_some_and(|timer| timer.as_mut().poll(cx).is_ready());
        total || idle
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "transfer timed out")
}

impl Stream for Governed {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.governor.is_fired() {
            this.release();
            return Poll::Ready(Some(Err(timed_out())));
        }

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.rearm_idle();
                return Poll::Ready(Some(Ok(chunk)));
            }
            Poll::Ready(Some(Err(error))) => {
                this.release();
                return Poll::Ready(Some(Err(error)));
            }
            Poll::Ready(None) => {
                this.release();
                if this.finishes_exchange {
                    this.governor.complete();
                }
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.deadline_passed(cx) {
            this.governor.fire();
            this.release();
            return Poll::Ready(Some(Err(timed_out())));
        }
        Poll::Pending
    }
}
