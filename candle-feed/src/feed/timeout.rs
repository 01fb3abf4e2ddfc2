//! Read timeout wrapper for WebSocket streams.
//!
//! Detects silent disconnections that never surface as an explicit error by yielding
//! [`FeedError::Timeout`] when no frame has been read for the configured period.

use crate::error::FeedError;
use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// A stream wrapper that monitors idle time and yields a [`FeedError::Timeout`] if no frame is
/// received within `timeout`. Inner transport errors are mapped to [`FeedError::Transport`].
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    type Item = Result<Message, FeedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout = self.timeout;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.deadline.as_mut().reset(Instant::now() + timeout);
                Poll::Ready(Some(item.map_err(FeedError::from)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    // Re-arm so a caller that keeps polling is not timed out immediately again
                    self.deadline.as_mut().reset(Instant::now() + timeout);
                    Poll::Ready(Some(Err(FeedError::Timeout(timeout))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
