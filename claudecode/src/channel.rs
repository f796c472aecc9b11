//! Shared receiving ends of the transport channels
//!
//! A transport publishes messages and errors on two bounded channels that
//! only its stdout worker can close. Callers get [`Inbound`] handles, which
//! are cheap clones over the same receiver, so a client and the code that
//! drives it can both read without taking ownership away from the transport.

use crate::{
    errors::{Result, SdkError},
    types::Message,
};
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Capacity of the message and error channels
pub const CHANNEL_BUFFER_SIZE: usize = 10;

/// Cloneable handle to the receiving end of a transport channel
#[derive(Debug)]
pub struct Inbound<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Inbound<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Inbound<T> {
    /// Wrap a receiver
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Handle over a channel that is already closed
    pub fn closed() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self::new(rx)
    }

    /// Receive the next item, `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Consume the handle as a stream that ends when the channel closes
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        async_stream::stream! {
            while let Some(item) = self.recv().await {
                yield item;
            }
        }
    }
}

/// Create a bounded channel with the transport capacity
pub(crate) fn bounded<T>() -> (mpsc::Sender<T>, Inbound<T>) {
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    (tx, Inbound::new(rx))
}

/// Iterator over the messages of a response
///
/// Each call to [`MessageIterator::next`] waits for whichever comes first:
/// a message, an error, or cancellation. Errors and cancellation end the
/// iteration, as does the message channel closing.
#[derive(Debug)]
pub struct MessageIterator {
    messages: Inbound<Message>,
    errors: Inbound<SdkError>,
    errors_closed: bool,
    finished: bool,
}

impl MessageIterator {
    /// Iterate over the given channel pair
    pub fn new(messages: Inbound<Message>, errors: Inbound<SdkError>) -> Self {
        Self {
            messages,
            errors,
            errors_closed: false,
            finished: false,
        }
    }

    /// Next message, or [`SdkError::NoMoreMessages`] when iteration is over
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Message> {
        if self.finished {
            return Err(SdkError::NoMoreMessages);
        }

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.finished = true;
                    return Err(SdkError::Cancelled("message iteration"));
                }
                err = self.errors.recv(), if !self.errors_closed => match err {
                    Some(err) => {
                        self.finished = true;
                        return Err(err);
                    },
                    None => self.errors_closed = true,
                },
                msg = self.messages.recv() => match msg {
                    Some(msg) => return Ok(msg),
                    None => {
                        self.finished = true;
                        return Err(SdkError::NoMoreMessages);
                    },
                },
            }
        }
    }

    /// Stop iterating; later calls return [`SdkError::NoMoreMessages`]
    pub fn close(&mut self) {
        self.finished = true;
    }
}
