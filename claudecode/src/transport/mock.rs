//! In-memory mock transport for testing
use super::{StreamMessage, Transport};
use crate::{
    channel::{self, Inbound},
    errors::{Result, SdkError},
    types::Message,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Handle for interacting with the mock transport in tests
#[derive(Debug)]
pub struct MockTransportHandle {
    /// Inject inbound messages (as if coming from CLI)
    pub message_tx: mpsc::Sender<Message>,
    /// Inject inbound errors (as if raised by the stdout worker)
    pub error_tx: mpsc::Sender<SdkError>,
    /// Observe envelopes sent by the client
    pub sent_input_rx: mpsc::UnboundedReceiver<StreamMessage>,
}

/// An in-memory transport implementing the `Transport` trait
///
/// Dropping the handle's senders plays the role of the stdout worker
/// exiting: both channels close.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    messages: Inbound<Message>,
    errors: Inbound<SdkError>,
    sent_input_tx: mpsc::UnboundedSender<StreamMessage>,
    connects: AtomicUsize,
    interrupts: AtomicUsize,
    closes: AtomicUsize,
    connect_error: Mutex<Option<SdkError>>,
    send_error: Mutex<Option<SdkError>>,
    close_error: Mutex<Option<SdkError>>,
}

impl MockTransport {
    /// Create a new mock transport and a handle for tests
    pub fn pair() -> (Arc<Self>, MockTransportHandle) {
        let (message_tx, messages) = channel::bounded();
        let (error_tx, errors) = channel::bounded();
        let (sent_input_tx, sent_input_rx) = mpsc::unbounded_channel();

        let transport = Self {
            connected: AtomicBool::new(false),
            messages,
            errors,
            sent_input_tx,
            connects: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            connect_error: Mutex::new(None),
            send_error: Mutex::new(None),
            close_error: Mutex::new(None),
        };

        let handle = MockTransportHandle {
            message_tx,
            error_tx,
            sent_input_rx,
        };

        (Arc::new(transport), handle)
    }

    /// Make the next `connect` fail with `err`
    pub async fn fail_next_connect(&self, err: SdkError) {
        *self.connect_error.lock().await = Some(err);
    }

    /// Make the next `send_message` fail with `err`
    pub async fn fail_next_send(&self, err: SdkError) {
        *self.send_error.lock().await = Some(err);
    }

    /// Make the next effective `close` fail with `err`
    pub async fn fail_next_close(&self, err: SdkError) {
        *self.close_error.lock().await = Some(err);
    }

    /// Whether the mock is connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of interrupts delivered
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Number of closes that shut a live connection down
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("connect"));
        }
        if let Some(err) = self.connect_error.lock().await.take() {
            return Err(err);
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(SdkError::AlreadyConnected);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, cancel: &CancellationToken, message: StreamMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(SdkError::NotConnected);
        }
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("send message"));
        }
        if let Some(err) = self.send_error.lock().await.take() {
            return Err(err);
        }
        self.sent_input_tx.send(message).map_err(|_| {
            SdkError::WriteMessageFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock transport handle was dropped",
            ))
        })
    }

    async fn receive_messages(&self) -> (Inbound<Message>, Inbound<SdkError>) {
        if self.is_connected() {
            (self.messages.clone(), self.errors.clone())
        } else {
            (Inbound::closed(), Inbound::closed())
        }
    }

    async fn interrupt(&self, _cancel: &CancellationToken) -> Result<()> {
        if !self.is_connected() {
            return Err(SdkError::NotConnected);
        }
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.close_error.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_sent_messages() {
        let (transport, mut handle) = MockTransport::pair();
        let cancel = CancellationToken::new();

        transport.connect(&cancel).await.unwrap();
        transport
            .send_message(&cancel, StreamMessage::user("hello", "s1"))
            .await
            .unwrap();

        let sent = handle.sent_input_rx.recv().await.unwrap();
        assert_eq!(sent, StreamMessage::user("hello", "s1"));
    }

    #[tokio::test]
    async fn test_mock_close_is_idempotent() {
        let (transport, _handle) = MockTransport::pair();
        let cancel = CancellationToken::new();

        transport.connect(&cancel).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.close_count(), 1);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_fails_once_handle_is_dropped() {
        let (transport, handle) = MockTransport::pair();
        let cancel = CancellationToken::new();
        transport.connect(&cancel).await.unwrap();
        drop(handle);

        let err = transport
            .send_message(&cancel, StreamMessage::user("lost", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::WriteMessageFailed(_)));
    }
}
