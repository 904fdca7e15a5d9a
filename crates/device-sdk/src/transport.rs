//! The one thing the core needs from a transport: a way to push a text frame.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;

use crate::types::SdkError;

/// Outbound half of an established link.
///
/// Handed to [`DeviceAccess::on_establish`](crate::DeviceAccess::on_establish)
/// when the transport comes up.  `send_frame` must not block: it either
/// queues the frame or fails immediately.
pub trait FrameSink: Send + Sync + 'static {
    fn send_frame(&self, frame: String) -> Result<(), SdkError>;
}

/// Sink feeding a WebSocket writer task through a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn send_frame(&self, frame: String) -> Result<(), SdkError> {
        match self.tx.try_send(Message::Text(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SdkError::AllocationFailure(
                "outbound queue is full".into(),
            )),
            Err(TrySendError::Closed(_)) => Err(SdkError::ConnectionDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_queues_text_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.send_frame("{}".into()).unwrap();
        assert_eq!(rx.recv().await, Some(Message::Text("{}".into())));
    }

    #[test]
    fn full_queue_is_allocation_failure() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.send_frame("a".into()).unwrap();
        assert!(matches!(
            sink.send_frame("b".into()),
            Err(SdkError::AllocationFailure(_))
        ));
    }

    #[test]
    fn closed_writer_is_connection_down() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(matches!(
            sink.send_frame("a".into()),
            Err(SdkError::ConnectionDown)
        ));
    }
}
