//! Connection state tracker.
//!
//! `Connecting → Connected ⇄ Disconnected`, plus the terminal `Closed` entered
//! on shutdown.  Only the transport hooks move the state; once `Closed`,
//! further hooks are ignored and every send is refused.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::handler::ConnectionObserver;
use crate::transport::FrameSink;
use crate::types::SdkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        })
    }
}

struct Link {
    state: ConnectionState,
    sink: Option<Arc<dyn FrameSink>>,
}

pub struct ConnectionTracker {
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl ConnectionTracker {
    pub fn new(observer: Option<Arc<dyn ConnectionObserver>>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            link: Mutex::new(Link {
                state: ConnectionState::Connecting,
                sink: None,
            }),
            state_tx,
            observer,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Transport came up.  Returns `false` if the tracker is already closed.
    pub fn establish(&self, sink: Arc<dyn FrameSink>) -> bool {
        let changed = {
            let mut link = self.link.lock();
            if link.state == ConnectionState::Closed {
                return false;
            }
            link.sink = Some(sink);
            let changed = link.state != ConnectionState::Connected;
            link.state = ConnectionState::Connected;
            changed
        };
        if changed {
            self.publish(ConnectionState::Connected);
        }
        true
    }

    /// Transport went away.
    pub fn close(&self) {
        let changed = {
            let mut link = self.link.lock();
            if link.state == ConnectionState::Closed {
                return;
            }
            link.sink = None;
            let changed = link.state != ConnectionState::Disconnected;
            link.state = ConnectionState::Disconnected;
            changed
        };
        if changed {
            self.publish(ConnectionState::Disconnected);
        }
    }

    /// Enter the terminal state.  Returns `false` if already closed.
    pub fn shutdown(&self) -> bool {
        {
            let mut link = self.link.lock();
            if link.state == ConnectionState::Closed {
                return false;
            }
            link.sink = None;
            link.state = ConnectionState::Closed;
        }
        self.publish(ConnectionState::Closed);
        true
    }

    /// Push a frame out, failing fast unless connected.
    pub fn send(&self, frame: String) -> Result<(), SdkError> {
        let sink = {
            let link = self.link.lock();
            match (link.state, &link.sink) {
                (ConnectionState::Connected, Some(sink)) => Arc::clone(sink),
                (ConnectionState::Closed, _) => return Err(SdkError::Closed),
                _ => return Err(SdkError::ConnectionDown),
            }
        };
        sink.send_frame(frame)
    }

    /// Fail fast with the error `send` would produce, without sending.
    pub fn ensure_connected(&self) -> Result<(), SdkError> {
        match self.current() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(SdkError::Closed),
            _ => Err(SdkError::ConnectionDown),
        }
    }

    // Called with no lock held so the observer may query the tracker.
    fn publish(&self, state: ConnectionState) {
        tracing::info!(state = %state, "connection state changed");
        self.state_tx.send_replace(state);
        if let Some(observer) = &self.observer {
            observer.on_state_change(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl FrameSink for Capture {
        fn send_frame(&self, frame: String) -> Result<(), SdkError> {
            self.0.lock().push(frame);
            Ok(())
        }
    }

    fn tracker_with_log() -> (ConnectionTracker, Arc<Mutex<Vec<ConnectionState>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let tracker = ConnectionTracker::new(Some(Arc::new(move |s: ConnectionState| {
            seen.lock().push(s);
        })));
        (tracker, log)
    }

    #[test]
    fn starts_connecting_and_refuses_sends() {
        let (tracker, log) = tracker_with_log();
        assert_eq!(tracker.current(), ConnectionState::Connecting);
        assert!(matches!(
            tracker.send("x".into()),
            Err(SdkError::ConnectionDown)
        ));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn each_transition_notifies_once() {
        let (tracker, log) = tracker_with_log();
        let sink = Arc::new(Capture::default());

        tracker.establish(sink.clone());
        tracker.establish(sink.clone());
        tracker.close();
        tracker.close();
        tracker.establish(sink);

        assert_eq!(
            *log.lock(),
            vec![
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connected,
            ]
        );
    }

    #[test]
    fn sends_reach_sink_only_while_connected() {
        let (tracker, _log) = tracker_with_log();
        let sink = Arc::new(Capture::default());
        tracker.establish(sink.clone());
        tracker.send("one".into()).unwrap();
        tracker.close();
        assert!(matches!(
            tracker.send("two".into()),
            Err(SdkError::ConnectionDown)
        ));
        assert_eq!(*sink.0.lock(), vec!["one".to_string()]);
    }

    #[test]
    fn closed_is_terminal() {
        let (tracker, log) = tracker_with_log();
        assert!(tracker.shutdown());
        assert!(!tracker.shutdown());
        assert!(!tracker.establish(Arc::new(Capture::default())));
        tracker.close();

        assert_eq!(tracker.current(), ConnectionState::Closed);
        assert_eq!(*log.lock(), vec![ConnectionState::Closed]);
        assert!(matches!(tracker.send("x".into()), Err(SdkError::Closed)));
    }

    #[tokio::test]
    async fn watchers_see_latest_state() {
        let tracker = ConnectionTracker::new(None);
        let mut rx = tracker.subscribe();
        tracker.establish(Arc::new(Capture::default()));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }
}
