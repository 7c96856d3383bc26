//! Mock command link for testing
//!
//! Records every transmitted command with its send instant and answers
//! with scripted replies, falling back to a default reply (`ok`).

use super::CommandLink;
use crate::cancel::{CANCEL_POLL, CancelToken};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mock command link for unit testing
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Shared>,
}

struct Shared {
    state: Mutex<MockLinkInner>,
    reply_ready: Condvar,
}

struct MockLinkInner {
    sent: Vec<(String, Instant)>,
    scripted: VecDeque<Option<String>>,
    default_reply: Option<String>,
    pending: VecDeque<String>,
    timeout: Duration,
    closed: bool,
}

impl MockLink {
    /// Create a mock link that answers every command with `ok`
    pub fn new() -> Self {
        MockLink {
            inner: Arc::new(Shared {
                state: Mutex::new(MockLinkInner {
                    sent: Vec::new(),
                    scripted: VecDeque::new(),
                    default_reply: Some("ok".to_string()),
                    pending: VecDeque::new(),
                    timeout: Duration::from_secs(1),
                    closed: false,
                }),
                reply_ready: Condvar::new(),
            }),
        }
    }

    /// Queue the reply for the next unscripted send
    pub fn push_reply(&self, reply: &str) {
        self.inner.state.lock().scripted.push_back(Some(reply.to_string()));
    }

    /// Make the next send go unanswered
    pub fn push_silence(&self) {
        self.inner.state.lock().scripted.push_back(None);
    }

    /// Reply used once the scripted replies run out (`None` = never answer)
    pub fn set_default_reply(&self, reply: Option<&str>) {
        self.inner.state.lock().default_reply = reply.map(str::to_string);
    }

    /// Per-call receive timeout
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.state.lock().timeout = timeout;
    }

    /// Every transmitted command text, in order
    pub fn sent(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .sent
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    /// Send instants, in order
    pub fn send_times(&self) -> Vec<Instant> {
        self.inner.state.lock().sent.iter().map(|(_, at)| *at).collect()
    }

    /// Number of transmissions of exactly `text`
    pub fn count(&self, text: &str) -> usize {
        self.inner
            .state
            .lock()
            .sent
            .iter()
            .filter(|(sent, _)| sent == text)
            .count()
    }

    /// Block until `predicate` holds for the sent log or `timeout` elapses
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[String]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.sent()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(CANCEL_POLL);
        }
    }

    /// Deliver `reply` as if it arrived unprompted, e.g. after a timeout
    pub fn inject_reply(&self, reply: &str) {
        self.inner.state.lock().pending.push_back(reply.to_string());
        self.inner.reply_ready.notify_all();
    }

    /// Replies delivered but not yet received
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8889))
    }
}

impl CommandLink for MockLink {
    fn send(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.state.lock();
        if inner.closed {
            return Err(Error::Cancelled);
        }

        let text = String::from_utf8_lossy(data).into_owned();
        inner.sent.push((text, Instant::now()));

        let reply = match inner.scripted.pop_front() {
            Some(scripted) => scripted,
            None => inner.default_reply.clone(),
        };
        if let Some(reply) = reply {
            inner.pending.push_back(reply);
            self.inner.reply_ready.notify_all();
        }
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<(usize, SocketAddr)> {
        let mut inner = self.inner.state.lock();
        let timeout_at = Instant::now() + inner.timeout;

        loop {
            if inner.closed || cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(reply) = inner.pending.pop_front() {
                let bytes = reply.as_bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                return Ok((n, Self::peer()));
            }
            if Instant::now() >= timeout_at {
                return Err(Error::Timeout);
            }
            self.inner.reply_ready.wait_for(&mut inner, CANCEL_POLL);
        }
    }

    fn drain(&self) -> Result<usize> {
        let mut inner = self.inner.state.lock();
        if inner.closed {
            return Err(Error::Cancelled);
        }
        let dropped = inner.pending.len();
        for reply in inner.pending.drain(..) {
            log::warn!("Mock link discarded stale reply '{}'", reply);
        }
        Ok(dropped)
    }

    fn close(&self) {
        let mut inner = self.inner.state.lock();
        inner.closed = true;
        self.inner.reply_ready.notify_all();
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reply_is_ok() {
        let link = MockLink::new();
        link.send(b"takeoff").unwrap();

        let mut buf = [0u8; 32];
        let (n, _) = link.receive(&mut buf, &CancelToken::new()).unwrap();
        assert_eq!(&buf[..n], b"ok");
        assert_eq!(link.sent(), vec!["takeoff".to_string()]);
    }

    #[test]
    fn test_scripted_replies_then_silence() {
        let link = MockLink::new();
        link.set_timeout(Duration::from_millis(30));
        link.push_reply("87");
        link.push_silence();

        let mut buf = [0u8; 32];
        link.send(b"battery?").unwrap();
        let (n, _) = link.receive(&mut buf, &CancelToken::new()).unwrap();
        assert_eq!(&buf[..n], b"87");

        link.send(b"speed?").unwrap();
        assert!(matches!(
            link.receive(&mut buf, &CancelToken::new()),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_drain_drops_late_replies() {
        let link = MockLink::new();
        link.set_timeout(Duration::from_millis(30));
        link.inject_reply("error");
        link.inject_reply("ok");
        assert_eq!(link.pending(), 2);

        assert_eq!(link.drain().unwrap(), 2);
        assert_eq!(link.pending(), 0);
        let mut buf = [0u8; 32];
        assert!(matches!(
            link.receive(&mut buf, &CancelToken::new()),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_closed_link_rejects_send() {
        let link = MockLink::new();
        link.close();
        assert!(link.is_closed());
        assert!(matches!(link.send(b"land"), Err(Error::Cancelled)));
        assert_eq!(link.count("land"), 0);
    }
}
