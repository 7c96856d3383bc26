//! Rate-limited command queue
//!
//! All traffic on the command socket goes through one sender thread
//! (`vimana-sender`). Callers only ever touch the bounded FIFO in front of it.
//!
//! # Exchange Model
//!
//! The drone's protocol carries no request identifier, so a reply can only be
//! attributed to "the last thing sent". The sender therefore owns every
//! exchange end to end:
//!
//! ```text
//! enqueue/request ─► [bounded FIFO] ─► sender: wait spacing ─► send ─► await reply
//!                                                                        │
//!                        request() caller ◄── reply text ────────────────┘
//!                        enqueue() caller      (reply logged only)
//! ```
//!
//! | Path | Caller gets | Reply handling |
//! |------|-------------|----------------|
//! | `enqueue` | `Ok` once accepted, `QueueFull`, `Cancelled` | logged by sender |
//! | `request` | raw reply text or transport error | handed back |
//!
//! # Spacing
//!
//! The next transmission never starts before `last_transmission + interval`
//! on the monotonic clock. Time spent waiting for a reply counts towards the
//! interval.
//!
//! # Late Replies
//!
//! Anything already waiting on the link when a command goes out answers an
//! earlier command (typically one that timed out). The sender drains it
//! before every transmission so it cannot be credited to the new command.

use crate::cancel::{CANCEL_POLL, CancelToken};
use crate::commander::command::Command;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::transport::CommandLink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Largest reply datagram the drone sends
const REPLY_BUFFER_SIZE: usize = 1024;

/// How long the sender blocks on an empty queue before re-checking cancellation
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Anything that accepts fire-and-forget commands
pub trait CommandSink: Send + Sync {
    fn enqueue(&self, command: Command) -> Result<()>;
}

/// A command waiting for transmission
struct QueuedCommand {
    command: Command,
    enqueued_at: Instant,
    /// Present for the blocking variant
    reply: Option<Sender<Result<String>>>,
}

impl QueuedCommand {
    fn respond(self, result: Result<String>) {
        match self.reply {
            Some(reply) => {
                // Requester may have given up already
                let _ = reply.send(result);
            }
            None => match result {
                Ok(text) => log::info!("Drone replied '{}' to '{}'", text, self.command),
                Err(Error::Timeout) => {
                    log::warn!("No reply to '{}' before timeout", self.command)
                }
                Err(Error::Cancelled) => {
                    log::debug!("'{}' dropped on shutdown", self.command)
                }
                Err(e) => log::error!("Failed to deliver '{}': {}", self.command, e),
            },
        }
    }
}

/// Bounded FIFO drained by a single rate-limited sender thread
pub struct CommandQueue {
    tx: Sender<QueuedCommand>,
    /// Held for `len` and for dropping leftovers on stop
    rx: Receiver<QueuedCommand>,
    accepting: AtomicBool,
    cancel: CancelToken,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Create the queue and spawn its sender
    ///
    /// # Arguments
    /// - `link`: command socket (or mock) the sender owns
    /// - `config`: spacing and capacity
    /// - `parent`: cancelling it stops the sender
    pub fn start(
        link: Arc<dyn CommandLink>,
        config: &QueueConfig,
        parent: &CancelToken,
    ) -> Result<Self> {
        let (tx, rx) = bounded(config.capacity.max(1));
        let cancel = parent.child();
        let interval = config.rate_interval();

        let handle = {
            let rx = rx.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("vimana-sender".to_string())
                .spawn(move || sender_loop(link, rx, interval, cancel))?
        };

        log::info!(
            "Command queue started (capacity {}, interval {:?})",
            config.capacity.max(1),
            interval
        );

        Ok(Self {
            tx,
            rx,
            accepting: AtomicBool::new(true),
            cancel,
            sender: Mutex::new(Some(handle)),
        })
    }

    fn push(&self, queued: QueuedCommand) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.tx.try_send(queued) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(queued)) => {
                log::warn!("Command queue full, rejecting '{}'", queued.command);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::Cancelled),
        }
    }

    /// Accept a command for transmission
    pub fn enqueue(&self, command: Command) -> Result<()> {
        log::debug!("Enqueue '{}'", command);
        self.push(QueuedCommand {
            command,
            enqueued_at: Instant::now(),
            reply: None,
        })
    }

    /// Transmit through the sender and wait for the reply text
    pub fn request(&self, command: Command) -> Result<String> {
        let (reply_tx, reply_rx) = bounded(1);
        log::debug!("Request '{}'", command);
        self.push(QueuedCommand {
            command,
            enqueued_at: Instant::now(),
            reply: Some(reply_tx),
        })?;

        loop {
            match reply_rx.recv_timeout(CANCEL_POLL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Cancelled),
            }
        }
    }

    /// Commands accepted but not yet picked up by the sender
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Reject further commands, halt the sender and drop what is left
    ///
    /// Idempotent. Blocking requesters still waiting receive `Cancelled`.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        self.cancel.cancel();

        if let Some(handle) = self.sender.lock().take() {
            if handle.join().is_err() {
                log::error!("Command sender thread panicked");
            }
            let mut dropped = 0;
            while let Ok(queued) = self.rx.try_recv() {
                queued.respond(Err(Error::Cancelled));
                dropped += 1;
            }
            log::info!("Command queue stopped ({} pending dropped)", dropped);
        }
    }
}

impl CommandSink for CommandQueue {
    fn enqueue(&self, command: Command) -> Result<()> {
        CommandQueue::enqueue(self, command)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sender_loop(
    link: Arc<dyn CommandLink>,
    rx: Receiver<QueuedCommand>,
    interval: Duration,
    cancel: CancelToken,
) {
    log::debug!("Command sender started");
    let mut buf = [0u8; REPLY_BUFFER_SIZE];
    let mut last_send: Option<Instant> = None;

    while !cancel.is_cancelled() {
        let queued = match rx.recv_timeout(IDLE_POLL) {
            Ok(queued) => queued,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(last) = last_send
            && !cancel.sleep_until(last + interval)
        {
            queued.respond(Err(Error::Cancelled));
            break;
        }

        log::trace!(
            "Sending '{}' after {:?} in queue",
            queued.command,
            queued.enqueued_at.elapsed()
        );
        match link.drain() {
            Ok(0) => {}
            Ok(n) => log::warn!("Dropped {} late replies before '{}'", n, queued.command),
            Err(e) => log::debug!("Could not drain command link: {}", e),
        }
        let result = link.send(queued.command.text().as_bytes());
        last_send = Some(Instant::now());

        let result = match result {
            Ok(()) if queued.command.expects_reply() => await_reply(&*link, &mut buf, &cancel),
            Ok(()) => Ok(String::new()),
            Err(e) => Err(e),
        };
        queued.respond(result);
    }

    log::debug!("Command sender stopped");
}

fn await_reply(link: &dyn CommandLink, buf: &mut [u8], cancel: &CancelToken) -> Result<String> {
    let (n, _) = link.receive(buf, cancel)?;
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockLink;

    fn queue_with(link: &MockLink, interval_ms: u64, capacity: usize) -> CommandQueue {
        let config = QueueConfig {
            rate_interval_ms: interval_ms,
            capacity,
        };
        CommandQueue::start(Arc::new(link.clone()), &config, &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_fifo_order_and_spacing() {
        let link = MockLink::new();
        let queue = queue_with(&link, 40, 16);

        for cmd in [Command::sdk_mode(), Command::takeoff(), Command::land()] {
            queue.enqueue(cmd).unwrap();
        }
        assert!(link.wait_for(Duration::from_secs(2), |sent| sent.len() == 3));
        assert_eq!(link.sent(), vec!["command", "takeoff", "land"]);

        let times = link.send_times();
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(40));
        }
        queue.stop();
    }

    #[test]
    fn test_request_returns_reply() {
        let link = MockLink::new();
        link.push_reply("ok");
        link.push_reply("87");
        let queue = queue_with(&link, 1, 4);

        assert_eq!(queue.request(Command::sdk_mode()).unwrap(), "ok");
        assert_eq!(
            queue
                .request(Command::query(crate::commander::command::Query::Battery))
                .unwrap(),
            "87"
        );
    }

    #[test]
    fn test_request_timeout_surfaces() {
        let link = MockLink::new();
        link.set_timeout(Duration::from_millis(30));
        link.set_default_reply(None);
        let queue = queue_with(&link, 1, 4);

        assert!(matches!(queue.request(Command::takeoff()), Err(Error::Timeout)));
    }

    #[test]
    fn test_late_reply_not_credited_to_next_request() {
        let link = MockLink::new();
        link.set_timeout(Duration::from_millis(30));
        link.push_silence();
        let queue = queue_with(&link, 1, 4);

        assert!(matches!(queue.request(Command::takeoff()), Err(Error::Timeout)));
        // The drone answers the timed-out takeoff after all
        link.inject_reply("error");

        assert_eq!(queue.request(Command::land()).unwrap(), "ok");
        assert_eq!(link.sent(), vec!["takeoff", "land"]);
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_queue_full_is_explicit() {
        let link = MockLink::new();
        // Long interval keeps the sender parked after its first send
        let queue = queue_with(&link, 5_000, 2);

        queue.enqueue(Command::sdk_mode()).unwrap();
        assert!(link.wait_for(Duration::from_secs(1), |sent| sent.len() == 1));
        // Let the sender pick up the next entry and block on spacing
        queue.enqueue(Command::takeoff()).unwrap();
        assert!(link.wait_for(Duration::from_millis(200), |_| queue.is_empty()));

        queue.enqueue(Command::land()).unwrap();
        queue.enqueue(Command::emergency()).unwrap();
        assert!(matches!(queue.enqueue(Command::land()), Err(Error::QueueFull)));
        assert_eq!(queue.len(), 2);
        queue.stop();
    }

    #[test]
    fn test_enqueue_after_stop_fails_fast() {
        let link = MockLink::new();
        let queue = queue_with(&link, 5_000, 8);
        queue.enqueue(Command::sdk_mode()).unwrap();
        queue.enqueue(Command::takeoff()).unwrap();

        let start = Instant::now();
        queue.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(queue.enqueue(Command::land()), Err(Error::Cancelled)));
        assert!(matches!(queue.request(Command::land()), Err(Error::Cancelled)));
        assert!(queue.is_empty());
        // Pending entries are dropped, not flushed
        assert_eq!(link.count("takeoff"), 0);
    }

    #[test]
    fn test_parent_cancel_stops_sender() {
        let link = MockLink::new();
        let root = CancelToken::new();
        let config = QueueConfig {
            rate_interval_ms: 1,
            capacity: 4,
        };
        let queue = CommandQueue::start(Arc::new(link.clone()), &config, &root).unwrap();

        root.cancel();
        assert!(matches!(queue.enqueue(Command::land()), Err(Error::Cancelled)));
    }

    #[test]
    fn test_rc_does_not_wait_for_reply() {
        let link = MockLink::new();
        link.set_default_reply(None);
        link.set_timeout(Duration::from_secs(5));
        let queue = queue_with(&link, 1, 4);

        let start = Instant::now();
        assert_eq!(queue.request(Command::rc(0, 0, 10, 0).unwrap()).unwrap(), "");
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
