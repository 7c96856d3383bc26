//! Telemetry stream
//!
//! A receive loop (`vimana-telemetry`) reads state broadcasts from the
//! telemetry listener, parses them and republishes snapshots on a bounded
//! channel that favors freshness: when it is full the oldest unread
//! snapshot is discarded instead of blocking the loop.
//!
//! Parse and receive failures go to a separate bounded error channel. They
//! never end the loop; only cancellation or [`TelemetryStream::close`] does.

mod parser;
mod snapshot;

pub use parser::parse_state;
pub use snapshot::TelemetrySnapshot;

use crate::cancel::CancelToken;
use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::transport::UdpEndpoint;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// State packets are well under this size
const PACKET_BUFFER_SIZE: usize = 2048;

/// Handle to the running telemetry receive loop
pub struct TelemetryStream {
    snapshots: Receiver<TelemetrySnapshot>,
    errors: Receiver<Error>,
    dropped: Arc<AtomicU64>,
    cancel: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryStream {
    /// Spawn the receive loop on `listener`
    pub fn start(
        listener: Arc<UdpEndpoint>,
        config: &TelemetryConfig,
        parent: &CancelToken,
    ) -> Result<Self> {
        let (snapshot_tx, snapshots) = bounded(config.buffer.max(1));
        let (error_tx, errors) = bounded(config.error_buffer.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let cancel = parent.child();

        let publisher = Publisher {
            snapshot_tx,
            oldest: snapshots.clone(),
            error_tx,
            dropped: Arc::clone(&dropped),
        };
        let loop_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("vimana-telemetry".to_string())
            .spawn(move || receive_loop(listener, publisher, loop_cancel))?;

        Ok(Self {
            snapshots,
            errors,
            dropped,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Snapshot stream
    ///
    /// Clones share one stream: each snapshot is delivered to exactly one
    /// receiver.
    pub fn snapshots(&self) -> Receiver<TelemetrySnapshot> {
        self.snapshots.clone()
    }

    /// Parse and receive failures
    pub fn errors(&self) -> Receiver<Error> {
        self.errors.clone()
    }

    /// Snapshots discarded to keep the stream fresh
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Halt the receive loop; idempotent
    ///
    /// Both streams disconnect once their remaining items are drained.
    pub fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("Telemetry thread panicked");
            }
            log::info!(
                "Telemetry stream closed ({} snapshots dropped)",
                self.dropped()
            );
        }
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sending side of both streams, owned by the receive loop
struct Publisher {
    snapshot_tx: Sender<TelemetrySnapshot>,
    /// Receiver clone used to evict the oldest snapshot
    oldest: Receiver<TelemetrySnapshot>,
    error_tx: Sender<Error>,
    dropped: Arc<AtomicU64>,
}

impl Publisher {
    fn publish(&self, snapshot: TelemetrySnapshot) {
        let mut pending = snapshot;
        loop {
            match self.snapshot_tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(snapshot)) => {
                    if self.oldest.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        log::debug!("Telemetry stream full, dropped oldest ({} total)", total);
                    }
                    pending = snapshot;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn report(&self, error: Error) {
        match self.error_tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) | Err(TrySendError::Disconnected(error)) => {
                log::warn!("Telemetry error discarded: {}", error);
            }
        }
    }
}

fn receive_loop(listener: Arc<UdpEndpoint>, publisher: Publisher, cancel: CancelToken) {
    log::info!("Telemetry receive loop started");
    let mut buf = [0u8; PACKET_BUFFER_SIZE];

    while !cancel.is_cancelled() {
        match listener.receive(&mut buf, &cancel) {
            Ok((n, _)) => {
                let packet = String::from_utf8_lossy(&buf[..n]);
                match parse_state(&packet) {
                    Ok(snapshot) => publisher.publish(snapshot),
                    Err(e) => {
                        log::debug!("Rejected telemetry packet: {}", e);
                        publisher.report(e);
                    }
                }
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                publisher.report(e);
            }
        }
    }

    log::info!("Telemetry receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};

    fn listener(timeout_ms: u64) -> Arc<UdpEndpoint> {
        Arc::new(
            UdpEndpoint::bind(
                "127.0.0.1:0".parse().unwrap(),
                "state",
                Duration::from_millis(timeout_ms),
            )
            .unwrap(),
        )
    }

    fn config(buffer: usize) -> TelemetryConfig {
        TelemetryConfig {
            buffer,
            error_buffer: 4,
        }
    }

    #[test]
    fn test_publishes_snapshot_and_errors() {
        let listener = listener(1000);
        let target = listener.local_addr().unwrap();
        let stream = TelemetryStream::start(listener, &config(8), &CancelToken::new()).unwrap();

        let drone = UdpSocket::bind("127.0.0.1:0").unwrap();
        drone.send_to(b"pitch:3;roll", target).unwrap();
        drone.send_to(b"bat:55;h:30;\r\n", target).unwrap();

        let error = stream.errors().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(error, Error::MalformedTelemetry(_)));

        let snapshot = stream.snapshots().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(snapshot.bat, 55);
        assert_eq!(snapshot.h, 30);
        // The malformed packet produced no snapshot
        assert!(stream.snapshots().try_recv().is_err());
        stream.close();
    }

    #[test]
    fn test_full_stream_keeps_newest() {
        let listener = listener(1000);
        let target = listener.local_addr().unwrap();
        let stream = TelemetryStream::start(listener, &config(2), &CancelToken::new()).unwrap();

        let drone = UdpSocket::bind("127.0.0.1:0").unwrap();
        for bat in 1..=5 {
            drone.send_to(format!("bat:{};", bat).as_bytes(), target).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while stream.dropped() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stream.dropped(), 3);

        let rx = stream.snapshots();
        assert_eq!(rx.try_recv().unwrap().bat, 4);
        assert_eq!(rx.try_recv().unwrap().bat, 5);
        stream.close();
    }

    #[test]
    fn test_timeouts_reported_and_close_disconnects() {
        let stream = TelemetryStream::start(listener(30), &config(4), &CancelToken::new()).unwrap();

        let error = stream.errors().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(error, Error::Timeout));

        let start = Instant::now();
        stream.close();
        assert!(start.elapsed() < Duration::from_secs(1));

        let errors = stream.errors();
        while errors.try_recv().is_ok() {}
        assert!(errors.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(matches!(
            stream.snapshots().recv(),
            Err(crossbeam_channel::RecvError)
        ));
    }
}
