//! Raw video forwarding
//!
//! The drone pushes unframed H.264 fragments to the video port once
//! `streamon` is accepted. This loop (`vimana-video`) hands every non-empty
//! datagram, in arrival order, to an opaque byte sink (file, pipe into a
//! decoder). Decoding happens elsewhere.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::transport::UdpEndpoint;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Video fragments fit a standard UDP payload
const FRAGMENT_BUFFER_SIZE: usize = 2048;

/// Handle to the running video forwarder
pub struct VideoStream {
    errors: Receiver<Error>,
    bytes: Arc<AtomicU64>,
    cancel: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl VideoStream {
    /// Spawn the forwarding loop
    pub fn start(
        listener: Arc<UdpEndpoint>,
        sink: Box<dyn Write + Send>,
        error_buffer: usize,
        parent: &CancelToken,
    ) -> Result<Self> {
        let (error_tx, errors) = bounded(error_buffer.max(1));
        let bytes = Arc::new(AtomicU64::new(0));
        let cancel = parent.child();

        let handle = {
            let bytes = Arc::clone(&bytes);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("vimana-video".to_string())
                .spawn(move || forward_loop(listener, sink, error_tx, bytes, cancel))?
        };

        Ok(Self {
            errors,
            bytes,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Receive and sink failures
    pub fn errors(&self) -> Receiver<Error> {
        self.errors.clone()
    }

    /// Total bytes forwarded
    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Halt the loop and flush the sink; idempotent
    pub fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("Video thread panicked");
            }
            log::info!("Video stream closed ({} bytes forwarded)", self.bytes_forwarded());
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn report(errors: &Sender<Error>, error: Error) {
    if let Err(TrySendError::Full(error)) | Err(TrySendError::Disconnected(error)) =
        errors.try_send(error)
    {
        log::warn!("Video error discarded: {}", error);
    }
}

fn forward_loop(
    listener: Arc<UdpEndpoint>,
    mut sink: Box<dyn Write + Send>,
    errors: Sender<Error>,
    bytes: Arc<AtomicU64>,
    cancel: CancelToken,
) {
    log::info!("Video forwarding started");
    let mut buf = [0u8; FRAGMENT_BUFFER_SIZE];

    while !cancel.is_cancelled() {
        match listener.receive(&mut buf, &cancel) {
            Ok((0, _)) => {}
            Ok((n, _)) => {
                if let Err(e) = sink.write_all(&buf[..n]) {
                    log::error!("Video sink write failed: {}", e);
                    report(&errors, Error::Io(e));
                    break;
                }
                bytes.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(Error::Cancelled) => break,
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                report(&errors, e);
            }
        }
    }

    if let Err(e) = sink.flush() {
        log::warn!("Video sink flush failed: {}", e);
    }
    log::info!("Video forwarding stopped");
}
