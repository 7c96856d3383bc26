//! Drone session
//!
//! Wires the components together:
//!
//! ```text
//! Commander ─► CommandQueue ─► command socket ─► drone
//! drone ─► state listener ─► TelemetryStream ─► SafetySupervisor ─► CommandQueue
//! drone ─► video listener ─► VideoStream ─► sink
//! ```
//!
//! Shutdown order: supervisor (no more protective commands), telemetry,
//! video, queue, sockets, root token.

use crate::cancel::CancelToken;
use crate::commander::Commander;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::queue::{CommandQueue, CommandSink};
use crate::safety::SafetySupervisor;
use crate::telemetry::{TelemetrySnapshot, TelemetryStream};
use crate::transport::{ChannelPair, CommandLink};
use crate::video::VideoStream;
use crossbeam_channel::Receiver;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One connection to one drone
pub struct Session {
    channels: ChannelPair,
    queue: Arc<CommandQueue>,
    commander: Commander,
    telemetry: TelemetryStream,
    supervisor: SafetySupervisor,
    video: Option<VideoStream>,
    cancel: CancelToken,
    closed: AtomicBool,
}

impl Session {
    /// Connect using the configured video output file (when video is enabled)
    pub fn connect(config: &AppConfig) -> Result<Self> {
        let sink: Option<Box<dyn Write + Send>> = if config.video.enabled {
            let file = File::create(&config.video.output)?;
            log::info!("Writing raw video to {}", config.video.output);
            Some(Box::new(BufWriter::new(file)))
        } else {
            None
        };
        Self::connect_with(config, sink, &CancelToken::new())
    }

    /// Connect with an explicit video sink and parent cancellation token
    ///
    /// The video listener is only bound when `video_sink` is given.
    pub fn connect_with(
        config: &AppConfig,
        video_sink: Option<Box<dyn Write + Send>>,
        parent: &CancelToken,
    ) -> Result<Self> {
        let cancel = parent.child();
        let channels = ChannelPair::open(&config.network, video_sink.is_some())?;

        let link: Arc<dyn CommandLink> = channels.command();
        let queue = Arc::new(CommandQueue::start(link, &config.queue, &cancel)?);
        let commander = Commander::new(Arc::clone(&queue), &config.commander);

        let telemetry =
            TelemetryStream::start(channels.state_listener(), &config.telemetry, &cancel)?;

        let sink: Arc<dyn CommandSink> = queue.clone();
        let supervisor = SafetySupervisor::start(
            sink,
            telemetry.snapshots(),
            config.safety.clone(),
            &cancel,
        )?;

        let video = match (video_sink, channels.video_listener()) {
            (Some(sink), Some(listener)) => Some(VideoStream::start(
                listener,
                sink,
                config.telemetry.error_buffer,
                &cancel,
            )?),
            _ => None,
        };

        log::info!("Session connected to {}", config.network.command_addr());

        Ok(Self {
            channels,
            queue,
            commander,
            telemetry,
            supervisor,
            video,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    pub fn commander(&self) -> &Commander {
        &self.commander
    }

    pub fn supervisor(&self) -> &SafetySupervisor {
        &self.supervisor
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Telemetry parse/receive failures
    pub fn telemetry_errors(&self) -> Receiver<Error> {
        self.telemetry.errors()
    }

    /// Video receive/sink failures (`None` without video)
    pub fn video_errors(&self) -> Option<Receiver<Error>> {
        self.video.as_ref().map(VideoStream::errors)
    }

    /// Latest telemetry snapshot seen by the supervisor
    pub fn latest_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.supervisor.latest()
    }

    /// Local telemetry listener address
    pub fn state_addr(&self) -> Result<SocketAddr> {
        self.channels.state_listener().local_addr()
    }

    /// Local video listener address (`None` without video)
    pub fn video_addr(&self) -> Option<Result<SocketAddr>> {
        self.channels.video_listener().map(|l| l.local_addr())
    }

    /// Stop every component and release the sockets; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Closing session");
        self.supervisor.stop();
        self.telemetry.close();
        if let Some(video) = &self.video {
            video.close();
        }
        self.queue.stop();
        self.channels.close();
        self.cancel.cancel();
        log::info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
