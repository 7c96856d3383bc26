//! Transport layer for the three drone UDP channels

use crate::cancel::CancelToken;
use crate::config::NetworkConfig;
use crate::error::Result;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

pub mod mock;
mod udp;
pub use udp::{CommandSocket, UdpEndpoint};

/// Request/response link to the drone's command port
///
/// Implemented by [`CommandSocket`] for real hardware and
/// [`mock::MockLink`] for tests.
pub trait CommandLink: Send + Sync {
    /// Transmit one command datagram
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Wait for one reply datagram
    fn receive(&self, buf: &mut [u8], cancel: &CancelToken) -> Result<(usize, SocketAddr)>;

    /// Drop replies already waiting on the link without blocking
    ///
    /// Returns the number of datagrams discarded.
    fn drain(&self) -> Result<usize>;

    /// Release the link; later calls fail with `Cancelled`
    fn close(&self);
}

/// The three sockets of one drone session
pub struct ChannelPair {
    command: Arc<CommandSocket>,
    state: Arc<UdpEndpoint>,
    video: Option<Arc<UdpEndpoint>>,
}

impl ChannelPair {
    /// Bind the command socket, the telemetry listener and optionally the
    /// video listener
    pub fn open(config: &NetworkConfig, with_video: bool) -> Result<Self> {
        let remote = config.command_addr();
        let local = match remote {
            SocketAddr::V4(_) => SocketAddr::V4(SocketAddrV4::new([0, 0, 0, 0].into(), 0)),
            SocketAddr::V6(_) => SocketAddr::V6(SocketAddrV6::new([0u16; 8].into(), 0, 0, 0)),
        };
        let command = Arc::new(CommandSocket::open(
            local,
            remote,
            config.command_timeout(),
        )?);

        let state = Arc::new(UdpEndpoint::bind(
            config.state_addr(),
            "state",
            config.listener_timeout(),
        )?);

        let video = if with_video {
            Some(Arc::new(UdpEndpoint::bind(
                config.video_addr(),
                "video",
                config.listener_timeout(),
            )?))
        } else {
            None
        };

        Ok(Self {
            command,
            state,
            video,
        })
    }

    pub fn command(&self) -> Arc<CommandSocket> {
        Arc::clone(&self.command)
    }

    pub fn state_listener(&self) -> Arc<UdpEndpoint> {
        Arc::clone(&self.state)
    }

    pub fn video_listener(&self) -> Option<Arc<UdpEndpoint>> {
        self.video.as_ref().map(Arc::clone)
    }

    /// Close every socket; idempotent
    pub fn close(&self) {
        self.command.close();
        self.state.close();
        if let Some(video) = &self.video {
            video.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> NetworkConfig {
        NetworkConfig {
            drone_ip: "127.0.0.1".parse().unwrap(),
            bind_ip: "127.0.0.1".parse().unwrap(),
            command_port: 9,
            state_port: 0,
            video_port: 0,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_open_without_video() {
        let channels = ChannelPair::open(&loopback_config(), false).unwrap();
        assert!(channels.video_listener().is_none());
        assert_eq!(channels.command().remote_addr().port(), 9);
        assert_ne!(channels.state_listener().local_addr().unwrap().port(), 0);
        channels.close();
        assert!(channels.state_listener().is_closed());
    }

    #[test]
    fn test_open_with_video_and_close_twice() {
        let channels = ChannelPair::open(&loopback_config(), true).unwrap();
        let video = channels.video_listener().unwrap();
        assert_eq!(video.label(), "video");
        channels.close();
        channels.close();
        assert!(video.is_closed());
    }
}
