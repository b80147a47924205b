//! Liveness notifications for a supervising service manager.

use std::path::PathBuf;
use tracing::{debug, warn};

pub struct Watchdog {
    socket: PathBuf,
    #[cfg(unix)]
    datagram: std::os::unix::net::UnixDatagram,
}

impl Watchdog {
    /// `None` when no notification socket is configured, which is the normal
    /// case outside a supervisor.
    pub fn from_env() -> Option<Self> {
        let socket = playout_proto::platform::notify_socket()?;
        Self::new(socket)
    }

    #[cfg(unix)]
    pub fn new(socket: PathBuf) -> Option<Self> {
        if socket.to_string_lossy().starts_with('@') {
            debug!("Watchdog: abstract notify socket {:?} not supported", socket);
            return None;
        }
        match std::os::unix::net::UnixDatagram::unbound() {
            Ok(datagram) => {
                if let Err(e) = datagram.set_nonblocking(true) {
                    warn!("Watchdog: cannot make socket non-blocking: {}", e);
                }
                Some(Self { socket, datagram })
            }
            Err(e) => {
                warn!("Watchdog: cannot open datagram socket: {}", e);
                None
            }
        }
    }

    #[cfg(not(unix))]
    pub fn new(socket: PathBuf) -> Option<Self> {
        debug!("Watchdog: notify socket {:?} ignored on this platform", socket);
        None
    }

    pub fn ready(&self) {
        self.send("READY=1");
    }

    pub fn notify(&self) {
        self.send("WATCHDOG=1");
    }

    #[cfg(unix)]
    fn send(&self, state: &str) {
        if let Err(e) = self.datagram.send_to(state.as_bytes(), &self.socket) {
            debug!("Watchdog: {} not delivered: {}", state, e);
        }
    }

    #[cfg(not(unix))]
    fn send(&self, _state: &str) {}
}
