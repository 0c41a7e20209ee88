//! Selecting the kernel congestion-control algorithm for a socket.

use std::io;

use tokio::net::TcpListener;

/// Algorithm name registered by the RAT kernel module.
pub const ALGORITHM_NAME: &str = "remy";

#[derive(Debug, thiserror::Error)]
pub enum SocketOptionError {
    #[error("failed to set congestion control: {0}")]
    Io(#[from] io::Error),
    #[error("selecting the congestion control algorithm is not supported on this platform")]
    Unsupported,
}

/// Installs a congestion-control algorithm on a listening socket.
pub trait CongestionInstaller: Send + Sync {
    fn install(&self, listener: &TcpListener) -> Result<(), SocketOptionError>;
}

/// `setsockopt(IPPROTO_TCP, TCP_CONGESTION, name)`.
#[derive(Debug, Clone)]
pub struct TcpCongestionOption {
    algorithm: String,
}

impl TcpCongestionOption {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }
}

impl Default for TcpCongestionOption {
    fn default() -> Self {
        Self::new(ALGORITHM_NAME)
    }
}

impl CongestionInstaller for TcpCongestionOption {
    #[cfg(target_os = "linux")]
    fn install(&self, listener: &TcpListener) -> Result<(), SocketOptionError> {
        use std::os::fd::AsRawFd;

        let name = self.algorithm.as_bytes();
        let ret = unsafe {
            libc::setsockopt(
                listener.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_CONGESTION,
                name.as_ptr() as *const libc::c_void,
                name.len() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        tracing::info!(algorithm = %self.algorithm, "congestion control installed");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn install(&self, _listener: &TcpListener) -> Result<(), SocketOptionError> {
        Err(SocketOptionError::Unsupported)
    }
}
