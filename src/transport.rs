//! TCP transport for AMS communication.
//!
//! This module only opens sockets. Framing lives in [`crate::frame`] and
//! request correlation in the session driver owned by the
//! [`Client`](crate::Client).
//!
//! # Design
//!
//! - **Protocol agnostic** - connects and tunes the socket, nothing else
//! - **Bounded** - the connect attempt is limited by a timeout
//! - **Low latency** - `TCP_NODELAY` is set because ADS requests are small
//!
//! # Constants
//!
//! - [`DEFAULT_ADS_TCP_PORT`] - AMS router TCP port (48898)
//! - [`DEFAULT_TARGET_PORT`] - AMS port of the first PLC runtime on TwinCAT 2 (801)
//! - [`DEFAULT_SOURCE_PORT`] - AMS port used by this client (32905)
//! - [`DEFAULT_TIMEOUT`] - request timeout (500 ms)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - TCP connect timeout (5 s)
//!
//! # Example
//!
//! ```no_run
//! use beckhoff_ads::transport::{connect, DEFAULT_ADS_TCP_PORT, DEFAULT_CONNECT_TIMEOUT};
//!
//! # async fn run() -> beckhoff_ads::Result<()> {
//! let stream = connect("192.168.1.20", DEFAULT_ADS_TCP_PORT, DEFAULT_CONNECT_TIMEOUT).await?;
//! assert!(stream.nodelay()?);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

/// Default AMS router TCP port.
pub const DEFAULT_ADS_TCP_PORT: u16 = 48898;

/// Default target AMS port.
pub const DEFAULT_TARGET_PORT: u16 = 801;

/// Default source AMS port.
pub const DEFAULT_SOURCE_PORT: u16 = 32905;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a TCP connection to an AMS router.
///
/// # Errors
///
/// Returns `AdsError::Io` if the connection fails, with kind `TimedOut`
/// when `timeout` elapses first.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    debug!(host, port, "connecting");
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {host}:{port} timed out after {timeout:?}"),
            )
        })??;
    stream.set_nodelay(true)?;
    debug!(local = ?stream.local_addr().ok(), peer = ?stream.peer_addr().ok(), "connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_ADS_TCP_PORT, 48898);
        assert_eq!(DEFAULT_TARGET_PORT, 801);
        assert_eq!(DEFAULT_SOURCE_PORT, 32905);
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_millis(500));
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await });

        let stream = connect("127.0.0.1", port, Duration::from_secs(1)).await.unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(accept.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, crate::AdsError::Io(_)));
    }
}
