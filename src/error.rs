use thiserror::Error;
use tokio::time::error::Elapsed;

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if a server address string can't be parsed.
    #[error("bad address string {0:?}: {1}")]
    InvalidAddress(String, &'static str),
    /// Returned if a received packet does not have the expected header or
    /// layout.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    /// Returned if a client method that needs a socket is called before
    /// `connect()` or after `close()`.
    #[error("not connected, call connect first")]
    NotConnected,
    /// Returned if the host name can't be resolved.
    #[error("can't resolve {host}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    /// Returned if resolution succeeded but produced no usable address.
    #[error("no usable address found for {0}")]
    NoAddress(String),
    /// Returned if the socket can't be opened or connected to the host.
    #[error("host cannot be reached")]
    UnreachableHost(#[source] std::io::Error),
    /// Internal error used if the socket was opened, but there was a problem
    /// writing to it.
    #[error("cannot send message to host")]
    SendError(#[source] std::io::Error),
    /// Internal error used if the socket was opened, but there was a problem
    /// reading from it.
    #[error("cannot receive response from host")]
    ReceiveError(#[source] std::io::Error),
    /// Returned if the server did not respond in time.
    #[error("timeout")]
    TimeoutError(#[from] Elapsed),
    /// Returned for a secure rcon mode outside of 0, 1 and 2.
    #[error("bad value of secure rcon: {0}")]
    InvalidSecureMode(i64),
    /// Returned for settings that can't be used, e.g. a zero timeout or a
    /// profile missing from the config file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// HMAC-MD4 could not be set up. Secure rcon needs MD4, which is legacy
    /// crypto kept only for protocol compatibility.
    #[error("HMAC-MD4 unavailable: {0}")]
    Crypto(String),
}

impl RconError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        RconError::MalformedPacket(msg.into())
    }

    /// Bad data: either from the network or from an address string.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            RconError::InvalidAddress(..) | RconError::MalformedPacket(_)
        )
    }

    /// Misuse of the client lifecycle.
    pub fn is_state_error(&self) -> bool {
        matches!(self, RconError::NotConnected)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RconError::TimeoutError(_))
    }
}

pub type Result<T> = std::result::Result<T, RconError>;
