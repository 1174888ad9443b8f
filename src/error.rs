//! Error types for the ADS protocol.
//!
//! Errors fall into a handful of groups:
//!
//! - **Device errors** - a nonzero ADS return code carried inside a frame.
//!   They are reported to the caller of the one operation that produced
//!   them and never end the session.
//! - **Correlation errors** - a request that timed out, or a response whose
//!   invoke id matches no request (fatal for the session).
//! - **Transport errors** - socket I/O failures and disconnects.
//! - **Decode errors** - malformed or short buffers while parsing symbol,
//!   datatype or notification payloads.
//! - **Configuration errors** - missing or malformed session settings.

use std::io;
use thiserror::Error;

/// Result type alias for ADS operations.
pub type Result<T> = std::result::Result<T, AdsError>;

/// Errors that can occur during ADS communication.
#[derive(Debug, Error)]
pub enum AdsError {
    /// Nonzero ADS return code reported by the router or the device.
    #[error("ADS error {code} (0x{code:04X}): {}", describe(.code))]
    Device {
        /// Raw ADS error code.
        code: u32,
    },

    /// No response arrived within the request timeout.
    #[error("request timeout (invoke id {invoke_id})")]
    Timeout {
        /// Invoke id of the request that timed out.
        invoke_id: u32,
    },

    /// A response arrived for an invoke id with no outstanding request.
    #[error("received a response for unknown invoke id {invoke_id}")]
    UnknownInvokeId {
        /// Invoke id found in the inbound frame.
        invoke_id: u32,
    },

    /// The session is not connected or is shutting down.
    #[error("not connected")]
    NotConnected,

    /// The connection closed while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Invalid or missing session configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration problem.
        reason: String,
    },

    /// Malformed AMS net id or address.
    #[error("Invalid address: {reason}")]
    InvalidAddress {
        /// Description of the addressing error.
        reason: String,
    },

    /// Malformed property path expression.
    #[error("Invalid property expression: {reason}")]
    InvalidPath {
        /// Description of the parse failure.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Malformed or truncated payload.
    #[error("decode error: {reason}")]
    Decode {
        /// Description of the decode failure.
        reason: String,
    },

    /// A handle field has no value to write.
    #[error("property {path} not available on handle")]
    MissingValue {
        /// Property path that had no value.
        path: String,
    },

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AdsError {
    /// Creates an error from an ADS return code, or `None` for success (0).
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::AdsError;
    ///
    /// assert!(AdsError::from_code(0).is_none());
    /// let err = AdsError::from_code(1808).unwrap();
    /// assert_eq!(err.code(), Some(1808));
    /// ```
    pub fn from_code(code: u32) -> Option<Self> {
        if code == 0 {
            None
        } else {
            Some(Self::Device { code })
        }
    }

    /// Creates a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddress` error.
    pub fn invalid_address(reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidPath` error.
    pub fn invalid_path(reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::AdsError;
    ///
    /// let err = AdsError::invalid_parameter("handles", "must not be empty");
    /// assert_eq!(err.to_string(), "Invalid parameter 'handles': must not be empty");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `Decode` error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Returns the ADS return code for device errors.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Device { code } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether this error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Converts an ADS return code into a `Result`.
pub(crate) fn check_code(code: u32) -> Result<()> {
    match AdsError::from_code(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn describe(code: &u32) -> &'static str {
    ads_error_description(*code).unwrap_or("unknown error code")
}

/// Returns the text for a known ADS error code.
///
/// # Example
///
/// ```
/// use beckhoff_ads::ads_error_description;
///
/// assert_eq!(ads_error_description(0), Some("OK"));
/// assert_eq!(ads_error_description(1808), Some("symbol not found"));
/// assert_eq!(ads_error_description(4242), None);
/// ```
pub fn ads_error_description(code: u32) -> Option<&'static str> {
    ADS_ERRORS
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|idx| ADS_ERRORS[idx].1)
}

/// Sorted by code for binary search.
static ADS_ERRORS: &[(u32, &str)] = &[
    (0, "OK"),
    (1, "Internal error"),
    (2, "No Rtime"),
    (3, "Allocation locked memory error"),
    (4, "Insert mailbox error"),
    (5, "Wrong receive HMSG"),
    (6, "target port not found"),
    (7, "target machine not found"),
    (8, "Unknown command ID"),
    (9, "Bad task ID"),
    (10, "No IO"),
    (11, "Unknown AMS command"),
    (12, "Win 32 error"),
    (13, "Port not connected"),
    (14, "Invalid AMS length"),
    (15, "Invalid AMS Net ID"),
    (16, "Low Installation level"),
    (17, "No debug available"),
    (18, "Port disabled"),
    (19, "Port already connected"),
    (20, "AMS Sync Win32 error"),
    (21, "AMS Sync Timeout"),
    (22, "AMS Sync AMS error"),
    (23, "AMS Sync no index map"),
    (24, "Invalid AMS port"),
    (25, "No memory"),
    (26, "TCP send error"),
    (27, "Host unreachable"),
    (1792, "error class <device error>"),
    (1793, "Service is not supported by server"),
    (1794, "invalid index group"),
    (1795, "invalid index offset"),
    (1796, "reading/writing not permitted"),
    (1797, "parameter size not correct"),
    (1798, "invalid parameter value(s)"),
    (1799, "device is not in a ready state"),
    (1800, "device is busy"),
    (1801, "invalid context (must be in Windows)"),
    (1802, "out of memory"),
    (1803, "invalid parameter value(s)"),
    (1804, "not found (files, ...)"),
    (1805, "syntax error in command or file"),
    (1806, "objects do not match"),
    (1807, "object already exists"),
    (1808, "symbol not found"),
    (1809, "symbol version invalid"),
    (1810, "server is in invalid state"),
    (1811, "AdsTransMode not supported"),
    (1812, "Notification handle is invalid"),
    (1813, "Notification client not registered"),
    (1814, "no more notification handles"),
    (1815, "size for watch too big"),
    (1816, "device not initialized"),
    (1817, "device has a timeout"),
    (1818, "query interface failed"),
    (1819, "wrong interface required"),
    (1820, "class ID is invalid"),
    (1821, "object ID is invalid"),
    (1822, "request is pending"),
    (1823, "request is aborted"),
    (1824, "signal warning"),
    (1825, "invalid array index"),
    (1826, "symbol not active -> release handle and try again"),
    (1827, "access denied"),
    (1856, "Error class <client error>"),
    (1857, "invalid parameter at service"),
    (1858, "polling list is empty"),
    (1859, "var connection already in use"),
    (1860, "invoke ID in use"),
    (1861, "timeout elapsed"),
    (1862, "error in win32 subsystem"),
    (1863, "Invalid client timeout value"),
    (1864, "ads-port not opened"),
    (1872, "internal error in ads sync"),
    (1873, "hash table overflow"),
    (1874, "key not found in hash"),
    (1875, "no more symbols in cache"),
    (1876, "invalid response received"),
    (1877, "sync port is locked"),
];
