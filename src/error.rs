//! Structured error type shared by every capture backend and the encoder.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ScreenCaptureError>;

/// The condition a [`ScreenCaptureError`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller's fault: bad compression level, zero-sized region,
    /// unknown monitor index, malformed display name.
    InvalidArgument,
    /// Cannot open the X display, or no active display was found.
    DisplayUnavailable,
    /// The server reports a pixel depth other than 32 bpp.
    UnsupportedDepth,
    /// A native OS call reported failure; details carry the call name
    /// and the OS error code.
    NativeCallFailed,
    /// The MIT-SHM probe failed; the backend falls back to XGetImage.
    ShmUnavailable,
    /// Deflate failure or an I/O error while writing a PNG.
    EncoderError,
    /// The session was closed; no further captures are possible.
    SessionClosed,
}

impl ErrorKind {
    /// Terminal errors invalidate the whole session; the save
    /// orchestrator stops iterating when it sees one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::DisplayUnavailable | ErrorKind::UnsupportedDepth | ErrorKind::SessionClosed
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::DisplayUnavailable => "display-unavailable",
            ErrorKind::UnsupportedDepth => "unsupported-depth",
            ErrorKind::NativeCallFailed => "native-call-failed",
            ErrorKind::ShmUnavailable => "shm-unavailable",
            ErrorKind::EncoderError => "encoder-error",
            ErrorKind::SessionClosed => "session-closed",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by every fallible operation in this crate.
///
/// Carries a precise [`ErrorKind`], a human-readable message and an
/// optional details map (OS error codes, failed call names, X serials).
#[derive(Debug, Clone)]
pub struct ScreenCaptureError {
    kind: ErrorKind,
    message: String,
    details: BTreeMap<&'static str, String>,
}

impl ScreenCaptureError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn display_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DisplayUnavailable, message)
    }

    pub fn unsupported_depth(bits_per_pixel: u32) -> Self {
        Self::new(
            ErrorKind::UnsupportedDepth,
            format!("server pixel depth not supported: {bits_per_pixel} bpp (need 32)"),
        )
        .with_detail("bits_per_pixel", bits_per_pixel.to_string())
    }

    /// A native call failed; `call` names the OS entry point.
    pub fn native(call: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NativeCallFailed, message).with_detail("call", call.to_string())
    }

    pub fn shm_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShmUnavailable, message)
    }

    pub fn encoder(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EncoderError, message)
    }

    pub fn session_closed() -> Self {
        Self::new(ErrorKind::SessionClosed, "session is closed")
    }

    /// Attach one key/value pair to the details map.
    pub fn with_detail(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.details.insert(key, value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<&'static str, String> {
        &self.details
    }
}

impl Display for ScreenCaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.details.is_empty() {
            f.write_str(" [")?;
            for (i, (key, value)) in self.details.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScreenCaptureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = ScreenCaptureError::native("BitBlt", "blit failed").with_detail("code", "87");
        let text = err.to_string();
        assert!(text.starts_with("native-call-failed: blit failed"));
        assert!(text.contains("call=BitBlt"));
        assert!(text.contains("code=87"));
    }

    #[test]
    fn terminal_classification() {
        assert!(ErrorKind::SessionClosed.is_terminal());
        assert!(ErrorKind::DisplayUnavailable.is_terminal());
        assert!(ErrorKind::UnsupportedDepth.is_terminal());
        assert!(!ErrorKind::NativeCallFailed.is_terminal());
        assert!(!ErrorKind::ShmUnavailable.is_terminal());
        assert!(!ErrorKind::InvalidArgument.is_terminal());
    }
}
