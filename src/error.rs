//! Error types for strix

use thiserror::Error;

/// Result type for strix operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for strix
#[derive(Debug, Error)]
pub enum Error {
    /// A CDP call failed at the transport level
    #[error("Transport error in {method}: {message}")]
    Transport { method: String, message: String },

    /// CDP protocol error reply
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// The target backing this session crashed
    #[error("Session crashed")]
    Crashed,

    /// The browser connection was lost
    #[error("Browser disconnected: {0}")]
    Disconnected(String),

    /// The operation's scope was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// An action's deadline elapsed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Navigation failed
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Frame is not tracked or already detached
    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    /// Selector resolved to no element
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// JavaScript evaluation raised an exception
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a transport error with the source command name
    pub fn transport(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether this is the "override already in effect" protocol-state reply
    /// that repeated locale/timezone emulation produces. Treated as success.
    pub fn is_already_in_effect(&self) -> bool {
        match self {
            Error::Cdp { message, .. } | Error::Transport { message, .. } => {
                message.contains("already in effect")
            }
            _ => false,
        }
    }

    /// Whether the error text carries the abnormal WebSocket closure
    /// signature (close code 1006) seen when the browser goes away.
    pub fn is_abnormal_closure(&self) -> bool {
        match self {
            Error::Transport { message, .. } | Error::Disconnected(message) => {
                message.contains("1006") || message.contains("abnormal closure")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_in_effect_matches_protocol_reply() {
        let err = Error::cdp(
            "Emulation.setLocaleOverride",
            -32000,
            "Another locale override is already in effect",
        );
        assert!(err.is_already_in_effect());

        let err = Error::cdp("Emulation.setTimezoneOverride", -32000, "Invalid timezone");
        assert!(!err.is_already_in_effect());
    }

    #[test]
    fn abnormal_closure_signature() {
        let err = Error::transport(
            "Browser.getWindowForTarget",
            "websocket: close 1006 (abnormal closure)",
        );
        assert!(err.is_abnormal_closure());
        assert!(!Error::Crashed.is_abnormal_closure());
    }
}
