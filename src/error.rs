//! Unified error type for all connectivity-manager operations.
//!
//! `NetError` is the single error type returned by every fallible operation
//! on the manager. It serializes as `{ "kind": "...", "message": "..." }` so
//! IPC layers built on top of the manager can programmatically distinguish
//! error categories.

use serde::ser::SerializeStruct;

/// Error returned by connectivity-manager operations.
///
/// Each variant maps to a distinct failure domain. Delivery failures inside
/// the event hub never surface through this type; they are contained in the
/// hub and reported via its dropped-events counter.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Unknown network handle, interface, or process binding.
    #[error("{0}")]
    NotFound(String),

    /// A capability query has no satisfying network.
    #[error("{0}")]
    NoMatch(String),

    /// The caller lacks the required permission.
    #[error("{0}")]
    PermissionDenied(String),

    /// Socket-level binding attempted after connect completed.
    #[error("{0}")]
    AlreadyConnected(String),

    /// A connect or resolution operation exceeded its deadline.
    #[error("{0}")]
    TimedOut(String),

    /// Invalid or missing input (malformed address, bad configuration).
    #[error("{0}")]
    InvalidInput(String),

    /// I/O and OS-level errors from the platform boundary.
    #[error("{0}")]
    Io(String),
}

impl NetError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            NetError::NotFound(_) => "NotFound",
            NetError::NoMatch(_) => "NoMatch",
            NetError::PermissionDenied(_) => "PermissionDenied",
            NetError::AlreadyConnected(_) => "AlreadyConnected",
            NetError::TimedOut(_) => "TimedOut",
            NetError::InvalidInput(_) => "InvalidInput",
            NetError::Io(_) => "Io",
        }
    }

    /// Shorthand for a `NotFound` about a network handle.
    pub fn unknown_handle(handle: impl std::fmt::Display) -> Self {
        NetError::NotFound(format!("unknown network handle {handle}"))
    }

    /// Shorthand for a `NotFound` about an interface.
    pub fn unknown_iface(iface: &str) -> Self {
        NetError::NotFound(format!("unknown interface {iface:?}"))
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for NetError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("NetError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for NetError {
    fn from(err: anyhow::Error) -> Self {
        NetError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(NetError::NotFound("no net".into()).kind(), "NotFound");
        assert_eq!(NetError::NoMatch("no match".into()).kind(), "NoMatch");
        assert_eq!(
            NetError::PermissionDenied("denied".into()).kind(),
            "PermissionDenied"
        );
        assert_eq!(
            NetError::AlreadyConnected("connected".into()).kind(),
            "AlreadyConnected"
        );
        assert_eq!(NetError::TimedOut("late".into()).kind(), "TimedOut");
        assert_eq!(NetError::InvalidInput("bad".into()).kind(), "InvalidInput");
        assert_eq!(NetError::Io("io fail".into()).kind(), "Io");
    }

    #[test]
    fn test_error_display_shows_message() {
        let err = NetError::NotFound("unknown network handle 7".into());
        assert_eq!(err.to_string(), "unknown network handle 7");
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = NetError::TimedOut("connect exceeded 30000ms".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "TimedOut");
        assert_eq!(json["message"], "connect exceeded 30000ms");
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket gone");
        let err: NetError = io_err.into();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("socket gone"));
    }

    #[test]
    fn test_unknown_handle_helper() {
        let err = NetError::unknown_handle(42);
        assert_eq!(err.kind(), "NotFound");
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<NetError> = vec![
            NetError::NotFound("a".into()),
            NetError::NoMatch("b".into()),
            NetError::PermissionDenied("c".into()),
            NetError::AlreadyConnected("d".into()),
            NetError::TimedOut("e".into()),
            NetError::InvalidInput("f".into()),
            NetError::Io("g".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }
}
