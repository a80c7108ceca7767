//! Probe command implementations.
//!
//! Each command implements [`crate::check::Command`]: run a protocol
//! probe against a service, classify the outcome into a
//! [`crate::check::CheckResult`], and map transport failures into
//! reason-coded results carrying the underlying error.

pub mod http;
pub mod smtp;
pub mod snmp;

pub use http::HttpCommand;
pub use smtp::{SmtpCommand, TcpSmtpClient};
pub use snmp::{OidMonitor, SnmpCommand, SnmpGetter, SnmpHost, SnmpObject, SnmpValue};

/// Reason code for a transport-level connection failure or timeout.
pub const REASON_CONNECTION_ERROR: &str = "CONNECTION_ERROR";

/// Reason code for a response that did not match expectations.
pub const REASON_UNEXPECTED_RESP: &str = "UNEXPECTED_RESP";

/// Reason code for a response that arrived too slowly.
pub const REASON_RESP_TIME_EXCEEDED: &str = "RESP_TIME_EXCEEDED";
