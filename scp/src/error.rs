//! The public error taxonomy (spec.md §4.8/§7).
//!
//! `utils::error::{Result, Ext}` is the teacher's idiom for internal,
//! never-surfaced plumbing (used by `runtime`'s socket code); the `scp`
//! crate's own fallible internal paths (malformed datagrams, a send
//! failure) are handled by logging and dropping directly at the call site
//! (`engine::on_receive`, `engine::transmit`) rather than through that
//! combinator, since there is no `Option` to hand back to a caller there —
//! only errors that cross the public API boundary get converted into
//! `ScpError`, defined below.

use std::fmt;
use std::net::AddrParseError;

/// The reconstructed target triple a failing request was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
	pub x: u8,
	pub y: u8,
	pub p: u8,
}

/// Runtime error delivered through a request's `on_error` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpError {
	/// A response was received but its return code was not `RC_OK`.
	BadRc { cmd_rc: u16, target: Target },
	/// No matching response arrived within `timeout_ms * n_tries`.
	Timeout { target: Target },
	/// The connection was torn down while this request was live.
	Freed { target: Target },
}

impl fmt::Display for ScpError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ScpError::BadRc { cmd_rc, target } => write!(f, "bad return code {cmd_rc:#x} from ({}, {}, {})", target.x, target.y, target.p),
			ScpError::Timeout { target } => write!(f, "timed out waiting for a reply from ({}, {}, {})", target.x, target.y, target.p),
			ScpError::Freed { target } => write!(f, "connection freed while request to ({}, {}, {}) was live", target.x, target.y, target.p),
		}
	}
}

impl std::error::Error for ScpError {}

/// Raised synchronously to the caller when submitting on a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl fmt::Display for Closed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "connection is closed")
	}
}

impl std::error::Error for Closed {}

/// Failure to resolve or bind the remote endpoint at `open()` time.
#[derive(Debug)]
pub enum ResolveError {
	/// The hostname did not resolve to any address.
	NoAddress,
	/// Only non-IPv4 addresses were found (spec.md's explicit non-goal).
	NotIpv4,
	Io(std::io::Error),
}

impl fmt::Display for ResolveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResolveError::NoAddress => write!(f, "could not resolve host"),
			ResolveError::NotIpv4 => write!(f, "resolved address is not IPv4"),
			ResolveError::Io(e) => write!(f, "I/O error: {e}"),
		}
	}
}

impl std::error::Error for ResolveError {}

impl From<std::io::Error> for ResolveError {
	fn from(e: std::io::Error) -> Self {
		ResolveError::Io(e)
	}
}

impl From<AddrParseError> for ResolveError {
	fn from(_: AddrParseError) -> Self {
		ResolveError::NoAddress
	}
}
