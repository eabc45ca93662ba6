//! Shared internal types: the target triple and the per-wire-transaction
//! `Request` record (spec.md §3 "Request").

use crate::error::Target;

/// What a completed sub-request feeds back into.
#[derive(Clone, Copy)]
pub(crate) enum FragKind {
	/// A standalone `send_scp` call — not part of a bulk operation.
	Single { expected_args: u8 },
	/// One chunk of a bulk write; carries no offset (nothing to copy back).
	Write,
	/// One chunk of a bulk read; `offset` is where its reply data lands in
	/// the caller's buffer.
	Read { offset: u32 },
}

/// One outstanding protocol transaction: either a user's single command or
/// one fragment of a bulk read/write.
///
/// All three argument words are always sent on the wire (zero-filled when
/// unused), matching the reference implementation's fixed `n_args_send = 3`
/// — only the *reply's* argument count is ever truncated, to the caller's
/// `expected_args`.
pub(crate) struct Request {
	pub target: Target,
	pub cmd: u16,
	pub args: [u32; 3],
	pub data: Vec<u8>,
	pub timeout_ms: u64,
	pub tries_remaining: u32,
	/// Key into the `UserOp` registry this sub-request belongs to.
	pub parent: usize,
	pub frag: FragKind,
}
