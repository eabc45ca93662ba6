//! Bulk read/write fragmentation and reassembly (spec.md §4.5).
//!
//! A `UserOp` is the caller-visible unit of completion; it outlives its
//! individual sub-requests, which reference it by its slab key. This mirrors
//! the shape of `net::ip::fragment::Store`'s incoming-reassembly bookkeeping,
//! run in the outgoing direction: one registry entry per parent, a
//! `remaining` counter ticked down by each fragment, and a sticky first
//! error.

use slab::Slab;

use crate::error::{ScpError, Target};

pub(crate) type OnSuccess = Box<dyn FnOnce(SendOutcome) + Send>;
pub(crate) type OnError = Box<dyn FnOnce(ScpError) + Send>;
pub(crate) type OnDone = Box<dyn FnOnce(Result<(), ScpError>) + Send>;
pub(crate) type OnRead = Box<dyn FnOnce(Result<Vec<u8>, ScpError>) + Send>;

/// What `send_scp` hands back to a successful `on_success` callback.
pub struct SendOutcome {
	pub cmd_rc: u16,
	pub args: [u32; 3],
	/// Truncated to the caller's `expected_args`, per spec.md's (supplement)
	/// clarification of the reference implementation's behavior.
	pub n_args: u8,
	pub data: Vec<u8>,
}

pub(crate) enum Completion {
	Single { on_success: Option<OnSuccess>, on_error: Option<OnError> },
	Write { on_done: Option<OnDone> },
	Read { buffer: Vec<u8>, on_done: Option<OnRead> },
}

pub(crate) struct UserOp {
	target: Target,
	remaining: u32,
	first_error: Option<ScpError>,
	completion: Completion,
}

#[derive(Default)]
pub(crate) struct Fragmenter {
	ops: Slab<UserOp>,
}

impl Fragmenter {
	/// Register a new `UserOp` with `fragment_count` outstanding sub-requests.
	/// Returns its registry key (carried by each fragment's `Request::parent`).
	pub fn register(&mut self, target: Target, fragment_count: u32, completion: Completion) -> usize {
		self.ops.insert(UserOp { target, remaining: fragment_count, first_error: None, completion })
	}

	/// Record a successful fragment completion. For reads, `data` is copied
	/// into the parent's buffer at `offset`. Fires the user callback exactly
	/// once, when `remaining` reaches zero.
	pub fn complete_ok(&mut self, parent: usize, offset_for_read: Option<(u32, &[u8])>) {
		let Some(op) = self.ops.get_mut(parent) else { return };

		if let (Completion::Read { buffer, .. }, Some((offset, data))) = (&mut op.completion, offset_for_read) {
			let start = offset as usize;
			let end = (start + data.len()).min(buffer.len());
			if start < buffer.len() {
				buffer[start..end].copy_from_slice(&data[..end - start]);
			}
		}

		self.tick(parent);
	}

	/// Record a failed fragment completion, remembering the first error.
	pub fn complete_err(&mut self, parent: usize, err: ScpError) {
		let Some(op) = self.ops.get_mut(parent) else { return };

		if op.first_error.is_none() {
			op.first_error = Some(err);
		}

		self.tick(parent);
	}

	/// Report a single-command result directly — no fragmentation involved,
	/// but it still goes through the registry so close/reconfigure teardown
	/// has one uniform path for failing every live `UserOp`.
	pub fn complete_single(&mut self, parent: usize, outcome: Result<SendOutcome, ScpError>) {
		let Some(op) = self.ops.try_remove(parent) else { return };

		if let Completion::Single { on_success, on_error } = op.completion {
			match outcome {
				Ok(o) => {
					if let Some(f) = on_success {
						f(o);
					}
				}
				Err(e) => {
					if let Some(f) = on_error {
						f(e);
					}
				}
			}
		}
	}

	fn tick(&mut self, parent: usize) {
		let done = {
			let Some(op) = self.ops.get_mut(parent) else { return };
			op.remaining = op.remaining.saturating_sub(1);
			op.remaining == 0
		};

		if !done {
			return;
		}

		let op = self.ops.remove(parent);
		let result = match op.first_error {
			Some(e) => Err(e),
			None => Ok(()),
		};

		match op.completion {
			Completion::Single { .. } => unreachable!("single commands complete via complete_single, not tick"),
			Completion::Write { on_done } => {
				if let Some(f) = on_done {
					f(result);
				}
			}
			Completion::Read { buffer, on_done } => {
				if let Some(f) = on_done {
					f(result.map(|()| buffer));
				}
			}
		}
	}

	/// Fail every live `UserOp` with `err`, exactly once each, and drop them
	/// from the registry. Used by close/reconfigure teardown (spec.md §4.7).
	pub fn fail_all(&mut self, err: impl Fn(Target) -> ScpError) {
		let keys: Vec<usize> = self.ops.iter().map(|(k, _)| k).collect();

		for key in keys {
			let op = self.ops.remove(key);
			let e = err(op.target);

			match op.completion {
				Completion::Single { on_error, .. } => {
					if let Some(f) = on_error {
						f(e);
					}
				}
				Completion::Write { on_done } => {
					if let Some(f) = on_done {
						f(Err(e));
					}
				}
				Completion::Read { on_done, .. } => {
					if let Some(f) = on_done {
						f(Err(e));
					}
				}
			}
		}
	}
}

/// Split `[0, len)` into chunks of at most `chunk` bytes, addresses modulo
/// 2^32 as the remote target's address width (spec.md §4.5).
pub(crate) fn chunk_ranges(base_address: u32, len: usize, chunk: usize) -> Vec<(u32, usize, usize)> {
	let mut out = Vec::with_capacity(len.div_ceil(chunk).max(1));
	let mut sent = 0usize;

	while sent < len {
		let size = chunk.min(len - sent);
		let addr = base_address.wrapping_add(sent as u32);
		out.push((addr, sent, size));
		sent += size;
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chunks_cover_the_whole_range_in_order() {
		let chunks = chunk_ranges(0xDEADBEEF, 20, 5);
		assert_eq!(chunks, vec![(0xDEADBEEF, 0, 5), (0xDEADBEEF_u32.wrapping_add(5), 5, 5), (0xDEADBEEF_u32.wrapping_add(10), 10, 5), (0xDEADBEEF_u32.wrapping_add(15), 15, 5)]);
	}

	#[test]
	fn chunk_address_wraps_modulo_32_bits() {
		let chunks = chunk_ranges(u32::MAX - 2, 10, 5);
		assert_eq!(chunks[0].0, u32::MAX - 2);
		assert_eq!(chunks[1].0, 2);
	}

	#[test]
	fn a_bulk_op_completes_exactly_once_on_last_fragment() {
		use std::sync::atomic::{AtomicUsize, Ordering};
		use std::sync::Arc;

		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();

		let target = crate::error::Target { x: 0, y: 0, p: 0 };
		let mut frag = Fragmenter::default();
		let parent = frag.register(target, 3, Completion::Write { on_done: Some(Box::new(move |_| { count2.fetch_add(1, Ordering::SeqCst); })) });

		frag.complete_ok(parent, None);
		frag.complete_ok(parent, None);
		assert_eq!(count.load(Ordering::SeqCst), 0);
		frag.complete_ok(parent, None);
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn first_error_wins_and_remaining_fragments_still_retire() {
		use std::sync::{Arc, Mutex};

		let seen = Arc::new(Mutex::new(None));
		let seen2 = seen.clone();

		let mut frag = Fragmenter::default();
		let target = crate::error::Target { x: 0, y: 0, p: 0 };
		let parent = frag.register(target, 2, Completion::Write { on_done: Some(Box::new(move |r| { *seen2.lock().unwrap() = Some(r); })) });

		frag.complete_err(parent, ScpError::BadRc { cmd_rc: 1, target });
		frag.complete_err(parent, ScpError::Timeout { target });

		let got = seen.lock().unwrap().take().unwrap();
		assert_eq!(got, Err(ScpError::BadRc { cmd_rc: 1, target }));
	}
}
