//! The SCP datagram wire format.
//!
//! This is not a bit-exact reproduction of the remote fabric's native packet
//! layout (see `DESIGN.md`) — just a fixed little-endian header sufficient to
//! carry everything the engine reasons about: the target triple, sequence
//! number, command/return code, up to three 32-bit arguments, and a trailing
//! data slice.

use collections::bytes::{Cursor, Slice};

/// Bytes before the argument words: x(1) y(1) p(1) seq(2) cmd_or_rc(2) n_args(1).
pub const HEADER_LEN: usize = 8;

/// Canonical "success" return code, mirrored from `SCPReturnCodes.ok`.
pub const RC_OK: u16 = 0x80;

/// Command code for a bulk-write sub-request: `args = [address, chunk_len, 0]`.
pub const CMD_WRITE: u16 = 3;

/// Command code for a bulk-read sub-request: `args = [address, chunk_len, 0]`.
pub const CMD_READ: u16 = 2;

pub struct Request<'a> {
	pub x: u8,
	pub y: u8,
	pub p: u8,
	pub seq: u16,
	pub cmd: u16,
	pub args: [u32; 3],
	pub n_args: u8,
	pub data: &'a [u8],
}

pub struct Response<'a> {
	pub seq: u16,
	pub cmd_rc: u16,
	pub args: [u32; 3],
	pub n_args: u8,
	pub data: &'a [u8],
}

/// Encode `req` into `cursor`.
pub fn encode(cursor: &mut Cursor, req: &Request) {
	cursor.push_u8(req.x);
	cursor.push_u8(req.y);
	cursor.push_u8(req.p);
	cursor.push_u16_le(req.seq);
	cursor.push_u16_le(req.cmd);
	cursor.push_u8(req.n_args);

	for i in 0..req.n_args.min(3) as usize {
		cursor.push_u32_le(req.args[i]);
	}

	cursor.push_bytes(req.data);
}

/// Decode a received datagram. Returns `None` for a payload shorter than the
/// fixed header — the caller logs and drops it, per spec.md §4.1.
pub fn decode(buf: &Slice) -> Option<Response> {
	if buf.len() < HEADER_LEN {
		return None;
	}

	let seq = u16::from_le_bytes([buf[3], buf[4]]);
	let cmd_rc = u16::from_le_bytes([buf[5], buf[6]]);
	let n_args = buf[7].min(3);

	let mut args = [0u32; 3];
	let mut off = HEADER_LEN;

	for arg in args.iter_mut().take(n_args as usize) {
		if buf.len() < off + 4 {
			// Truncated argument list: treat as if fewer args were present.
			return Some(Response { seq, cmd_rc, args, n_args: ((off - HEADER_LEN) / 4) as u8, data: &[] });
		}

		*arg = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
		off += 4;
	}

	Some(Response { seq, cmd_rc, args, n_args, data: &buf[off..] })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_a_request_header() {
		let mut vec = Vec::new();
		let req = Request { x: 1, y: 2, p: 3, seq: 42, cmd: 4, args: [5, 6, 7], n_args: 3, data: b"foo" };

		Cursor::vec(&mut vec, |mut c| encode(&mut c, &req));

		assert_eq!(&vec[..3], &[1, 2, 3]);
		assert_eq!(u16::from_le_bytes([vec[3], vec[4]]), 42);
		assert_eq!(u16::from_le_bytes([vec[5], vec[6]]), 4);
		assert_eq!(vec[7], 3);
		assert_eq!(&vec[vec.len() - 3..], b"foo");
	}

	#[test]
	fn decode_rejects_short_payloads() {
		let mut buf = Slice::new(HEADER_LEN - 1);
		assert!(decode(&buf).is_none());

		buf = Slice::new(HEADER_LEN);
		assert!(decode(&buf).is_some());
	}

	#[test]
	fn decode_reports_fewer_args_when_truncated() {
		let mut vec = vec![0u8; HEADER_LEN + 4];
		vec[7] = 3; // claims 3 args but only one word follows
		let mut buf = Slice::new(vec.len());
		buf.copy_from_slice(&vec);

		let resp = decode(&buf).unwrap();
		assert_eq!(resp.n_args, 1);
	}
}
