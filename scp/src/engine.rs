//! The engine driver (spec.md §4.4 "engine driver"): the `stakker` actor that
//! owns the socket, the outstanding table, the request queue and the
//! fragmenter, and reacts to wakeups, responses and timer expirations.
//!
//! Grounded on `wireguard::Wireguard`: an actor holding an `Io<UdpSocket>`,
//! dispatching received datagrams through a `fwd_to!`-registered method, and
//! arming per-item timers via `cx.after` the same way `tunnel::timers::Timers`
//! does for its rekey/keepalive deadlines.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use collections::bytes::Slice;
use log::{trace, warn};
use runtime::Io;
use stakker::{fwd_to, CX};

use crate::codec::{self, RC_OK};
use crate::error::{ScpError, Target};
use crate::fragment::{chunk_ranges, Completion, Fragmenter, OnDone, OnError, OnRead, OnSuccess, SendOutcome};
use crate::intake::Intake;
use crate::queue::RequestQueue;
use crate::slot::SlotTable;
use crate::types::{FragKind, Request};

pub(crate) struct Engine {
	transport: Option<Io<UdpSocket>>,
	wake_io: Option<Io<UdpSocket>>,
	intake: Arc<Intake>,
	slots: SlotTable,
	queue: RequestQueue,
	fragments: Fragmenter,
	n_tries: u32,
	n_outstanding: usize,
	scp_data_length: usize,
	closing: bool,
}

impl Engine {
	pub fn init(cx: CX![], socket: UdpSocket, wake_socket: UdpSocket, intake: Arc<Intake>, n_tries: u32, n_outstanding: usize, scp_data_length: usize) -> Option<Self> {
		let recv_fwd = fwd_to!([cx], on_receive() as (Slice));
		let wake_fwd = fwd_to!([cx], on_wakeup() as (Slice));

		let transport = Some(Io::new(socket, recv_fwd));
		let wake_io = Some(Io::new(wake_socket, wake_fwd));

		Some(Self {
			transport,
			wake_io,
			intake,
			slots: SlotTable::default(),
			queue: RequestQueue::default(),
			fragments: Fragmenter::default(),
			n_tries: n_tries.max(1),
			n_outstanding: n_outstanding.max(1),
			scp_data_length: scp_data_length.max(1),
			closing: false,
		})
	}

	fn attempts(&self) -> u32 {
		self.n_tries.saturating_sub(1)
	}

	/// A new request submitted from any thread, already on the engine thread
	/// by virtue of having come through an intake task (spec.md §4.6).
	pub fn submit_single(&mut self, cx: CX![], target: Target, cmd: u16, args: [u32; 3], mut data: Vec<u8>, expected_args: u8, timeout_ms: u64, on_success: Option<OnSuccess>, on_error: Option<OnError>) {
		// spec.md §3's Request invariant: "outbound data buffer (≤ D bytes)".
		// Matches `CSCPConnection.send_scp`'s `data_buf.len = min(len(data),
		// self._scp_data_length)` (rig_c_scp/c_scp_connection.py:272).
		data.truncate(self.scp_data_length);

		let parent = self.fragments.register(target, 1, Completion::Single { on_success, on_error });

		let req = Request { target, cmd, args, data, timeout_ms, tries_remaining: self.attempts(), parent, frag: FragKind::Single { expected_args } };

		self.queue.push(req);
		self.admit(cx);
	}

	pub fn submit_write(&mut self, cx: CX![], target: Target, address: u32, data: Vec<u8>, timeout_ms: u64, on_done: Option<OnDone>) {
		let chunks = chunk_ranges(address, data.len(), self.scp_data_length);

		if chunks.is_empty() {
			if let Some(f) = on_done {
				f(Ok(()));
			}
			return;
		}

		let parent = self.fragments.register(target, chunks.len() as u32, Completion::Write { on_done });

		for (addr, offset, size) in chunks {
			let req = Request {
				target,
				cmd: codec::CMD_WRITE,
				args: [addr, size as u32, 0],
				data: data[offset..offset + size].to_vec(),
				timeout_ms,
				tries_remaining: self.attempts(),
				parent,
				frag: FragKind::Write,
			};

			self.queue.push(req);
		}

		self.admit(cx);
	}

	pub fn submit_read(&mut self, cx: CX![], target: Target, address: u32, length: usize, timeout_ms: u64, on_done: Option<OnRead>) {
		let chunks = chunk_ranges(address, length, self.scp_data_length);

		if chunks.is_empty() {
			if let Some(f) = on_done {
				f(Ok(Vec::new()));
			}
			return;
		}

		let buffer = vec![0u8; length];
		let parent = self.fragments.register(target, chunks.len() as u32, Completion::Read { buffer, on_done });

		for (addr, offset, size) in chunks {
			let req = Request { target, cmd: codec::CMD_READ, args: [addr, size as u32, 0], data: Vec::new(), timeout_ms, tries_remaining: self.attempts(), parent, frag: FragKind::Read { offset: offset as u32 } };

			self.queue.push(req);
		}

		self.admit(cx);
	}

	pub fn reconfigure(&mut self, cx: CX![], scp_data_length: Option<usize>, n_outstanding: Option<usize>) {
		self.teardown_window(cx);

		if let Some(d) = scp_data_length {
			self.scp_data_length = d.max(1);
		}

		if let Some(w) = n_outstanding {
			self.n_outstanding = w.max(1);
		}

		self.admit(cx);
	}

	/// Drain every intake task queued since the last wakeup, then admit.
	/// Coalesces multiple wakeup datagrams into one drain pass.
	fn on_wakeup(&mut self, cx: CX![], _buf: Slice) {
		while let Some(task) = self.intake.pop() {
			task(self, cx);
		}

		if self.intake.is_closed() && !self.closing {
			self.closing = true;
			self.teardown_all(cx);
			return;
		}

		self.admit(cx);
	}

	fn on_receive(&mut self, cx: CX![], buf: Slice) {
		let Some(resp) = codec::decode(&buf) else {
			warn!("dropping malformed SCP datagram ({} bytes)", buf.len());
			return;
		};

		let Some(slot) = self.slots.remove(resp.seq) else {
			trace!("dropping response for unknown or already-retired sequence {}", resp.seq);
			return;
		};

		cx.timer_del(slot.timer);

		let req = slot.req;
		let ok = resp.cmd_rc == RC_OK;
		// spec.md §4.4: a response longer than D is truncated to D; the rest of
		// the decode (sequence/rc/args) already happened above.
		let data = &resp.data[..resp.data.len().min(self.scp_data_length)];

		match req.frag {
			FragKind::Single { expected_args } => {
				if ok {
					let n_args = resp.n_args.min(expected_args);
					self.fragments.complete_single(req.parent, Ok(SendOutcome { cmd_rc: resp.cmd_rc, args: resp.args, n_args, data: data.to_vec() }));
				} else {
					self.fragments.complete_single(req.parent, Err(ScpError::BadRc { cmd_rc: resp.cmd_rc, target: req.target }));
				}
			}
			FragKind::Write => {
				if ok {
					self.fragments.complete_ok(req.parent, None);
				} else {
					self.fragments.complete_err(req.parent, ScpError::BadRc { cmd_rc: resp.cmd_rc, target: req.target });
				}
			}
			FragKind::Read { offset } => {
				if ok {
					self.fragments.complete_ok(req.parent, Some((offset, data)));
				} else {
					self.fragments.complete_err(req.parent, ScpError::BadRc { cmd_rc: resp.cmd_rc, target: req.target });
				}
			}
		}

		self.admit(cx);
	}

	fn on_timeout(&mut self, cx: CX![], seq: u16) {
		let retry = match self.slots.get_mut(seq) {
			Some(slot) if slot.req.tries_remaining > 0 => {
				slot.req.tries_remaining -= 1;
				true
			}
			Some(_) => false,
			None => return,
		};

		if retry {
			self.transmit(cx, seq);
			return;
		}

		let Some(slot) = self.slots.remove(seq) else { return };
		let target = slot.req.target;
		self.fail_request(slot.req, ScpError::Timeout { target });
		self.admit(cx);
	}

	/// Move requests from the queue into free slots, strict FIFO, until the
	/// window is full or the connection is tearing down.
	fn admit(&mut self, cx: CX![]) {
		if self.closing {
			return;
		}

		while self.slots.len() < self.n_outstanding {
			let Some(req) = self.queue.pop() else { break };
			let seq = self.slots.insert(req);
			self.transmit(cx, seq);
		}
	}

	fn transmit(&mut self, cx: CX![], seq: u16) {
		let Some(transport) = self.transport.as_ref() else { return };
		let Some(slot) = self.slots.get_mut(seq) else { return };

		let pkt = codec::Request { x: slot.req.target.x, y: slot.req.target.y, p: slot.req.target.p, seq, cmd: slot.req.cmd, args: slot.req.args, n_args: 3, data: &slot.req.data };

		if transport.write(|mut c| codec::encode(&mut c, &pkt)).is_err() {
			warn!("send failed for sequence {seq}");
		}

		let actor = cx.access_actor().clone();
		let timeout = Duration::from_millis(slot.req.timeout_ms);
		slot.timer = cx.after(timeout, move |s| actor.apply(s, move |this, cx| this.on_timeout(cx, seq)));
	}

	fn fail_request(&mut self, req: Request, err: ScpError) {
		match req.frag {
			FragKind::Single { .. } => self.fragments.complete_single(req.parent, Err(err)),
			FragKind::Write | FragKind::Read { .. } => self.fragments.complete_err(req.parent, err),
		}
	}

	/// Fail every currently in-window request with `FREED`, leaving the
	/// queue (and hence the surviving fragments of a partially-admitted
	/// bulk op) untouched — used by reconfiguration (spec.md §4.7/§9).
	fn teardown_window(&mut self, cx: CX![]) {
		for seq in self.slots.keys() {
			let Some(slot) = self.slots.remove(seq) else { continue };
			cx.timer_del(slot.timer);
			let target = slot.req.target;
			self.fail_request(slot.req, ScpError::Freed { target });
		}
	}

	/// Full teardown: every live `UserOp`, whether in the queue or the
	/// window, is forced to `FREED` exactly once (spec.md §3's "Closing the
	/// connection transitions every non-completed UserOp to FREED exactly
	/// once" — this overrides any sticky first error a partially-completed
	/// bulk op may already carry).
	fn teardown_all(&mut self, cx: CX![]) {
		for seq in self.slots.keys() {
			if let Some(slot) = self.slots.remove(seq) {
				cx.timer_del(slot.timer);
			}
		}

		while self.queue.pop().is_some() {}

		self.fragments.fail_all(|target| ScpError::Freed { target });

		self.transport = None;
		self.wake_io = None;
	}
}
