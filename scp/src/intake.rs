//! Cross-thread submission path (spec.md §4.6).
//!
//! Producers call [`Intake::push`] from any thread: it checks the closed
//! flag, appends a zero-argument task, and wakes the engine by sending an
//! (empty) datagram on a loopback `UdpSocket` the engine has registered with
//! the reactor — this is the teacher's own way of wiring any event source
//! into `runtime::Io` (see `wireguard::Wireguard::init`'s read-side `Io`),
//! reused here as a cross-thread wakeup instead of a remote peer.
//!
//! The queue and the closed flag share one lock (spec.md §5: "two
//! exceptions protected by a single mutex"), so a `push()` racing a `close()`
//! never observes `closed == false` and enqueues a task that `close()` has
//! already resolved not to see — matching `CSCPConnection`'s
//! `self._lock`-guarded `self._closed`/`self._queue` pair in
//! `_execute_in_bg_thread`/`close`.

use std::collections::VecDeque;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use stakker::Cx;

use crate::engine::Engine;
use crate::error::Closed;

pub(crate) type Task = Box<dyn FnOnce(&mut Engine, &mut Cx<Engine>) + Send>;

struct State {
	queue: VecDeque<Task>,
	closed: bool,
}

pub(crate) struct Intake {
	state: Mutex<State>,
	/// Mirrors `state.closed` for the reactor driver's lock-free stop-signal
	/// poll (`runtime::exec`'s `stop: &AtomicBool`); always written inside the
	/// same critical section that sets `state.closed`, so it can never go
	/// true before a concurrent `push()` has finished its own check.
	closed_flag: AtomicBool,
	wakeup: UdpSocket,
}

impl Intake {
	/// `wakeup` must already be `connect()`-ed to the engine's loopback
	/// listening socket.
	pub fn new(wakeup: UdpSocket) -> Self {
		Self { state: Mutex::new(State { queue: VecDeque::new(), closed: false }), closed_flag: AtomicBool::new(false), wakeup }
	}

	/// Enqueue `task` and wake the engine. Fails synchronously if the
	/// connection is already closed (spec.md §4.6/§7 `CLOSED`). The check and
	/// the enqueue happen under the same lock `close()` takes, so this can
	/// never succeed against a `close()` that already ran.
	pub fn push(&self, task: Task) -> Result<(), Closed> {
		{
			let mut state = self.state.lock().unwrap();

			if state.closed {
				return Err(Closed);
			}

			state.queue.push_back(task);
		}

		self.wake();

		Ok(())
	}

	/// Mark the connection closed and wake the engine so it observes this on
	/// its next poll. Idempotent.
	pub fn close(&self) {
		{
			let mut state = self.state.lock().unwrap();
			state.closed = true;
		}

		self.closed_flag.store(true, Ordering::Release);
		self.wake();
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().unwrap().closed
	}

	/// The closed flag, exposed so the reactor driver has a `stop` signal to
	/// poll even though this engine's own wakeup path is what actually tears
	/// it down (see `Connection::open`).
	pub fn closed_ref(&self) -> &AtomicBool {
		&self.closed_flag
	}

	/// Pop one queued task, if any. Tolerates the queue being momentarily
	/// empty between the wakeup datagram's arrival and a task's enqueue —
	/// the engine just finds nothing to do and returns.
	pub fn pop(&self) -> Option<Task> {
		self.state.lock().unwrap().queue.pop_front()
	}

	fn wake(&self) {
		// Best-effort: if the loopback socket's send buffer is briefly full,
		// a previous wakeup datagram is still pending delivery, which will
		// drain the queue anyway.
		let _ = self.wakeup.send(&[]);
	}
}
