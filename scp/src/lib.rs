//! A high-throughput client engine for the SCP request/response protocol,
//! used to drive a remote many-core compute fabric over UDP/IPv4.
//!
//! A [`Connection`] owns a dedicated reactor thread running a single
//! `stakker` actor ([`engine::Engine`]) that multiplexes many outstanding
//! commands across one datagram socket: bounded-window flow control,
//! per-command retry/timeout, and fragmentation of bulk memory read/write
//! operations into a stream of fixed-size sub-requests. Submission
//! (`send_scp`/`write`/`read`) is safe from any thread; completions run on
//! the engine thread.

mod codec;
mod engine;
mod error;
mod fragment;
mod intake;
mod queue;
mod slot;
mod types;

pub use error::{Closed, ResolveError, ScpError, Target};
pub use fragment::SendOutcome;

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use stakker::{actor, ret_nop};

use engine::Engine;
use intake::{Intake, Task};

/// Default SCP port, carried from `rig.machine_control.consts.SCP_PORT`.
pub const SCP_PORT: u16 = 17893;

/// Connection parameters, mirroring `CSCPConnection.__init__`'s keyword
/// arguments and defaults.
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
	/// Remote UDP port.
	pub port: u16,
	/// Total attempts per sub-request (initial send + retries).
	pub n_tries: u32,
	/// Window size `W`: maximum concurrent in-flight sub-requests.
	pub n_outstanding: usize,
	/// Maximum data payload per sub-request, `D`.
	pub scp_data_length: usize,
}

impl Default for ConnectOptions {
	fn default() -> Self {
		Self { port: SCP_PORT, n_tries: 5, n_outstanding: 1, scp_data_length: 256 }
	}
}

/// A live connection to one remote target. Dropping it closes the connection.
pub struct Connection {
	intake: Arc<Intake>,
	thread: Option<JoinHandle<()>>,
	scp_data_length: Arc<AtomicUsize>,
	n_outstanding: Arc<AtomicUsize>,
}

impl Connection {
	/// Resolve `host`, open a connected UDP socket, and start the engine's
	/// dedicated reactor thread.
	pub fn open(host: &str, opts: ConnectOptions) -> Result<Self, ResolveError> {
		let addr = resolve_v4(host, opts.port)?;

		let socket = UdpSocket::bind("0.0.0.0:0")?;
		socket.set_nonblocking(true)?;
		socket.connect(addr)?;

		// A loopback pair used purely as a cross-thread wakeup signal: any
		// thread may `send` a (possibly zero-length) datagram on the sender
		// half, which the engine observes as ordinary socket readiness.
		let wake_listener = UdpSocket::bind("127.0.0.1:0")?;
		wake_listener.set_nonblocking(true)?;
		let wake_addr = wake_listener.local_addr()?;

		let wake_sender = UdpSocket::bind("127.0.0.1:0")?;
		wake_sender.set_nonblocking(true)?;
		wake_sender.connect(wake_addr)?;

		let intake = Arc::new(Intake::new(wake_sender));
		let scp_data_length = Arc::new(AtomicUsize::new(opts.scp_data_length.max(1)));
		let n_outstanding = Arc::new(AtomicUsize::new(opts.n_outstanding.max(1)));

		let intake_for_thread = intake.clone();
		let n_tries = opts.n_tries.max(1);
		let init_d = opts.scp_data_length.max(1);
		let init_w = opts.n_outstanding.max(1);
		let name = format!("scp-connection to {addr}");

		let thread = std::thread::Builder::new()
			.name(name)
			.spawn(move || {
				let mut stakker = runtime::init();
				let engine_intake = intake_for_thread.clone();

				// Kept alive for the lifetime of the reactor loop below — the
				// engine actually lives in stakker's actor storage, but this
				// handle must outlive `runtime::exec` for timers/fwds to stay
				// valid for the whole run.
				let _engine = {
					let core = &mut stakker;
					actor!(core, Engine::init(socket, wake_listener, engine_intake, n_tries, init_w, init_d), ret_nop!())
				};

				// The engine tears itself down (dropping its `Io` handles)
				// as soon as it observes `intake`'s closed flag via the
				// wakeup path, which is what ends this loop — `exit_fn` is
				// a backstop the shared reactor driver always requires, not
				// something this engine relies on.
				runtime::exec(&mut stakker, intake_for_thread.closed_ref(), || {});
			})
			.map_err(ResolveError::Io)?;

		Ok(Self { intake, thread: Some(thread), scp_data_length, n_outstanding })
	}

	/// Send a single SCP command. `expected_args` is truncated to 3.
	pub fn send_scp(
		&self, x: u8, y: u8, p: u8, cmd: u16, arg1: u32, arg2: u32, arg3: u32, data: &[u8], expected_args: u8, timeout_ms: u64, on_success: Option<Box<dyn FnOnce(SendOutcome) + Send>>,
		on_error: Option<Box<dyn FnOnce(ScpError) + Send>>,
	) -> Result<(), Closed> {
		let target = Target { x, y, p };
		let data = data.to_vec();
		let expected_args = expected_args.min(3);

		let task: Task = Box::new(move |engine, cx| engine.submit_single(cx, target, cmd, [arg1, arg2, arg3], data, expected_args, timeout_ms, on_success, on_error));

		self.intake.push(task)
	}

	/// Write `data` to `[address, address + data.len())`, fragmented into
	/// `scp_data_length`-sized chunks.
	pub fn write(&self, x: u8, y: u8, p: u8, address: u32, data: Vec<u8>, timeout_ms: u64, on_done: Option<Box<dyn FnOnce(Result<(), ScpError>) + Send>>) -> Result<(), Closed> {
		let target = Target { x, y, p };
		let task: Task = Box::new(move |engine, cx| engine.submit_write(cx, target, address, data, timeout_ms, on_done));
		self.intake.push(task)
	}

	/// Read `length` bytes from `address`, fragmented into
	/// `scp_data_length`-sized chunks, reassembled in address order.
	pub fn read(&self, x: u8, y: u8, p: u8, address: u32, length: usize, timeout_ms: u64, on_done: Option<Box<dyn FnOnce(Result<Vec<u8>, ScpError>) + Send>>) -> Result<(), Closed> {
		let target = Target { x, y, p };
		let task: Task = Box::new(move |engine, cx| engine.submit_read(cx, target, address, length, timeout_ms, on_done));
		self.intake.push(task)
	}

	pub fn scp_data_length(&self) -> usize {
		self.scp_data_length.load(Ordering::Acquire)
	}

	/// Change `D`. Triggers reconfiguration-by-teardown (spec.md §4.7): any
	/// sub-request currently in the window fails with `FREED`; queued
	/// sub-requests survive and are re-admitted once the window reopens.
	pub fn set_scp_data_length(&self, value: usize) -> Result<(), Closed> {
		let value = value.max(1);
		self.scp_data_length.store(value, Ordering::Release);
		let task: Task = Box::new(move |engine, cx| engine.reconfigure(cx, Some(value), None));
		self.intake.push(task)
	}

	pub fn n_outstanding(&self) -> usize {
		self.n_outstanding.load(Ordering::Acquire)
	}

	/// Change `W`. Same reconfiguration semantics as [`Self::set_scp_data_length`].
	pub fn set_n_outstanding(&self, value: usize) -> Result<(), Closed> {
		let value = value.max(1);
		self.n_outstanding.store(value, Ordering::Release);
		let task: Task = Box::new(move |engine, cx| engine.reconfigure(cx, None, Some(value)));
		self.intake.push(task)
	}

	/// Idempotent. Blocks until the engine's reactor thread joins.
	pub fn close(&mut self) {
		self.intake.close();

		if let Some(t) = self.thread.take() {
			let _ = t.join();
		}
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.close();
	}
}

fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr, ResolveError> {
	let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

	if addrs.is_empty() {
		return Err(ResolveError::NoAddress);
	}

	addrs.into_iter().find(SocketAddr::is_ipv4).ok_or(ResolveError::NotIpv4)
}
