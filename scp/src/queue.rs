//! The FIFO of admitted-but-not-yet-in-window requests (spec.md §4.5).
//!
//! Deliberately just a `VecDeque` wrapper: admission order is the only
//! guarantee this component owes (spec.md §5 "FIFO admission from intake
//! queue into the window").

use std::collections::VecDeque;

use crate::types::Request;

#[derive(Default)]
pub(crate) struct RequestQueue {
	inner: VecDeque<Request>,
}

impl RequestQueue {
	pub fn push(&mut self, req: Request) {
		self.inner.push_back(req);
	}

	pub fn pop(&mut self) -> Option<Request> {
		self.inner.pop_front()
	}
}
