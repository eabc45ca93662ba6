//! Sequence allocator + outstanding table (spec.md §4.3/§4.4), merged into a
//! single `slab::Slab<Slot>` — see `DESIGN.md` for the grounding.
//!
//! The slab's free-list doubles as the sequence allocator: `insert` both
//! allocates a sequence id and occupies the slot; `remove` both retires the
//! id and frees the slot. The slab key is truncated to `u16` for the wire —
//! safe as long as the table never grows past `u16::MAX` entries, which is
//! guaranteed by never admitting past `n_outstanding`.

use slab::Slab;
use stakker::FixedTimerKey;

use crate::types::Request;

pub(crate) struct Slot {
	pub req: Request,
	pub timer: FixedTimerKey,
}

#[derive(Default)]
pub(crate) struct SlotTable {
	slots: Slab<Slot>,
}

impl SlotTable {
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Occupy a fresh slot, returning its sequence number. Caller must check
	/// `len() < window` before calling — the table itself does not enforce
	/// `W`, since the window size is a policy the engine driver owns.
	pub fn insert(&mut self, req: Request) -> u16 {
		let key = self.slots.insert(Slot { req, timer: FixedTimerKey::default() });
		debug_assert!(key <= u16::MAX as usize, "outstanding table grew past u16 sequence space");
		key as u16
	}

	pub fn get_mut(&mut self, seq: u16) -> Option<&mut Slot> {
		self.slots.get_mut(seq as usize)
	}

	/// Retire and remove the slot for `seq`, if it still exists.
	pub fn remove(&mut self, seq: u16) -> Option<Slot> {
		if self.slots.contains(seq as usize) {
			Some(self.slots.remove(seq as usize))
		} else {
			None
		}
	}

	/// Snapshot of all currently occupied sequence numbers. Used to drive a
	/// full teardown (close, reconfigure) — the caller removes each in turn.
	pub fn keys(&self) -> Vec<u16> {
		self.slots.iter().map(|(k, _)| k as u16).collect()
	}
}
