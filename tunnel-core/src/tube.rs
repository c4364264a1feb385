// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A [`Tube`] is one logical bidirectional stream multiplexed over the
//! payment carrier: a send index counter, a reassembly buffer keyed by
//! packet index, and (on the Tokio bridge) a channel feeding the local
//! socket's writer task.

use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;

/// Tube ids are signed: 0 is reserved for session control messages, -1 for
/// dummy cover traffic; any other value identifies a user tube. On the
/// Submarine side the id is the ephemeral local TCP port of the accepted
/// CONNECT (see the Open Question in DESIGN.md about port reuse).
pub type TubeId = i64;

/// A Tube owns reassembly state only; the local socket's read/write halves
/// live in the endpoint loop that created the Tube. `outbound` is the
/// channel through which in-order bytes are handed to that socket's
/// writer task as soon as they become deliverable.
pub struct Tube {
	pub identifier: TubeId,
	pub hostname: Option<String>,
	send_index: u64,
	recv_buffer: BTreeMap<u64, Vec<u8>>,
	next_recv_index: u64,
	open: bool,
	outbound: Option<UnboundedSender<Vec<u8>>>,
}

impl Tube {
	pub fn new(identifier: TubeId, hostname: Option<String>) -> Self {
		Tube {
			identifier,
			hostname,
			send_index: 0,
			recv_buffer: BTreeMap::new(),
			next_recv_index: 0,
			open: true,
			outbound: None,
		}
	}

	/// Attach the channel that feeds this tube's socket-writer task. Once
	/// attached, any already-buffered contiguous run is flushed immediately.
	pub fn attach_outbound(&mut self, sender: UnboundedSender<Vec<u8>>) {
		self.outbound = Some(sender);
		self.flush_ready();
	}

	pub fn is_open(&self) -> bool {
		self.open
	}

	/// Returns the current send index, then increments it. Strictly
	/// monotonic per tube regardless of interleaving with other tubes.
	pub fn assign_send_index(&mut self) -> u64 {
		let idx = self.send_index;
		self.send_index += 1;
		idx
	}

	/// Store an inbound packet at `idx`, overwriting any previous value
	/// (duplicates are not expected but are tolerated, not an error).
	/// Delivers any now-contiguous run of bytes to the attached writer.
	pub fn store_received(&mut self, idx: u64, payload: Vec<u8>) {
		if idx < self.next_recv_index {
			// Already delivered; a stale duplicate. Drop it.
			return;
		}
		self.recv_buffer.insert(idx, payload);
		self.flush_ready();
	}

	/// Pop the next in-order packet if it has arrived, advancing
	/// `next_recv_index`. Returns `None` if the next expected index has a
	/// gap, in which case the tube stalls until it arrives.
	pub fn pop_next(&mut self) -> Option<Vec<u8>> {
		let next = self.recv_buffer.remove(&self.next_recv_index);
		if next.is_some() {
			self.next_recv_index += 1;
		}
		next
	}

	fn flush_ready(&mut self) {
		while let Some(bytes) = self.pop_next() {
			if let Some(outbound) = &self.outbound {
				// The receiver (socket writer task) may already be gone if
				// the local connection just closed; that's not our problem
				// to report, the endpoint loop will tear the tube down.
				let _ = outbound.send(bytes);
			}
		}
	}

	/// Marks the tube as draining. The endpoint loop is responsible for
	/// closing the underlying socket; dropping `outbound` here signals the
	/// writer task to stop.
	pub fn close(&mut self) {
		self.open = false;
		self.outbound = None;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn assign_send_index_is_gapless() {
		let mut tube = Tube::new(1, None);
		let indices: Vec<u64> = (0..5).map(|_| tube.assign_send_index()).collect();
		assert_eq!(indices, vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn out_of_order_arrival_blocks_until_gap_fills() {
		let mut tube = Tube::new(1, None);
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		tube.attach_outbound(tx);

		tube.store_received(2, b"C".to_vec());
		tube.store_received(0, b"A".to_vec());
		assert!(rx.try_recv().is_err(), "index 1 still missing, nothing should flush past it");

		tube.store_received(1, b"B".to_vec());
		let mut got = Vec::new();
		while let Ok(bytes) = rx.try_recv() {
			got.push(bytes);
		}
		assert_eq!(got, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
	}

	#[test]
	fn reassembly_is_byte_identical_concatenation() {
		let mut tube = Tube::new(1, None);
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		tube.attach_outbound(tx);

		let chunks = vec![b"hello ".to_vec(), b"cruel ".to_vec(), b"world".to_vec()];
		for (idx, chunk) in chunks.iter().enumerate() {
			tube.store_received(idx as u64, chunk.clone());
		}

		let mut reassembled = Vec::new();
		while let Ok(bytes) = rx.try_recv() {
			reassembled.extend(bytes);
		}
		assert_eq!(reassembled, b"hello cruel world".to_vec());
	}

	#[test]
	fn duplicate_index_after_delivery_is_dropped_not_redelivered() {
		let mut tube = Tube::new(1, None);
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		tube.attach_outbound(tx);

		tube.store_received(0, b"A".to_vec());
		assert_eq!(rx.try_recv().unwrap(), b"A".to_vec());

		tube.store_received(0, b"A-again".to_vec());
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn close_marks_tube_shut_and_drops_writer() {
		let mut tube = Tube::new(1, None);
		let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
		tube.attach_outbound(tx);
		assert!(tube.is_open());

		tube.close();
		assert!(!tube.is_open());
		drop(rx);
	}
}
