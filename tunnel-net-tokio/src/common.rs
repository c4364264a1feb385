// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Shared plumbing between the Submarine and Periscope endpoint loops:
//! the per-tube reader/writer task pair, and the table that lets an
//! inbound [`SessionEvent::CloseTube`] tear down the right connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tunnel_core::carrier::CarrierClient;
use tunnel_core::throttle::OutboundItem;
use tunnel_core::{Session, TubeId};

/// Hostname substrings rejected at CONNECT time to cap incidental cost
/// (§6 "Deny-list").
pub const DENY_LIST: &[&str] = &[
	"mozilla",
	"telemetry",
	"staticcdn.duckduckgo",
	"brxt.mendeley.com",
	"profile.accounts.firefox.com",
	"api.accounts.firefox.com",
	"easylist-downloads.adblockplus.org",
];

pub fn is_denied(hostname: &str) -> bool {
	DENY_LIST.iter().any(|needle| hostname.contains(needle))
}

/// Tracks the live connections this endpoint is bridging, so that a
/// `CloseTube` event (originating from either a local I/O error or a
/// peer-initiated kind-2 message) can cancel the right reader/writer pair.
#[derive(Clone, Default)]
pub struct ConnTable(Arc<Mutex<HashMap<TubeId, CancellationToken>>>);

impl ConnTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, tube_id: TubeId) -> CancellationToken {
		let token = CancellationToken::new();
		self.0.lock().unwrap().insert(tube_id, token.clone());
		token
	}

	pub fn cancel(&self, tube_id: TubeId) {
		if let Some(token) = self.0.lock().unwrap().remove(&tube_id) {
			token.cancel();
		}
	}
}

/// Spawns the reader and writer tasks that bridge `stream` to `tube_id`'s
/// tube. `chunk_cap` bounds each local read so the resulting frame fits
/// inside one payment after base64 and framing overhead (§4.1).
pub fn spawn_pipe<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	conn_table: ConnTable,
	tube_id: TubeId,
	stream: tokio::net::TcpStream,
	chunk_cap: usize,
) {
	let token = conn_table.register(tube_id);
	let (read_half, write_half) = stream.into_split();
	let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
	session.attach_outbound(tube_id, outbound_tx);

	tokio::spawn(reader_task(session.clone(), tube_id, read_half, chunk_cap, token.clone()));
	tokio::spawn(writer_task(session, tube_id, write_half, outbound_rx, token));
}

async fn reader_task<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	tube_id: TubeId,
	mut read_half: OwnedReadHalf,
	chunk_cap: usize,
	token: CancellationToken,
) {
	let mut buf = vec![0u8; chunk_cap];
	loop {
		let read = tokio::select! {
			_ = token.cancelled() => return,
			res = read_half.read(&mut buf) => res,
		};

		match read {
			Ok(0) => {
				info!(tube_id, "local socket reached EOF gracefully");
				session.local_close(tube_id).await;
				return;
			}
			Ok(n) => {
				let Some(idx) = session.assign_send_index(tube_id) else { return };
				session
					.enqueue(OutboundItem { payload: buf[..n].to_vec(), packet_idx: idx, tube_id })
					.await;
			}
			Err(e) => {
				warn!(tube_id, error = %e, "local socket read failed, closing and informing peer");
				session.local_close(tube_id).await;
				return;
			}
		}
	}
}

async fn writer_task<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	tube_id: TubeId,
	mut write_half: OwnedWriteHalf,
	mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
	token: CancellationToken,
) {
	loop {
		let bytes = tokio::select! {
			_ = token.cancelled() => return,
			maybe = outbound_rx.recv() => match maybe {
				Some(bytes) => bytes,
				None => return, // tube closed, channel dropped
			},
		};

		if let Err(e) = write_half.write_all(&bytes).await {
			warn!(tube_id, error = %e, "local socket write failed, closing and informing peer");
			session.local_close(tube_id).await;
			return;
		}
	}
}
