// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The Periscope endpoint: waits for a Submarine to register, then opens
//! an outbound TCP connection to `hostname:443` for each tube the
//! Submarine announces (§6 "Local TCP surface (Periscope)").

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use tunnel_core::carrier::CarrierClient;
use tunnel_core::throttle::OutboundItem;
use tunnel_core::{Session, SessionEvent, TubeId};

use crate::common::{spawn_pipe, ConnTable};

/// §4.1: Periscope reads local TCP in chunks no larger than this.
pub const CHUNK_CAP: usize = 850;

const CONNECT_SUCCESS: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
const TARGET_PORT: u16 = 443;

/// Consumes session events for the lifetime of the session: opens an
/// outbound connection for each announced tube, logs the handshake once,
/// and tears down connections the session asks to close.
pub async fn run<C: CarrierClient + 'static>(session: Arc<Session<C>>, mut events_rx: UnboundedReceiver<SessionEvent>) {
	let conn_table = ConnTable::new();

	while let Some(event) = events_rx.recv().await {
		match event {
			SessionEvent::HandshakeActive { peer_pk } => {
				info!(%peer_pk, "established connection with submarine");
			}
			SessionEvent::OpenTube { tube_id, hostname } => {
				let session = session.clone();
				let conn_table = conn_table.clone();
				tokio::spawn(async move {
					if let Err(e) = open_tube_connection(session, conn_table, tube_id, hostname).await {
						error!(tube_id, error = %e, "failed to open outbound connection for tube");
					}
				});
			}
			SessionEvent::CloseTube { tube_id } => conn_table.cancel(tube_id),
			SessionEvent::HandshakeDenied => warn!("unexpected HandshakeDenied event on periscope side"),
		}
	}
}

async fn open_tube_connection<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	conn_table: ConnTable,
	tube_id: TubeId,
	hostname: String,
) -> std::io::Result<()> {
	info!(%hostname, "connecting to tube target");
	let stream = TcpStream::connect((hostname.as_str(), TARGET_PORT)).await?;
	info!(%hostname, "established connection to tube target");

	// The CONNECT success line is this tube's first outbound packet, so
	// the submarine's local HTTP client sees a proper proxy handshake.
	let Some(idx) = session.assign_send_index(tube_id) else {
		warn!(tube_id, "tube disappeared before its first packet could be sent");
		return Ok(());
	};
	session
		.enqueue(OutboundItem { payload: CONNECT_SUCCESS.to_vec(), packet_idx: idx, tube_id })
		.await;

	spawn_pipe(session, conn_table, tube_id, stream, CHUNK_CAP);
	Ok(())
}
