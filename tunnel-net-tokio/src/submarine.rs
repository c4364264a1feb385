// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The Submarine endpoint: accepts local HTTP CONNECT requests on
//! `localhost:8742` and forwards each accepted connection's bytes as a
//! tube (§6 "Local TCP surface (Submarine)").

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use tunnel_core::carrier::CarrierClient;
use tunnel_core::{Session, SessionEvent, TubeId, TunnelError};

use crate::common::{is_denied, spawn_pipe, ConnTable};

/// §4.1: Submarine reads local TCP in chunks no larger than this, so the
/// base64'd frame fits inside one payment's custom-record size cap.
pub const CHUNK_CAP: usize = 729;

/// The literal default listen address from §6.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8742";

const MAX_CONNECT_HEADER_BYTES: usize = 8192;

/// Runs the Submarine accept loop until the listener fails. Call alongside
/// [`tunnel_core::Session::receive_loop`] and a [`tunnel_core::throttle::Throttle`]
/// pumping `session.send` — this function only drives the local TCP side.
pub async fn run<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	events_rx: UnboundedReceiver<SessionEvent>,
	listen_addr: SocketAddr,
) -> std::io::Result<()> {
	let listener = TcpListener::bind(listen_addr).await?;
	info!(%listen_addr, "submarine listening");

	let conn_table = ConnTable::new();
	tokio::spawn(handle_events(conn_table.clone(), events_rx));

	loop {
		let (stream, peer_addr) = listener.accept().await?;
		let session = session.clone();
		let conn_table = conn_table.clone();
		tokio::spawn(async move {
			if let Err(e) = accept_connection(session, conn_table, stream, peer_addr).await {
				warn!(error = %e, "rejected new local connection");
			}
		});
	}
}

/// CloseTube is the only event kind a Submarine session ever emits;
/// HandshakeActive/Denied and OpenTube are Periscope-only (§9 handshake
/// asymmetry).
async fn handle_events(conn_table: ConnTable, mut events_rx: UnboundedReceiver<SessionEvent>) {
	while let Some(event) = events_rx.recv().await {
		match event {
			SessionEvent::CloseTube { tube_id } => conn_table.cancel(tube_id),
			other => warn!(?other, "submarine received unexpected session event"),
		}
	}
}

async fn accept_connection<C: CarrierClient + 'static>(
	session: Arc<Session<C>>,
	conn_table: ConnTable,
	mut stream: TcpStream,
	peer_addr: SocketAddr,
) -> Result<(), TunnelError> {
	// The port the local HTTP client connected from is the tube id (§3;
	// see DESIGN.md for the ephemeral-port-reuse caveat this inherits).
	let tube_id: TubeId = peer_addr.port() as TubeId;

	let hostname = match read_connect_request(&mut stream).await {
		Ok(hostname) => hostname,
		Err(e) => {
			let _ = stream.shutdown().await;
			return Err(e);
		}
	};

	if is_denied(&hostname) {
		let _ = stream.shutdown().await;
		return Err(TunnelError::ConnectRejected(format!("{hostname} is deny-listed")));
	}

	session.open_tube(tube_id, hostname.clone()).await?;
	info!(tube_id, %hostname, "opened tube for CONNECT request");

	// The 200 Connection-established line is the Periscope's responsibility
	// (it arrives as the tube's first inbound packet, see periscope.rs);
	// writing it here too would double it up in the client's byte stream.
	spawn_pipe(session, conn_table, tube_id, stream, CHUNK_CAP);
	Ok(())
}

/// Reads the `CONNECT host:port HTTP/1.1\r\n...\r\n\r\n` request line and
/// headers, returning the target hostname.
async fn read_connect_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String, TunnelError> {
	let mut buf = vec![0u8; MAX_CONNECT_HEADER_BYTES];
	let mut filled = 0;

	loop {
		let n = stream
			.read(&mut buf[filled..])
			.await
			.map_err(|e| TunnelError::ConnectRejected(format!("reading CONNECT request: {e}")))?;
		if n == 0 {
			return Err(TunnelError::ConnectRejected("connection closed before CONNECT completed".into()));
		}
		filled += n;
		if buf[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
			break;
		}
		if filled == buf.len() {
			return Err(TunnelError::ConnectRejected("CONNECT request headers too large".into()));
		}
	}

	let text = String::from_utf8_lossy(&buf[..filled]);
	let request_line = text.lines().next().unwrap_or("");
	let rest = request_line
		.strip_prefix("CONNECT ")
		.ok_or_else(|| TunnelError::ConnectRejected(format!("not a CONNECT request: {request_line:?}")))?;

	let host_port = rest.split(' ').next().unwrap_or("");
	let hostname = host_port.split(':').next().unwrap_or("").to_string();
	if hostname.is_empty() {
		return Err(TunnelError::ConnectRejected(format!("could not parse hostname from {request_line:?}")));
	}
	Ok(hostname)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncWriteExt as _;

	#[tokio::test]
	async fn parses_connect_request_hostname() {
		let (mut client, mut server) = tokio::io::duplex(1024);
		client
			.write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
			.await
			.unwrap();

		let hostname = read_connect_request(&mut server).await.unwrap();
		assert_eq!(hostname, "example.com");
	}

	#[tokio::test]
	async fn rejects_non_connect_request() {
		let (mut client, mut server) = tokio::io::duplex(1024);
		client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

		assert!(read_connect_request(&mut server).await.is_err());
	}

	#[test]
	fn deny_list_matches_substring() {
		assert!(is_denied("www.telemetry.mozilla.com"));
		assert!(!is_denied("example.com"));
	}
}
