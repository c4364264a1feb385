// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Session owns every Tube, the counterparty's public key, the carrier
//! handle and the cost/latency counters. The two endpoints are asymmetric
//! only in how the handshake is initiated and how an incoming tube-open is
//! handled (§9); that asymmetry is expressed as [`Role`] plus the thin
//! [`submarine`] / [`periscope`] wrappers, not as separate types for the
//! shared bookkeeping below.

pub mod periscope;
pub mod submarine;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin_hashes::Hash;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::carrier::{CarrierClient, SendPaymentRequest, SettledPayment, PaymentUpdate};
use crate::crypt::Crypt;
use crate::error::TunnelError;
use crate::packet::{self, DUMMY_TUBE_ID, SESSION_TUBE_ID};
use crate::throttle::OutboundItem;
use crate::tube::{Tube, TubeId};

/// How many dummy cover-traffic samples accumulate before a latency batch
/// is flushed to disk (§6 "Latency log").
pub const LATENCY_LOG_BATCH: usize = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Submarine,
	Periscope,
}

/// Events the Session can't act on itself because it doesn't own any
/// sockets — the net-tokio endpoint loop consumes these and drives the
/// actual TCP side effects (opening a connection, closing one).
#[derive(Debug, Clone)]
pub enum SessionEvent {
	HandshakeActive { peer_pk: String },
	HandshakeDenied,
	OpenTube { tube_id: TubeId, hostname: String },
	CloseTube { tube_id: TubeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HandshakeState {
	Idle,
	SentOpen,
	Active,
	Denied,
}

pub struct Session<C: CarrierClient> {
	role: Role,
	local_pk: String,
	target_pk: Mutex<Option<String>>,
	carrier: Arc<C>,
	crypt: Crypt,
	tubes: Mutex<HashMap<TubeId, Tube>>,
	total_cost_sat: AtomicU64,
	latency_samples: Mutex<Vec<f64>>,
	outbound_tx: tokio::sync::mpsc::Sender<OutboundItem>,
	events_tx: UnboundedSender<SessionEvent>,
	handshake: Mutex<HandshakeState>,
	handshake_notify: Notify,
}

impl<C: CarrierClient> Session<C> {
	pub fn new(
		role: Role,
		local_pk: String,
		carrier: Arc<C>,
		outbound_tx: tokio::sync::mpsc::Sender<OutboundItem>,
		events_tx: UnboundedSender<SessionEvent>,
	) -> Arc<Self> {
		Arc::new(Session {
			role,
			local_pk,
			target_pk: Mutex::new(None),
			carrier,
			crypt: Crypt::new(),
			tubes: Mutex::new(HashMap::new()),
			total_cost_sat: AtomicU64::new(0),
			latency_samples: Mutex::new(Vec::new()),
			outbound_tx,
			events_tx,
			handshake: Mutex::new(HandshakeState::Idle),
			handshake_notify: Notify::new(),
		})
	}

	pub fn local_pk(&self) -> &str {
		&self.local_pk
	}

	fn target_pk(&self) -> Option<String> {
		self.target_pk.lock().unwrap().clone()
	}

	/// Build a frame, obtain a fresh preimage/hash, and submit one payment.
	/// Reserved tube ids (0, -1) are always sendable; any other id must
	/// name a currently-live tube or the packet is dropped silently (§4.4).
	pub async fn send(&self, data: Vec<u8>, packet_idx: u64, tube_id: TubeId) {
		if tube_id != SESSION_TUBE_ID && tube_id != DUMMY_TUBE_ID {
			let live = self.tubes.lock().unwrap().contains_key(&tube_id);
			if !live {
				return;
			}
		}

		let Some(target_pk) = self.target_pk() else {
			warn!(tube_id, "dropping send before handshake completed");
			return;
		};
		let Ok(dest_pubkey) = hex_decode(&target_pk) else {
			error!(%target_pk, "target public key is not valid hex");
			return;
		};

		let frame = packet::encode(tube_id, packet_idx, &data);
		let (preimage, hash) = self.crypt.next_pair();

		let mut custom_records = HashMap::new();
		custom_records.insert(packet::KEYSEND_RECORD_KEY, preimage.0.to_vec());
		custom_records.insert(packet::DATA_RECORD_KEY, frame);

		let req = SendPaymentRequest {
			payment_hash: hash.into_inner(),
			amt_sat: 1,
			final_cltv_delta: 40,
			dest_pubkey,
			timeout_s: 200,
			dest_custom_records: custom_records,
			fee_limit_sat: 40,
			no_inflight_updates: true,
			dest_features: vec![9],
		};

		match self.carrier.send_payment(req).await {
			PaymentUpdate::Succeeded { fee_sat, value_sat } => {
				self.total_cost_sat.fetch_add(fee_sat + value_sat, Ordering::Relaxed);
			}
			PaymentUpdate::Failed { reason } => {
				warn!(tube_id, packet_idx, %reason, "carrier payment failed, packet dropped");
			}
			PaymentUpdate::InFlight => {}
		}
	}

	pub async fn send_session_message(&self, text: &str) {
		self.send(text.as_bytes().to_vec(), 0, SESSION_TUBE_ID).await;
	}

	/// Queue a chunk for the throttle instead of sending it immediately;
	/// used by the endpoint loop's reader tasks (§4.6).
	pub async fn enqueue(&self, item: OutboundItem) {
		let _ = self.outbound_tx.send(item).await;
	}

	pub fn assign_send_index(&self, tube_id: TubeId) -> Option<u64> {
		self.tubes.lock().unwrap().get_mut(&tube_id).map(Tube::assign_send_index)
	}

	pub fn attach_outbound(&self, tube_id: TubeId, sender: UnboundedSender<Vec<u8>>) {
		if let Some(tube) = self.tubes.lock().unwrap().get_mut(&tube_id) {
			tube.attach_outbound(sender);
		}
	}

	pub fn hostname_of(&self, tube_id: TubeId) -> Option<String> {
		self.tubes.lock().unwrap().get(&tube_id).and_then(|t| t.hostname.clone())
	}

	/// Insert a new tube. Fails if the id is already in use, upholding the
	/// per-session tube-id uniqueness invariant (§3).
	fn insert_tube(&self, tube_id: TubeId, hostname: Option<String>) -> Result<(), TunnelError> {
		let mut tubes = self.tubes.lock().unwrap();
		if tubes.contains_key(&tube_id) {
			return Err(TunnelError::DuplicateTubeId(tube_id));
		}
		tubes.insert(tube_id, Tube::new(tube_id, hostname));
		Ok(())
	}

	/// The Submarine side creates the tube locally (before the peer knows
	/// about it) and announces it with a kind-1 service message.
	pub async fn open_tube(&self, tube_id: TubeId, hostname: String) -> Result<(), TunnelError> {
		self.insert_tube(tube_id, Some(hostname.clone()))?;
		self.send_session_message(&format!("1:{}:{}", tube_id, hostname)).await;
		Ok(())
	}

	/// Closing from this endpoint: tell the endpoint loop to close the
	/// socket, drop the tube, and notify the peer. Idempotent.
	pub async fn local_close(&self, tube_id: TubeId) {
		let existed = self.tubes.lock().unwrap().remove(&tube_id).is_some();
		if !existed {
			info!(tube_id, "local_close on an already-closed tube, ignoring");
			return;
		}
		info!(tube_id, "closing local socket, local connection ended");
		let _ = self.events_tx.send(SessionEvent::CloseTube { tube_id });
		self.send_session_message(&format!("2:{}", tube_id)).await;
	}

	/// Closing because the peer asked us to (kind-2 message): tell the
	/// endpoint loop to close the socket and drop the tube, but do not
	/// notify the peer again. Idempotent.
	pub async fn remote_close(&self, tube_id: TubeId) {
		let existed = self.tubes.lock().unwrap().remove(&tube_id).is_some();
		if !existed {
			info!(tube_id, "remote_close on an already-closed tube, ignoring");
			return;
		}
		info!(tube_id, "closing local socket, remote connection ended");
		let _ = self.events_tx.send(SessionEvent::CloseTube { tube_id });
	}

	/// Runs for the session's lifetime, dispatching every inbound settled
	/// payment. A dropped subscription is fatal (§7 kind 2).
	pub async fn receive_loop(self: &Arc<Self>) -> Result<(), TunnelError> {
		use futures::StreamExt;

		let mut invoices = self.carrier.subscribe_invoices().await;
		loop {
			let payment = match invoices.next().await {
				Some(p) => p,
				None => return Err(TunnelError::SubscriptionDropped("invoice stream ended".into())),
			};
			self.dispatch(payment).await;
		}
	}

	async fn dispatch(self: &Arc<Self>, payment: SettledPayment) {
		let Some(data) = payment.data_record() else {
			// Not all inbound payments are ours (§7 kind 3).
			return;
		};
		let decoded = match packet::decode(data) {
			Ok(p) => p,
			Err(_) => return,
		};

		if decoded.tube_id == SESSION_TUBE_ID {
			let Ok(text) = String::from_utf8(decoded.payload) else { return };
			self.handle_service_message(&text).await;
			return;
		}

		if decoded.tube_id == DUMMY_TUBE_ID {
			self.handle_dummy(&decoded.payload);
			return;
		}

		let mut tubes = self.tubes.lock().unwrap();
		match tubes.get_mut(&decoded.tube_id) {
			Some(tube) => tube.store_received(decoded.packet_idx, decoded.payload),
			None => warn!(tube_id = decoded.tube_id, "received packet for unknown tube, dropping"),
		}
	}

	fn handle_dummy(&self, payload: &[u8]) {
		let Ok(sent_at) = std::str::from_utf8(payload).unwrap_or("").parse::<f64>() else { return };
		let now = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs_f64();
		let latency = now - sent_at;

		let mut samples = self.latency_samples.lock().unwrap();
		samples.push(latency);
		if samples.len() == LATENCY_LOG_BATCH {
			let average = samples.iter().sum::<f64>() / samples.len() as f64;
			if let Err(e) = append_latency_batch(&samples) {
				error!(error = %e, "failed to append latency batch");
			}
			info!(average, "flushed latency batch");
			samples.clear();
		}
	}

	async fn handle_service_message(self: &Arc<Self>, message: &str) {
		let Some((kind_str, content)) = message.split_once(':') else {
			warn!(message, "service message missing kind delimiter");
			return;
		};
		let Ok(kind) = kind_str.parse::<u8>() else {
			warn!(message, "service message kind is not an integer");
			return;
		};

		match (kind, self.role) {
			(0, Role::Submarine) => self.on_handshake_response(content),
			(0, Role::Periscope) => self.on_handshake_request(content).await,
			(1, Role::Periscope) => self.on_tube_open_request(content).await,
			(1, Role::Submarine) => warn!("submarine received unexpected kind-1 tube-open message"),
			(2, _) => self.remote_close(parse_tube_id(content)).await,
			_ => error!(kind, "invalid service message kind"),
		}
	}

	fn on_handshake_response(&self, status: &str) {
		let mut state = self.handshake.lock().unwrap();
		*state = match status {
			"ACTIVE" => HandshakeState::Active,
			_ => HandshakeState::Denied,
		};
		drop(state);
		self.handshake_notify.notify_waiters();
	}

	async fn on_handshake_request(&self, peer_pk: &str) {
		*self.target_pk.lock().unwrap() = Some(peer_pk.to_string());
		let _ = self.events_tx.send(SessionEvent::HandshakeActive { peer_pk: peer_pk.to_string() });
		self.send_session_message("0:ACTIVE").await;
	}

	async fn on_tube_open_request(&self, value: &str) {
		let Some((tube_id_str, hostname)) = value.split_once(':') else {
			warn!(value, "tube-open message missing hostname");
			return;
		};
		let Ok(tube_id) = tube_id_str.parse::<TubeId>() else {
			warn!(value, "tube-open message has non-integer tube id");
			return;
		};
		if let Err(e) = self.insert_tube(tube_id, Some(hostname.to_string())) {
			error!(error = %e, "could not open tube");
			return;
		}
		let _ = self.events_tx.send(SessionEvent::OpenTube { tube_id, hostname: hostname.to_string() });
	}

	/// Submarine-only: announce ourselves and block until the Periscope
	/// answers ACTIVE or DENIED.
	pub async fn register(&self, target_pk: &str) -> Result<(), TunnelError> {
		debug_assert_eq!(self.role, Role::Submarine);
		*self.target_pk.lock().unwrap() = Some(target_pk.to_string());
		*self.handshake.lock().unwrap() = HandshakeState::SentOpen;
		self.send_session_message(&format!("0:{}", self.local_pk)).await;

		loop {
			{
				let state = self.handshake.lock().unwrap();
				match *state {
					HandshakeState::Active => return Ok(()),
					HandshakeState::Denied => return Err(TunnelError::HandshakeDenied),
					_ => {}
				}
			}
			self.handshake_notify.notified().await;
		}
	}
}

fn parse_tube_id(value: &str) -> TubeId {
	value.parse().unwrap_or(0)
}

fn hex_decode(s: &str) -> Result<Vec<u8>, std::num::ParseIntError> {
	(0..s.len())
		.step_by(2)
		.map(|i| u8::from_str_radix(&s[i..i + 2], 16))
		.collect()
}

fn append_latency_batch(samples: &[f64]) -> std::io::Result<()> {
	use std::fs::OpenOptions;
	let file = OpenOptions::new().create(true).append(true).open("latencies.txt")?;
	let mut writer = csv::Writer::from_writer(file);
	writer.write_record(samples.iter().map(|s| s.to_string()))?;
	writer.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::carrier::fake::FakeCarrier;
	use crate::session::periscope::new_periscope;
	use crate::session::submarine::new_submarine;

	fn local_pk(byte: u8) -> String {
		hex::encode([byte; 33])
	}

	mod hex {
		pub fn encode(bytes: [u8; 33]) -> String {
			bytes.iter().map(|b| format!("{b:02x}")).collect()
		}
	}

	/// A full handshake, tube open and one data round-trip, end to end
	/// through two `Session`s wired by a pair of linked `FakeCarrier`s —
	/// the protocol-level shape of "a CONNECT handshake followed by a
	/// request/response round-trip yields exactly the origin bytes".
	#[tokio::test]
	async fn handshake_then_tube_data_round_trips() {
		let (carrier_sub, carrier_peri) = FakeCarrier::pair();
		let sub_pk = local_pk(0xAA);
		let peri_pk = local_pk(0xBB);

		let (sub_out_tx, mut sub_out_rx) = tokio::sync::mpsc::channel(16);
		let (sub_ev_tx, _sub_ev_rx) = tokio::sync::mpsc::unbounded_channel();
		let submarine = new_submarine(sub_pk.clone(), carrier_sub, sub_out_tx, sub_ev_tx);

		let (peri_out_tx, mut peri_out_rx) = tokio::sync::mpsc::channel(16);
		let (peri_ev_tx, mut peri_ev_rx) = tokio::sync::mpsc::unbounded_channel();
		let periscope = new_periscope(peri_pk.clone(), carrier_peri, peri_out_tx, peri_ev_tx);

		// Each side's outbound queue is drained straight into its own
		// `send`, standing in for the throttle in this protocol-only test.
		let sub_pump = {
			let submarine = submarine.clone();
			tokio::spawn(async move {
				while let Some(item) = sub_out_rx.recv().await {
					submarine.send(item.payload, item.packet_idx, item.tube_id).await;
				}
			})
		};
		let peri_pump = {
			let periscope = periscope.clone();
			tokio::spawn(async move {
				while let Some(item) = peri_out_rx.recv().await {
					periscope.send(item.payload, item.packet_idx, item.tube_id).await;
				}
			})
		};

		let sub_recv = {
			let submarine = submarine.clone();
			tokio::spawn(async move { submarine.receive_loop().await })
		};
		let peri_recv = {
			let periscope = periscope.clone();
			tokio::spawn(async move { periscope.receive_loop().await })
		};

		submarine.register(&peri_pk).await.expect("periscope must accept the handshake");

		submarine.open_tube(42, "example.com".to_string()).await.unwrap();
		let event = peri_ev_rx.recv().await.expect("periscope should observe the tube open");
		match event {
			SessionEvent::OpenTube { tube_id, hostname } => {
				assert_eq!(tube_id, 42);
				assert_eq!(hostname, "example.com");
			}
			other => panic!("expected OpenTube, got {other:?}"),
		}

		let (tube_tx, mut tube_rx) = tokio::sync::mpsc::unbounded_channel();
		periscope.attach_outbound(42, tube_tx);

		let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
		let idx = submarine.assign_send_index(42).unwrap();
		submarine.enqueue(OutboundItem { payload: request.clone(), packet_idx: idx, tube_id: 42 }).await;

		let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), tube_rx.recv())
			.await
			.expect("periscope's tube did not deliver in time")
			.unwrap();
		assert_eq!(delivered, request);

		sub_pump.abort();
		peri_pump.abort();
		sub_recv.abort();
		peri_recv.abort();
	}

	/// Two tubes interleaved on the wire (A0, B1, A1, B0) still reassemble
	/// byte-identically and independently per tube (§4.2 ordering scope).
	#[tokio::test]
	async fn concurrent_tubes_reassemble_independently() {
		let (carrier_sub, carrier_peri) = FakeCarrier::pair();
		let sub_pk = local_pk(0x11);
		let peri_pk = local_pk(0x22);

		let (sub_out_tx, mut sub_out_rx) = tokio::sync::mpsc::channel(16);
		let (sub_ev_tx, _sub_ev_rx) = tokio::sync::mpsc::unbounded_channel();
		let submarine = new_submarine(sub_pk, carrier_sub, sub_out_tx, sub_ev_tx);

		let (peri_out_tx, _peri_out_rx) = tokio::sync::mpsc::channel(16);
		let (peri_ev_tx, mut peri_ev_rx) = tokio::sync::mpsc::unbounded_channel();
		let periscope = new_periscope(peri_pk.clone(), carrier_peri, peri_out_tx, peri_ev_tx);

		tokio::spawn({
			let submarine = submarine.clone();
			async move {
				while let Some(item) = sub_out_rx.recv().await {
					submarine.send(item.payload, item.packet_idx, item.tube_id).await;
				}
			}
		});
		let sub_recv = tokio::spawn({
			let submarine = submarine.clone();
			async move { submarine.receive_loop().await }
		});
		let peri_recv = tokio::spawn({
			let periscope = periscope.clone();
			async move { periscope.receive_loop().await }
		});

		submarine.register(&peri_pk).await.unwrap();
		submarine.open_tube(1, "a.example".to_string()).await.unwrap();
		submarine.open_tube(2, "b.example".to_string()).await.unwrap();
		for _ in 0..2 {
			peri_ev_rx.recv().await.unwrap();
		}

		let (tube_a_tx, mut tube_a_rx) = tokio::sync::mpsc::unbounded_channel();
		let (tube_b_tx, mut tube_b_rx) = tokio::sync::mpsc::unbounded_channel();
		periscope.attach_outbound(1, tube_a_tx);
		periscope.attach_outbound(2, tube_b_tx);

		for (tube_id, chunk) in [(1, b"A0".to_vec()), (2, b"B0".to_vec()), (1, b"A1".to_vec()), (2, b"B1".to_vec())] {
			let idx = submarine.assign_send_index(tube_id).unwrap();
			submarine.send(chunk, idx, tube_id).await;
		}

		assert_eq!(tube_a_rx.recv().await.unwrap(), b"A0".to_vec());
		assert_eq!(tube_a_rx.recv().await.unwrap(), b"A1".to_vec());
		assert_eq!(tube_b_rx.recv().await.unwrap(), b"B0".to_vec());
		assert_eq!(tube_b_rx.recv().await.unwrap(), b"B1".to_vec());

		sub_recv.abort();
		peri_recv.abort();
	}
}
