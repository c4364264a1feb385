// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The external payment-network collaborator. §1 scopes the actual RPC
//! client out of this crate ("a remote-procedure-call interface to a node
//! daemon is assumed as an external collaborator"); this module only pins
//! down the interface shape it must have, modeled directly on the real
//! `lnrpc`/`routerrpc` server-streaming surface the reference
//! implementation bound to over gRPC.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub type CustomRecords = HashMap<u64, Vec<u8>>;
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// One inbound settled payment, as delivered by `subscribe_invoices`.
#[derive(Debug, Clone)]
pub struct SettledPayment {
	pub custom_records: CustomRecords,
}

impl SettledPayment {
	/// The data record this tunnel cares about, if the payment carried one.
	/// Not all inbound settled payments are ours (§7 kind 3).
	pub fn data_record(&self) -> Option<&[u8]> {
		self.custom_records
			.get(&crate::packet::DATA_RECORD_KEY)
			.map(|v| v.as_slice())
	}
}

/// An outbound payment request, mirroring `routerrpc.SendPaymentRequest`.
#[derive(Debug, Clone)]
pub struct SendPaymentRequest {
	pub payment_hash: [u8; 32],
	pub amt_sat: u64,
	pub final_cltv_delta: u32,
	pub dest_pubkey: Vec<u8>,
	pub timeout_s: u32,
	pub dest_custom_records: CustomRecords,
	pub fee_limit_sat: u64,
	pub no_inflight_updates: bool,
	pub dest_features: Vec<u32>,
}

/// One update from the multi-update stream `send_payment` returns; the
/// full stream must be consumed to observe the terminal state and the fee
/// actually paid.
#[derive(Debug, Clone)]
pub enum PaymentUpdate {
	InFlight,
	Succeeded { fee_sat: u64, value_sat: u64 },
	Failed { reason: String },
}

/// The payment-network RPC surface a tunnel endpoint needs. Implementors
/// wrap a real node daemon client (e.g. an LND gRPC stub); this crate
/// never constructs one itself.
#[async_trait]
pub trait CarrierClient: Send + Sync {
	/// Subscribe to inbound settled payments. The stream runs for the
	/// lifetime of the session; if it ends, the session is considered
	/// fatally broken (§7 kind 2).
	async fn subscribe_invoices(&self) -> BoxStream<SettledPayment>;

	/// Send one payment and consume its update stream to completion,
	/// returning the terminal update.
	async fn send_payment(&self, req: SendPaymentRequest) -> PaymentUpdate;
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
	use super::*;
	use std::sync::Arc;
	use tokio::sync::mpsc;
	use tokio_stream::wrappers::UnboundedReceiverStream;

	/// An in-memory carrier for tests. `send_payment` forwards the frame it
	/// was asked to carry to whichever peer it is [`FakeCarrier::link`]ed
	/// to, so two linked `FakeCarrier`s behave like a direct channel
	/// between the two ends of a session; an unlinked one simply drops
	/// what it sends (useful for exercising `Session::send` in isolation).
	pub struct FakeCarrier {
		inbound_tx: mpsc::UnboundedSender<SettledPayment>,
		inbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SettledPayment>>>,
		peer_inbound: std::sync::Mutex<Option<mpsc::UnboundedSender<SettledPayment>>>,
		pub fail_next: std::sync::atomic::AtomicBool,
	}

	impl FakeCarrier {
		pub fn new() -> Arc<Self> {
			let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
			Arc::new(FakeCarrier {
				inbound_tx,
				inbound_rx: std::sync::Mutex::new(Some(inbound_rx)),
				peer_inbound: std::sync::Mutex::new(None),
				fail_next: std::sync::atomic::AtomicBool::new(false),
			})
		}

		/// Two carriers that forward payments to each other, modeling the
		/// two ends of one session.
		pub fn pair() -> (Arc<Self>, Arc<Self>) {
			let a = Self::new();
			let b = Self::new();
			a.link(&b);
			b.link(&a);
			(a, b)
		}

		fn link(&self, peer: &Arc<Self>) {
			*self.peer_inbound.lock().unwrap() = Some(peer.inbound_tx.clone());
		}

		/// Deliver a payment to this carrier's own subscriber directly,
		/// bypassing `send_payment`/linking.
		pub fn deliver(&self, payment: SettledPayment) {
			let _ = self.inbound_tx.send(payment);
		}
	}

	#[async_trait]
	impl CarrierClient for FakeCarrier {
		async fn subscribe_invoices(&self) -> BoxStream<SettledPayment> {
			let rx = self
				.inbound_rx
				.lock()
				.unwrap()
				.take()
				.expect("subscribe_invoices called more than once on FakeCarrier");
			Box::pin(UnboundedReceiverStream::new(rx))
		}

		async fn send_payment(&self, req: SendPaymentRequest) -> PaymentUpdate {
			use std::sync::atomic::Ordering;
			if self.fail_next.swap(false, Ordering::SeqCst) {
				return PaymentUpdate::Failed { reason: "no route".into() };
			}
			if let Some(peer) = self.peer_inbound.lock().unwrap().as_ref() {
				let _ = peer.send(SettledPayment { custom_records: req.dest_custom_records });
			}
			PaymentUpdate::Succeeded { fee_sat: 0, value_sat: req.amt_sat }
		}
	}
}
