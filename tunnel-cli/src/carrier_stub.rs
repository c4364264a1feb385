// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! §1 scopes the node-daemon RPC client itself out of this repository: a
//! real deployment wraps an LND (or compatible) gRPC stub behind
//! [`CarrierClient`]. This stub lets the binaries below wire up and run
//! their local TCP and protocol plumbing without one; every payment it is
//! asked to carry fails loudly instead of silently vanishing.

use async_trait::async_trait;

use tunnel_core::carrier::{BoxStream, CarrierClient, PaymentUpdate, SendPaymentRequest, SettledPayment};

pub struct UnimplementedCarrier;

#[async_trait]
impl CarrierClient for UnimplementedCarrier {
	async fn subscribe_invoices(&self) -> BoxStream<SettledPayment> {
		Box::pin(futures::stream::pending())
	}

	async fn send_payment(&self, _req: SendPaymentRequest) -> PaymentUpdate {
		PaymentUpdate::Failed {
			reason: "no CarrierClient wired in; replace UnimplementedCarrier with a real node-daemon RPC client".into(),
		}
	}
}
