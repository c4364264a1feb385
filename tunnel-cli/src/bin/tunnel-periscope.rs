// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Starts a Periscope endpoint: waits for a Submarine's handshake, then
//! opens an outbound connection for every tube it announces (§6).

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use tunnel_cli::{init_logging, CommonOpts, UnimplementedCarrier};
use tunnel_core::config::Credentials;
use tunnel_core::session::periscope::new_periscope;
use tunnel_core::throttle::Throttle;
use tunnel_net_tokio::periscope;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Opts {
	#[command(flatten)]
	common: CommonOpts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_logging();
	let opts = Opts::parse();

	let credentials = Credentials::load(&opts.common.credentials)?;
	let local = credentials.get(&opts.common.local_name)?;
	// The peer row is only used to size expectations in logs; Periscope
	// learns its counterparty's public key from the handshake itself
	// (§9, handshake asymmetry) rather than dialing out.
	let _peer = credentials.get(&opts.common.peer_name)?;

	let carrier = Arc::new(UnimplementedCarrier);
	let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(1024);
	let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

	let session = new_periscope(local.public_key.clone(), carrier, outbound_tx, events_tx);

	let receive_loop = tokio::spawn({
		let session = session.clone();
		async move {
			if let Err(e) = session.receive_loop().await {
				tracing::error!(error = %e, "invoice subscription ended");
			}
		}
	});

	let throttle = Throttle::spawn(
		Duration::from_millis(opts.common.throttle_interval_ms),
		outbound_rx,
		opts.common.cover_traffic,
		{
			let session = session.clone();
			move |item| {
				let session = session.clone();
				async move { session.send(item.payload, item.packet_idx, item.tube_id).await }
			}
		},
	);

	info!("waiting for a submarine handshake");
	periscope::run(session, events_rx).await;

	throttle.shutdown();
	throttle.join().await;
	receive_loop.abort();

	Ok(())
}
