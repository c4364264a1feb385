// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Starts a Submarine endpoint: listens for local HTTP CONNECT requests
//! and tunnels each one to the peer named on the command line (§6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use tunnel_cli::{init_logging, CommonOpts, UnimplementedCarrier};
use tunnel_core::config::Credentials;
use tunnel_core::session::submarine::new_submarine;
use tunnel_core::throttle::Throttle;
use tunnel_net_tokio::submarine::{self, DEFAULT_LISTEN_ADDR};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Opts {
	#[command(flatten)]
	common: CommonOpts,

	/// Local address the CONNECT listener binds to.
	#[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
	listen_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_logging();
	let opts = Opts::parse();

	let credentials = Credentials::load(&opts.common.credentials)?;
	let local = credentials.get(&opts.common.local_name)?;
	let peer = credentials.get(&opts.common.peer_name)?;

	let carrier = Arc::new(UnimplementedCarrier);
	let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(1024);
	let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

	let session = new_submarine(local.public_key.clone(), carrier, outbound_tx, events_tx);

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

	info!(peer = %opts.common.peer_name, "starting handshake");
	session.register(&peer.public_key).await?;
	info!("handshake active, accepting local connections");

	let result = submarine::run(session, events_rx, opts.listen_addr).await;

	throttle.shutdown();
	throttle.join().await;
	receive_loop.abort();

	Ok(result?)
}
