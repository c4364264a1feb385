// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Shared scaffolding for the two endpoint binaries: argument parsing,
//! logging setup and the placeholder [`CarrierClient`](tunnel_core::CarrierClient)
//! an operator must replace with a real node-daemon RPC client (§1 scope).

mod carrier_stub;

pub use carrier_stub::UnimplementedCarrier;

use std::path::PathBuf;

use clap::Args;

/// Options common to both endpoints: where to find the credentials file,
/// which row names this node and its peer, and how the throttle paces
/// the wire.
#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
	/// Path to the credentials CSV (§6: name,cert_path,macaroon_path,public_key,port).
	#[arg(long)]
	pub credentials: PathBuf,

	/// Name of this node's row in the credentials file.
	#[arg(long)]
	pub local_name: String,

	/// Name of the peer's row in the credentials file.
	#[arg(long)]
	pub peer_name: String,

	/// Milliseconds between throttle ticks (§4.5).
	#[arg(long, default_value_t = 1000)]
	pub throttle_interval_ms: u64,

	/// Send a dummy cover-traffic packet on every tick the outbound
	/// queue is empty, instead of skipping the tick.
	#[arg(long)]
	pub cover_traffic: bool,
}

pub fn init_logging() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();
}
