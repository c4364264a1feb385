// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::tube::TubeId;

/// The errors a tunnel endpoint can encounter, grouped the way §7 of the
/// design groups them: confined-to-a-tube vs. session-wide.
#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
	/// The carrier rejected or timed out an outbound payment. The packet it
	/// carried is lost; callers must not retry it.
	#[error("carrier send failed for tube {tube_id}: {reason}")]
	CarrierSendFailed { tube_id: i64, reason: String },

	/// The inbound-payment subscription stream ended. Fatal to the session.
	#[error("carrier subscription dropped: {0}")]
	SubscriptionDropped(String),

	/// A settled payment did not decode to a well-formed frame. The payment
	/// may simply not be ours; this is not logged as an error.
	#[error("malformed inbound frame: {0}")]
	MalformedFrame(#[from] crate::packet::DecodeError),

	/// A frame named a tube id with no corresponding live tube.
	#[error("unknown tube id {0}")]
	UnknownTube(TubeId),

	/// Local socket I/O failed (reset, aborted, bad descriptor).
	#[error("local I/O error on tube {tube_id}: {source}")]
	LocalIoError {
		tube_id: TubeId,
		#[source]
		source: std::io::Error,
	},

	/// The Periscope denied or never answered the handshake.
	#[error("handshake denied or timed out")]
	HandshakeDenied,

	/// The accepted local connection did not start with a valid CONNECT
	/// request, or its target hostname is deny-listed.
	#[error("CONNECT request rejected: {0}")]
	ConnectRejected(String),

	/// A tube id was reused within one session, violating the uniqueness
	/// invariant of §3.
	#[error("tube id {0} already in use")]
	DuplicateTubeId(TubeId),
}

/// Errors loading the comma-separated credentials file of §6.
#[derive(thiserror::Error, Debug)]
pub enum CredentialsError {
	#[error("could not read credentials file: {0}")]
	Io(#[from] std::io::Error),

	#[error("could not parse credentials file: {0}")]
	Csv(#[from] csv::Error),

	#[error("malformed credentials row: {0:?}")]
	MalformedRow(Vec<String>),

	#[error("no entry named {0:?} in credentials file")]
	NotFound(String),
}
