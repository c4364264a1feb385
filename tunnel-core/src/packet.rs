// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The frame carried inside one payment's custom-record field:
//! `<tube_id>:<packet_idx>:<base64 payload>`.
//!
//! The reference implementation this was distilled from wraps the base64
//! text in a Python byte-literal repr and slices it back out with `[2:-1]`.
//! That is an artifact of the source language, not part of the wire format;
//! here the base64 text is written and read directly.

use crate::tube::TubeId;

/// The custom-record key carrying the framed data payload.
pub const DATA_RECORD_KEY: u64 = 9_780_141_036_144;

/// The custom-record key carrying the keysend settlement preimage.
pub const KEYSEND_RECORD_KEY: u64 = 5_482_373_484;

/// `tube_id == 0` marks a session control message (see [`crate::session`]).
pub const SESSION_TUBE_ID: TubeId = 0;

/// `tube_id == -1` marks a dummy cover-traffic packet.
pub const DUMMY_TUBE_ID: TubeId = -1;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
	pub tube_id: TubeId,
	pub packet_idx: u64,
	pub payload: Vec<u8>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
	#[error("frame is missing the tube_id:packet_idx:payload delimiters")]
	MissingDelimiters,
	#[error("tube id is not an integer")]
	BadTubeId,
	#[error("packet index is not a non-negative integer")]
	BadPacketIdx,
	#[error("payload is not valid base64")]
	BadBase64,
}

/// Encode a frame ready to be placed under [`DATA_RECORD_KEY`].
///
/// `tube_id` is a signed integer (0 = session, -1 = dummy, else a live
/// tube); `packet_idx` is the sender's per-tube send index.
pub fn encode(tube_id: TubeId, packet_idx: u64, payload: &[u8]) -> Vec<u8> {
	let mut out = format!("{}:{}:", tube_id, packet_idx);
	base64::encode_config_buf(payload, base64::STANDARD, &mut out);
	out.into_bytes()
}

/// Decode a frame. Splits on `:` with a limit of 2 so that base64 payload
/// bytes (which never contain `:`, but are not otherwise constrained) are
/// never truncated by an inner delimiter match.
pub fn decode(frame: &[u8]) -> Result<Packet, DecodeError> {
	let text = std::str::from_utf8(frame).map_err(|_| DecodeError::MissingDelimiters)?;
	let mut parts = text.splitn(3, ':');
	let tube_id_str = parts.next().ok_or(DecodeError::MissingDelimiters)?;
	let packet_idx_str = parts.next().ok_or(DecodeError::MissingDelimiters)?;
	let payload_str = parts.next().ok_or(DecodeError::MissingDelimiters)?;

	let tube_id: TubeId = tube_id_str.parse().map_err(|_| DecodeError::BadTubeId)?;
	let packet_idx: u64 = packet_idx_str.parse().map_err(|_| DecodeError::BadPacketIdx)?;
	let payload = base64::decode(payload_str).map_err(|_| DecodeError::BadBase64)?;

	Ok(Packet { tube_id, packet_idx, payload })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_arbitrary_payloads() {
		let cases: &[&[u8]] = &[
			b"",
			b"hello world",
			b"has:colons:in:it",
			&[0u8, 1, 2, 255, 254, 0, 10, 13],
		];
		for payload in cases {
			for tube_id in [-1, 0, 1, 8742] {
				for idx in [0u64, 1, 999_999] {
					let frame = encode(tube_id, idx, payload);
					let decoded = decode(&frame).expect("decodes");
					assert_eq!(decoded, Packet { tube_id, packet_idx: idx, payload: payload.to_vec() });
				}
			}
		}
	}

	#[test]
	fn rejects_missing_delimiters() {
		assert_eq!(decode(b"nodelimiters").unwrap_err(), DecodeError::MissingDelimiters);
		assert_eq!(decode(b"1:2").unwrap_err(), DecodeError::MissingDelimiters);
	}

	#[test]
	fn rejects_non_integer_tube_id() {
		assert_eq!(decode(b"abc:1:aGk=").unwrap_err(), DecodeError::BadTubeId);
	}

	#[test]
	fn rejects_bad_base64_payload() {
		assert_eq!(decode(b"1:1:not base64!!").unwrap_err(), DecodeError::BadBase64);
	}

	#[test]
	fn session_and_dummy_ids_round_trip() {
		let frame = encode(SESSION_TUBE_ID, 0, b"0:ACTIVE");
		assert_eq!(decode(&frame).unwrap().tube_id, SESSION_TUBE_ID);

		let frame = encode(DUMMY_TUBE_ID, 0, b"1690000000.0");
		assert_eq!(decode(&frame).unwrap().tube_id, DUMMY_TUBE_ID);
	}
}
