// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Fresh preimage/hash pairs for invoice-free keysend settlement. Each pair
//! is single-use: reusing a preimage across two payments lets the carrier
//! reject the second as a duplicate and lets an observer correlate them.

use bitcoin_hashes::{sha256, Hash};
use rand::RngCore;

/// 32 random bytes whose SHA-256 is committed to as the payment hash.
#[derive(Clone, PartialEq, Eq)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
	pub fn hash(&self) -> sha256::Hash {
		sha256::Hash::hash(&self.0)
	}
}

/// An infinite, non-restartable source of single-use preimage/hash pairs.
pub struct Crypt;

impl Crypt {
	pub fn new() -> Self {
		Crypt
	}

	/// A fresh pair per call. Never returns `None`.
	pub fn next_pair(&self) -> (Preimage, sha256::Hash) {
		let mut bytes = [0u8; 32];
		rand::rngs::OsRng.fill_bytes(&mut bytes);
		let preimage = Preimage(bytes);
		let hash = preimage.hash();
		(preimage, hash)
	}
}

impl Default for Crypt {
	fn default() -> Self {
		Self::new()
	}
}

impl Iterator for Crypt {
	type Item = (Preimage, sha256::Hash);

	fn next(&mut self) -> Option<Self::Item> {
		Some(self.next_pair())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_matches_sha256_of_preimage() {
		let crypt = Crypt::new();
		let (preimage, hash) = crypt.next_pair();
		assert_eq!(hash, sha256::Hash::hash(&preimage.0));
	}

	#[test]
	fn consecutive_pairs_never_reuse_a_preimage() {
		let crypt = Crypt::new();
		let mut seen = std::collections::HashSet::new();
		for _ in 0..1000 {
			let (preimage, _) = crypt.next_pair();
			assert!(seen.insert(preimage.0), "preimage reused across calls");
		}
	}
}
