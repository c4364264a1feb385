// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Loader for the credentials file of §6: comma-separated rows of
//! `name,cert_path,macaroon_path,public_key,port`, one per node.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::CredentialsError;

/// One row of the credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
	pub name: String,
	pub cert_path: String,
	pub macaroon_path: String,
	pub public_key: String,
	pub port: u16,
}

/// All rows of the credentials file, keyed by node name.
pub struct Credentials(HashMap<String, NodeConfig>);

impl Credentials {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
		let mut reader = csv::ReaderBuilder::new()
			.has_headers(false)
			.from_path(path)?;

		let mut nodes = HashMap::new();
		for result in reader.records() {
			let record = result.map_err(|e| CredentialsError::MalformedRow(vec![e.to_string()]))?;
			if record.len() != 5 {
				return Err(CredentialsError::MalformedRow(
					record.iter().map(str::to_string).collect(),
				));
			}
			let port: u16 = record[4]
				.parse()
				.map_err(|_| CredentialsError::MalformedRow(record.iter().map(str::to_string).collect()))?;
			let node = NodeConfig {
				name: record[0].to_string(),
				cert_path: record[1].to_string(),
				macaroon_path: record[2].to_string(),
				public_key: record[3].to_string(),
				port,
			};
			nodes.insert(node.name.clone(), node);
		}
		Ok(Credentials(nodes))
	}

	pub fn get(&self, name: &str) -> Result<&NodeConfig, CredentialsError> {
		self.0.get(name).ok_or_else(|| CredentialsError::NotFound(name.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn parses_well_formed_rows() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "emiel,cert.pem,mac.bin,02abcd,10009").unwrap();
		writeln!(file, "carol,cert2.pem,mac2.bin,03beef,10010").unwrap();
		file.flush().unwrap();

		let creds = Credentials::load(file.path()).unwrap();
		let emiel = creds.get("emiel").unwrap();
		assert_eq!(emiel.public_key, "02abcd");
		assert_eq!(emiel.port, 10009);
		assert!(creds.get("nobody").is_err());
	}

	#[test]
	fn rejects_malformed_row() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "emiel,cert.pem,mac.bin,02abcd").unwrap(); // missing port field
		file.flush().unwrap();

		assert!(Credentials::load(file.path()).is_err());
	}
}
