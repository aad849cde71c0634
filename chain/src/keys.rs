// Copyright 2022 The CESS Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Controller identity. The seed is derived from the configured mnemonic
//! phrase; transaction signing itself stays behind the node RPC boundary,
//! the key pair here provides the controller account and signs
//! scheduler-level payloads.

use ed25519_dalek::{ExpandedSecretKey, PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use cess_core::AccountId;

use crate::error::Error;

/// Key material of the controller account.
pub struct ControllerKeys {
	secret: SecretKey,
	public: PublicKey,
}

impl ControllerKeys {
	/// Derive from the mnemonic phrase in the configuration.
	pub fn from_mnemonic(phrase: &str) -> Result<ControllerKeys, Error> {
		let trimmed = phrase.trim();
		if trimmed.is_empty() {
			return Err(Error::Rpc("empty controller mnemonic".to_string()));
		}
		let mut hasher = Sha256::new();
		hasher.update(trimmed.as_bytes());
		let seed = hasher.finalize();
		let secret = SecretKey::from_bytes(&seed)
			.map_err(|e| Error::Rpc(format!("controller key: {}", e)))?;
		let public = PublicKey::from(&secret);
		Ok(ControllerKeys { secret, public })
	}

	/// The controller account.
	pub fn account(&self) -> AccountId {
		AccountId(self.public.to_bytes())
	}

	/// The printable controller address, used for the data directory.
	pub fn address(&self) -> String {
		self.account().to_string()
	}

	/// Seed bytes for deriving the PoDR2 key set.
	pub fn podr2_seed(&self) -> Vec<u8> {
		let mut hasher = Sha256::new();
		hasher.update(b"cess-podr2");
		hasher.update(&self.secret.to_bytes());
		hasher.finalize().to_vec()
	}

	/// Sign a scheduler-level payload.
	pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
		let expanded: ExpandedSecretKey = (&self.secret).into();
		expanded.sign(msg, &self.public).to_bytes().to_vec()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ed25519_dalek::{Signature, Verifier};
	use std::convert::TryFrom;

	#[test]
	fn same_mnemonic_same_account() {
		let a = ControllerKeys::from_mnemonic("alpha beta gamma").unwrap();
		let b = ControllerKeys::from_mnemonic("alpha beta gamma").unwrap();
		assert_eq!(a.account(), b.account());
		assert_ne!(
			a.account(),
			ControllerKeys::from_mnemonic("other phrase").unwrap().account()
		);
	}

	#[test]
	fn signatures_verify_against_the_account() {
		let keys = ControllerKeys::from_mnemonic("alpha beta gamma").unwrap();
		let sig = keys.sign(b"payload");
		let public = PublicKey::from_bytes(keys.account().as_bytes()).unwrap();
		let sig = Signature::try_from(&sig[..]).unwrap();
		assert!(public.verify(b"payload", &sig).is_ok());
	}

	#[test]
	fn empty_mnemonic_is_rejected() {
		assert!(ControllerKeys::from_mnemonic("   ").is_err());
	}
}
