//! Ed25519 call signing. A wallet's address is its verifying key.

pub use ed25519_dalek::SigningKey;
use anyhow::{Context, Result};
use ed25519_dalek::{Signature, Signer, VerifyingKey};
use multidelegate_types::{Address, Call, DelegationInstruction};
use rand::rngs::OsRng;

pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn address_of(key: &SigningKey) -> Address {
    key.verifying_key().to_bytes()
}

pub fn sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    key.sign(message).to_bytes().to_vec()
}

/// Builds a call from `key`'s address at `nonce` and signs it.
pub fn signed_call(key: &SigningKey, nonce: u64, instruction: DelegationInstruction) -> Call {
    let mut call = Call {
        sender: address_of(key),
        nonce,
        instruction,
        signature: Vec::new(),
    };
    call.signature = sign(key, &call.signing_bytes());
    call
}

/// Strict verification: rejects small-order keys and non-canonical signatures.
pub fn verify_signature(signer: &Address, message: &[u8], signature: &[u8]) -> Result<()> {
    let key = VerifyingKey::from_bytes(signer).context("sender is not a valid ed25519 key")?;
    let signature = Signature::from_slice(signature).context("malformed signature")?;
    key.verify_strict(message, &signature)
        .context("signature does not match the call")
}

pub fn verify_call(call: &Call) -> Result<()> {
    verify_signature(&call.sender, &call.signing_bytes(), &call.signature)
}
