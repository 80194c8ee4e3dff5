use crate::instruction::DelegationInstruction;
use crate::primitives::Address;
use serde::{Deserialize, Serialize};

/// A signed request from `sender` against the multi-delegate state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Call {
    pub sender: Address,
    pub nonce: u64,
    pub instruction: DelegationInstruction,
    pub signature: Vec<u8>,
}

impl Call {
    pub fn signing_bytes(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct SigningCall<'a> {
            sender: &'a Address,
            nonce: u64,
            instruction: &'a DelegationInstruction,
        }

        let signing = SigningCall {
            sender: &self.sender,
            nonce: self.nonce,
            instruction: &self.instruction,
        };

        bincode::serialize(&signing).expect("call signing serialization")
    }

    pub fn id(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.signing_bytes());
        hasher.update(&self.signature);
        *hasher.finalize().as_bytes()
    }
}
