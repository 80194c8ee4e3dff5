pub mod allocation;
pub mod call;
pub mod error;
pub mod instruction;
pub mod primitives;
pub mod state;

pub use allocation::{AllocationEntry, TransferInstruction};
pub use call::Call;
pub use error::{AssetError, DelegationError, Side};
pub use instruction::DelegationInstruction;
pub use primitives::{Address, Amount, AssetId, DelegateId, ZERO_ADDRESS};
pub use state::{AccountState, ProcessorConfig, SettlementMode};
