//! Chain-specific provider facades handed to application code

mod ethereum;
mod solana;

pub use ethereum::{EthereumProvider, EventHandler, ProviderEvent};
pub use solana::{
    SerializeMessage, SignedTransaction, SolanaProvider, SolanaRequest, SolanaResponse,
    SolanaTransaction,
};
