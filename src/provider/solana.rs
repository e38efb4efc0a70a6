//! Solana provider backed by the sandboxed signer
//!
//! Transactions arrive in one of three encodings. They are all reduced to
//! the raw message bytes before signing, and those bytes cross the channel
//! as a tagged `Buffer` payload.

use crate::channel::ChannelBuffer;
use crate::signer::{ChainType, EmbeddedAccount, SignOptions, Signer, SolanaCluster};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Objects that can produce their own serialized message
pub trait SerializeMessage: Send + Sync {
    fn serialize_message(&self) -> Vec<u8>;
}

/// A transaction in any of the accepted encodings
#[derive(Clone)]
pub enum SolanaTransaction {
    /// Already-serialized message bytes
    Serialized(Vec<u8>),
    /// Object exposing a `messageBytes` field
    MessageBytes { message_bytes: Vec<u8> },
    /// Object exposing a `serializeMessage()` accessor
    Accessor(Arc<dyn SerializeMessage>),
}

impl SolanaTransaction {
    /// Normalize to the byte representation the signer signs
    pub fn message_bytes(&self) -> Vec<u8> {
        match self {
            SolanaTransaction::Serialized(bytes) => bytes.clone(),
            SolanaTransaction::MessageBytes { message_bytes } => message_bytes.clone(),
            SolanaTransaction::Accessor(message) => message.serialize_message(),
        }
    }
}

impl From<Vec<u8>> for SolanaTransaction {
    fn from(bytes: Vec<u8>) -> Self {
        SolanaTransaction::Serialized(bytes)
    }
}

impl std::fmt::Debug for SolanaTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolanaTransaction::Serialized(bytes) => {
                f.debug_tuple("Serialized").field(&bytes.len()).finish()
            }
            SolanaTransaction::MessageBytes { message_bytes } => f
                .debug_struct("MessageBytes")
                .field("len", &message_bytes.len())
                .finish(),
            SolanaTransaction::Accessor(_) => f.write_str("Accessor"),
        }
    }
}

/// Signed transaction: the message that was signed and its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub message: Vec<u8>,
    pub signature: String,
}

/// Request form mirroring the two signing methods
#[derive(Debug, Clone)]
pub enum SolanaRequest {
    SignMessage { message: Vec<u8> },
    SignTransaction { transaction: SolanaTransaction },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolanaResponse {
    SignMessage { signature: String },
    SignTransaction(SignedTransaction),
}

/// Solana provider for one account on one cluster
#[derive(Clone)]
pub struct SolanaProvider {
    signer: Arc<dyn Signer>,
    account: EmbeddedAccount,
    cluster: SolanaCluster,
}

impl SolanaProvider {
    pub fn new(signer: Arc<dyn Signer>, account: EmbeddedAccount, cluster: SolanaCluster) -> Self {
        Self {
            signer,
            account,
            cluster,
        }
    }

    pub fn address(&self) -> &str {
        &self.account.address
    }

    pub fn cluster(&self) -> SolanaCluster {
        self.cluster
    }

    fn sign_options(&self) -> SignOptions {
        SignOptions {
            address: self.account.address.clone(),
            chain_type: ChainType::Solana,
            cluster: Some(self.cluster),
        }
    }

    pub async fn sign_message(&self, message: &[u8]) -> Result<String> {
        self.signer
            .sign_message(ChannelBuffer::from_bytes(message), self.sign_options())
            .await
    }

    pub async fn sign_transaction(&self, transaction: &SolanaTransaction) -> Result<SignedTransaction> {
        let message = transaction.message_bytes();
        let signature = self
            .signer
            .sign_message(ChannelBuffer::from_bytes(message.clone()), self.sign_options())
            .await?;
        Ok(SignedTransaction { message, signature })
    }

    /// Sign one after another, preserving input order
    pub async fn sign_all_transactions(
        &self,
        transactions: &[SolanaTransaction],
    ) -> Result<Vec<SignedTransaction>> {
        let mut signed = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            signed.push(self.sign_transaction(transaction).await?);
        }
        Ok(signed)
    }

    pub async fn request(&self, request: SolanaRequest) -> Result<SolanaResponse> {
        match request {
            SolanaRequest::SignMessage { message } => {
                let signature = self.sign_message(&message).await?;
                Ok(SolanaResponse::SignMessage { signature })
            }
            SolanaRequest::SignTransaction { transaction } => {
                let signed = self.sign_transaction(&transaction).await?;
                Ok(SolanaResponse::SignTransaction(signed))
            }
        }
    }
}

impl std::fmt::Debug for SolanaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaProvider")
            .field("address", &self.account.address)
            .field("cluster", &self.cluster)
            .finish()
    }
}
