//! Signing and submission of instruction groups
use std::sync::Arc;

use futures_util::{future::BoxFuture, FutureExt};
use log::{debug, warn};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{Message, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};

use crate::types::SdkResult;

const LOG_TARGET: &str = "tx";

/// Submits signed transactions to the ledger
pub trait TransactionSender: 'static + Send + Sync {
    /// Return a recent blockhash to bind a transaction to
    fn latest_blockhash(&self) -> BoxFuture<SdkResult<Hash>>;
    /// Submit `tx` returning its signature once accepted
    fn send_transaction(&self, tx: VersionedTransaction) -> BoxFuture<SdkResult<Signature>>;
}

impl TransactionSender for RpcClient {
    fn latest_blockhash(&self) -> BoxFuture<SdkResult<Hash>> {
        async move { Ok(self.get_latest_blockhash().await?) }.boxed()
    }
    fn send_transaction(&self, tx: VersionedTransaction) -> BoxFuture<SdkResult<Signature>> {
        async move { Ok(self.send_and_confirm_transaction(&tx).await?) }.boxed()
    }
}

impl<T: TransactionSender> TransactionSender for Arc<T> {
    fn latest_blockhash(&self) -> BoxFuture<SdkResult<Hash>> {
        self.as_ref().latest_blockhash()
    }
    fn send_transaction(&self, tx: VersionedTransaction) -> BoxFuture<SdkResult<Signature>> {
        self.as_ref().send_transaction(tx)
    }
}

/// Clearing house wallet
#[derive(Clone, Debug)]
pub struct Wallet {
    /// The signing keypair
    signer: Arc<Keypair>,
}

impl Wallet {
    pub fn new(authority: Keypair) -> Self {
        Self {
            signer: Arc::new(authority),
        }
    }
    /// Signs the given tx `message` returning the tx on success
    pub fn sign_tx(
        &self,
        mut message: VersionedMessage,
        recent_block_hash: Hash,
    ) -> SdkResult<VersionedTransaction> {
        message.set_recent_blockhash(recent_block_hash);
        VersionedTransaction::try_new(message, &[self.signer.as_ref()]).map_err(Into::into)
    }
    /// Return the wallet authority address
    pub fn authority(&self) -> Pubkey {
        self.signer.pubkey()
    }
}

/// Instructions submitted together in one atomic transaction
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstructionGroup {
    ixs: Vec<Instruction>,
}

impl InstructionGroup {
    pub fn new(ixs: Vec<Instruction>) -> Self {
        Self { ixs }
    }
}

impl From<Instruction> for InstructionGroup {
    fn from(ix: Instruction) -> Self {
        Self::new(vec![ix])
    }
}

impl From<Vec<Instruction>> for InstructionGroup {
    fn from(ixs: Vec<Instruction>) -> Self {
        Self::new(ixs)
    }
}

/// Turns instruction groups into signed, submitted transactions
pub struct TransactionCoordinator<S: TransactionSender> {
    sender: S,
    wallet: Wallet,
    /// compute unit price in µ-lamports
    priority_fee: Option<u64>,
}

impl<S: TransactionSender> TransactionCoordinator<S> {
    pub fn new(sender: S, wallet: Wallet, priority_fee: Option<u64>) -> Self {
        Self {
            sender,
            wallet,
            priority_fee,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Build the legacy message for `group`, paid for by the wallet authority
    pub fn build_message(&self, group: InstructionGroup) -> VersionedMessage {
        let mut ixs = Vec::with_capacity(group.ixs.len() + 1);
        if let Some(priority_fee) = self.priority_fee {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(priority_fee));
        }
        ixs.extend(group.ixs);

        VersionedMessage::Legacy(Message::new(&ixs, Some(&self.wallet.authority())))
    }

    /// Sign and submit `group` as one transaction
    ///
    /// Failures are not retried, any error is returned as `SdkError::SubmissionFailure`
    pub async fn send(&self, group: InstructionGroup) -> SdkResult<Signature> {
        self.send_impl(group)
            .await
            .map_err(|err| {
                warn!(target: LOG_TARGET, "submission failed: {err}");
                err.into_submission_failure()
            })
    }

    async fn send_impl(&self, group: InstructionGroup) -> SdkResult<Signature> {
        let message = self.build_message(group);
        let recent_block_hash = self.sender.latest_blockhash().await?;
        let tx = self.wallet.sign_tx(message, recent_block_hash)?;
        let signature = self.sender.send_transaction(tx).await?;
        debug!(target: LOG_TARGET, "sent tx: {signature}");

        Ok(signature)
    }
}
