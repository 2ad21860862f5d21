//! In-memory collaborators for unit tests
use std::{collections::HashMap, sync::Arc};

use anchor_lang::AccountSerialize;
use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};
use tokio::sync::{mpsc, watch};

use crate::{
    account_provider::AccountProvider,
    transaction::TransactionSender,
    types::{AccountUpdate, SdkError, SdkResult},
};

/// Serialize an anchor account the way the ledger stores it
pub(crate) fn account_bytes<T: AccountSerialize>(account: &T) -> Vec<u8> {
    let mut data = Vec::new();
    account.try_serialize(&mut data).expect("serializes");
    data
}

#[derive(Default)]
struct MockLedger {
    accounts: HashMap<Pubkey, (Vec<u8>, u64)>,
    feeds: HashMap<Pubkey, Vec<mpsc::Sender<AccountUpdate>>>,
    read_gate: Option<watch::Receiver<bool>>,
}

/// Account provider over an in-memory ledger, clones share the ledger
#[derive(Clone, Default)]
pub(crate) struct MockAccountProvider {
    ledger: Arc<Mutex<MockLedger>>,
}

impl MockAccountProvider {
    /// Set the data `get_account` returns for `pubkey`
    pub fn set_account(&self, pubkey: Pubkey, data: Vec<u8>, slot: u64) {
        self.ledger.lock().accounts.insert(pubkey, (data, slot));
    }

    /// Set the account and push the change to every open feed of `pubkey`
    pub fn push_update(&self, pubkey: Pubkey, data: Vec<u8>, slot: u64) {
        let mut ledger = self.ledger.lock();
        ledger.accounts.insert(pubkey, (data.clone(), slot));
        if let Some(feeds) = ledger.feeds.get_mut(&pubkey) {
            feeds.retain(|feed| {
                feed.try_send(AccountUpdate {
                    pubkey,
                    data: data.clone(),
                    slot,
                })
                .is_ok()
            });
        }
    }

    /// Hold every `get_account` until `true` is sent on the returned gate
    pub fn gate_reads(&self) -> watch::Sender<bool> {
        let (gate, read_gate) = watch::channel(false);
        self.ledger.lock().read_gate = Some(read_gate);
        gate
    }

    /// Number of feeds currently open for `pubkey`
    pub fn open_feeds(&self, pubkey: &Pubkey) -> usize {
        self.ledger
            .lock()
            .feeds
            .get(pubkey)
            .map_or(0, |feeds| feeds.iter().filter(|f| !f.is_closed()).count())
    }
}

impl AccountProvider for MockAccountProvider {
    fn get_account(&self, account: Pubkey) -> BoxFuture<SdkResult<AccountUpdate>> {
        let ledger = Arc::clone(&self.ledger);
        let read_gate = ledger.lock().read_gate.clone();
        async move {
            if let Some(mut read_gate) = read_gate {
                loop {
                    let open = *read_gate.borrow_and_update();
                    if open || read_gate.changed().await.is_err() {
                        break;
                    }
                }
            }
            ledger
                .lock()
                .accounts
                .get(&account)
                .map(|(data, slot)| AccountUpdate {
                    pubkey: account,
                    data: data.clone(),
                    slot: *slot,
                })
                .ok_or(SdkError::AccountNotFound(account))
        }
        .boxed()
    }
    fn subscribe_account(
        &self,
        account: Pubkey,
    ) -> BoxFuture<SdkResult<mpsc::Receiver<AccountUpdate>>> {
        let (tx, rx) = mpsc::channel(32);
        self.ledger
            .lock()
            .feeds
            .entry(account)
            .or_default()
            .push(tx);
        async move { Ok(rx) }.boxed()
    }
}

#[derive(Default)]
struct SenderLog {
    sent: Vec<VersionedTransaction>,
}

/// Transaction sender recording every submitted transaction
#[derive(Clone, Default)]
pub(crate) struct MockSender {
    log: Arc<Mutex<SenderLog>>,
    fail: bool,
}

impl MockSender {
    /// A sender rejecting every submission
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.log.lock().sent.clone()
    }
}

impl TransactionSender for MockSender {
    fn latest_blockhash(&self) -> BoxFuture<SdkResult<Hash>> {
        async move { Ok(Hash::new_unique()) }.boxed()
    }
    fn send_transaction(&self, tx: VersionedTransaction) -> BoxFuture<SdkResult<Signature>> {
        let result = if self.fail {
            Err(ClientError::from(ClientErrorKind::Custom("rejected".to_string())).into())
        } else {
            let signature = tx.signatures[0];
            self.log.lock().sent.push(tx);
            Ok(signature)
        };
        async move { result }.boxed()
    }
}
