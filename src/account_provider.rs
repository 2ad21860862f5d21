//! Ledger read collaborators: one-shot account reads and per account change feeds
use std::{sync::Arc, time::Duration};

use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use log::{debug, warn};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::{
        pubsub_client::{PubsubClient, PubsubClientError},
        rpc_client::RpcClient,
    },
    rpc_config::RpcAccountInfoConfig,
};
use solana_sdk::{
    account::{Account, AccountSharedData},
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
};
use tokio::{
    select,
    sync::{mpsc, oneshot},
};

use crate::types::{AccountUpdate, SdkError, SdkResult};

const LOG_TARGET: &str = "provider";
/// Buffered updates per feed before the feed task waits on the consumer
const FEED_BUFFER: usize = 32;

/// Provides solana account fetching and change feed API
pub trait AccountProvider: 'static + Send + Sync {
    /// Return the current data of `account` with the slot it was read at
    fn get_account(&self, account: Pubkey) -> BoxFuture<SdkResult<AccountUpdate>>;
    /// Open a change feed for `account`
    ///
    /// The feed runs until the returned receiver is dropped
    fn subscribe_account(
        &self,
        account: Pubkey,
    ) -> BoxFuture<SdkResult<mpsc::Receiver<AccountUpdate>>>;
}

async fn fetch_account(
    client: &RpcClient,
    account: Pubkey,
    commitment: CommitmentConfig,
) -> SdkResult<AccountUpdate> {
    let response = client
        .get_account_with_commitment(&account, commitment)
        .await?;
    let data = response
        .value
        .ok_or(SdkError::AccountNotFound(account))?
        .data;

    Ok(AccountUpdate {
        pubkey: account,
        data,
        slot: response.context.slot,
    })
}

/// Account provider that polls RPC for changes
#[derive(Clone)]
pub struct RpcAccountProvider {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl RpcAccountProvider {
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(
            Arc::new(RpcClient::new(endpoint.to_string())),
            CommitmentConfig::confirmed(),
            Duration::from_secs(15),
        )
    }
    pub fn with_client(
        client: Arc<RpcClient>,
        commitment: CommitmentConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            commitment,
            poll_interval,
        }
    }
    async fn subscribe_account_impl(
        &self,
        account: Pubkey,
    ) -> SdkResult<mpsc::Receiver<AccountUpdate>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let client = Arc::clone(&self.client);
        let commitment = self.commitment;
        let period = self.poll_interval;

        tokio::spawn(async move {
            let mut poll_interval = tokio::time::interval(period);
            let _ = poll_interval.tick().await; // immediate first tick, caller holds the initial read
            let mut last_slot = 0;
            loop {
                select! {
                    _ = tx.closed() => break,
                    _ = poll_interval.tick() => {
                        match fetch_account(&client, account, commitment).await {
                            Ok(update) if update.slot > last_slot => {
                                last_slot = update.slot;
                                if tx.send(update).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => (),
                            Err(err) => warn!(target: LOG_TARGET, "poll {account} failed: {err:?}"),
                        }
                    }
                }
            }
            debug!(target: LOG_TARGET, "poll feed closed: {account}");
        });

        Ok(rx)
    }
}

impl AccountProvider for RpcAccountProvider {
    fn get_account(&self, account: Pubkey) -> BoxFuture<SdkResult<AccountUpdate>> {
        fetch_account(&self.client, account, self.commitment).boxed()
    }
    fn subscribe_account(
        &self,
        account: Pubkey,
    ) -> BoxFuture<SdkResult<mpsc::Receiver<AccountUpdate>>> {
        self.subscribe_account_impl(account).boxed()
    }
}

/// Account provider using websocket subscriptions with a periodic RPC poll backstop
#[derive(Clone)]
pub struct WsAccountProvider {
    rpc_client: Arc<RpcClient>,
    ws_client: Arc<PubsubClient>,
    commitment: CommitmentConfig,
    poll_interval: Duration,
}

impl WsAccountProvider {
    /// Create a new WsAccountProvider given separate http(s) and ws(s) endpoints
    pub async fn new(
        rpc_client: Arc<RpcClient>,
        ws_url: &str,
        commitment: CommitmentConfig,
        poll_interval: Duration,
    ) -> SdkResult<Self> {
        let ws_client = PubsubClient::new(ws_url).await?;

        Ok(Self {
            rpc_client,
            ws_client: Arc::new(ws_client),
            commitment,
            poll_interval,
        })
    }
    fn rpc_config(&self) -> RpcAccountInfoConfig {
        RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64Zstd),
            data_slice: None,
            commitment: Some(self.commitment),
            min_context_slot: None,
        }
    }
    /// Subscribe to account updates via web-socket and polling
    ///
    /// Resolves once the websocket subscription is confirmed or has failed
    async fn subscribe_account_impl(
        &self,
        account: Pubkey,
    ) -> SdkResult<mpsc::Receiver<AccountUpdate>> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let (subscribed_tx, subscribed_rx) = oneshot::channel();
        let ws_client = Arc::clone(&self.ws_client);
        let rpc_client = Arc::clone(&self.rpc_client);
        let commitment = self.commitment;
        let config = self.rpc_config();
        let period = self.poll_interval;

        tokio::spawn(async move {
            let (mut account_stream, unsubscribe) =
                match ws_client.account_subscribe(&account, Some(config)).await {
                    Ok(subscription) => {
                        let _ = subscribed_tx.send(Ok(()));
                        subscription
                    }
                    Err(err) => {
                        let _ = subscribed_tx.send(Err(err));
                        return;
                    }
                };

            let mut last_slot = 0;
            let mut poll_interval = tokio::time::interval(period);
            let _ = poll_interval.tick().await; // ignore, immediate first tick
            loop {
                let update = select! {
                    biased;
                    _ = tx.closed() => break,
                    response = account_stream.next() => {
                        let Some(response) = response else {
                            warn!(target: LOG_TARGET, "ws stream closed: {account}");
                            break;
                        };
                        match response.value.decode::<AccountSharedData>() {
                            Some(account_data) => AccountUpdate {
                                pubkey: account,
                                data: Account::from(account_data).data,
                                slot: response.context.slot,
                            },
                            None => {
                                warn!(target: LOG_TARGET, "undecodable ws update: {account}");
                                continue;
                            }
                        }
                    }
                    _ = poll_interval.tick() => {
                        match fetch_account(&rpc_client, account, commitment).await {
                            Ok(update) => update,
                            Err(err) => {
                                warn!(target: LOG_TARGET, "poll {account} failed: {err:?}");
                                continue;
                            }
                        }
                    }
                };

                // ws and poll race, only forward progress
                if update.slot <= last_slot {
                    continue;
                }
                last_slot = update.slot;
                if tx.send(update).await.is_err() {
                    break;
                }
            }

            unsubscribe().await;
            debug!(target: LOG_TARGET, "ws feed closed: {account}");
        });

        match subscribed_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(PubsubClientError::ConnectionClosed(format!(
                "subscribe task for {account} ended early"
            ))
            .into()),
        }
    }
}

impl AccountProvider for WsAccountProvider {
    fn get_account(&self, account: Pubkey) -> BoxFuture<SdkResult<AccountUpdate>> {
        fetch_account(&self.rpc_client, account, self.commitment).boxed()
    }
    fn subscribe_account(
        &self,
        account: Pubkey,
    ) -> BoxFuture<SdkResult<mpsc::Receiver<AccountUpdate>>> {
        self.subscribe_account_impl(account).boxed()
    }
}

/// Account provider chosen at runtime from configuration
#[derive(Clone)]
pub enum FeedAccountProvider {
    Rpc(RpcAccountProvider),
    Ws(WsAccountProvider),
}

impl AccountProvider for FeedAccountProvider {
    fn get_account(&self, account: Pubkey) -> BoxFuture<SdkResult<AccountUpdate>> {
        match self {
            Self::Rpc(provider) => provider.get_account(account),
            Self::Ws(provider) => provider.get_account(account),
        }
    }
    fn subscribe_account(
        &self,
        account: Pubkey,
    ) -> BoxFuture<SdkResult<mpsc::Receiver<AccountUpdate>>> {
        match self {
            Self::Rpc(provider) => provider.subscribe_account(account),
            Self::Ws(provider) => provider.subscribe_account(account),
        }
    }
}
