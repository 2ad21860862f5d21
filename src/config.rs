//! Client configuration
use std::{sync::Arc, time::Duration};

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::{
    account_provider::{FeedAccountProvider, RpcAccountProvider, WsAccountProvider},
    constants,
    types::SdkResult,
    utils::http_to_ws_url,
};

const LOCALNET_URL: &str = "http://127.0.0.1:8899";

/// How mirrored accounts are kept fresh
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FeedMode {
    /// websocket push, with a periodic poll backstop
    #[default]
    Websocket,
    /// RPC polling only
    Polling,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClearingHouseConfig {
    pub program_id: Pubkey,
    pub commitment: CommitmentConfig,
    pub rpc_http_url: String,
    pub rpc_ws_url: String,
    pub feed_mode: FeedMode,
    pub poll_interval: Duration,
    /// markets to mirror, `None` mirrors all of them
    pub market_indexes: Option<Vec<u64>>,
    /// capacity of the mirror and client event channels
    pub event_capacity: usize,
    /// compute unit price in µ-lamports attached to every transaction
    pub priority_fee: Option<u64>,
}

impl ClearingHouseConfig {
    pub fn builder() -> ClearingHouseConfigBuilder {
        ClearingHouseConfigBuilder::default()
    }

    pub fn rpc_client(&self) -> RpcClient {
        RpcClient::new_with_commitment(self.rpc_http_url.clone(), self.commitment)
    }

    /// Connect the account provider selected by `feed_mode`
    pub async fn account_provider(&self, client: Arc<RpcClient>) -> SdkResult<FeedAccountProvider> {
        Ok(match self.feed_mode {
            FeedMode::Polling => FeedAccountProvider::Rpc(RpcAccountProvider::with_client(
                client,
                self.commitment,
                self.poll_interval,
            )),
            FeedMode::Websocket => FeedAccountProvider::Ws(
                WsAccountProvider::new(
                    client,
                    &self.rpc_ws_url,
                    self.commitment,
                    self.poll_interval,
                )
                .await?,
            ),
        })
    }
}

impl Default for ClearingHouseConfig {
    fn default() -> Self {
        ClearingHouseConfigBuilder::default().build()
    }
}

pub struct ClearingHouseConfigBuilder {
    pub program_id: Pubkey,
    pub commitment: CommitmentConfig,
    pub rpc_http_url: Option<String>,
    pub rpc_ws_url: Option<String>,
    pub feed_mode: FeedMode,
    pub poll_interval: Duration,
    pub market_indexes: Option<Vec<u64>>,
    pub event_capacity: usize,
    pub priority_fee: Option<u64>,
}

impl Default for ClearingHouseConfigBuilder {
    fn default() -> Self {
        Self {
            program_id: constants::PROGRAM_ID,
            commitment: CommitmentConfig::confirmed(),
            rpc_http_url: None,
            rpc_ws_url: None,
            feed_mode: FeedMode::default(),
            poll_interval: Duration::from_secs(15),
            market_indexes: None,
            event_capacity: 256,
            priority_fee: None,
        }
    }
}

impl ClearingHouseConfigBuilder {
    pub fn program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = program_id;
        self
    }

    pub fn commitment(mut self, commitment: CommitmentConfig) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn rpc_http_url(mut self, url: String) -> Self {
        self.rpc_http_url = Some(url);
        self
    }

    /// defaults to the ws(s) form of the http url
    pub fn rpc_ws_url(mut self, url: String) -> Self {
        self.rpc_ws_url = Some(url);
        self
    }

    pub fn feed_mode(mut self, feed_mode: FeedMode) -> Self {
        self.feed_mode = feed_mode;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn market_indexes(mut self, market_indexes: Vec<u64>) -> Self {
        self.market_indexes = Some(market_indexes);
        self
    }

    pub fn event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    pub fn priority_fee(mut self, priority_fee: u64) -> Self {
        self.priority_fee = Some(priority_fee);
        self
    }

    pub fn build(self) -> ClearingHouseConfig {
        let rpc_http_url = self
            .rpc_http_url
            .unwrap_or_else(|| LOCALNET_URL.to_string());
        let rpc_ws_url = self
            .rpc_ws_url
            .unwrap_or_else(|| http_to_ws_url(&rpc_http_url));

        ClearingHouseConfig {
            program_id: self.program_id,
            commitment: self.commitment,
            rpc_http_url,
            rpc_ws_url,
            feed_mode: self.feed_mode,
            poll_interval: self.poll_interval,
            market_indexes: self.market_indexes,
            // broadcast channels reject a zero capacity
            event_capacity: self.event_capacity.max(1),
            priority_fee: self.priority_fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClearingHouseConfig::default();
        assert_eq!(config.program_id, constants::PROGRAM_ID);
        assert_eq!(config.commitment, CommitmentConfig::confirmed());
        assert_eq!(config.rpc_ws_url, "ws://127.0.0.1:8899");
        assert_eq!(config.feed_mode, FeedMode::Websocket);
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.event_capacity, 256);
        assert!(config.market_indexes.is_none());
        assert!(config.priority_fee.is_none());
    }

    #[test]
    fn ws_url_follows_http_url_unless_set() {
        let config = ClearingHouseConfig::builder()
            .rpc_http_url("https://api.devnet.solana.com".to_string())
            .build();
        assert_eq!(config.rpc_ws_url, "wss://api.devnet.solana.com");

        let config = ClearingHouseConfig::builder()
            .rpc_http_url("https://api.devnet.solana.com".to_string())
            .rpc_ws_url("wss://stream.example.com".to_string())
            .market_indexes(vec![0, 2])
            .priority_fee(10)
            .build();
        assert_eq!(config.rpc_ws_url, "wss://stream.example.com");
        assert_eq!(config.market_indexes, Some(vec![0, 2]));
        assert_eq!(config.priority_fee, Some(10));
    }

    #[tokio::test]
    async fn polling_mode_needs_no_connection() {
        let config = ClearingHouseConfig::builder()
            .feed_mode(FeedMode::Polling)
            .build();
        let provider = config
            .account_provider(Arc::new(config.rpc_client()))
            .await
            .unwrap();
        assert!(matches!(provider, FeedAccountProvider::Rpc(_)));
    }
}
