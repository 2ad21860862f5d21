//! Clearing house SDK
//!
//! Client side orchestration for the clearing house perpetual futures program: program address
//! derivation, a locally mirrored view of program accounts and instruction assembly/submission.

use std::sync::Arc;

use log::debug;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{instruction::Instruction, signature::Signature};
use tokio::sync::broadcast;

pub mod account_provider;
pub mod account_subscriber;
pub mod accounts;
pub mod addresses;
pub mod config;
pub mod constants;
pub mod instruction_builder;
pub mod instructions;
pub mod transaction;
pub mod types;
pub mod utils;
#[cfg(test)]
mod test_utils;

pub use account_provider::{
    AccountProvider, FeedAccountProvider, RpcAccountProvider, WsAccountProvider,
};
pub use account_subscriber::{AccountEvent, AccountSubscriber};
pub use addresses::{AccountKind, AddressRegistry, DerivedAddress};
pub use config::{ClearingHouseConfig, FeedMode};
pub use instruction_builder::InstructionBuilder;
pub use solana_sdk::pubkey::Pubkey;
pub use transaction::{InstructionGroup, TransactionCoordinator, TransactionSender, Wallet};
use types::*;

anchor_lang::declare_id!("dammHkt7jmytvbS3nHTxQNEcP59aE57nxwV21YdqEDN");

const LOG_TARGET: &str = "client";

/// Operations submitted through [`ClearingHouse`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClearingHouseAction {
    InitializeUserAccount,
    InitializeUserAccountAndDepositCollateral,
    DepositCollateral,
    WithdrawCollateral,
    OpenPosition,
    ClosePosition,
    PlaceOrder,
    CancelOrder,
    CancelOrderByUserId,
    CancelAllOrders,
    CancelOrdersByMarketAndSide,
    FillOrder,
    PlaceAndFillOrder,
    Liquidate,
    UpdateFundingRate,
    SettleFundingPayment,
}

/// Emitted once the transaction of an action was accepted
#[derive(Clone, Debug, PartialEq)]
pub struct ClearingHouseEvent {
    pub action: ClearingHouseAction,
    pub signature: Signature,
}

/// Clearing house client API
///
/// Reads come from the local account mirror, writes are assembled from mirrored snapshots and
/// submitted as one transaction per operation. Submitting never touches the mirror, it catches
/// up through its feeds.
pub struct ClearingHouse<P: AccountProvider, S: TransactionSender> {
    registry: Arc<AddressRegistry>,
    mirror: AccountSubscriber<P>,
    coordinator: TransactionCoordinator<S>,
    events: broadcast::Sender<ClearingHouseEvent>,
}

impl ClearingHouse<FeedAccountProvider, Arc<RpcClient>> {
    /// Connect to the cluster described by `config`
    pub async fn connect(config: &ClearingHouseConfig, wallet: Wallet) -> SdkResult<Self> {
        let rpc_client = Arc::new(config.rpc_client());
        let provider = config.account_provider(Arc::clone(&rpc_client)).await?;
        Ok(Self::new(config, provider, rpc_client, wallet))
    }
}

impl<P: AccountProvider, S: TransactionSender> ClearingHouse<P, S> {
    pub fn new(config: &ClearingHouseConfig, provider: P, sender: S, wallet: Wallet) -> Self {
        let registry = Arc::new(AddressRegistry::new(config.program_id));
        let mirror = AccountSubscriber::new(
            provider,
            Arc::clone(&registry),
            wallet.authority(),
            config.market_indexes.clone(),
            config.event_capacity,
        );
        let (events, _) = broadcast::channel(config.event_capacity);

        Self {
            registry,
            mirror,
            coordinator: TransactionCoordinator::new(sender, wallet, config.priority_fee),
            events,
        }
    }

    /// Subscribe the mirror to the base accounts plus `kinds`
    ///
    /// Returns false when nothing new was subscribed, fails `SubscribeCancelled` if an
    /// `unsubscribe` interrupted it
    pub async fn subscribe(&self, kinds: &[SubscriptionKind]) -> SdkResult<bool> {
        self.mirror.subscribe(kinds).await
    }

    pub fn unsubscribe(&self) {
        self.mirror.unsubscribe()
    }

    /// Force a refetch of every mirrored account
    pub async fn fetch(&self) -> SdkResult<()> {
        self.mirror.fetch().await
    }

    /// The account mirror backing this client
    pub fn mirror(&self) -> &AccountSubscriber<P> {
        &self.mirror
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Receive an event for every accepted action
    pub fn events(&self) -> broadcast::Receiver<ClearingHouseEvent> {
        self.events.subscribe()
    }

    /// Receive mirrored account changes
    pub fn account_events(&self) -> broadcast::Receiver<AccountEvent> {
        self.mirror.events()
    }

    pub fn authority(&self) -> Pubkey {
        self.coordinator.wallet().authority()
    }

    pub fn user_account_pubkey(&self) -> SdkResult<Pubkey> {
        self.registry.user(&self.authority())
    }

    pub fn user_positions_pubkey(&self) -> SdkResult<Pubkey> {
        self.registry.user_positions(&self.authority())
    }

    pub fn user_orders_pubkey(&self) -> SdkResult<Pubkey> {
        self.registry.user_orders(&self.authority())
    }

    /// Get an open order by its program assigned id
    pub fn get_order_by_id(&self, order_id: u128) -> SdkResult<Option<Order>> {
        let orders = self.mirror.user_orders()?;
        Ok(orders.data.get_order(order_id).copied())
    }

    /// Get an open order by its user assigned id
    pub fn get_order_by_user_id(&self, user_order_id: u8) -> SdkResult<Option<Order>> {
        let orders = self.mirror.user_orders()?;
        Ok(orders
            .data
            .get_order_by_user_order_id(user_order_id)
            .copied())
    }

    /// Get all open orders
    pub fn all_orders(&self) -> SdkResult<Vec<Order>> {
        let orders = self.mirror.user_orders()?;
        Ok(orders.data.open_orders().copied().collect())
    }

    /// Get all non-available position slots
    pub fn all_positions(&self) -> SdkResult<Vec<MarketPosition>> {
        let positions = self.mirror.user_positions()?;
        Ok(positions.data.active().copied().collect())
    }

    /// Get the position in `market_index`, if any
    pub fn position(&self, market_index: u64) -> SdkResult<Option<MarketPosition>> {
        let positions = self.mirror.user_positions()?;
        Ok(positions.data.get_position(market_index).copied())
    }

    /// Assemble with a builder over the current state and market snapshots
    fn build<T>(&self, f: impl FnOnce(&InstructionBuilder<'_>) -> SdkResult<T>) -> SdkResult<T> {
        let state = self.mirror.state()?.data;
        let markets: Vec<Market> = self
            .mirror
            .markets()?
            .into_iter()
            .map(|market| market.data)
            .collect();

        f(&InstructionBuilder::new(
            &self.registry,
            &state,
            &markets,
            self.authority(),
        ))
    }

    async fn send(
        &self,
        action: ClearingHouseAction,
        ixs: impl Into<InstructionGroup>,
    ) -> SdkResult<Signature> {
        let signature = self.coordinator.send(ixs.into()).await?;
        debug!(target: LOG_TARGET, "{action:?}: {signature}");
        // no receivers is fine
        let _ = self.events.send(ClearingHouseEvent { action, signature });

        Ok(signature)
    }

    /// Create the user, user positions and user orders accounts of the wallet authority
    pub async fn initialize_user_account(
        &self,
        whitelist_token: Option<Pubkey>,
    ) -> SdkResult<Signature> {
        let ixs = self.build(|builder| builder.initialize_user(whitelist_token))?;
        self.send(ClearingHouseAction::InitializeUserAccount, ixs)
            .await
    }

    /// Create the user accounts and deposit collateral in a single transaction
    pub async fn initialize_user_account_and_deposit_collateral(
        &self,
        amount: u64,
        user_collateral_account: Pubkey,
        whitelist_token: Option<Pubkey>,
    ) -> SdkResult<Signature> {
        let ixs = self.build(|builder| {
            let mut ixs = builder.initialize_user(whitelist_token)?;
            ixs.push(builder.deposit_collateral(amount, user_collateral_account)?);
            Ok(ixs)
        })?;
        self.send(
            ClearingHouseAction::InitializeUserAccountAndDepositCollateral,
            ixs,
        )
        .await
    }

    pub async fn deposit_collateral(
        &self,
        amount: u64,
        user_collateral_account: Pubkey,
    ) -> SdkResult<Signature> {
        let ix = self.build(|builder| builder.deposit_collateral(amount, user_collateral_account))?;
        self.send(ClearingHouseAction::DepositCollateral, ix).await
    }

    pub async fn withdraw_collateral(
        &self,
        amount: u64,
        user_collateral_account: Pubkey,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let ix = self.build(|builder| {
            builder.withdraw_collateral(amount, user_collateral_account, &positions)
        })?;
        self.send(ClearingHouseAction::WithdrawCollateral, ix).await
    }

    /// Open (or increase) a position with `quote_asset_amount` of quote
    ///
    /// `limit_price` of 0 means no limit
    pub async fn open_position(
        &self,
        direction: PositionDirection,
        quote_asset_amount: u128,
        market_index: u64,
        limit_price: Option<u128>,
        optional: OptionalAccounts,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let ix = self.build(|builder| {
            builder.open_position(
                direction,
                quote_asset_amount,
                market_index,
                limit_price.unwrap_or_default(),
                optional,
                &positions,
            )
        })?;
        self.send(ClearingHouseAction::OpenPosition, ix).await
    }

    pub async fn close_position(
        &self,
        market_index: u64,
        optional: OptionalAccounts,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let ix = self.build(|builder| builder.close_position(market_index, optional, &positions))?;
        self.send(ClearingHouseAction::ClosePosition, ix).await
    }

    pub async fn place_order(
        &self,
        params: OrderParams,
        optional: OptionalAccounts,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.place_order(params, optional, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::PlaceOrder, ix).await
    }

    pub async fn cancel_order(&self, order_id: u128) -> SdkResult<Signature> {
        let orders = self.mirror.user_orders()?.data;
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.cancel_order(order_id, &orders, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::CancelOrder, ix).await
    }

    pub async fn cancel_order_by_user_id(&self, user_order_id: u8) -> SdkResult<Signature> {
        let orders = self.mirror.user_orders()?.data;
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.cancel_order_by_user_id(user_order_id, &orders, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::CancelOrderByUserId, ix)
            .await
    }

    /// Cancel every open order
    ///
    /// `best_effort` skips orders that fail to cancel instead of failing the transaction
    pub async fn cancel_all_orders(&self, best_effort: bool) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.cancel_all_orders(best_effort, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::CancelAllOrders, ix).await
    }

    pub async fn cancel_orders_by_market_and_side(
        &self,
        best_effort: bool,
        market_index: u64,
        direction: PositionDirection,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.cancel_orders_by_market_and_side(
                best_effort,
                market_index,
                direction,
                &positions,
                &order_state,
            )
        })?;
        self.send(ClearingHouseAction::CancelOrdersByMarketAndSide, ix)
            .await
    }

    /// Fill the open order `order_id` of the user owned by `user_authority`
    ///
    /// The target user's orders and positions are read fresh from the ledger
    pub async fn fill_order(&self, user_authority: Pubkey, order_id: u128) -> SdkResult<Signature> {
        let order_state = self.mirror.order_state()?.data;
        let orders = self.mirror.fetch_user_orders(&user_authority).await?.data;
        let positions = self
            .mirror
            .fetch_user_positions(&user_authority)
            .await?
            .data;
        let ix = self.build(|builder| {
            builder.fill_order(&user_authority, order_id, &orders, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::FillOrder, ix).await
    }

    pub async fn place_and_fill_order(
        &self,
        params: OrderParams,
        optional: OptionalAccounts,
    ) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let order_state = self.mirror.order_state()?.data;
        let ix = self.build(|builder| {
            builder.place_and_fill_order(params, optional, &positions, &order_state)
        })?;
        self.send(ClearingHouseAction::PlaceAndFillOrder, ix).await
    }

    /// Liquidate the user owned by `user_authority`, reading its positions fresh from the ledger
    pub async fn liquidate(&self, user_authority: Pubkey) -> SdkResult<Signature> {
        let positions = self
            .mirror
            .fetch_user_positions(&user_authority)
            .await?
            .data;
        let ix = self.build(|builder| builder.liquidate(&user_authority, &positions))?;
        self.send(ClearingHouseAction::Liquidate, ix).await
    }

    pub async fn update_funding_rate(&self, market_index: u64) -> SdkResult<Signature> {
        let ix = self.build(|builder| builder.update_funding_rate(market_index))?;
        self.send(ClearingHouseAction::UpdateFundingRate, ix).await
    }

    pub async fn settle_funding_payment(&self) -> SdkResult<Signature> {
        let positions = self.mirror.user_positions()?.data;
        let ix = self.build(|builder| builder.settle_funding_payment(&positions))?;
        self.send(ClearingHouseAction::SettleFundingPayment, ix)
            .await
    }

    /// Sign and submit arbitrary instructions as one transaction
    pub async fn send_instructions(&self, ixs: Vec<Instruction>) -> SdkResult<Signature> {
        self.coordinator.send(ixs.into()).await
    }
}
