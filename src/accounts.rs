//! Clearing house program account layouts
//!
//! Every type here is an Anchor account: an 8 byte discriminator followed by the
//! borsh encoded fields. They are only ever decoded client side.
use anchor_lang::prelude::*;

use crate::constants::{MAX_ORDERS, MAX_POSITIONS};

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct State {
    pub admin: Pubkey,
    pub exchange_paused: bool,
    pub funding_paused: bool,
    pub admin_controls_prices: bool,
    pub collateral_mint: Pubkey,
    pub collateral_vault: Pubkey,
    pub collateral_vault_authority: Pubkey,
    pub collateral_vault_nonce: u8,
    pub deposit_history: Pubkey,
    pub trade_history: Pubkey,
    pub funding_payment_history: Pubkey,
    pub funding_rate_history: Pubkey,
    pub liquidation_history: Pubkey,
    pub curve_history: Pubkey,
    pub insurance_vault: Pubkey,
    pub insurance_vault_authority: Pubkey,
    pub insurance_vault_nonce: u8,
    // markets are one PDA each, indexed 0..markets_count
    pub markets_count: u64,
    pub whitelist_mint: Pubkey,
    pub discount_mint: Pubkey,
    pub max_deposit: u128,
    pub order_state: Pubkey,
    pub extended_curve_history: Pubkey,
}

impl State {
    /// Whether user creation is gated on holding the whitelist token
    pub fn is_whitelisted(&self) -> bool {
        self.whitelist_mint != Pubkey::default()
    }
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct OrderState {
    pub order_history: Pubkey,
    pub order_filler_reward_structure: OrderFillerRewardStructure,
    pub min_order_quote_asset_amount: u128, // minimum est. quote_asset_amount for place_order to succeed
    pub padding: [u128; 10],
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct OrderFillerRewardStructure {
    pub reward_numerator: u128,
    pub reward_denominator: u128,
    pub time_based_reward_lower_bound: u128,
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct Market {
    pub market_index: u64,
    pub initialized: bool,
    pub base_asset_amount_long: i128,
    pub base_asset_amount_short: i128,
    pub base_asset_amount: i128, // net market bias
    pub open_interest: u128,     // number of users in a position
    pub amm: Amm,
    pub margin_ratio_initial: u32,
    pub margin_ratio_partial: u32,
    pub margin_ratio_maintenance: u32,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum OracleSource {
    #[default]
    Pyth,
    Switchboard,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq)]
pub struct Amm {
    pub oracle: Pubkey,
    pub oracle_source: OracleSource,
    pub base_asset_reserve: u128,
    pub quote_asset_reserve: u128,
    pub cumulative_funding_rate_long: i128,
    pub cumulative_funding_rate_short: i128,
    pub last_funding_rate: i128,
    pub last_funding_rate_ts: i64,
    pub funding_period: i64,
    pub last_mark_price_twap: u128,
    pub last_mark_price_twap_ts: i64,
    pub last_oracle_price_twap: i128,
    pub last_oracle_price_twap_ts: i64,
    pub sqrt_k: u128,
    pub peg_multiplier: u128,
    pub total_fee: u128,
    pub minimum_quote_asset_trade_size: u128,
    pub base_asset_amount_step_size: u128,
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct User {
    pub authority: Pubkey,
    pub collateral: u128,
    pub cumulative_deposits: i128,
    pub total_fee_paid: u128,
    pub total_token_discount: u128,
    pub total_referral_reward: u128,
    pub total_referee_discount: u128,
    pub positions: Pubkey,
    pub orders: Pubkey,
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct UserPositions {
    pub user: Pubkey,
    pub positions: [MarketPosition; MAX_POSITIONS],
}

impl UserPositions {
    /// Iterate the non-available slots in ascending slot order
    pub fn active(&self) -> impl Iterator<Item = &MarketPosition> {
        self.positions.iter().filter(|p| !p.is_available())
    }

    /// The non-available slot for `market_index`, if any
    pub fn get_position(&self, market_index: u64) -> Option<&MarketPosition> {
        self.active().find(|p| p.market_index == market_index)
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct MarketPosition {
    pub market_index: u64,
    pub base_asset_amount: i128,
    pub quote_asset_amount: u128,
    pub last_cumulative_funding_rate: i128,
    pub last_funding_rate_ts: i64,
    pub open_orders: u128,
}

impl MarketPosition {
    pub fn is_available(&self) -> bool {
        !self.is_open_position() && !self.has_open_order()
    }

    pub fn is_open_position(&self) -> bool {
        self.base_asset_amount != 0
    }

    pub fn has_open_order(&self) -> bool {
        self.open_orders != 0
    }
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct UserOrders {
    pub user: Pubkey,
    pub orders: [Order; MAX_ORDERS],
}

impl UserOrders {
    /// Open orders in slot order
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status == OrderStatus::Open)
    }

    /// Find an open order by its program assigned id
    pub fn get_order(&self, order_id: u128) -> Option<&Order> {
        self.open_orders().find(|o| o.order_id == order_id)
    }

    /// Find an open order by its user assigned alias
    ///
    /// alias `0` means "no alias" and never matches
    pub fn get_order_by_user_order_id(&self, user_order_id: u8) -> Option<&Order> {
        if user_order_id == 0 {
            return None;
        }
        self.open_orders()
            .find(|o| o.user_order_id == user_order_id)
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq)]
pub struct Order {
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub ts: i64,
    pub order_id: u128,
    pub user_order_id: u8,
    pub market_index: u64,
    pub price: u128,
    pub user_base_asset_amount: i128,
    pub quote_asset_amount: u128,
    pub base_asset_amount: u128,
    pub base_asset_amount_filled: u128,
    pub quote_asset_amount_filled: u128,
    pub fee: u128,
    pub direction: PositionDirection,
    pub reduce_only: bool,
    pub post_only: bool,
    pub immediate_or_cancel: bool,
    pub discount_tier: OrderDiscountTier,
    pub trigger_price: u128,
    pub trigger_condition: OrderTriggerCondition,
    pub referrer: Pubkey,
    pub oracle_price_offset: i128,
}

impl Order {
    /// Whether the order names a referrer that must be passed along when filling
    pub fn has_referrer(&self) -> bool {
        self.referrer != Pubkey::default()
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    Init,
    Open,
    Filled,
    Canceled,
    Expired,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum OrderType {
    Market,
    #[default]
    Limit,
    TriggerMarket,
    TriggerLimit,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum OrderDiscountTier {
    #[default]
    None,
    First,
    Second,
    Third,
    Fourth,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum OrderTriggerCondition {
    #[default]
    Above,
    Below,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum PositionDirection {
    #[default]
    Long,
    Short,
}

#[cfg(test)]
mod tests {
    use anchor_lang::{AccountDeserialize, AccountSerialize, Discriminator};
    use solana_sdk::hash::hash;

    use super::*;

    fn sighash(name: &str) -> [u8; 8] {
        let mut disc = [0_u8; 8];
        disc.copy_from_slice(&hash(format!("account:{name}").as_bytes()).to_bytes()[..8]);
        disc
    }

    #[test]
    fn discriminators_match_account_names() {
        assert_eq!(State::discriminator(), sighash("State"));
        assert_eq!(Market::discriminator(), sighash("Market"));
        assert_eq!(User::discriminator(), sighash("User"));
        assert_eq!(UserPositions::discriminator(), sighash("UserPositions"));
        assert_eq!(UserOrders::discriminator(), sighash("UserOrders"));
        assert_eq!(OrderState::discriminator(), sighash("OrderState"));
    }

    #[test]
    fn position_availability() {
        let mut position = MarketPosition::default();
        assert!(position.is_available());

        position.open_orders = 1;
        assert!(!position.is_available());
        assert!(position.has_open_order());

        position.open_orders = 0;
        position.base_asset_amount = -5;
        assert!(!position.is_available());
        assert!(position.is_open_position());
    }

    #[test]
    fn order_lookups_only_see_open_orders() {
        let mut orders = UserOrders::default();
        orders.orders[0] = Order {
            status: OrderStatus::Filled,
            order_id: 1,
            user_order_id: 7,
            ..Default::default()
        };
        orders.orders[3] = Order {
            status: OrderStatus::Open,
            order_id: 2,
            user_order_id: 7,
            ..Default::default()
        };

        assert!(orders.get_order(1).is_none());
        assert_eq!(orders.get_order(2).map(|o| o.order_id), Some(2));
        assert_eq!(
            orders.get_order_by_user_order_id(7).map(|o| o.order_id),
            Some(2)
        );
        // empty slots carry alias 0
        assert!(orders.get_order_by_user_order_id(0).is_none());
    }

    #[test]
    fn order_state_layout() {
        let order_state = OrderState {
            order_history: Pubkey::new_unique(),
            order_filler_reward_structure: OrderFillerRewardStructure {
                reward_numerator: 1,
                reward_denominator: 10,
                time_based_reward_lower_bound: 10_000,
            },
            min_order_quote_asset_amount: 500_000,
            ..Default::default()
        };
        let mut data = Vec::new();
        order_state.try_serialize(&mut data).unwrap();
        // discriminator, history key, reward structure, min amount, padding
        assert_eq!(data.len(), 8 + 32 + 48 + 16 + 160);
        assert_eq!(&data[8..40], order_state.order_history.as_ref());
        assert_eq!(
            OrderState::try_deserialize(&mut data.as_slice()).unwrap(),
            order_state
        );
    }

    #[test]
    fn account_bytes_decode() {
        let mut positions = UserPositions::default();
        positions.positions[2] = MarketPosition {
            market_index: 4,
            base_asset_amount: 100,
            ..Default::default()
        };
        let mut data = Vec::new();
        positions.try_serialize(&mut data).unwrap();

        let decoded = UserPositions::try_deserialize(&mut data.as_slice()).unwrap();
        assert_eq!(decoded, positions);
        assert!(User::try_deserialize(&mut data.as_slice()).is_err());
    }
}
