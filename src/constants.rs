//! Program constants shared by address derivation, account layouts and order building

pub use crate::ID as PROGRAM_ID;

pub const MARK_PRICE_PRECISION: u128 = 10_000_000_000; // expo = -10
pub const PEG_PRECISION: u128 = 1_000; // expo = -3
pub const AMM_RESERVE_PRECISION: u128 = MARK_PRICE_PRECISION * PEG_PRECISION; // expo = -13
pub const BASE_PRECISION: u128 = AMM_RESERVE_PRECISION;

/// Number of position slots in a `UserPositions` account
pub const MAX_POSITIONS: usize = 5;
/// Number of order slots in a `UserOrders` account
pub const MAX_ORDERS: usize = 32;

pub(crate) mod seeds {
    pub const STATE: &[u8] = b"clearing_house";
    pub const MARKET: &[u8] = b"market";
    pub const USER: &[u8] = b"user";
    pub const USER_POSITIONS: &[u8] = b"user_positions";
    pub const USER_ORDERS: &[u8] = b"user_orders";
    pub const ORDER_STATE: &[u8] = b"order_state";
}

/// spl-token program
pub const TOKEN_PROGRAM_ID: solana_sdk::pubkey::Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
