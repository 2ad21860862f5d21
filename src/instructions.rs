//! Clearing house instruction wire types
//!
//! `instruction` holds the argument payloads (anchor encoded: 8 byte sighash ++ borsh args),
//! `context` holds the fixed positional accounts of each instruction.
use anchor_lang::{prelude::*, Discriminator, InstructionData};

use crate::accounts::{OrderTriggerCondition, OrderType, PositionDirection};

/// Flags telling the program which optional accounts trail the instruction's accounts
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct ManagePositionOptionalAccounts {
    pub discount_token: bool,
    pub referrer: bool,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct InitializeUserOptionalAccounts {
    pub whitelist_token: bool,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, Debug, PartialEq)]
pub struct OrderParams {
    pub order_type: OrderType,
    pub direction: PositionDirection,
    pub user_order_id: u8,
    pub quote_asset_amount: u128,
    pub base_asset_amount: u128,
    pub price: u128,
    pub market_index: u64,
    pub reduce_only: bool,
    pub post_only: bool,
    pub immediate_or_cancel: bool,
    pub trigger_price: u128,
    pub trigger_condition: OrderTriggerCondition,
    pub optional_accounts: ManagePositionOptionalAccounts,
    pub oracle_price_offset: i128,
}

/// Implements anchor `InstructionData` for an argument payload
macro_rules! instruction_data {
    ($($name:ident => $discriminator:expr),* $(,)?) => {
        $(
            impl Discriminator for $name {
                const DISCRIMINATOR: [u8; 8] = $discriminator;
            }
            impl InstructionData for $name {}
        )*
    };
}

pub mod instruction {
    use super::*;

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct InitializeUser {
        pub user_nonce: u8,
        pub user_positions_nonce: u8,
        pub optional_accounts: InitializeUserOptionalAccounts,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct InitializeUserOrders {
        pub user_orders_nonce: u8,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct DepositCollateral {
        pub amount: u64,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct WithdrawCollateral {
        pub amount: u64,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct OpenPosition {
        pub direction: PositionDirection,
        pub quote_asset_amount: u128,
        pub market_index: u64,
        pub limit_price: u128,
        pub optional_accounts: ManagePositionOptionalAccounts,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct ClosePosition {
        pub market_index: u64,
        pub optional_accounts: ManagePositionOptionalAccounts,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct PlaceOrder {
        pub params: OrderParams,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct CancelOrder {
        pub order_id: u128,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct CancelOrderByUserId {
        pub user_order_id: u8,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct CancelAllOrders {
        pub best_effort: bool,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct CancelOrdersByMarketAndSide {
        pub best_effort: bool,
        pub market_index_only: u64,
        pub direction_only: PositionDirection,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct FillOrder {
        pub order_id: u128,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct PlaceAndFillOrder {
        pub params: OrderParams,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct Liquidate {}

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct UpdateFundingRate {
        pub market_index: u64,
    }

    #[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq)]
    pub struct SettleFundingPayment {}

    // sha256("global:<snake_case_name>")[..8]
    instruction_data! {
        InitializeUser => [111, 17, 185, 250, 60, 122, 38, 254],
        InitializeUserOrders => [171, 168, 76, 252, 111, 52, 150, 37],
        DepositCollateral => [156, 131, 142, 116, 146, 247, 162, 120],
        WithdrawCollateral => [115, 135, 168, 106, 139, 214, 138, 150],
        OpenPosition => [135, 128, 47, 77, 15, 152, 240, 49],
        ClosePosition => [123, 134, 81, 0, 49, 68, 98, 98],
        PlaceOrder => [51, 194, 155, 175, 109, 130, 96, 106],
        CancelOrder => [95, 129, 237, 240, 8, 49, 223, 132],
        CancelOrderByUserId => [107, 211, 250, 133, 18, 37, 57, 100],
        CancelAllOrders => [196, 83, 243, 171, 17, 100, 160, 143],
        CancelOrdersByMarketAndSide => [134, 234, 22, 182, 178, 81, 15, 90],
        FillOrder => [232, 122, 115, 25, 199, 143, 136, 162],
        PlaceAndFillOrder => [103, 159, 124, 221, 15, 39, 128, 8],
        Liquidate => [223, 179, 226, 125, 48, 46, 39, 74],
        UpdateFundingRate => [201, 178, 116, 212, 166, 144, 72, 238],
        SettleFundingPayment => [222, 90, 202, 94, 28, 45, 115, 183],
    }
}

macro_rules! account_meta {
    ($key:expr, readonly) => {
        AccountMeta::new_readonly($key, false)
    };
    ($key:expr, writable) => {
        AccountMeta::new($key, false)
    };
    ($key:expr, signer) => {
        AccountMeta::new_readonly($key, true)
    };
    ($key:expr, payer) => {
        AccountMeta::new($key, true)
    };
}

/// Declares the fixed account list of an instruction, in program order
macro_rules! fixed_accounts {
    ($(
        $(#[$meta:meta])*
        $name:ident { $($field:ident: $access:ident),* $(,)? }
    )*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq)]
            pub struct $name {
                $(pub $field: Pubkey,)*
            }

            impl ToAccountMetas for $name {
                fn to_account_metas(&self, _is_signer: Option<bool>) -> Vec<AccountMeta> {
                    vec![$(account_meta!(self.$field, $access)),*]
                }
            }
        )*
    };
}

pub mod context {
    use super::*;

    fixed_accounts! {
        InitializeUser {
            user: writable,
            state: readonly,
            user_positions: writable,
            authority: payer,
            rent: readonly,
            system_program: readonly,
        }

        InitializeUserOrders {
            user: readonly,
            authority: payer,
            user_orders: writable,
            state: readonly,
            rent: readonly,
            system_program: readonly,
        }

        DepositCollateral {
            state: readonly,
            user: writable,
            authority: signer,
            collateral_vault: writable,
            user_collateral_account: writable,
            token_program: readonly,
            user_positions: writable,
            funding_payment_history: writable,
            deposit_history: writable,
        }

        WithdrawCollateral {
            state: readonly,
            user: writable,
            authority: signer,
            collateral_vault: writable,
            collateral_vault_authority: readonly,
            insurance_vault: writable,
            insurance_vault_authority: readonly,
            user_collateral_account: writable,
            token_program: readonly,
            user_positions: writable,
            funding_payment_history: writable,
            deposit_history: writable,
        }

        /// Shared by open and close position
        ManagePosition {
            state: readonly,
            user: writable,
            authority: signer,
            market: writable,
            oracle: readonly,
            user_positions: writable,
            trade_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
        }

        /// Shared by place order and both single order cancels
        ManageOrder {
            state: readonly,
            user: readonly,
            authority: signer,
            market: writable,
            oracle: readonly,
            user_positions: writable,
            user_orders: writable,
            order_state: readonly,
            order_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
        }

        CancelAllOrders {
            state: readonly,
            user: readonly,
            authority: signer,
            user_positions: writable,
            user_orders: writable,
            order_state: readonly,
            order_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
        }

        CancelOrdersByMarketAndSide {
            state: readonly,
            user: readonly,
            authority: signer,
            market: writable,
            user_positions: writable,
            user_orders: writable,
            order_state: readonly,
            order_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
        }

        FillOrder {
            state: readonly,
            authority: signer,
            filler: writable,
            user: writable,
            market: writable,
            oracle: readonly,
            user_positions: writable,
            user_orders: writable,
            trade_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
            order_state: readonly,
            order_history: writable,
            extended_curve_history: writable,
        }

        PlaceAndFillOrder {
            state: readonly,
            user: writable,
            authority: signer,
            market: writable,
            oracle: readonly,
            user_positions: writable,
            user_orders: writable,
            trade_history: writable,
            funding_payment_history: writable,
            funding_rate_history: writable,
            order_state: readonly,
            order_history: writable,
            extended_curve_history: writable,
        }

        Liquidate {
            state: readonly,
            authority: signer,
            liquidator: writable,
            user: writable,
            collateral_vault: writable,
            collateral_vault_authority: readonly,
            insurance_vault: writable,
            insurance_vault_authority: readonly,
            token_program: readonly,
            user_positions: writable,
            trade_history: writable,
            liquidation_history: writable,
            funding_payment_history: writable,
        }

        UpdateFundingRate {
            state: readonly,
            market: writable,
            oracle: readonly,
            funding_rate_history: writable,
        }

        SettleFundingPayment {
            state: readonly,
            user: writable,
            user_positions: writable,
            funding_payment_history: writable,
        }
    }
}
