//! Assembles clearing house instructions from caller intent and mirrored snapshots
//!
//! The program reads every market a user holds a position in (for margin checks) from the
//! accounts trailing the fixed instruction accounts, so the remaining account list is built as:
//!
//! 1) markets of the user's non-available position slots, ascending slot order, excluding the
//!    instruction's primary market (which is passed writable among the fixed accounts)
//! 2) discount token (if any)
//! 3) referrer (if any)
use anchor_lang::{InstructionData, ToAccountMetas};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

use crate::{
    addresses::{AccountKind, AddressRegistry},
    constants::TOKEN_PROGRAM_ID,
    instructions::{context, instruction, InitializeUserOptionalAccounts},
    types::{
        Lookup, ManagePositionOptionalAccounts, Market, OptionalAccount, OptionalAccounts,
        OrderParams, OrderState, PositionDirection, SdkError, SdkResult, State, UserOrders,
        UserPositions,
    },
};

/// Markets the program must see besides `primary`: non-available slots in ascending slot order
///
/// Fails if a market occupies more than one slot
pub fn auxiliary_market_indexes(
    positions: &UserPositions,
    primary: Option<u64>,
) -> SdkResult<Vec<u64>> {
    let mut markets = Vec::<u64>::with_capacity(positions.positions.len());
    let mut primary_seen = false;
    for position in positions.active() {
        let market_index = position.market_index;
        if Some(market_index) == primary {
            if primary_seen {
                return Err(duplicate_market(market_index));
            }
            primary_seen = true;
            continue;
        }
        if markets.contains(&market_index) {
            return Err(duplicate_market(market_index));
        }
        markets.push(market_index);
    }

    Ok(markets)
}

fn duplicate_market(market_index: u64) -> SdkError {
    SdkError::AssemblyInvariantViolation(format!(
        "market {market_index} occupies more than one position slot"
    ))
}

/// Remaining metas for `optional` in program order: discount token, then referrer
fn optional_account_metas(optional: &OptionalAccounts) -> Vec<AccountMeta> {
    optional
        .discount_token()
        .map(|key| AccountMeta::new_readonly(key, false))
        .into_iter()
        .chain(optional.referrer().map(|key| AccountMeta::new(key, false)))
        .collect()
}

/// Check caller-set flags against the supplied keys, raising flags for supplied keys
fn reconcile_flags(
    mut flags: ManagePositionOptionalAccounts,
    optional: &OptionalAccounts,
) -> SdkResult<ManagePositionOptionalAccounts> {
    if flags.discount_token && optional.discount_token().is_none() {
        return Err(SdkError::MissingOptionalAccount(
            OptionalAccount::DiscountToken,
        ));
    }
    if flags.referrer && optional.referrer().is_none() {
        return Err(SdkError::MissingOptionalAccount(OptionalAccount::Referrer));
    }
    let supplied = optional.flags();
    flags.discount_token |= supplied.discount_token;
    flags.referrer |= supplied.referrer;

    Ok(flags)
}

/// Concatenate the fixed accounts of an instruction with its remaining accounts
fn build_accounts(
    base_accounts: impl ToAccountMetas,
    remaining: Vec<AccountMeta>,
) -> Vec<AccountMeta> {
    let mut account_metas = base_accounts.to_account_metas(None);
    account_metas.extend(remaining);
    account_metas
}

/// Builds clearing house instructions for one authority
///
/// Stateless, every call reads only the snapshots it is handed
pub struct InstructionBuilder<'a> {
    registry: &'a AddressRegistry,
    state: &'a State,
    /// mirrored markets, in any order
    markets: &'a [Market],
    authority: Pubkey,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(
        registry: &'a AddressRegistry,
        state: &'a State,
        markets: &'a [Market],
        authority: Pubkey,
    ) -> Self {
        Self {
            registry,
            state,
            markets,
            authority,
        }
    }

    fn market(&self, market_index: u64) -> SdkResult<&'a Market> {
        self.markets
            .iter()
            .find(|m| m.market_index == market_index)
            .ok_or(SdkError::NotFound(Lookup::Market(market_index)))
    }

    fn instruction(&self, accounts: Vec<AccountMeta>, data: impl InstructionData) -> Instruction {
        Instruction {
            program_id: *self.registry.program_id(),
            accounts,
            data: data.data(),
        }
    }

    /// Market metas for the non-available slots of `positions`, excluding `primary`
    fn auxiliary_markets(
        &self,
        positions: &UserPositions,
        primary: Option<u64>,
    ) -> SdkResult<Vec<AccountMeta>> {
        let primary_key = primary.map(|i| self.registry.market(i)).transpose()?;
        let mut metas = Vec::new();
        for market_index in auxiliary_market_indexes(positions, primary)? {
            let pubkey = self.registry.market(market_index)?;
            if Some(pubkey) == primary_key {
                return Err(SdkError::AssemblyInvariantViolation(format!(
                    "primary market {pubkey} listed as auxiliary"
                )));
            }
            metas.push(AccountMeta::new_readonly(pubkey, false));
        }

        Ok(metas)
    }

    fn remaining_accounts(
        &self,
        positions: &UserPositions,
        primary: Option<u64>,
        optional: &OptionalAccounts,
    ) -> SdkResult<Vec<AccountMeta>> {
        let mut metas = self.auxiliary_markets(positions, primary)?;
        metas.extend(optional_account_metas(optional));
        Ok(metas)
    }

    fn manage_position_accounts(&self, market: &Market) -> SdkResult<context::ManagePosition> {
        Ok(context::ManagePosition {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            market: self.registry.market(market.market_index)?,
            oracle: market.amm.oracle,
            user_positions: self.registry.user_positions(&self.authority)?,
            trade_history: self.state.trade_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
        })
    }

    fn manage_order_accounts(
        &self,
        market: &Market,
        order_state: &OrderState,
    ) -> SdkResult<context::ManageOrder> {
        Ok(context::ManageOrder {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            market: self.registry.market(market.market_index)?,
            oracle: market.amm.oracle,
            user_positions: self.registry.user_positions(&self.authority)?,
            user_orders: self.registry.user_orders(&self.authority)?,
            order_state: self.registry.order_state()?,
            order_history: order_state.order_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
        })
    }

    /// Create the user and user orders accounts of the authority
    ///
    /// `whitelist_token` is required while the exchange is whitelist gated
    pub fn initialize_user(&self, whitelist_token: Option<Pubkey>) -> SdkResult<Vec<Instruction>> {
        if self.state.is_whitelisted() && whitelist_token.is_none() {
            return Err(SdkError::MissingOptionalAccount(
                OptionalAccount::WhitelistToken,
            ));
        }

        let authority = self.authority;
        let user = self.registry.derive(AccountKind::User { authority })?;
        let user_positions = self
            .registry
            .derive(AccountKind::UserPositions { authority })?;
        let user_orders = self.registry.derive(AccountKind::UserOrders { authority })?;
        let state = self.registry.state()?;

        let initialize_user = self.instruction(
            build_accounts(
                context::InitializeUser {
                    user: user.pubkey,
                    state,
                    user_positions: user_positions.pubkey,
                    authority,
                    rent: sysvar::rent::id(),
                    system_program: system_program::id(),
                },
                whitelist_token
                    .map(|key| AccountMeta::new_readonly(key, false))
                    .into_iter()
                    .collect(),
            ),
            instruction::InitializeUser {
                user_nonce: user.nonce,
                user_positions_nonce: user_positions.nonce,
                optional_accounts: InitializeUserOptionalAccounts {
                    whitelist_token: whitelist_token.is_some(),
                },
            },
        );

        let initialize_user_orders = self.instruction(
            build_accounts(
                context::InitializeUserOrders {
                    user: user.pubkey,
                    authority,
                    user_orders: user_orders.pubkey,
                    state,
                    rent: sysvar::rent::id(),
                    system_program: system_program::id(),
                },
                vec![],
            ),
            instruction::InitializeUserOrders {
                user_orders_nonce: user_orders.nonce,
            },
        );

        Ok(vec![initialize_user, initialize_user_orders])
    }

    /// Deposit `amount` collateral from the token account `user_collateral_account`
    pub fn deposit_collateral(
        &self,
        amount: u64,
        user_collateral_account: Pubkey,
    ) -> SdkResult<Instruction> {
        let accounts = context::DepositCollateral {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            collateral_vault: self.state.collateral_vault,
            user_collateral_account,
            token_program: TOKEN_PROGRAM_ID,
            user_positions: self.registry.user_positions(&self.authority)?,
            funding_payment_history: self.state.funding_payment_history,
            deposit_history: self.state.deposit_history,
        };

        Ok(self.instruction(
            build_accounts(accounts, vec![]),
            instruction::DepositCollateral { amount },
        ))
    }

    /// Withdraw `amount` collateral to the token account `user_collateral_account`
    pub fn withdraw_collateral(
        &self,
        amount: u64,
        user_collateral_account: Pubkey,
        positions: &UserPositions,
    ) -> SdkResult<Instruction> {
        let accounts = context::WithdrawCollateral {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            collateral_vault: self.state.collateral_vault,
            collateral_vault_authority: self.state.collateral_vault_authority,
            insurance_vault: self.state.insurance_vault,
            insurance_vault_authority: self.state.insurance_vault_authority,
            user_collateral_account,
            token_program: TOKEN_PROGRAM_ID,
            user_positions: self.registry.user_positions(&self.authority)?,
            funding_payment_history: self.state.funding_payment_history,
            deposit_history: self.state.deposit_history,
        };
        let remaining = self.auxiliary_markets(positions, None)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::WithdrawCollateral { amount },
        ))
    }

    pub fn open_position(
        &self,
        direction: PositionDirection,
        quote_asset_amount: u128,
        market_index: u64,
        limit_price: u128,
        optional: OptionalAccounts,
        positions: &UserPositions,
    ) -> SdkResult<Instruction> {
        let market = self.market(market_index)?;
        let accounts = self.manage_position_accounts(market)?;
        let remaining = self.remaining_accounts(positions, Some(market_index), &optional)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::OpenPosition {
                direction,
                quote_asset_amount,
                market_index,
                limit_price,
                optional_accounts: optional.flags(),
            },
        ))
    }

    pub fn close_position(
        &self,
        market_index: u64,
        optional: OptionalAccounts,
        positions: &UserPositions,
    ) -> SdkResult<Instruction> {
        let market = self.market(market_index)?;
        let accounts = self.manage_position_accounts(market)?;
        let remaining = self.remaining_accounts(positions, Some(market_index), &optional)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::ClosePosition {
                market_index,
                optional_accounts: optional.flags(),
            },
        ))
    }

    /// Place an order
    ///
    /// Flags already set on `params` must be backed by a key in `optional`
    pub fn place_order(
        &self,
        mut params: OrderParams,
        optional: OptionalAccounts,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        params.optional_accounts = reconcile_flags(params.optional_accounts, &optional)?;
        let market = self.market(params.market_index)?;
        let accounts = self.manage_order_accounts(market, order_state)?;
        let remaining =
            self.remaining_accounts(positions, Some(params.market_index), &optional)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::PlaceOrder { params },
        ))
    }

    /// Cancel the open order `order_id`
    pub fn cancel_order(
        &self,
        order_id: u128,
        orders: &UserOrders,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        let order = orders
            .get_order(order_id)
            .ok_or(SdkError::NotFound(Lookup::Order(order_id)))?;
        let market = self.market(order.market_index)?;
        let accounts = self.manage_order_accounts(market, order_state)?;
        let remaining = self.auxiliary_markets(positions, Some(order.market_index))?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::CancelOrder { order_id },
        ))
    }

    /// Cancel the open order aliased `user_order_id`
    pub fn cancel_order_by_user_id(
        &self,
        user_order_id: u8,
        orders: &UserOrders,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        let order = orders
            .get_order_by_user_order_id(user_order_id)
            .ok_or(SdkError::NotFound(Lookup::UserOrderId(user_order_id)))?;
        let market = self.market(order.market_index)?;
        let accounts = self.manage_order_accounts(market, order_state)?;
        let remaining = self.auxiliary_markets(positions, Some(order.market_index))?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::CancelOrderByUserId { user_order_id },
        ))
    }

    pub fn cancel_all_orders(
        &self,
        best_effort: bool,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        let accounts = context::CancelAllOrders {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            user_positions: self.registry.user_positions(&self.authority)?,
            user_orders: self.registry.user_orders(&self.authority)?,
            order_state: self.registry.order_state()?,
            order_history: order_state.order_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
        };
        let remaining = self.auxiliary_markets(positions, None)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::CancelAllOrders { best_effort },
        ))
    }

    pub fn cancel_orders_by_market_and_side(
        &self,
        best_effort: bool,
        market_index: u64,
        direction: PositionDirection,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        self.market(market_index)?;
        let accounts = context::CancelOrdersByMarketAndSide {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            market: self.registry.market(market_index)?,
            user_positions: self.registry.user_positions(&self.authority)?,
            user_orders: self.registry.user_orders(&self.authority)?,
            order_state: self.registry.order_state()?,
            order_history: order_state.order_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
        };
        let remaining = self.auxiliary_markets(positions, Some(market_index))?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::CancelOrdersByMarketAndSide {
                best_effort,
                market_index_only: market_index,
                direction_only: direction,
            },
        ))
    }

    /// Fill the open order `order_id` of the user owned by `user_authority`
    ///
    /// `orders` and `positions` are the target user's accounts, the builder's authority fills
    pub fn fill_order(
        &self,
        user_authority: &Pubkey,
        order_id: u128,
        orders: &UserOrders,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        let order = orders
            .get_order(order_id)
            .ok_or(SdkError::NotFound(Lookup::Order(order_id)))?;
        let market = self.market(order.market_index)?;

        let accounts = context::FillOrder {
            state: self.registry.state()?,
            authority: self.authority,
            filler: self.registry.user(&self.authority)?,
            user: self.registry.user(user_authority)?,
            market: self.registry.market(market.market_index)?,
            oracle: market.amm.oracle,
            user_positions: self.registry.user_positions(user_authority)?,
            user_orders: self.registry.user_orders(user_authority)?,
            trade_history: self.state.trade_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
            order_state: self.registry.order_state()?,
            order_history: order_state.order_history,
            extended_curve_history: self.state.extended_curve_history,
        };
        let mut remaining = self.auxiliary_markets(positions, Some(order.market_index))?;
        if order.has_referrer() {
            remaining.push(AccountMeta::new(order.referrer, false));
        }

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::FillOrder { order_id },
        ))
    }

    /// Place an order and fill it against the AMM in one instruction
    ///
    /// Flags already set on `params` must be backed by a key in `optional`
    pub fn place_and_fill_order(
        &self,
        mut params: OrderParams,
        optional: OptionalAccounts,
        positions: &UserPositions,
        order_state: &OrderState,
    ) -> SdkResult<Instruction> {
        params.optional_accounts = reconcile_flags(params.optional_accounts, &optional)?;
        let market = self.market(params.market_index)?;

        let accounts = context::PlaceAndFillOrder {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            authority: self.authority,
            market: self.registry.market(market.market_index)?,
            oracle: market.amm.oracle,
            user_positions: self.registry.user_positions(&self.authority)?,
            user_orders: self.registry.user_orders(&self.authority)?,
            trade_history: self.state.trade_history,
            funding_payment_history: self.state.funding_payment_history,
            funding_rate_history: self.state.funding_rate_history,
            order_state: self.registry.order_state()?,
            order_history: order_state.order_history,
            extended_curve_history: self.state.extended_curve_history,
        };
        let remaining =
            self.remaining_accounts(positions, Some(params.market_index), &optional)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::PlaceAndFillOrder { params },
        ))
    }

    /// Liquidate the user owned by `user_authority`, the builder's authority liquidates
    ///
    /// Remaining accounts are every market the user holds a position in, then their oracles
    pub fn liquidate(
        &self,
        user_authority: &Pubkey,
        positions: &UserPositions,
    ) -> SdkResult<Instruction> {
        let accounts = context::Liquidate {
            state: self.registry.state()?,
            authority: self.authority,
            liquidator: self.registry.user(&self.authority)?,
            user: self.registry.user(user_authority)?,
            collateral_vault: self.state.collateral_vault,
            collateral_vault_authority: self.state.collateral_vault_authority,
            insurance_vault: self.state.insurance_vault,
            insurance_vault_authority: self.state.insurance_vault_authority,
            token_program: TOKEN_PROGRAM_ID,
            user_positions: self.registry.user_positions(user_authority)?,
            trade_history: self.state.trade_history,
            liquidation_history: self.state.liquidation_history,
            funding_payment_history: self.state.funding_payment_history,
        };

        let market_indexes = auxiliary_market_indexes(positions, None)?;
        let mut markets = Vec::with_capacity(2 * market_indexes.len());
        let mut oracles = Vec::with_capacity(market_indexes.len());
        for market_index in market_indexes {
            let market = self.market(market_index)?;
            markets.push(AccountMeta::new(self.registry.market(market_index)?, false));
            oracles.push(AccountMeta::new_readonly(market.amm.oracle, false));
        }
        markets.extend(oracles);

        Ok(self.instruction(
            build_accounts(accounts, markets),
            instruction::Liquidate {},
        ))
    }

    pub fn update_funding_rate(&self, market_index: u64) -> SdkResult<Instruction> {
        let market = self.market(market_index)?;
        let accounts = context::UpdateFundingRate {
            state: self.registry.state()?,
            market: self.registry.market(market_index)?,
            oracle: market.amm.oracle,
            funding_rate_history: self.state.funding_rate_history,
        };

        Ok(self.instruction(
            build_accounts(accounts, vec![]),
            instruction::UpdateFundingRate { market_index },
        ))
    }

    /// Settle accrued funding on every position of the authority
    pub fn settle_funding_payment(&self, positions: &UserPositions) -> SdkResult<Instruction> {
        let accounts = context::SettleFundingPayment {
            state: self.registry.state()?,
            user: self.registry.user(&self.authority)?,
            user_positions: self.registry.user_positions(&self.authority)?,
            funding_payment_history: self.state.funding_payment_history,
        };
        let remaining = self.auxiliary_markets(positions, None)?;

        Ok(self.instruction(
            build_accounts(accounts, remaining),
            instruction::SettleFundingPayment {},
        ))
    }
}

#[cfg(test)]
mod tests {
    use anchor_lang::AnchorDeserialize;

    use super::*;
    use crate::{
        accounts::Amm,
        constants::PROGRAM_ID,
        types::{MarketPosition, NewOrder, Order, OrderStatus},
    };

    struct Setup {
        registry: AddressRegistry,
        state: State,
        markets: Vec<Market>,
        authority: Pubkey,
    }

    impl Setup {
        fn new(markets_count: u64) -> Self {
            let markets = (0..markets_count)
                .map(|market_index| Market {
                    market_index,
                    initialized: true,
                    amm: Amm {
                        oracle: Pubkey::new_unique(),
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .collect();
            Self {
                registry: AddressRegistry::new(PROGRAM_ID),
                state: State {
                    markets_count,
                    trade_history: Pubkey::new_unique(),
                    funding_payment_history: Pubkey::new_unique(),
                    funding_rate_history: Pubkey::new_unique(),
                    ..Default::default()
                },
                markets,
                authority: Pubkey::new_unique(),
            }
        }

        fn builder(&self) -> InstructionBuilder<'_> {
            InstructionBuilder::new(&self.registry, &self.state, &self.markets, self.authority)
        }

        fn market_key(&self, market_index: u64) -> Pubkey {
            self.registry.market(market_index).unwrap()
        }
    }

    /// `slots[i] = Some((market_index, base_asset_amount, open_orders))`
    fn user_positions(slots: &[Option<(u64, i128, u128)>]) -> UserPositions {
        let mut positions = UserPositions::default();
        for (slot, position) in slots.iter().enumerate() {
            if let Some((market_index, base_asset_amount, open_orders)) = *position {
                positions.positions[slot] = MarketPosition {
                    market_index,
                    base_asset_amount,
                    open_orders,
                    ..Default::default()
                };
            }
        }
        positions
    }

    fn orders_with(order: Order) -> UserOrders {
        let mut orders = UserOrders::default();
        orders.orders[4] = order;
        orders
    }

    fn remaining(ix: &Instruction, fixed: usize) -> &[AccountMeta] {
        &ix.accounts[fixed..]
    }

    #[test]
    fn auxiliary_markets_skip_primary_and_available_slots() {
        // A open, B available, C open
        let positions = user_positions(&[Some((0, 10, 0)), Some((1, 0, 0)), Some((2, -3, 0))]);
        assert_eq!(auxiliary_market_indexes(&positions, Some(0)).unwrap(), vec![2]);
        assert_eq!(
            auxiliary_market_indexes(&positions, None).unwrap(),
            vec![0, 2]
        );

        // open orders alone make a slot non-available
        let positions = user_positions(&[None, Some((3, 0, 2)), Some((1, 5, 0))]);
        assert_eq!(
            auxiliary_market_indexes(&positions, Some(4)).unwrap(),
            vec![3, 1]
        );
    }

    #[test]
    fn duplicate_market_slots_are_rejected() {
        let positions = user_positions(&[Some((1, 10, 0)), Some((1, 0, 1))]);
        assert!(matches!(
            auxiliary_market_indexes(&positions, None),
            Err(SdkError::AssemblyInvariantViolation(_))
        ));
        assert!(matches!(
            auxiliary_market_indexes(&positions, Some(1)),
            Err(SdkError::AssemblyInvariantViolation(_))
        ));
    }

    #[test]
    fn open_position_account_order() {
        let setup = Setup::new(3);
        let discount_token = Pubkey::new_unique();
        let referrer = Pubkey::new_unique();
        let positions = user_positions(&[Some((0, 10, 0)), Some((1, 0, 0)), Some((2, -3, 0))]);

        let ix = setup
            .builder()
            .open_position(
                PositionDirection::Long,
                1_000,
                0,
                0,
                OptionalAccounts::DiscountTokenAndReferrer {
                    discount_token,
                    referrer,
                },
                &positions,
            )
            .unwrap();

        assert_eq!(ix.program_id, PROGRAM_ID);
        // primary market is a writable fixed account
        assert_eq!(ix.accounts[3], AccountMeta::new(setup.market_key(0), false));
        assert_eq!(
            ix.accounts[4],
            AccountMeta::new_readonly(setup.markets[0].amm.oracle, false)
        );
        assert_eq!(
            remaining(&ix, 9),
            &[
                AccountMeta::new_readonly(setup.market_key(2), false),
                AccountMeta::new_readonly(discount_token, false),
                AccountMeta::new(referrer, false),
            ]
        );

        let args = instruction::OpenPosition::try_from_slice(&ix.data[8..]).unwrap();
        assert_eq!(args.quote_asset_amount, 1_000);
        assert!(args.optional_accounts.discount_token && args.optional_accounts.referrer);
    }

    #[test]
    fn unknown_market_is_not_found() {
        let setup = Setup::new(1);
        let result = setup
            .builder()
            .close_position(7, OptionalAccounts::None, &UserPositions::default());
        assert!(matches!(
            result,
            Err(SdkError::NotFound(Lookup::Market(7)))
        ));
    }

    #[test]
    fn place_order_flags_need_keys() {
        let setup = Setup::new(1);
        let mut params = NewOrder::limit(0).amount(5).price(10).build();
        params.optional_accounts.referrer = true;

        let result = setup.builder().place_order(
            params,
            OptionalAccounts::None,
            &UserPositions::default(),
            &OrderState::default(),
        );
        assert!(matches!(
            result,
            Err(SdkError::MissingOptionalAccount(OptionalAccount::Referrer))
        ));

        // a supplied key raises its flag
        let discount_token = Pubkey::new_unique();
        let ix = setup
            .builder()
            .place_order(
                NewOrder::limit(0).amount(5).price(10).build(),
                OptionalAccounts::DiscountToken { discount_token },
                &UserPositions::default(),
                &OrderState::default(),
            )
            .unwrap();
        let args = instruction::PlaceOrder::try_from_slice(&ix.data[8..]).unwrap();
        assert!(args.params.optional_accounts.discount_token);
        assert!(!args.params.optional_accounts.referrer);
        assert_eq!(
            remaining(&ix, 11),
            &[AccountMeta::new_readonly(discount_token, false)]
        );
    }

    #[test]
    fn cancel_requires_an_open_order() {
        let setup = Setup::new(2);
        let orders = orders_with(Order {
            status: OrderStatus::Open,
            order_id: 11,
            user_order_id: 3,
            market_index: 1,
            ..Default::default()
        });
        let positions = user_positions(&[Some((1, 0, 1)), Some((0, 4, 0))]);
        let builder = setup.builder();

        assert!(matches!(
            builder.cancel_order(12, &orders, &positions, &OrderState::default()),
            Err(SdkError::NotFound(Lookup::Order(12)))
        ));
        assert!(matches!(
            builder.cancel_order_by_user_id(4, &orders, &positions, &OrderState::default()),
            Err(SdkError::NotFound(Lookup::UserOrderId(4)))
        ));

        let ix = builder
            .cancel_order_by_user_id(3, &orders, &positions, &OrderState::default())
            .unwrap();
        assert_eq!(ix.accounts[3], AccountMeta::new(setup.market_key(1), false));
        assert_eq!(
            remaining(&ix, 11),
            &[AccountMeta::new_readonly(setup.market_key(0), false)]
        );

        let mut filled = orders;
        filled.orders[4].status = OrderStatus::Filled;
        assert!(matches!(
            builder.cancel_order(11, &filled, &positions, &OrderState::default()),
            Err(SdkError::NotFound(Lookup::Order(11)))
        ));
    }

    #[test]
    fn fill_order_appends_referrer() {
        let mut setup = Setup::new(2);
        setup.state.extended_curve_history = Pubkey::new_unique();
        let user_authority = Pubkey::new_unique();
        let referrer = Pubkey::new_unique();
        let orders = orders_with(Order {
            status: OrderStatus::Open,
            order_id: 5,
            market_index: 0,
            referrer,
            ..Default::default()
        });
        let positions = user_positions(&[Some((0, 0, 1)), Some((1, 2, 0))]);

        let ix = setup
            .builder()
            .fill_order(
                &user_authority,
                5,
                &orders,
                &positions,
                &OrderState::default(),
            )
            .unwrap();
        assert_eq!(
            ix.accounts[2],
            AccountMeta::new(setup.registry.user(&setup.authority).unwrap(), false)
        );
        assert_eq!(
            ix.accounts[3],
            AccountMeta::new(setup.registry.user(&user_authority).unwrap(), false)
        );
        assert_eq!(
            ix.accounts[13],
            AccountMeta::new(setup.state.extended_curve_history, false)
        );
        assert_eq!(
            remaining(&ix, 14),
            &[
                AccountMeta::new_readonly(setup.market_key(1), false),
                AccountMeta::new(referrer, false),
            ]
        );
    }

    #[test]
    fn liquidate_lists_markets_then_oracles() {
        let setup = Setup::new(3);
        let positions = user_positions(&[Some((2, 1, 0)), None, Some((0, -1, 0))]);

        let ix = setup
            .builder()
            .liquidate(&Pubkey::new_unique(), &positions)
            .unwrap();
        assert_eq!(
            remaining(&ix, 13),
            &[
                AccountMeta::new(setup.market_key(2), false),
                AccountMeta::new(setup.market_key(0), false),
                AccountMeta::new_readonly(setup.markets[2].amm.oracle, false),
                AccountMeta::new_readonly(setup.markets[0].amm.oracle, false),
            ]
        );
    }

    #[test]
    fn place_and_fill_flags_need_keys() {
        let setup = Setup::new(2);
        let positions = user_positions(&[Some((1, 3, 0)), Some((0, 0, 1))]);
        let mut params = NewOrder::market(0).amount(5).build();
        params.optional_accounts.referrer = true;

        let result = setup.builder().place_and_fill_order(
            params,
            OptionalAccounts::None,
            &positions,
            &OrderState::default(),
        );
        assert!(matches!(
            result,
            Err(SdkError::MissingOptionalAccount(OptionalAccount::Referrer))
        ));

        let referrer = Pubkey::new_unique();
        let ix = setup
            .builder()
            .place_and_fill_order(
                params,
                OptionalAccounts::Referrer { referrer },
                &positions,
                &OrderState::default(),
            )
            .unwrap();
        let args = instruction::PlaceAndFillOrder::try_from_slice(&ix.data[8..]).unwrap();
        assert!(args.params.optional_accounts.referrer);
        assert!(!args.params.optional_accounts.discount_token);
        assert_eq!(ix.accounts[3], AccountMeta::new(setup.market_key(0), false));
        assert_eq!(
            remaining(&ix, 13),
            &[
                AccountMeta::new_readonly(setup.market_key(1), false),
                AccountMeta::new(referrer, false),
            ]
        );
    }

    #[test]
    fn account_wide_instructions_list_every_held_market() {
        let setup = Setup::new(3);
        let positions = user_positions(&[Some((2, 1, 0)), Some((1, 0, 0)), Some((0, 0, 3))]);
        let expected = [
            AccountMeta::new_readonly(setup.market_key(2), false),
            AccountMeta::new_readonly(setup.market_key(0), false),
        ];
        let builder = setup.builder();

        let ix = builder
            .withdraw_collateral(10, Pubkey::new_unique(), &positions)
            .unwrap();
        assert_eq!(remaining(&ix, 12), &expected);

        let ix = builder.settle_funding_payment(&positions).unwrap();
        assert_eq!(remaining(&ix, 4), &expected);

        let ix = builder
            .cancel_all_orders(true, &positions, &OrderState::default())
            .unwrap();
        assert_eq!(remaining(&ix, 9), &expected);
        let args = instruction::CancelAllOrders::try_from_slice(&ix.data[8..]).unwrap();
        assert!(args.best_effort);

        // no positions, no remaining accounts
        let ix = builder
            .settle_funding_payment(&UserPositions::default())
            .unwrap();
        assert_eq!(ix.accounts.len(), 4);
    }

    #[test]
    fn cancel_by_market_and_side_skips_its_market() {
        let setup = Setup::new(3);
        let positions = user_positions(&[Some((2, 1, 0)), Some((1, 0, 2)), Some((0, -4, 0))]);

        let ix = setup
            .builder()
            .cancel_orders_by_market_and_side(
                false,
                1,
                PositionDirection::Short,
                &positions,
                &OrderState::default(),
            )
            .unwrap();
        assert_eq!(ix.accounts[3], AccountMeta::new(setup.market_key(1), false));
        assert_eq!(
            remaining(&ix, 10),
            &[
                AccountMeta::new_readonly(setup.market_key(2), false),
                AccountMeta::new_readonly(setup.market_key(0), false),
            ]
        );
        let args =
            instruction::CancelOrdersByMarketAndSide::try_from_slice(&ix.data[8..]).unwrap();
        assert_eq!(args.market_index_only, 1);
        assert_eq!(args.direction_only, PositionDirection::Short);
    }

    #[test]
    fn initialize_user_respects_whitelist_gate() {
        let mut setup = Setup::new(1);
        let ixs = setup.builder().initialize_user(None).unwrap();
        assert_eq!(ixs.len(), 2);
        assert_eq!(ixs[0].accounts.len(), 6);

        let args = instruction::InitializeUser::try_from_slice(&ixs[0].data[8..]).unwrap();
        let user = setup
            .registry
            .derive(AccountKind::User {
                authority: setup.authority,
            })
            .unwrap();
        assert_eq!(args.user_nonce, user.nonce);
        assert!(!args.optional_accounts.whitelist_token);

        setup.state.whitelist_mint = Pubkey::new_unique();
        assert!(matches!(
            setup.builder().initialize_user(None),
            Err(SdkError::MissingOptionalAccount(
                OptionalAccount::WhitelistToken
            ))
        ));

        let whitelist_token = Pubkey::new_unique();
        let ixs = setup
            .builder()
            .initialize_user(Some(whitelist_token))
            .unwrap();
        assert_eq!(
            remaining(&ixs[0], 6),
            &[AccountMeta::new_readonly(whitelist_token, false)]
        );
    }
}
