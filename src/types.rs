use solana_sdk::{pubkey::Pubkey, signer::SignerError};
use thiserror::Error;

// re-export types in public API
pub use crate::accounts::{
    Market, MarketPosition, Order, OrderState, OrderStatus, OrderTriggerCondition, OrderType,
    PositionDirection, State, User, UserOrders, UserPositions,
};
pub use crate::instructions::{ManagePositionOptionalAccounts, OrderParams};

pub type SdkResult<T> = Result<T, SdkError>;

/// Account data with the slot it was observed at
#[derive(Clone, Debug, PartialEq)]
pub struct DataAndSlot<T> {
    pub slot: u64,
    pub data: T,
}

/// Raw account bytes as read from the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub pubkey: Pubkey,
    pub data: Vec<u8>,
    /// slot the read was served at, used to order competing updates
    pub slot: u64,
}

/// Account kinds the local mirror can subscribe to
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionKind {
    State,
    Markets,
    User,
    UserPositions,
    UserOrders,
    OrderState,
}

impl SubscriptionKind {
    /// Kinds that are always subscribed
    pub const BASE: [SubscriptionKind; 2] = [SubscriptionKind::State, SubscriptionKind::Markets];
}

/// Identifies what a failed lookup was searching for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Order(u128),
    UserOrderId(u8),
    Market(u64),
}

/// Optional accounts an instruction may read
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptionalAccount {
    DiscountToken,
    Referrer,
    WhitelistToken,
}

/// Keys for the optional accounts of a position/order instruction
///
/// Each variant carries exactly the keys it needs, the instruction flags are derived from it
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OptionalAccounts {
    #[default]
    None,
    DiscountToken {
        discount_token: Pubkey,
    },
    Referrer {
        referrer: Pubkey,
    },
    DiscountTokenAndReferrer {
        discount_token: Pubkey,
        referrer: Pubkey,
    },
}

impl OptionalAccounts {
    pub fn discount_token(&self) -> Option<Pubkey> {
        match self {
            Self::DiscountToken { discount_token }
            | Self::DiscountTokenAndReferrer { discount_token, .. } => Some(*discount_token),
            _ => None,
        }
    }

    pub fn referrer(&self) -> Option<Pubkey> {
        match self {
            Self::Referrer { referrer } | Self::DiscountTokenAndReferrer { referrer, .. } => {
                Some(*referrer)
            }
            _ => None,
        }
    }

    /// The instruction flags implied by the supplied keys
    pub fn flags(&self) -> ManagePositionOptionalAccounts {
        ManagePositionOptionalAccounts {
            discount_token: self.discount_token().is_some(),
            referrer: self.referrer().is_some(),
        }
    }
}

/// Provides builder API for Orders
#[derive(Default)]
pub struct NewOrder {
    order_type: OrderType,
    direction: PositionDirection,
    market_index: u64,
    reduce_only: bool,
    post_only: bool,
    ioc: bool,
    quote_asset_amount: u128,
    base_asset_amount: u128,
    price: u128,
    user_order_id: u8,
    trigger: Option<(u128, OrderTriggerCondition)>,
    oracle_price_offset: i128,
}

impl NewOrder {
    /// Create a market order
    pub fn market(market_index: u64) -> Self {
        Self {
            order_type: OrderType::Market,
            market_index,
            ..Default::default()
        }
    }
    /// Create a limit order
    pub fn limit(market_index: u64) -> Self {
        Self {
            order_type: OrderType::Limit,
            market_index,
            ..Default::default()
        }
    }
    /// Set order base amount
    ///
    /// A sub-zero amount indicates a short
    pub fn amount(mut self, amount: i128) -> Self {
        self.direction = if amount >= 0 {
            PositionDirection::Long
        } else {
            PositionDirection::Short
        };
        self.base_asset_amount = amount.unsigned_abs();

        self
    }
    /// Set order size in quote terms
    pub fn quote_amount(mut self, direction: PositionDirection, amount: u128) -> Self {
        self.direction = direction;
        self.quote_asset_amount = amount;
        self
    }
    /// Set order price
    pub fn price(mut self, price: u128) -> Self {
        self.price = price;
        self
    }
    /// Set reduce only (default: false)
    pub fn reduce_only(mut self, flag: bool) -> Self {
        self.reduce_only = flag;
        self
    }
    /// Set immediate or cancel (default: false)
    pub fn ioc(mut self, flag: bool) -> Self {
        self.ioc = flag;
        self
    }
    /// Set post-only (default: false)
    pub fn post_only(mut self, flag: bool) -> Self {
        self.post_only = flag;
        self
    }
    /// Assign a user order id, reusable once the order closes
    pub fn user_order_id(mut self, id: u8) -> Self {
        self.user_order_id = id;
        self
    }
    /// Turn the order into a trigger order
    pub fn trigger(mut self, price: u128, condition: OrderTriggerCondition) -> Self {
        self.order_type = match self.order_type {
            OrderType::Market | OrderType::TriggerMarket => OrderType::TriggerMarket,
            OrderType::Limit | OrderType::TriggerLimit => OrderType::TriggerLimit,
        };
        self.trigger = Some((price, condition));
        self
    }
    /// Price the order relative to the oracle
    pub fn oracle_price_offset(mut self, offset: i128) -> Self {
        self.oracle_price_offset = offset;
        self
    }
    /// Call to complete building the Order
    pub fn build(self) -> OrderParams {
        let (trigger_price, trigger_condition) = self.trigger.unwrap_or_default();
        OrderParams {
            order_type: self.order_type,
            direction: self.direction,
            user_order_id: self.user_order_id,
            quote_asset_amount: self.quote_asset_amount,
            base_asset_amount: self.base_asset_amount,
            price: self.price,
            market_index: self.market_index,
            reduce_only: self.reduce_only,
            post_only: self.post_only,
            immediate_or_cancel: self.ioc,
            trigger_price,
            trigger_condition,
            oracle_price_offset: self.oracle_price_offset,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("rpc fail")]
    Rpc(#[from] solana_client::client_error::ClientError),
    #[error("ws fail")]
    Ws(#[from] solana_client::nonblocking::pubsub_client::PubsubClientError),
    #[error("{0:?} is not subscribed")]
    NotSubscribed(SubscriptionKind),
    #[error("not found: {0:?}")]
    NotFound(Lookup),
    #[error("optional account flagged but no key given: {0:?}")]
    MissingOptionalAccount(OptionalAccount),
    #[error("instruction assembly invariant violated: {0}")]
    AssemblyInvariantViolation(String),
    #[error("submission failed: {0}")]
    SubmissionFailure(#[source] Box<SdkError>),
    #[error("account does not exist: {0}")]
    AccountNotFound(Pubkey),
    #[error("invalid clearing house account")]
    InvalidAccount,
    #[error("no valid nonce for derived address")]
    AddressDerivation,
    #[error("signing fail")]
    Signing(#[from] SignerError),
    #[error("subscribe cancelled by unsubscribe")]
    SubscribeCancelled,
}

impl SdkError {
    /// Wrap as a submission failure, unless it already is one
    pub(crate) fn into_submission_failure(self) -> Self {
        match self {
            err @ Self::SubmissionFailure(_) => err,
            err => Self::SubmissionFailure(Box::new(err)),
        }
    }
}
