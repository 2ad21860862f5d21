//! Program derived addresses of clearing house accounts
use fnv::FnvHashMap;
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;

use crate::{
    constants::seeds,
    types::{SdkError, SdkResult},
};

/// Named account kinds, each carrying the seed material it derives from
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountKind {
    State,
    Market { market_index: u64 },
    User { authority: Pubkey },
    /// Derived from the address of `authority`'s user account
    UserPositions { authority: Pubkey },
    /// Derived from the address of `authority`'s user account
    UserOrders { authority: Pubkey },
    OrderState,
}

/// A derived address and the nonce (bump) that took it off curve
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DerivedAddress {
    pub pubkey: Pubkey,
    pub nonce: u8,
}

/// Derives and memoizes program addresses
///
/// The first derivation of a kind is cached for the lifetime of the registry.
#[derive(Debug)]
pub struct AddressRegistry {
    program_id: Pubkey,
    cache: RwLock<FnvHashMap<AccountKind, DerivedAddress>>,
}

impl AddressRegistry {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            cache: Default::default(),
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Return the address of `kind`, deriving it on first use
    pub fn derive(&self, kind: AccountKind) -> SdkResult<DerivedAddress> {
        if let Some(derived) = self.cache.read().get(&kind) {
            return Ok(*derived);
        }

        let derived = self.derive_uncached(kind)?;
        // a racing writer computed the same value, keep whichever landed first
        Ok(*self.cache.write().entry(kind).or_insert(derived))
    }

    fn derive_uncached(&self, kind: AccountKind) -> SdkResult<DerivedAddress> {
        let (pubkey, nonce) = match kind {
            AccountKind::State => self.find(&[seeds::STATE])?,
            AccountKind::Market { market_index } => {
                self.find(&[seeds::MARKET, &market_index.to_le_bytes()])?
            }
            AccountKind::User { authority } => self.find(&[seeds::USER, authority.as_ref()])?,
            AccountKind::UserPositions { authority } => {
                let user = self.user(&authority)?;
                self.find(&[seeds::USER_POSITIONS, user.as_ref()])?
            }
            AccountKind::UserOrders { authority } => {
                let user = self.user(&authority)?;
                self.find(&[seeds::USER_ORDERS, user.as_ref()])?
            }
            AccountKind::OrderState => self.find(&[seeds::ORDER_STATE])?,
        };

        Ok(DerivedAddress { pubkey, nonce })
    }

    fn find(&self, seeds: &[&[u8]]) -> SdkResult<(Pubkey, u8)> {
        Pubkey::try_find_program_address(seeds, &self.program_id).ok_or(SdkError::AddressDerivation)
    }

    pub fn state(&self) -> SdkResult<Pubkey> {
        self.derive(AccountKind::State).map(|d| d.pubkey)
    }

    pub fn market(&self, market_index: u64) -> SdkResult<Pubkey> {
        self.derive(AccountKind::Market { market_index })
            .map(|d| d.pubkey)
    }

    pub fn user(&self, authority: &Pubkey) -> SdkResult<Pubkey> {
        self.derive(AccountKind::User {
            authority: *authority,
        })
        .map(|d| d.pubkey)
    }

    pub fn user_positions(&self, authority: &Pubkey) -> SdkResult<Pubkey> {
        self.derive(AccountKind::UserPositions {
            authority: *authority,
        })
        .map(|d| d.pubkey)
    }

    pub fn user_orders(&self, authority: &Pubkey) -> SdkResult<Pubkey> {
        self.derive(AccountKind::UserOrders {
            authority: *authority,
        })
        .map(|d| d.pubkey)
    }

    pub fn order_state(&self) -> SdkResult<Pubkey> {
        self.derive(AccountKind::OrderState).map(|d| d.pubkey)
    }
}
