//! Local mirror of clearing house accounts
//!
//! Accounts are fetched once on subscribe, then kept fresh by one change feed per account.
//! Competing updates (feed vs. forced refetch) resolve by slot: a snapshot is only replaced by a
//! strictly newer one, and every replacement emits exactly one [`AccountEvent`].
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use anchor_lang::AccountDeserialize;
use futures_util::future::try_join_all;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use solana_sdk::pubkey::Pubkey;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    account_provider::AccountProvider,
    addresses::AddressRegistry,
    types::{
        AccountUpdate, DataAndSlot, Lookup, Market, OrderState, SdkError, SdkResult, State,
        SubscriptionKind, User, UserOrders, UserPositions,
    },
};

const LOG_TARGET: &str = "mirror";

/// A mirrored account changed
#[derive(Clone, Debug, PartialEq)]
pub enum AccountEvent {
    State(DataAndSlot<State>),
    Market {
        market_index: u64,
        market: DataAndSlot<Market>,
    },
    User(DataAndSlot<User>),
    UserPositions(DataAndSlot<UserPositions>),
    UserOrders(DataAndSlot<UserOrders>),
    OrderState(DataAndSlot<OrderState>),
}

/// A single mirrored account
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Target {
    State,
    Market(u64),
    User,
    UserPositions,
    UserOrders,
    OrderState,
}

/// A decoded account ready to be stored
enum Snapshot {
    State(State),
    Market(u64, Market),
    User(User),
    UserPositions(UserPositions),
    UserOrders(UserOrders),
    OrderState(OrderState),
}

fn decode<T: AccountDeserialize>(data: &[u8]) -> SdkResult<T> {
    T::try_deserialize(&mut &data[..]).map_err(|_| SdkError::InvalidAccount)
}

impl Snapshot {
    fn decode(target: Target, data: &[u8]) -> SdkResult<Self> {
        Ok(match target {
            Target::State => Self::State(decode(data)?),
            Target::Market(market_index) => Self::Market(market_index, decode(data)?),
            Target::User => Self::User(decode(data)?),
            Target::UserPositions => Self::UserPositions(decode(data)?),
            Target::UserOrders => Self::UserOrders(decode(data)?),
            Target::OrderState => Self::OrderState(decode(data)?),
        })
    }
}

/// Store `data` if it is newer than `current`
fn replace<T: Clone>(
    current: &mut Option<DataAndSlot<T>>,
    data: T,
    slot: u64,
) -> Option<DataAndSlot<T>> {
    if current.as_ref().is_some_and(|c| c.slot >= slot) {
        return None;
    }
    let new = DataAndSlot { slot, data };
    *current = Some(new.clone());
    Some(new)
}

#[derive(Default)]
struct MirrorCache {
    /// bumped on unsubscribe, updates carrying an older generation are discarded
    generation: u64,
    subscribed: BTreeSet<SubscriptionKind>,
    /// every mirrored account with its address
    targets: Vec<(Target, Pubkey)>,
    state: Option<DataAndSlot<State>>,
    markets: BTreeMap<u64, DataAndSlot<Market>>,
    user: Option<DataAndSlot<User>>,
    user_positions: Option<DataAndSlot<UserPositions>>,
    user_orders: Option<DataAndSlot<UserOrders>>,
    order_state: Option<DataAndSlot<OrderState>>,
}

impl MirrorCache {
    fn store(&mut self, snapshot: Snapshot, slot: u64) -> Option<AccountEvent> {
        match snapshot {
            Snapshot::State(data) => replace(&mut self.state, data, slot).map(AccountEvent::State),
            Snapshot::Market(market_index, data) => {
                let mut current = self.markets.remove(&market_index);
                let event = replace(&mut current, data, slot)
                    .map(|market| AccountEvent::Market {
                        market_index,
                        market,
                    });
                if let Some(current) = current {
                    self.markets.insert(market_index, current);
                }
                event
            }
            Snapshot::User(data) => replace(&mut self.user, data, slot).map(AccountEvent::User),
            Snapshot::UserPositions(data) => {
                replace(&mut self.user_positions, data, slot).map(AccountEvent::UserPositions)
            }
            Snapshot::UserOrders(data) => {
                replace(&mut self.user_orders, data, slot).map(AccountEvent::UserOrders)
            }
            Snapshot::OrderState(data) => {
                replace(&mut self.order_state, data, slot).map(AccountEvent::OrderState)
            }
        }
    }

    fn ensure_subscribed(&self, kind: SubscriptionKind) -> SdkResult<()> {
        if self.subscribed.contains(&kind) {
            Ok(())
        } else {
            Err(SdkError::NotSubscribed(kind))
        }
    }

    fn get<T: Clone>(
        &self,
        kind: SubscriptionKind,
        entry: &Option<DataAndSlot<T>>,
    ) -> SdkResult<DataAndSlot<T>> {
        self.ensure_subscribed(kind)?;
        entry.clone().ok_or(SdkError::NotSubscribed(kind))
    }
}

struct MirrorInner {
    cache: RwLock<MirrorCache>,
    events: broadcast::Sender<AccountEvent>,
}

impl MirrorInner {
    /// Apply an update observed under `generation`
    ///
    /// Returns false once the generation is stale
    fn apply(&self, generation: u64, snapshot: Snapshot, slot: u64) -> bool {
        let mut cache = self.cache.write();
        if cache.generation != generation {
            return false;
        }
        if let Some(event) = cache.store(snapshot, slot) {
            // sent under the lock so no event can follow an unsubscribe
            let _ = self.events.send(event);
        }
        true
    }
}

/// Mirror of the clearing house accounts relevant to one authority
pub struct AccountSubscriber<P: AccountProvider> {
    provider: P,
    registry: Arc<AddressRegistry>,
    authority: Pubkey,
    /// markets to mirror, `None` mirrors every market in `State`
    market_indexes: Option<Vec<u64>>,
    inner: Arc<MirrorInner>,
    feeds: Mutex<Vec<JoinHandle<()>>>,
    /// serializes subscribe calls
    subscribe_lock: tokio::sync::Mutex<()>,
}

impl<P: AccountProvider> AccountSubscriber<P> {
    pub fn new(
        provider: P,
        registry: Arc<AddressRegistry>,
        authority: Pubkey,
        market_indexes: Option<Vec<u64>>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            provider,
            registry,
            authority,
            market_indexes,
            inner: Arc::new(MirrorInner {
                cache: Default::default(),
                events,
            }),
            feeds: Default::default(),
            subscribe_lock: Default::default(),
        }
    }

    /// Receive mirror change events
    pub fn events(&self) -> broadcast::Receiver<AccountEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to the base accounts plus `kinds`
    ///
    /// Returns false when every requested kind was already subscribed. Fails
    /// `SubscribeCancelled` if `unsubscribe` ran before the reads completed
    pub async fn subscribe(&self, kinds: &[SubscriptionKind]) -> SdkResult<bool> {
        let _guard = self.subscribe_lock.lock().await;

        let (generation, new_kinds) = {
            let cache = self.inner.cache.read();
            let new_kinds: Vec<SubscriptionKind> = SubscriptionKind::BASE
                .iter()
                .chain(kinds)
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter(|kind| !cache.subscribed.contains(kind))
                .collect();
            (cache.generation, new_kinds)
        };
        if new_kinds.is_empty() {
            return Ok(false);
        }

        // initial reads, nothing is stored until every read has succeeded
        let mut initial = Vec::new();
        for kind in &new_kinds {
            for (target, pubkey) in self.targets(*kind, &initial)? {
                let update = self.provider.get_account(pubkey).await?;
                let snapshot = Snapshot::decode(target, &update.data)?;
                initial.push((target, pubkey, snapshot, update.slot));
            }
        }

        let mut feeds = Vec::with_capacity(initial.len());
        for (target, pubkey, _, _) in &initial {
            feeds.push((*target, self.provider.subscribe_account(*pubkey).await?));
        }

        let mut cache = self.inner.cache.write();
        if cache.generation != generation {
            debug!(target: LOG_TARGET, "unsubscribed while subscribing, dropping feeds");
            return Err(SdkError::SubscribeCancelled);
        }
        cache.subscribed.extend(new_kinds.iter().copied());
        for (target, pubkey, snapshot, slot) in initial {
            cache.targets.push((target, pubkey));
            if let Some(event) = cache.store(snapshot, slot) {
                let _ = self.inner.events.send(event);
            }
        }
        // handles are registered before the cache lock is released so unsubscribe aborts them
        let mut handles = self.feeds.lock();
        for (target, feed) in feeds {
            handles.push(tokio::spawn(run_feed(
                Arc::clone(&self.inner),
                generation,
                target,
                feed,
            )));
        }
        drop(handles);
        drop(cache);
        debug!(target: LOG_TARGET, "subscribed: {new_kinds:?}");

        Ok(true)
    }

    /// Accounts mirrored for `kind`
    ///
    /// `pending` holds reads of this subscribe call not yet stored
    fn targets(
        &self,
        kind: SubscriptionKind,
        pending: &[(Target, Pubkey, Snapshot, u64)],
    ) -> SdkResult<Vec<(Target, Pubkey)>> {
        let registry = &self.registry;
        let authority = &self.authority;
        Ok(match kind {
            SubscriptionKind::State => vec![(Target::State, registry.state()?)],
            SubscriptionKind::Markets => {
                let market_indexes = match self.market_indexes.as_ref() {
                    Some(market_indexes) => market_indexes.clone(),
                    None => {
                        let markets_count = pending
                            .iter()
                            .find_map(|(_, _, snapshot, _)| match snapshot {
                                Snapshot::State(state) => Some(state.markets_count),
                                _ => None,
                            })
                            .map_or_else(|| self.state().map(|s| s.data.markets_count), Ok)?;
                        (0..markets_count).collect()
                    }
                };
                market_indexes
                    .into_iter()
                    .map(|i| Ok((Target::Market(i), registry.market(i)?)))
                    .collect::<SdkResult<_>>()?
            }
            SubscriptionKind::User => vec![(Target::User, registry.user(authority)?)],
            SubscriptionKind::UserPositions => vec![(
                Target::UserPositions,
                registry.user_positions(authority)?,
            )],
            SubscriptionKind::UserOrders => {
                vec![(Target::UserOrders, registry.user_orders(authority)?)]
            }
            SubscriptionKind::OrderState => {
                vec![(Target::OrderState, registry.order_state()?)]
            }
        })
    }

    /// Stop all feeds and clear the mirror
    pub fn unsubscribe(&self) {
        {
            let mut cache = self.inner.cache.write();
            let generation = cache.generation + 1;
            *cache = MirrorCache {
                generation,
                ..Default::default()
            };
        }
        for handle in self.feeds.lock().drain(..) {
            handle.abort();
        }
        debug!(target: LOG_TARGET, "unsubscribed");
    }

    /// Refetch every subscribed account
    pub async fn fetch(&self) -> SdkResult<()> {
        let (generation, targets) = {
            let cache = self.inner.cache.read();
            if cache.subscribed.is_empty() {
                return Err(SdkError::NotSubscribed(SubscriptionKind::State));
            }
            (cache.generation, cache.targets.clone())
        };

        let updates = try_join_all(
            targets
                .iter()
                .map(|(_, pubkey)| self.provider.get_account(*pubkey)),
        )
        .await?;

        for ((target, _), update) in targets.into_iter().zip(updates) {
            let snapshot = Snapshot::decode(target, &update.data)?;
            if !self.inner.apply(generation, snapshot, update.slot) {
                break;
            }
        }

        Ok(())
    }

    /// Read any user's positions from the ledger, bypassing the mirror
    pub async fn fetch_user_positions(
        &self,
        authority: &Pubkey,
    ) -> SdkResult<DataAndSlot<UserPositions>> {
        self.fetch_uncached(self.registry.user_positions(authority)?)
            .await
    }

    /// Read any user's orders from the ledger, bypassing the mirror
    pub async fn fetch_user_orders(&self, authority: &Pubkey) -> SdkResult<DataAndSlot<UserOrders>> {
        self.fetch_uncached(self.registry.user_orders(authority)?)
            .await
    }

    async fn fetch_uncached<T: AccountDeserialize>(
        &self,
        pubkey: Pubkey,
    ) -> SdkResult<DataAndSlot<T>> {
        let AccountUpdate { data, slot, .. } = self.provider.get_account(pubkey).await?;
        Ok(DataAndSlot {
            slot,
            data: decode(&data)?,
        })
    }

    pub fn is_subscribed(&self, kind: SubscriptionKind) -> bool {
        self.inner.cache.read().subscribed.contains(&kind)
    }

    pub fn state(&self) -> SdkResult<DataAndSlot<State>> {
        let cache = self.inner.cache.read();
        cache.get(SubscriptionKind::State, &cache.state)
    }

    pub fn market(&self, market_index: u64) -> SdkResult<DataAndSlot<Market>> {
        let cache = self.inner.cache.read();
        cache.ensure_subscribed(SubscriptionKind::Markets)?;
        cache
            .markets
            .get(&market_index)
            .cloned()
            .ok_or(SdkError::NotFound(Lookup::Market(market_index)))
    }

    /// Every mirrored market in index order
    pub fn markets(&self) -> SdkResult<Vec<DataAndSlot<Market>>> {
        let cache = self.inner.cache.read();
        cache.ensure_subscribed(SubscriptionKind::Markets)?;
        Ok(cache.markets.values().cloned().collect())
    }

    pub fn user_account(&self) -> SdkResult<DataAndSlot<User>> {
        let cache = self.inner.cache.read();
        cache.get(SubscriptionKind::User, &cache.user)
    }

    pub fn user_positions(&self) -> SdkResult<DataAndSlot<UserPositions>> {
        let cache = self.inner.cache.read();
        cache.get(SubscriptionKind::UserPositions, &cache.user_positions)
    }

    pub fn user_orders(&self) -> SdkResult<DataAndSlot<UserOrders>> {
        let cache = self.inner.cache.read();
        cache.get(SubscriptionKind::UserOrders, &cache.user_orders)
    }

    pub fn order_state(&self) -> SdkResult<DataAndSlot<OrderState>> {
        let cache = self.inner.cache.read();
        cache.get(SubscriptionKind::OrderState, &cache.order_state)
    }
}

impl<P: AccountProvider> Drop for AccountSubscriber<P> {
    fn drop(&mut self) {
        for handle in self.feeds.get_mut().drain(..) {
            handle.abort();
        }
    }
}

async fn run_feed(
    inner: Arc<MirrorInner>,
    generation: u64,
    target: Target,
    mut feed: mpsc::Receiver<AccountUpdate>,
) {
    while let Some(update) = feed.recv().await {
        let snapshot = match Snapshot::decode(target, &update.data) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(target: LOG_TARGET, "dropping update for {}: {err:?}", update.pubkey);
                continue;
            }
        };
        if !inner.apply(generation, snapshot, update.slot) {
            break;
        }
    }
    debug!(target: LOG_TARGET, "feed ended: {target:?}");
}
