//! Sequenced order book synchronisation.
//!
//! Snapshots replace an instrument's book outright; updates are merged only
//! when they carry the immediate successor of the held sequence. Any other
//! sequence discards the local state until the venue sends a fresh snapshot.
//! Finished books are published into an [`OrderBookRegistry`] as whole
//! `Arc<OrderBook>` values, so readers only ever see complete states.

use crate::core::errors::ExchangeError;
use crate::core::types::{Price, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookDepth {
    /// Top of book only
    Level1,
    /// Full depth
    Level2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: BookSide,
    pub price: Price,
    /// Zero removes the level
    pub size: Quantity,
}

/// Authoritative full state for one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub instrument: String,
    pub sequence: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    /// Amend the listed levels, leaving the rest of the book untouched
    Merge,
    /// The changes are the complete top of book; a side absent from them is empty
    ReplaceTop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookUpdate {
    pub instrument: String,
    pub sequence: u64,
    pub action: UpdateAction,
    pub changes: Vec<LevelChange>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookMessage {
    Snapshot(OrderBookSnapshot),
    Update(OrderBookUpdate),
}

impl BookMessage {
    pub fn instrument(&self) -> &str {
        match self {
            Self::Snapshot(snapshot) => &snapshot.instrument,
            Self::Update(update) => &update.instrument,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub venue: String,
    pub instrument: String,
    pub depth: BookDepth,
}

impl BookKey {
    pub fn new(venue: impl Into<String>, instrument: impl Into<String>, depth: BookDepth) -> Self {
        Self {
            venue: venue.into(),
            instrument: instrument.into(),
            depth,
        }
    }
}

/// Published book state for one (venue, instrument, depth)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    pub venue: String,
    pub instrument: String,
    pub depth: BookDepth,
    pub bids: BTreeMap<Price, Quantity>,
    pub asks: BTreeMap<Price, Quantity>,
    pub last_sequence: u64,
    pub timestamp: Option<i64>,
    /// Set when a sequence gap invalidated this book; cleared by the next snapshot
    pub stale: bool,
}

impl OrderBook {
    fn from_snapshot(venue: &str, depth: BookDepth, snapshot: &OrderBookSnapshot) -> Self {
        let collect = |levels: &[PriceLevel]| -> BTreeMap<Price, Quantity> {
            levels
                .iter()
                .filter(|level| !level.size.is_zero())
                .map(|level| (level.price, level.size))
                .collect()
        };

        Self {
            venue: venue.to_string(),
            instrument: snapshot.instrument.clone(),
            depth,
            bids: collect(&snapshot.bids),
            asks: collect(&snapshot.asks),
            last_sequence: snapshot.sequence,
            timestamp: snapshot.timestamp,
            stale: false,
        }
    }

    fn side_mut(&mut self, side: BookSide) -> &mut BTreeMap<Price, Quantity> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    fn apply(&mut self, update: &OrderBookUpdate) {
        if update.action == UpdateAction::ReplaceTop {
            self.bids.clear();
            self.asks.clear();
        }

        for change in &update.changes {
            let levels = self.side_mut(change.side);
            if change.size.is_zero() {
                levels.remove(&change.price);
            } else {
                levels.insert(change.price, change.size);
            }
        }

        self.last_sequence = update.sequence;
        if update.timestamp.is_some() {
            self.timestamp = update.timestamp;
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
    }

    /// Bids best-first
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
            .collect()
    }

    /// Asks best-first
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .map(|(price, size)| PriceLevel { price: *price, size: *size })
            .collect()
    }
}

/// Shared store of published books.
///
/// Cloning is cheap and all clones see the same books. Each publish swaps in
/// a complete `Arc<OrderBook>`.
#[derive(Debug, Clone, Default)]
pub struct OrderBookRegistry {
    books: Arc<RwLock<HashMap<BookKey, Arc<OrderBook>>>>,
}

impl OrderBookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, book: OrderBook) {
        let key = BookKey::new(book.venue.clone(), book.instrument.clone(), book.depth);
        self.books
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(book));
    }

    pub fn get(&self, key: &BookKey) -> Option<Arc<OrderBook>> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Full depth book for `(venue, instrument)`
    pub fn level2(&self, venue: &str, instrument: &str) -> Option<Arc<OrderBook>> {
        self.get(&BookKey::new(venue, instrument, BookDepth::Level2))
    }

    /// Top of book for `(venue, instrument)`
    pub fn level1(&self, venue: &str, instrument: &str) -> Option<Arc<OrderBook>> {
        self.get(&BookKey::new(venue, instrument, BookDepth::Level1))
    }

    pub fn remove(&self, key: &BookKey) -> Option<Arc<OrderBook>> {
        self.books
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn len(&self) -> usize {
        self.books.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of feeding one update to the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Book advanced; `sequence` is the new last sequence
    Applied { sequence: u64 },
    /// Held in the reorder window until the gap before it closes
    Buffered { sequence: u64 },
    /// No usable book; waiting for a snapshot
    AwaitingSnapshot,
}

enum InstrumentState {
    Live {
        book: OrderBook,
        pending: BTreeMap<u64, OrderBookUpdate>,
    },
    AwaitingSnapshot {
        last_sequence: u64,
    },
}

/// Per-instrument sequencing for one venue and depth.
///
/// Owned by a single reader; distinct instruments are independent.
pub struct OrderBookSynchronizer {
    venue: String,
    depth: BookDepth,
    registry: OrderBookRegistry,
    reorder_window: usize,
    instruments: HashMap<String, InstrumentState>,
}

impl OrderBookSynchronizer {
    pub fn new(venue: impl Into<String>, depth: BookDepth, registry: OrderBookRegistry) -> Self {
        Self {
            venue: venue.into(),
            depth,
            registry,
            reorder_window: 0,
            instruments: HashMap::new(),
        }
    }

    /// Hold up to `window` out-of-order updates before giving up on a gap.
    ///
    /// Zero (the default) resnapshots on the first mismatch.
    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window;
        self
    }

    pub fn depth(&self) -> BookDepth {
        self.depth
    }

    pub fn registry(&self) -> &OrderBookRegistry {
        &self.registry
    }

    pub fn last_sequence(&self, instrument: &str) -> Option<u64> {
        self.instruments.get(instrument).map(|state| match state {
            InstrumentState::Live { book, .. } => book.last_sequence,
            InstrumentState::AwaitingSnapshot { last_sequence } => *last_sequence,
        })
    }

    pub fn is_live(&self, instrument: &str) -> bool {
        matches!(
            self.instruments.get(instrument),
            Some(InstrumentState::Live { .. })
        )
    }

    pub fn apply(&mut self, message: BookMessage) -> Result<ApplyOutcome, ExchangeError> {
        match message {
            BookMessage::Snapshot(snapshot) => Ok(self.apply_snapshot(&snapshot)),
            BookMessage::Update(update) => self.apply_update(update),
        }
    }

    /// Replace the held book unconditionally
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot) -> ApplyOutcome {
        let mut book = OrderBook::from_snapshot(&self.venue, self.depth, snapshot);

        let mut pending = match self.instruments.remove(&snapshot.instrument) {
            Some(InstrumentState::Live { pending, .. }) => pending,
            _ => BTreeMap::new(),
        };
        pending.retain(|sequence, _| *sequence > snapshot.sequence);
        Self::drain_pending(&mut book, &mut pending);

        debug!(
            venue = %self.venue,
            instrument = %snapshot.instrument,
            sequence = book.last_sequence,
            "order book snapshot applied"
        );

        let sequence = book.last_sequence;
        self.registry.publish(book.clone());
        self.instruments.insert(
            snapshot.instrument.clone(),
            InstrumentState::Live { book, pending },
        );
        ApplyOutcome::Applied { sequence }
    }

    /// Merge an incremental update if it is the immediate successor.
    ///
    /// A sequence mismatch drops the local book, leaves the published book at
    /// its last consistent state marked `stale` and returns `SequenceGap`;
    /// later updates are ignored until the next snapshot.
    pub fn apply_update(&mut self, update: OrderBookUpdate) -> Result<ApplyOutcome, ExchangeError> {
        let Some(state) = self.instruments.get_mut(&update.instrument) else {
            return Ok(ApplyOutcome::AwaitingSnapshot);
        };

        let InstrumentState::Live { book, pending } = state else {
            return Ok(ApplyOutcome::AwaitingSnapshot);
        };

        // Nothing can follow u64::MAX, so every update after it is a gap
        let successor = book.last_sequence.checked_add(1);
        match successor {
            Some(expected) if update.sequence == expected => {
                book.apply(&update);
                Self::drain_pending(book, pending);
                let sequence = book.last_sequence;
                self.registry.publish(book.clone());
                return Ok(ApplyOutcome::Applied { sequence });
            }
            Some(expected) if update.sequence > expected && pending.len() < self.reorder_window => {
                let sequence = update.sequence;
                pending.insert(sequence, update);
                debug!(
                    venue = %self.venue,
                    instrument = %book.instrument,
                    expected,
                    sequence,
                    "buffering out-of-order update"
                );
                return Ok(ApplyOutcome::Buffered { sequence });
            }
            _ => {}
        }

        let expected = successor.unwrap_or(u64::MAX);
        let last_sequence = book.last_sequence;
        let mut published = book.clone();
        published.stale = true;
        self.registry.publish(published);
        warn!(
            venue = %self.venue,
            instrument = %update.instrument,
            expected,
            received = update.sequence,
            "sequence gap, discarding book until next snapshot"
        );
        *state = InstrumentState::AwaitingSnapshot { last_sequence };

        Err(ExchangeError::SequenceGap {
            instrument: update.instrument,
            expected,
            received: update.sequence,
        })
    }

    fn drain_pending(book: &mut OrderBook, pending: &mut BTreeMap<u64, OrderBookUpdate>) {
        while let Some(update) = book
            .last_sequence
            .checked_add(1)
            .and_then(|next| pending.remove(&next))
        {
            book.apply(&update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn level(price: i64, size: i64) -> PriceLevel {
        PriceLevel {
            price: Price::new(Decimal::from(price)),
            size: Quantity::new(Decimal::from(size)),
        }
    }

    fn change(side: BookSide, price: i64, size: i64) -> LevelChange {
        LevelChange {
            side,
            price: Price::new(Decimal::from(price)),
            size: Quantity::new(Decimal::from(size)),
        }
    }

    fn snapshot(sequence: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            instrument: "BTC-PERP".to_string(),
            sequence,
            bids: vec![level(100, 1), level(99, 2)],
            asks: vec![level(101, 1), level(102, 3)],
            timestamp: Some(1),
        }
    }

    fn update(sequence: u64, changes: Vec<LevelChange>) -> OrderBookUpdate {
        OrderBookUpdate {
            instrument: "BTC-PERP".to_string(),
            sequence,
            action: UpdateAction::Merge,
            changes,
            timestamp: None,
        }
    }

    fn synchronizer() -> OrderBookSynchronizer {
        OrderBookSynchronizer::new("venue", BookDepth::Level2, OrderBookRegistry::new())
    }

    #[test]
    fn test_snapshot_then_successor_update() {
        let mut sync = synchronizer();
        sync.apply_snapshot(&snapshot(5));

        let outcome = sync
            .apply_update(update(
                6,
                vec![change(BookSide::Bid, 99, 0), change(BookSide::Ask, 101, 4)],
            ))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { sequence: 6 });

        let book = sync.registry().level2("venue", "BTC-PERP").unwrap();
        assert_eq!(book.last_sequence, 6);
        assert_eq!(book.bid_levels(), vec![level(100, 1)]);
        assert_eq!(book.best_ask(), Some(level(101, 4)));
    }

    #[test]
    fn test_gap_keeps_levels_and_marks_book_stale() {
        let mut sync = synchronizer();
        sync.apply_snapshot(&snapshot(5));
        sync.apply_update(update(6, vec![change(BookSide::Bid, 98, 5)]))
            .unwrap();
        let before = sync.registry().level2("venue", "BTC-PERP").unwrap();

        let result = sync.apply_update(update(8, vec![change(BookSide::Bid, 97, 1)]));
        assert!(matches!(
            result,
            Err(ExchangeError::SequenceGap {
                expected: 7,
                received: 8,
                ..
            })
        ));

        let after = sync.registry().level2("venue", "BTC-PERP").unwrap();
        assert!(!before.stale);
        assert!(after.stale);
        assert_eq!(after.bids, before.bids);
        assert_eq!(after.asks, before.asks);
        assert_eq!(after.last_sequence, 6);
        assert!(!sync.is_live("BTC-PERP"));

        // the missing update no longer helps, only a snapshot does
        let late = sync.apply_update(update(7, vec![])).unwrap();
        assert_eq!(late, ApplyOutcome::AwaitingSnapshot);

        sync.apply_snapshot(&snapshot(20));
        assert!(sync.is_live("BTC-PERP"));
        assert_eq!(sync.last_sequence("BTC-PERP"), Some(20));
        assert!(!sync.registry().level2("venue", "BTC-PERP").unwrap().stale);
    }

    #[test]
    fn test_update_after_max_sequence_is_a_gap() {
        let mut sync = synchronizer().with_reorder_window(4);
        sync.apply_snapshot(&snapshot(u64::MAX));

        let result = sync.apply_update(update(u64::MAX, vec![]));
        assert!(matches!(
            result,
            Err(ExchangeError::SequenceGap {
                expected: u64::MAX,
                received: u64::MAX,
                ..
            })
        ));
        assert!(!sync.is_live("BTC-PERP"));
    }

    #[test]
    fn test_stale_update_forces_resnapshot() {
        let mut sync = synchronizer();
        sync.apply_snapshot(&snapshot(5));
        assert!(sync.apply_update(update(5, vec![])).is_err());
        assert!(!sync.is_live("BTC-PERP"));
    }

    #[test]
    fn test_update_before_snapshot_waits() {
        let mut sync = synchronizer();
        let outcome = sync.apply_update(update(1, vec![])).unwrap();
        assert_eq!(outcome, ApplyOutcome::AwaitingSnapshot);
        assert!(sync.registry().is_empty());
    }

    #[test]
    fn test_reorder_window_closes_gap() {
        let mut sync = synchronizer().with_reorder_window(4);
        sync.apply_snapshot(&snapshot(5));

        let buffered = sync
            .apply_update(update(7, vec![change(BookSide::Ask, 103, 1)]))
            .unwrap();
        assert_eq!(buffered, ApplyOutcome::Buffered { sequence: 7 });
        assert_eq!(
            sync.registry().level2("venue", "BTC-PERP").unwrap().last_sequence,
            5
        );

        let applied = sync
            .apply_update(update(6, vec![change(BookSide::Ask, 101, 0)]))
            .unwrap();
        assert_eq!(applied, ApplyOutcome::Applied { sequence: 7 });

        let book = sync.registry().level2("venue", "BTC-PERP").unwrap();
        assert_eq!(book.ask_levels(), vec![level(102, 3), level(103, 1)]);
    }

    #[test]
    fn test_reorder_window_overflow_forces_resnapshot() {
        let mut sync = synchronizer().with_reorder_window(1);
        sync.apply_snapshot(&snapshot(5));
        sync.apply_update(update(7, vec![])).unwrap();
        assert!(sync.apply_update(update(8, vec![])).is_err());
        assert!(!sync.is_live("BTC-PERP"));
    }

    #[test]
    fn test_level1_replace_top() {
        let registry = OrderBookRegistry::new();
        let mut sync = OrderBookSynchronizer::new("venue", BookDepth::Level1, registry.clone());
        sync.apply_snapshot(&OrderBookSnapshot {
            instrument: "ETH-PERP".to_string(),
            sequence: 1,
            bids: vec![level(10, 1)],
            asks: vec![level(11, 1)],
            timestamp: None,
        });

        sync.apply_update(OrderBookUpdate {
            instrument: "ETH-PERP".to_string(),
            sequence: 2,
            action: UpdateAction::ReplaceTop,
            changes: vec![change(BookSide::Bid, 9, 2), change(BookSide::Ask, 12, 5)],
            timestamp: Some(2),
        })
        .unwrap();

        let book = registry.level1("venue", "ETH-PERP").unwrap();
        assert_eq!(book.bid_levels(), vec![level(9, 2)]);
        assert_eq!(book.ask_levels(), vec![level(12, 5)]);
        assert!(registry.level2("venue", "ETH-PERP").is_none());

        // An empty ask side on the next frame empties the ask side of the book
        sync.apply_update(OrderBookUpdate {
            instrument: "ETH-PERP".to_string(),
            sequence: 3,
            action: UpdateAction::ReplaceTop,
            changes: vec![change(BookSide::Bid, 8, 1)],
            timestamp: Some(3),
        })
        .unwrap();

        let book = registry.level1("venue", "ETH-PERP").unwrap();
        assert_eq!(book.bid_levels(), vec![level(8, 1)]);
        assert!(book.ask_levels().is_empty());
    }

    #[test]
    fn test_instruments_are_independent() {
        let mut sync = synchronizer();
        sync.apply_snapshot(&snapshot(5));
        sync.apply_snapshot(&OrderBookSnapshot {
            instrument: "ETH-PERP".to_string(),
            ..snapshot(50)
        });

        assert!(sync.apply_update(update(9, vec![])).is_err());
        assert!(sync.is_live("ETH-PERP"));
        assert_eq!(sync.last_sequence("ETH-PERP"), Some(50));
    }
}
