//! Asynchronous observation path.
//!
//! Decoded responses are pushed onto a bounded feed as they arrive; a
//! separate dispatch loop drains the feed and forwards the interesting
//! sub-collections to a [`Reporter`]. The push is non-blocking and drops
//! on a full queue so a slow observer can never stall the call path.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::{Fort, GetInventoryResponse, GetMapObjectsResponse, GetPlayerResponse, WildCreature};

/// Default bound on undispatched feed entries.
pub const FEED_CAPACITY: usize = 256;

/// Decoded response kinds the feed understands. New kinds are added as
/// variants, never through open-ended type inspection.
#[derive(Debug, Clone)]
pub enum FeedEntry {
    MapObjects(GetMapObjectsResponse),
    Player(GetPlayerResponse),
    Inventory(GetInventoryResponse),
}

/// Inbox for decoded responses.
pub trait Feed: Send + Sync {
    /// Puts a response on the feed. Must never block the caller.
    fn push(&self, entry: FeedEntry);
}

impl<F: Feed + ?Sized> Feed for std::sync::Arc<F> {
    fn push(&self, entry: FeedEntry) {
        (**self).push(entry);
    }
}

/// Feed that discards everything.
pub struct VoidFeed;

impl Feed for VoidFeed {
    fn push(&self, _entry: FeedEntry) {}
}

/// Bounded feed over a tokio channel. When the queue is full the entry is
/// dropped rather than blocking the protocol path.
pub struct ChannelFeed {
    tx: mpsc::Sender<FeedEntry>,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FeedEntry>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Feed for ChannelFeed {
    fn push(&self, entry: FeedEntry) {
        if self.tx.try_send(entry).is_err() {
            debug!("feed full or closed, dropping entry");
        }
    }
}

/// Consumer of the collections extracted from feed entries.
pub trait Reporter: Send + Sync {
    fn wild_creatures(&self, creatures: &[WildCreature]);
    fn forts(&self, forts: &[Fort]);
}

/// Reporter that discards everything.
pub struct VoidReporter;

impl Reporter for VoidReporter {
    fn wild_creatures(&self, _creatures: &[WildCreature]) {}
    fn forts(&self, _forts: &[Fort]) {}
}

/// Drains the feed until every sender is gone, forwarding non-empty
/// creature and fort collections to the reporter. Entry kinds with
/// nothing to report are dropped without error.
pub async fn dispatch<R: Reporter>(mut rx: mpsc::Receiver<FeedEntry>, reporter: R) {
    while let Some(entry) = rx.recv().await {
        match entry {
            FeedEntry::MapObjects(map) => {
                let mut creatures = Vec::new();
                let mut forts = Vec::new();
                for cell in map.map_cells {
                    creatures.extend(cell.wild_creatures);
                    forts.extend(cell.forts);
                }
                if !creatures.is_empty() {
                    reporter.wild_creatures(&creatures);
                }
                if !forts.is_empty() {
                    reporter.forts(&forts);
                }
            }
            FeedEntry::Player(_) | FeedEntry::Inventory(_) => {}
        }
    }
    info!("feed closed, dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MapCell;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CollectingReporter {
        creatures: Arc<Mutex<Vec<WildCreature>>>,
        forts: Arc<Mutex<Vec<Fort>>>,
    }

    impl Reporter for CollectingReporter {
        fn wild_creatures(&self, creatures: &[WildCreature]) {
            self.creatures.lock().unwrap().extend_from_slice(creatures);
        }

        fn forts(&self, forts: &[Fort]) {
            self.forts.lock().unwrap().extend_from_slice(forts);
        }
    }

    fn map_response() -> GetMapObjectsResponse {
        GetMapObjectsResponse {
            map_cells: vec![
                MapCell {
                    s2_cell_id: 1,
                    current_timestamp_ms: 0,
                    wild_creatures: vec![WildCreature {
                        encounter_id: 7,
                        creature_id: 25,
                        ..Default::default()
                    }],
                    forts: vec![],
                },
                MapCell {
                    s2_cell_id: 2,
                    current_timestamp_ms: 0,
                    wild_creatures: vec![],
                    forts: vec![Fort {
                        id: "fort-1".into(),
                        enabled: true,
                        ..Default::default()
                    }],
                },
            ],
        }
    }

    #[test]
    fn full_feed_drops_without_blocking() {
        let (feed, mut rx) = ChannelFeed::new(2);
        for _ in 0..5 {
            feed.push(FeedEntry::Player(GetPlayerResponse::default()));
        }

        // The queue never grows past its capacity.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_extracts_creatures_and_forts() {
        let (feed, rx) = ChannelFeed::new(FEED_CAPACITY);
        let reporter = CollectingReporter::default();

        feed.push(FeedEntry::MapObjects(map_response()));
        feed.push(FeedEntry::Inventory(GetInventoryResponse::default()));
        drop(feed);

        dispatch(rx, reporter.clone()).await;

        let creatures = reporter.creatures.lock().unwrap();
        let forts = reporter.forts.lock().unwrap();
        assert_eq!(creatures.len(), 1);
        assert_eq!(creatures[0].creature_id, 25);
        assert_eq!(forts.len(), 1);
        assert_eq!(forts[0].id, "fort-1");
    }

    #[tokio::test]
    async fn dispatch_skips_empty_collections() {
        let (feed, rx) = ChannelFeed::new(FEED_CAPACITY);
        let reporter = CollectingReporter::default();

        feed.push(FeedEntry::MapObjects(GetMapObjectsResponse::default()));
        drop(feed);

        dispatch(rx, reporter.clone()).await;

        assert!(reporter.creatures.lock().unwrap().is_empty());
        assert!(reporter.forts.lock().unwrap().is_empty());
    }
}
