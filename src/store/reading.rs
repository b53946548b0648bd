//! latest-reading table keyed by (container, rack)
//!
//! last write wins by *arrival*: `captured_at` is carried but never
//! consulted, since the push feed is not ordered by capture time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::domain::{ChartPoint, ReadingKey, SensorReading};

use super::{read_lock, write_lock};

#[derive(Debug, Default)]
pub struct ReadingStore {
    latest: HashMap<ReadingKey, SensorReading>,
    history: HashMap<ReadingKey, VecDeque<ChartPoint>>,
    history_capacity: usize,
}

impl ReadingStore {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            latest: HashMap::new(),
            history: HashMap::new(),
            history_capacity,
        }
    }

    /// replace whatever is stored for the reading's key
    ///
    /// returns false (and stores nothing) when either id is empty.
    pub fn upsert(&mut self, reading: SensorReading) -> bool {
        if reading.container_id.is_empty() || reading.rack_id.is_empty() {
            return false;
        }

        let key = reading.key();
        if self.history_capacity > 0 {
            let points = self.history.entry(key.clone()).or_default();
            // re-applying the reading we already hold must not grow the chart
            if self.latest.get(&key) != Some(&reading) {
                if points.len() == self.history_capacity {
                    points.pop_front();
                }
                points.push_back(ChartPoint::from(&reading));
            }
        }
        self.latest.insert(key, reading);
        true
    }

    pub fn get(&self, container_id: &str, rack_id: &str) -> Option<&SensorReading> {
        self.latest.get(&ReadingKey::new(container_id, rack_id))
    }

    /// chart points for one rack, oldest first
    pub fn history(&self, container_id: &str, rack_id: &str) -> Vec<ChartPoint> {
        self.history
            .get(&ReadingKey::new(container_id, rack_id))
            .map(|points| points.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// every latest reading, sorted by key
    pub fn readings(&self) -> Vec<SensorReading> {
        let mut all: Vec<_> = self.latest.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }
}

// ==============================================================================
// shared handles
// ==============================================================================
// one view owns the writer; every widget of that view gets a reader.
// the `open` flag lives under the same lock as the table, so once close()
// returns no writer can land another upsert.

#[derive(Debug)]
struct Slot {
    store: ReadingStore,
    open: bool,
}

/// write side, held only by the view's event loop
#[derive(Debug, Clone)]
pub struct ReadingWriter {
    slot: Arc<RwLock<Slot>>,
}

/// read side handed to rendering code
#[derive(Debug, Clone)]
pub struct ReadingReader {
    slot: Arc<RwLock<Slot>>,
}

pub fn shared(history_capacity: usize) -> (ReadingWriter, ReadingReader) {
    let slot = Arc::new(RwLock::new(Slot {
        store: ReadingStore::new(history_capacity),
        open: true,
    }));
    (
        ReadingWriter { slot: slot.clone() },
        ReadingReader { slot },
    )
}

impl ReadingWriter {
    /// false when discarded (bad ids) or the view is already closed
    pub fn upsert(&self, reading: SensorReading) -> bool {
        let mut slot = write_lock(&self.slot);
        if !slot.open {
            return false;
        }
        slot.store.upsert(reading)
    }

    pub fn close(&self) {
        write_lock(&self.slot).open = false;
    }

    pub fn is_open(&self) -> bool {
        read_lock(&self.slot).open
    }
}

impl ReadingReader {
    pub fn get(&self, container_id: &str, rack_id: &str) -> Option<SensorReading> {
        read_lock(&self.slot).store.get(container_id, rack_id).cloned()
    }

    pub fn history(&self, container_id: &str, rack_id: &str) -> Vec<ChartPoint> {
        read_lock(&self.slot).store.history(container_id, rack_id)
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        read_lock(&self.slot).store.readings()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.slot).store.len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.slot).store.is_empty()
    }
}
