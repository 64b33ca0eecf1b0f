//! Per-connection subscription set.
//!
//! The set is written only by the connection's inbound pump. The hub reads it
//! during fan-out to decide whether a room update concerns the connection.
//! Subscribing to the same room twice is allowed and counts against the
//! capacity twice; membership is unaffected by duplicates.

use crate::region::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;

/// Subscription set shared between a connection's inbound pump (writer) and the hub (reader).
pub type SharedSubscriptions = Arc<RwLock<SubscriptionSet>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("subscribing to {requested} room(s) with {current} active would exceed the limit of {capacity}")]
    CapacityExceeded {
        requested: usize,
        current: usize,
        capacity: usize,
    },
}

/// Bounded multiset of room ids.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    counts: HashMap<RoomId, usize>,
    len: usize,
    capacity: usize,
}

impl SubscriptionSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: HashMap::with_capacity(capacity),
            len: 0,
            capacity,
        }
    }

    pub fn shared(capacity: usize) -> SharedSubscriptions {
        Arc::new(RwLock::new(Self::with_capacity(capacity)))
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.counts.contains_key(room_id)
    }

    /// Adds one entry if the set is below capacity.
    pub fn try_add(&mut self, room_id: RoomId) -> Result<(), SubscriptionError> {
        self.try_add_all(std::slice::from_ref(&room_id))
    }

    /// Adds every id of the batch, or none of them if the batch would not fit.
    pub fn try_add_all(&mut self, room_ids: &[RoomId]) -> Result<(), SubscriptionError> {
        if self.len + room_ids.len() > self.capacity {
            return Err(SubscriptionError::CapacityExceeded {
                requested: room_ids.len(),
                current: self.len,
                capacity: self.capacity,
            });
        }
        for room_id in room_ids {
            *self.counts.entry(*room_id).or_insert(0) += 1;
        }
        self.len += room_ids.len();
        Ok(())
    }

    /// Removes a single occurrence of `room_id`. Returns false if it was not subscribed.
    pub fn remove(&mut self, room_id: &RoomId) -> bool {
        let Some(count) = self.counts.get_mut(room_id) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(room_id);
        }
        self.len -= 1;
        true
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.len = 0;
    }

    /// Distinct subscribed rooms, in no particular order.
    pub fn rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.counts.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(range: std::ops::Range<i32>) -> Vec<RoomId> {
        range.map(|q| RoomId::new(q, 0)).collect()
    }

    fn distinct(set: &SubscriptionSet) -> HashSet<RoomId> {
        set.rooms().copied().collect()
    }

    #[test]
    fn single_subscribe_stops_at_capacity() {
        let mut set = SubscriptionSet::with_capacity(100);
        for room_id in ids(0..100) {
            set.try_add(room_id).expect("below capacity");
        }

        let err = set.try_add(RoomId::new(500, 500)).unwrap_err();
        assert_eq!(
            err,
            SubscriptionError::CapacityExceeded { requested: 1, current: 100, capacity: 100 }
        );
        assert_eq!(set.len(), 100);
        assert!(!set.contains(&RoomId::new(500, 500)));
    }

    #[test]
    fn oversized_batch_is_rejected_whole() {
        let mut set = SubscriptionSet::with_capacity(100);
        set.try_add_all(&ids(0..60)).unwrap();

        assert!(set.try_add_all(&ids(60..101)).is_err());
        assert_eq!(set.len(), 60);
        assert!(!set.contains(&RoomId::new(60, 0)));

        set.try_add_all(&ids(60..100)).expect("exactly fills the set");
        assert_eq!(set.len(), 100);
    }

    #[test]
    fn removing_absent_room_is_a_noop() {
        let mut set = SubscriptionSet::with_capacity(10);
        set.try_add_all(&ids(0..3)).unwrap();

        assert!(!set.remove(&RoomId::new(7, 7)));
        assert_eq!(set.len(), 3);
        assert_eq!(distinct(&set), ids(0..3).into_iter().collect());
    }

    #[test]
    fn removing_duplicate_drops_one_occurrence() {
        let mut set = SubscriptionSet::with_capacity(10);
        let room = RoomId::new(1, 1);
        set.try_add_all(&[room, RoomId::new(2, 2), room]).unwrap();
        assert_eq!(set.len(), 3);

        assert!(set.remove(&room));
        assert!(set.contains(&room));
        assert_eq!(set.len(), 2);
        assert_eq!(distinct(&set), HashSet::from([room, RoomId::new(2, 2)]));

        assert!(set.remove(&room));
        assert!(!set.contains(&room));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn clear_then_subscribe_holds_only_new_rooms() {
        let mut set = SubscriptionSet::with_capacity(100);
        set.try_add_all(&ids(0..100)).unwrap();
        set.clear();
        assert!(set.is_empty());

        set.try_add_all(&[RoomId::new(-4, 2), RoomId::new(9, 9)]).unwrap();
        assert_eq!(distinct(&set), HashSet::from([RoomId::new(-4, 2), RoomId::new(9, 9)]));
        assert_eq!(set.len(), 2);
    }
}
