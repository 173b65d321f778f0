// Fixed-capacity slot table for relay participants.
//
// `SlotTable` is the relay's only registry of live endpoints. Slot 0 holds
// the monitor link for the whole run; slots 1..capacity hold clients. The
// table performs no I/O: it is generic over the endpoint type so tests can
// fill it with plain values, and it hands endpoints back by value on
// `vacate`/`drain` so the caller closes them before the slot can be reused.
//
// Free client slots live in an ordered set, so `find_free_slot` is a single
// deterministic first-fit choice (the lowest free index), and the acceptor
// uses the same function for both "is there room?" and "where does it go?".
//
// Every occupancy is stamped with a fresh `EndpointToken`. Reader threads tag
// their events with the token they were spawned for, which lets the
// multiplexer discard events from an endpoint that has since been vacated
// even if its slot index has been reused.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use crate::error::SlotError;

/// Index of a slot in `[0, capacity)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// The slot permanently reserved for the monitor link.
    pub const MONITOR: SlotIndex = SlotIndex(0);

    pub fn is_monitor(self) -> bool {
        self == Self::MONITOR
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Identity of one occupancy of one slot. Never reused within a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointToken(pub u64);

/// An occupied slot.
#[derive(Debug)]
pub struct Slot<E> {
    pub endpoint: E,
    /// Peer address, recorded for client slots when address reporting is on.
    pub label: Option<SocketAddr>,
    pub token: EndpointToken,
}

pub struct SlotTable<E> {
    slots: Vec<Option<Slot<E>>>,
    free: BTreeSet<usize>,
    next_token: u64,
}

impl<E> SlotTable<E> {
    /// Create a table of `capacity` slots with `monitor` installed in slot 0.
    ///
    /// Panics if `capacity < 2`; `RelayConfig::validate` rejects such configs
    /// before a table is ever built.
    pub fn new(capacity: usize, monitor: E) -> Self {
        assert!(capacity >= 2, "slot table needs room for the monitor and a client");
        let mut slots = Vec::with_capacity(capacity);
        slots.push(Some(Slot {
            endpoint: monitor,
            label: None,
            token: EndpointToken(0),
        }));
        slots.resize_with(capacity, || None);
        Self {
            slots,
            free: (1..capacity).collect(),
            next_token: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest free client slot, if any. Slot 0 is never returned.
    pub fn find_free_slot(&self) -> Option<SlotIndex> {
        self.free.first().copied().map(SlotIndex)
    }

    /// Install `endpoint` in the free client slot `index`.
    pub fn occupy(
        &mut self,
        index: SlotIndex,
        endpoint: E,
        label: Option<SocketAddr>,
    ) -> Result<EndpointToken, SlotError> {
        if index.is_monitor() {
            return Err(SlotError::Reserved(index));
        }
        if index.0 >= self.slots.len() {
            return Err(SlotError::OutOfRange {
                index,
                capacity: self.slots.len(),
            });
        }
        if !self.free.remove(&index.0) {
            return Err(SlotError::Occupied(index));
        }
        let token = EndpointToken(self.next_token);
        self.next_token += 1;
        self.slots[index.0] = Some(Slot {
            endpoint,
            label,
            token,
        });
        Ok(token)
    }

    /// Remove and return the occupant of `index`. A vacated client slot
    /// becomes free again; slot 0 never re-enters the free set.
    pub fn vacate(&mut self, index: SlotIndex) -> Option<Slot<E>> {
        let slot = self.slots.get_mut(index.0)?.take()?;
        if !index.is_monitor() {
            self.free.insert(index.0);
        }
        Some(slot)
    }

    /// Occupied indices in increasing order.
    pub fn occupied_indices(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| SlotIndex(i))
            .collect()
    }

    pub fn get(&self, index: SlotIndex) -> Option<&Slot<E>> {
        self.slots.get(index.0)?.as_ref()
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut Slot<E>> {
        self.slots.get_mut(index.0)?.as_mut()
    }

    /// Token of the current occupant of `index`.
    pub fn token(&self, index: SlotIndex) -> Option<EndpointToken> {
        self.get(index).map(|slot| slot.token)
    }

    pub fn client_count(&self) -> usize {
        self.slots[1..].iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Empty the whole table, monitor included, in index order.
    pub fn drain(&mut self) -> Vec<(SlotIndex, Slot<E>)> {
        let drained = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.take().map(|s| (SlotIndex(i), s)))
            .collect();
        self.free = (1..self.slots.len()).collect();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> SlotTable<&'static str> {
        SlotTable::new(capacity, "monitor")
    }

    #[test]
    fn monitor_occupies_slot_zero() {
        let t = table(4);
        assert_eq!(t.occupied_indices(), vec![SlotIndex::MONITOR]);
        assert_eq!(t.get(SlotIndex::MONITOR).unwrap().endpoint, "monitor");
        assert_eq!(t.client_count(), 0);
    }

    #[test]
    fn find_free_slot_is_first_fit() {
        let mut t = table(4);
        assert_eq!(t.find_free_slot(), Some(SlotIndex(1)));
        t.occupy(SlotIndex(1), "a", None).unwrap();
        t.occupy(SlotIndex(2), "b", None).unwrap();
        t.occupy(SlotIndex(3), "c", None).unwrap();
        assert_eq!(t.find_free_slot(), None);
        assert!(t.is_full());

        // Freeing 3 then 1: the lowest index wins, not the most recent.
        t.vacate(SlotIndex(3)).unwrap();
        t.vacate(SlotIndex(1)).unwrap();
        assert_eq!(t.find_free_slot(), Some(SlotIndex(1)));
    }

    #[test]
    fn occupy_rejects_reserved_and_occupied_slots() {
        let mut t = table(3);
        assert_eq!(
            t.occupy(SlotIndex::MONITOR, "x", None),
            Err(SlotError::Reserved(SlotIndex::MONITOR))
        );
        t.occupy(SlotIndex(1), "a", None).unwrap();
        assert_eq!(
            t.occupy(SlotIndex(1), "b", None),
            Err(SlotError::Occupied(SlotIndex(1)))
        );
        assert_eq!(
            t.occupy(SlotIndex(7), "c", None),
            Err(SlotError::OutOfRange {
                index: SlotIndex(7),
                capacity: 3
            })
        );
        // The failed attempts left the table untouched.
        assert_eq!(t.get(SlotIndex(1)).unwrap().endpoint, "a");
        assert_eq!(t.client_count(), 1);
    }

    #[test]
    fn vacate_returns_occupant_and_frees_slot() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let mut t = table(3);
        t.occupy(SlotIndex(1), "a", Some(addr)).unwrap();

        let slot = t.vacate(SlotIndex(1)).unwrap();
        assert_eq!(slot.endpoint, "a");
        assert_eq!(slot.label, Some(addr));
        assert!(t.get(SlotIndex(1)).is_none());
        assert!(t.vacate(SlotIndex(1)).is_none());
        assert_eq!(t.find_free_slot(), Some(SlotIndex(1)));
    }

    #[test]
    fn reused_slot_gets_fresh_token() {
        let mut t = table(2);
        let first = t.occupy(SlotIndex(1), "a", None).unwrap();
        t.vacate(SlotIndex(1)).unwrap();
        let second = t.occupy(SlotIndex(1), "b", None).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, t.token(SlotIndex::MONITOR).unwrap());
        assert_eq!(t.token(SlotIndex(1)), Some(second));
    }

    #[test]
    fn vacated_monitor_slot_is_never_offered() {
        let mut t = table(2);
        t.vacate(SlotIndex::MONITOR).unwrap();
        assert_eq!(t.find_free_slot(), Some(SlotIndex(1)));
        t.occupy(SlotIndex(1), "a", None).unwrap();
        assert_eq!(t.find_free_slot(), None);
    }

    #[test]
    fn occupied_indices_are_ordered() {
        let mut t = table(6);
        t.occupy(SlotIndex(4), "d", None).unwrap();
        t.occupy(SlotIndex(2), "b", None).unwrap();
        assert_eq!(
            t.occupied_indices(),
            vec![SlotIndex(0), SlotIndex(2), SlotIndex(4)]
        );
    }

    #[test]
    fn drain_empties_everything_in_order() {
        let mut t = table(4);
        t.occupy(SlotIndex(3), "c", None).unwrap();
        t.occupy(SlotIndex(1), "a", None).unwrap();
        let drained: Vec<(SlotIndex, &str)> = t
            .drain()
            .into_iter()
            .map(|(i, slot)| (i, slot.endpoint))
            .collect();
        assert_eq!(
            drained,
            vec![
                (SlotIndex(0), "monitor"),
                (SlotIndex(1), "a"),
                (SlotIndex(3), "c")
            ]
        );
        assert!(t.occupied_indices().is_empty());
    }
}
