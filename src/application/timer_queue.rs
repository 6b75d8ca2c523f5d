use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimer<K, A> {
    pub key: K,
    pub action: A,
    pub deadline: DateTime<Utc>,
}

/// Cancellable delayed work items, ordered by deadline then by scheduling order.
///
/// Nothing here runs on its own: the owner pops due entries and executes them.
/// Cancelling removes entries outright, so a cancelled item can never be popped.
#[derive(Debug)]
pub struct TimerQueue<K, A> {
    next_id: u64,
    entries: BTreeMap<(DateTime<Utc>, TimerId), (K, A)>,
    by_key: HashMap<K, Vec<(DateTime<Utc>, TimerId)>>,
}

impl<K, A> Default for TimerQueue<K, A> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<K, A> TimerQueue<K, A>
where
    K: Clone + Eq + Hash,
{
    pub fn schedule(&mut self, key: K, deadline: DateTime<Utc>, action: A) {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_key
            .entry(key.clone())
            .or_default()
            .push((deadline, id));
        self.entries.insert((deadline, id), (key, action));
    }

    /// Cancels every pending item for `key`, returning how many were dropped.
    pub fn cancel(&mut self, key: &K) -> usize {
        let Some(slots) = self.by_key.remove(key) else {
            return 0;
        };
        slots
            .into_iter()
            .filter(|slot| self.entries.remove(slot).is_some())
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
    }

    /// Removes and returns the earliest item whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<DueTimer<K, A>> {
        let (&(deadline, id), _) = self.entries.first_key_value()?;
        if deadline > now {
            return None;
        }
        let (key, action) = self.entries.remove(&(deadline, id))?;
        if let Some(slots) = self.by_key.get_mut(&key) {
            slots.retain(|slot| *slot != (deadline, id));
            if slots.is_empty() {
                self.by_key.remove(&key);
            }
        }
        Some(DueTimer {
            key,
            action,
            deadline,
        })
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn pending_for(&self, key: &K) -> usize {
        self.by_key.get(key).map_or(0, Vec::len)
    }

    /// Pending items for `key` as (deadline, action) pairs in firing order.
    pub fn pending_entries(&self, key: &K) -> Vec<(DateTime<Utc>, &A)> {
        let mut slots = self.by_key.get(key).cloned().unwrap_or_default();
        slots.sort();
        slots
            .into_iter()
            .filter_map(|slot| self.entries.get(&slot).map(|(_, action)| (slot.0, action)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn pops_in_deadline_order_and_only_when_due() {
        let mut queue = TimerQueue::default();
        queue.schedule("b", base() + Duration::seconds(20), "late");
        queue.schedule("a", base() + Duration::seconds(10), "early");

        assert_eq!(queue.next_deadline(), Some(base() + Duration::seconds(10)));
        assert!(queue.pop_due(base() + Duration::seconds(9)).is_none());

        let first = queue
            .pop_due(base() + Duration::seconds(30))
            .expect("first due");
        let second = queue
            .pop_due(base() + Duration::seconds(30))
            .expect("second due");
        assert_eq!((first.key, first.action), ("a", "early"));
        assert_eq!((second.key, second.action), ("b", "late"));
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn equal_deadlines_fire_in_scheduling_order() {
        let mut queue = TimerQueue::default();
        let at = base();
        queue.schedule("x", at, 1);
        queue.schedule("y", at, 2);
        queue.schedule("x", at, 3);

        let fired = std::iter::from_fn(|| queue.pop_due(at))
            .map(|due| due.action)
            .collect::<Vec<_>>();
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn cancel_removes_only_the_given_key() {
        let mut queue = TimerQueue::default();
        queue.schedule("a", base(), "block");
        queue.schedule("a", base() + Duration::seconds(600), "clear");
        queue.schedule("b", base(), "block");

        assert_eq!(queue.cancel(&"a"), 2);
        assert_eq!(queue.cancel(&"a"), 0);
        assert_eq!(queue.pending_for(&"a"), 0);
        assert_eq!(queue.pending_for(&"b"), 1);
        assert_eq!(queue.next_deadline(), Some(base()));
    }

    #[test]
    fn cancelled_items_are_never_popped() {
        let mut queue = TimerQueue::default();
        queue.schedule("a", base(), "stale");
        queue.cancel(&"a");
        queue.schedule("a", base() + Duration::seconds(5), "fresh");

        assert!(queue.pop_due(base() + Duration::seconds(1)).is_none());
        let due = queue
            .pop_due(base() + Duration::seconds(5))
            .expect("fresh timer");
        assert_eq!(due.action, "fresh");
    }

    #[test]
    fn pending_entries_lists_deadlines_in_order() {
        let mut queue = TimerQueue::default();
        queue.schedule("a", base() + Duration::seconds(600), "clear");
        queue.schedule("a", base(), "block");

        let pending = queue.pending_entries(&"a");
        assert_eq!(
            pending,
            vec![(base(), &"block"), (base() + Duration::seconds(600), &"clear")]
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = TimerQueue::default();
        queue.schedule("a", base(), 1);
        queue.schedule("b", base(), 2);
        queue.clear();
        assert_eq!(queue.next_deadline(), None);
        assert_eq!(queue.pending_for(&"a"), 0);
    }
}
