use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Named counter sequences used by counter transformations. Owned by one
/// runtime, reset at the start of a run unless the caller continues the
/// previous sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterRegistry {
    next: HashMap<String, i64>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next value of `key`, starting at `start` for an unseen key.
    pub fn next(&mut self, key: &str, start: i64) -> i64 {
        let slot = self.next.entry(key.to_string()).or_insert(start);
        let value = *slot;
        *slot += 1;
        value
    }

    /// Value the next call to [`next`](Self::next) would return.
    pub fn peek(&self, key: &str) -> Option<i64> {
        self.next.get(key).copied()
    }

    pub fn reset(&mut self) {
        self.next.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_independent_and_resettable() {
        let mut counters = CounterRegistry::new();
        assert_eq!(counters.next("a", 10), 10);
        assert_eq!(counters.next("a", 10), 11);
        assert_eq!(counters.next("b", 0), 0);
        assert_eq!(counters.peek("a"), Some(12));
        counters.reset();
        assert!(counters.is_empty());
        assert_eq!(counters.next("a", 10), 10);
    }
}
