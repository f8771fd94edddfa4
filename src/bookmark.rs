//! Process-wide causal token registry.
//!
//! The only mutable state shared between requests. Every new session is
//! seeded with the current tokens for its database, and every successful
//! commit supersedes the tokens that session consumed. This is what gives
//! read-your-writes consistency across independently issued HTTP requests:
//! each request otherwise starts a brand-new session with no memory of
//! prior ones.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::driver::Bookmark;

#[derive(Default)]
pub struct BookmarkManager {
    // One slot per database name; the entry lock serializes mutation per
    // key, so independent databases never contend.
    slots: DashMap<String, HashSet<Bookmark>>,
}

impl BookmarkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest known tokens for `database`, empty if no write was ever
    /// observed through this gateway.
    pub fn current(&self, database: &str) -> Vec<Bookmark> {
        self.slots
            .get(database)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Merges a freshly minted token into the slot for `database`.
    ///
    /// `seeded` is the set the committing session was opened with: those
    /// tokens are causally covered by `bookmark` and are removed. Tokens
    /// recorded by concurrent, unrelated commits stay until a later
    /// session observes them too.
    pub fn record(&self, database: &str, seeded: &[Bookmark], bookmark: Bookmark) {
        let mut slot = self.slots.entry(database.to_string()).or_default();
        for old in seeded {
            slot.remove(old);
        }
        slot.insert(bookmark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bm(token: &str) -> Bookmark {
        Bookmark::new(token)
    }

    #[test]
    fn test_empty_until_first_record() {
        let manager = BookmarkManager::new();
        assert!(manager.current("db").is_empty());
    }

    #[test]
    fn test_record_supersedes_seeded_tokens() {
        let manager = BookmarkManager::new();
        manager.record("db", &[], bm("b1"));
        assert_eq!(manager.current("db"), vec![bm("b1")]);

        let seeded = manager.current("db");
        manager.record("db", &seeded, bm("b2"));
        assert_eq!(manager.current("db"), vec![bm("b2")]);
    }

    #[test]
    fn test_concurrent_unrelated_commits_accumulate() {
        let manager = BookmarkManager::new();
        // Two sessions both opened before any record: each was seeded with
        // nothing, so neither token covers the other.
        manager.record("db", &[], bm("b1"));
        manager.record("db", &[], bm("b2"));

        let mut current = manager.current("db");
        current.sort();
        assert_eq!(current, vec![bm("b1"), bm("b2")]);

        // A commit seeded with both collapses the set again.
        let seeded = manager.current("db");
        manager.record("db", &seeded, bm("b3"));
        assert_eq!(manager.current("db"), vec![bm("b3")]);
    }

    #[test]
    fn test_databases_are_independent() {
        let manager = BookmarkManager::new();
        manager.record("a", &[], bm("b1"));
        assert!(manager.current("b").is_empty());
        assert_eq!(manager.current("a"), vec![bm("b1")]);
    }

    #[test]
    fn test_record_is_safe_under_contention() {
        let manager = Arc::new(BookmarkManager::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        manager.record("db", &[], bm(&format!("t{}-{}", i, j)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manager.current("db").len(), 800);
    }
}
