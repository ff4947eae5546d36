//! Callsite deduplication for repeated warnings.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Remembers which `(route, expression)` pairs have already been reported.
///
/// Shared for the lifetime of the server process; the first observation of
/// a pair wins and every later one is suppressed.
#[derive(Debug, Default)]
pub struct CallsiteDedup {
    seen: Mutex<HashSet<(Option<String>, String)>>,
}

impl CallsiteDedup {
    /// Create an empty dedup set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a callsite. Returns `true` only the first time a pair is seen.
    pub fn first_seen(&self, route: Option<&str>, expression: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((route.map(String::from), expression.to_string()))
    }

    /// Number of distinct callsites recorded.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_once_per_pair() {
        let dedup = CallsiteDedup::new();
        assert!(dedup.first_seen(Some("/a"), "cookies().get('x')"));
        assert!(!dedup.first_seen(Some("/a"), "cookies().get('x')"));
        assert!(!dedup.first_seen(Some("/a"), "cookies().get('x')"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_pairs_are_distinct() {
        let dedup = CallsiteDedup::new();
        assert!(dedup.first_seen(Some("/a"), "headers().get('x')"));
        assert!(dedup.first_seen(Some("/b"), "headers().get('x')"));
        assert!(dedup.first_seen(None, "headers().get('x')"));
        assert!(dedup.first_seen(Some("/a"), "headers().has('x')"));
        assert_eq!(dedup.len(), 4);
    }

    #[test]
    fn test_concurrent_single_winner() {
        use std::sync::Arc;

        let dedup = Arc::new(CallsiteDedup::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || dedup.first_seen(Some("/r"), "cookies().size"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
