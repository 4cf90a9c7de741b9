//! Candidate selection
//!
//! Two policies decide what a run publishes:
//!
//! - recent: items published within a lookback window that were never
//!   syndicated, oldest first, at most once each ([`select_recent`]).
//! - least syndicated: any ledger entry, preferring the ones published the
//!   fewest times, ties broken at random ([`select_least_syndicated`]).
//!
//! Everything here is pure: the ledger is passed in, nothing touches the
//! network or the filesystem.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::ledger::{Ledger, LedgerEntry};
use crate::types::FeedItem;

/// Lookback window of the recent policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Earliest publication time still inside the window (inclusive)
    pub since: DateTime<Utc>,
}

impl Window {
    pub fn days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            since: now - Duration::days(i64::from(days)),
        }
    }

    pub fn contains(&self, published: DateTime<Utc>) -> bool {
        published >= self.since
    }
}

/// Items of one feed that fall inside the window, oldest first
///
/// Feeds list their items newest first, so among items sharing a
/// timestamp the one closest to the tail of the feed comes first. Items
/// with an unreadable date are dropped.
pub fn window_candidates(items: &[FeedItem], window: Window) -> Vec<&FeedItem> {
    let mut dated: Vec<(usize, DateTime<Utc>, &FeedItem)> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match item.published_at() {
            Some(published) => Some((index, published, item)),
            None => {
                warn!(
                    url = %item.url,
                    date = %item.date_published,
                    "skipping item with unreadable publication date"
                );
                None
            }
        })
        .filter(|(_, published, _)| window.contains(*published))
        .collect();

    dated.sort_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));
    dated.into_iter().map(|(_, _, item)| item).collect()
}

/// Window candidates that the ledger has never seen, oldest first
pub fn eligible_recent<'a>(
    items: &'a [FeedItem],
    ledger: &Ledger,
    window: Window,
) -> Vec<&'a FeedItem> {
    window_candidates(items, window)
        .into_iter()
        .filter(|item| {
            let posted = ledger.contains(&item.url);
            if posted {
                debug!(url = %item.url, "already in ledger");
            }
            !posted
        })
        .collect()
}

/// The oldest eligible item of one feed, if any
pub fn select_recent<'a>(
    items: &'a [FeedItem],
    ledger: &Ledger,
    window: Window,
) -> Option<&'a FeedItem> {
    eligible_recent(items, ledger, window).into_iter().next()
}

/// Merge every fetched item into the ledger; returns whether anything changed
pub fn merge_items(ledger: &mut Ledger, items: impl IntoIterator<Item = FeedItem>) -> bool {
    items
        .into_iter()
        .fold(false, |changed, item| ledger.merge(item) || changed)
}

/// Uniform random pick among the entries posted the fewest times
pub fn select_least_syndicated<'a, R>(ledger: &'a Ledger, rng: &mut R) -> Option<&'a LedgerEntry>
where
    R: Rng + ?Sized,
{
    let candidates = ledger.least_syndicated();
    debug!(
        candidates = candidates.len(),
        times_posted = ledger.min_times_posted().unwrap_or(0),
        "least syndicated candidates"
    );
    candidates.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn dated(url: &str, date: &str) -> FeedItem {
        let mut item = FeedItem::new(url);
        item.date_published = date.to_string();
        item
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let items = vec![dated("b", "2024-01-10"), dated("a", "2024-01-01")];
        let window = Window::days(now(), 10);

        let eligible = eligible_recent(&items, &Ledger::new(), window);
        let urls: Vec<&str> = eligible.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b"]);

        let selected = select_recent(&items, &Ledger::new(), window).unwrap();
        assert_eq!(selected.url, "a");
    }

    #[test]
    fn test_items_outside_window_are_excluded() {
        let items = vec![
            dated("new", "2024-01-10T12:00:00Z"),
            dated("edge", "2024-01-01T00:00:00Z"),
            dated("old", "2023-12-31T23:59:59Z"),
        ];

        let eligible = eligible_recent(&items, &Ledger::new(), Window::days(now(), 10));
        let urls: Vec<&str> = eligible.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["edge", "new"]);
    }

    #[test]
    fn test_items_in_ledger_are_never_selected() {
        let items = vec![dated("b", "2024-01-10"), dated("a", "2024-01-05")];
        let mut ledger = Ledger::new();
        ledger.record_publish(&items[1], "https://mamot.fr/@me/1");

        let selected = select_recent(&items, &ledger, Window::days(now(), 10)).unwrap();
        assert_eq!(selected.url, "b");

        ledger.record_publish(&items[0], "https://mamot.fr/@me/2");
        assert!(select_recent(&items, &ledger, Window::days(now(), 10)).is_none());
    }

    #[test]
    fn test_equal_dates_prefer_feed_tail() {
        let items = vec![
            dated("first", "2024-01-08"),
            dated("second", "2024-01-08"),
        ];
        let selected = select_recent(&items, &Ledger::new(), Window::days(now(), 10)).unwrap();
        assert_eq!(selected.url, "second");
    }

    #[test]
    fn test_unreadable_dates_are_not_eligible() {
        let items = vec![dated("broken", "someday"), dated("ok", "2024-01-09")];
        let eligible = eligible_recent(&items, &Ledger::new(), Window::days(now(), 10));
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].url, "ok");
    }

    #[test]
    fn test_empty_feed_selects_nothing() {
        assert!(select_recent(&[], &Ledger::new(), Window::days(now(), 10)).is_none());
    }

    #[test]
    fn test_merge_items_reports_changes() {
        let mut ledger = Ledger::new();
        assert!(merge_items(&mut ledger, vec![dated("a", "2024-01-01")]));
        assert!(!merge_items(&mut ledger, vec![dated("a", "2024-01-01")]));
        assert!(merge_items(
            &mut ledger,
            vec![dated("a", "2024-01-01"), dated("b", "2024-01-02")]
        ));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_least_syndicated_picks_only_minimum() {
        let mut ledger = Ledger::new();
        for url in ["a", "b", "c", "d"] {
            ledger.merge(FeedItem::new(url));
        }
        ledger.record_publish(&FeedItem::new("a"), "t1");
        ledger.record_publish(&FeedItem::new("c"), "t2");

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let picked = select_least_syndicated(&ledger, &mut rng).unwrap();
            assert!(picked.item.url == "b" || picked.item.url == "d");
        }
    }

    #[test]
    fn test_least_syndicated_is_deterministic_with_seed() {
        let mut ledger = Ledger::new();
        for url in ["a", "b", "c"] {
            ledger.merge(FeedItem::new(url));
        }

        let first = select_least_syndicated(&ledger, &mut StdRng::seed_from_u64(7))
            .map(|e| e.item.url.clone());
        let second = select_least_syndicated(&ledger, &mut StdRng::seed_from_u64(7))
            .map(|e| e.item.url.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn test_repeated_selection_equalizes_history() {
        let mut ledger = Ledger::new();
        for i in 0..5 {
            ledger.merge(FeedItem::new(format!("photo-{i}")));
        }
        ledger.record_publish(&FeedItem::new("photo-0"), "t");
        ledger.record_publish(&FeedItem::new("photo-0"), "t");

        let mut rng = StdRng::seed_from_u64(1);
        for run in 0..13 {
            let picked = select_least_syndicated(&ledger, &mut rng)
                .unwrap()
                .item
                .clone();
            ledger.record_publish(&picked, format!("toot-{run}"));
        }

        let counts: HashMap<&str, usize> = ledger
            .entries()
            .map(|e| (e.item.url.as_str(), e.times_posted()))
            .collect();
        assert!(counts.values().all(|&c| c == 3), "{counts:?}");
    }

    #[test]
    fn test_least_syndicated_empty_ledger() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_least_syndicated(&Ledger::new(), &mut rng).is_none());
    }
}
