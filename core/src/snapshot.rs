use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

pub type ItemId = String;

/// Last known public rating for one catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSnapshot {
    pub item_id: ItemId,
    pub rating: f64,
    pub review_count: u32,
    #[serde(skip_serializing, default = "OffsetDateTime::now_utc")]
    pub fetched_at: OffsetDateTime,
}

impl RatingSnapshot {
    pub fn new(item_id: impl Into<ItemId>, rating: f64, review_count: u32, fetched_at: OffsetDateTime) -> Self {
        Self { item_id: item_id.into(), rating: clamp_rating(rating), review_count, fetched_at }
    }
}

/// Keep provider ratings inside the 0..=5 star range. NaN maps to 0.
pub fn clamp_rating(rating: f64) -> f64 {
    if rating.is_nan() { 0.0 } else { rating.clamp(0.0, 5.0) }
}

/// In-memory table of snapshots, one entry per item id.
#[derive(Debug, Default)]
pub struct RatingsTable {
    entries: HashMap<ItemId, RatingSnapshot>,
}

impl RatingsTable {
    pub fn new() -> Self { Self::default() }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = RatingSnapshot>) -> Self {
        let mut table = Self::new();
        for s in snapshots { table.upsert(s); }
        table
    }

    pub fn upsert(&mut self, snapshot: RatingSnapshot) {
        self.entries.insert(snapshot.item_id.clone(), snapshot);
    }

    pub fn get(&self, item_id: &str) -> Option<&RatingSnapshot> { self.entries.get(item_id) }

    /// Snapshots for the requested ids in request order; misses are skipped.
    pub fn select<S: AsRef<str>>(&self, item_ids: &[S]) -> Vec<RatingSnapshot> {
        item_ids
            .iter()
            .filter_map(|id| self.entries.get(id.as_ref()).cloned())
            .collect()
    }

    pub fn oldest_fetch(&self) -> Option<OffsetDateTime> {
        self.entries.values().map(|s| s.fetched_at).min()
    }

    /// All snapshots sorted by item id.
    pub fn all(&self) -> Vec<RatingSnapshot> {
        let mut out: Vec<_> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        out
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn clear(&mut self) { self.entries.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn snap(id: &str, at: OffsetDateTime) -> RatingSnapshot {
        RatingSnapshot::new(id, 4.2, 10, at)
    }

    #[test]
    fn upsert_keeps_one_entry_per_item() {
        let now = OffsetDateTime::now_utc();
        let mut table = RatingsTable::new();
        table.upsert(snap("A", now));
        table.upsert(RatingSnapshot::new("A", 3.0, 11, now + Duration::seconds(1)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("A").unwrap().review_count, 11);
    }

    #[test]
    fn select_skips_missing_and_keeps_request_order() {
        let now = OffsetDateTime::now_utc();
        let table = RatingsTable::from_snapshots([snap("A", now), snap("B", now)]);
        let got = table.select(&["B", "nope", "A"]);
        let ids: Vec<_> = got.iter().map(|s| s.item_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn oldest_fetch_is_minimum() {
        let now = OffsetDateTime::now_utc();
        let table = RatingsTable::from_snapshots([snap("A", now), snap("B", now - Duration::hours(3))]);
        assert_eq!(table.oldest_fetch(), Some(now - Duration::hours(3)));
        assert_eq!(RatingsTable::new().oldest_fetch(), None);
    }

    #[test]
    fn ratings_are_clamped() {
        assert_eq!(clamp_rating(7.5), 5.0);
        assert_eq!(clamp_rating(-1.0), 0.0);
        assert_eq!(clamp_rating(f64::NAN), 0.0);
        assert_eq!(clamp_rating(4.4), 4.4);
    }

    #[test]
    fn wire_shape_is_camel_case_without_timestamp() {
        let json = serde_json::to_value(snap("A", OffsetDateTime::now_utc())).unwrap();
        assert_eq!(json["itemId"], "A");
        assert_eq!(json["reviewCount"], 10);
        assert!(json.get("fetchedAt").is_none());
    }
}
