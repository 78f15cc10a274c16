use crate::snapshot::{clamp_rating, RatingSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// Settings key holding the RFC 3339 time of the last sweep with at least one success.
pub const LAST_REFRESH_KEY: &str = "ratings_last_refresh";

const RATINGS_TREE: &str = "book_ratings";
const SETTINGS_TREE: &str = "settings";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("timestamp error: {0}")]
    Timestamp(String),
}

/// Persistent mirror of the ratings table plus a small settings map.
pub trait RatingStore: Send + Sync {
    fn load_ratings(&self) -> Result<Vec<RatingSnapshot>, StoreError>;
    fn upsert_rating(&self, snapshot: &RatingSnapshot) -> Result<(), StoreError>;
    /// Remove every rating row, returning how many were removed.
    fn clear_ratings(&self) -> Result<usize, StoreError>;
    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError> { Ok(()) }
}

/// Row layout in the `book_ratings` tree. The rating is kept as decimal text.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredRating {
    pub item_id: String,
    pub rating: String,
    pub review_count: u32,
    pub last_fetched: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingRow {
    value: String,
    updated_at: String,
}

pub fn format_timestamp(at: OffsetDateTime) -> Result<String, StoreError> {
    at.format(&Rfc3339).map_err(|e| StoreError::Timestamp(e.to_string()))
}

pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

impl StoredRating {
    fn into_snapshot(self) -> Option<RatingSnapshot> {
        let rating = self.rating.trim().parse::<f64>().ok()?;
        let fetched_at = parse_timestamp(&self.last_fetched)?;
        Some(RatingSnapshot { item_id: self.item_id, rating: clamp_rating(rating), review_count: self.review_count, fetched_at })
    }
}

/// Embedded sled database backing the ratings cache.
pub struct SledStore {
    db: sled::Db,
    ratings: sled::Tree,
    settings: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let ratings = db.open_tree(RATINGS_TREE)?;
        let settings = db.open_tree(SETTINGS_TREE)?;
        Ok(Self { db, ratings, settings })
    }

    pub fn rating_rows(&self) -> usize { self.ratings.len() }
}

impl RatingStore for SledStore {
    fn load_ratings(&self) -> Result<Vec<RatingSnapshot>, StoreError> {
        let mut out = Vec::new();
        for entry in self.ratings.iter() {
            let (key, value) = entry?;
            let snapshot = bincode::deserialize::<StoredRating>(&value).ok().and_then(StoredRating::into_snapshot);
            match snapshot {
                Some(s) => out.push(s),
                None => warn!(item_id = %String::from_utf8_lossy(&key), "skipping unreadable rating row"),
            }
        }
        Ok(out)
    }

    fn upsert_rating(&self, snapshot: &RatingSnapshot) -> Result<(), StoreError> {
        let last_fetched = format_timestamp(snapshot.fetched_at)?;
        // a corrupt previous row is overwritten rather than blocking the write
        let created_at = self
            .ratings
            .get(snapshot.item_id.as_bytes())?
            .and_then(|prev| bincode::deserialize::<StoredRating>(&prev).ok())
            .map(|prev| prev.created_at)
            .unwrap_or_else(|| last_fetched.clone());
        let row = StoredRating {
            item_id: snapshot.item_id.clone(),
            rating: snapshot.rating.to_string(),
            review_count: snapshot.review_count,
            last_fetched,
            created_at,
        };
        self.ratings.insert(snapshot.item_id.as_bytes(), bincode::serialize(&row)?)?;
        Ok(())
    }

    fn clear_ratings(&self) -> Result<usize, StoreError> {
        let removed = self.ratings.len();
        self.ratings.clear()?;
        Ok(removed)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.settings.get(key.as_bytes())? {
            Some(bytes) => {
                let row: SettingRow = bincode::deserialize(&bytes)?;
                Ok(Some(row.value))
            }
            None => Ok(None),
        }
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let row = SettingRow { value: value.to_string(), updated_at: format_timestamp(OffsetDateTime::now_utc())? };
        self.settings.insert(key.as_bytes(), bincode::serialize(&row)?)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::Duration;

    #[test]
    fn upsert_overwrites_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let first = OffsetDateTime::now_utc() - Duration::hours(1);
        {
            let store = SledStore::open(&path).unwrap();
            store.upsert_rating(&RatingSnapshot::new("A", 4.5, 12, first)).unwrap();
            store.upsert_rating(&RatingSnapshot::new("A", 4.0, 13, first + Duration::minutes(5))).unwrap();
            store.put_setting(LAST_REFRESH_KEY, "2025-01-01T00:00:00Z").unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        let rows = store.load_ratings().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rating, 4.0);
        assert_eq!(rows[0].review_count, 13);
        assert_eq!(store.get_setting(LAST_REFRESH_KEY).unwrap().as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn created_at_is_kept_across_upserts() {
        let store = SledStore::temporary().unwrap();
        let t0 = OffsetDateTime::now_utc() - Duration::days(2);
        store.upsert_rating(&RatingSnapshot::new("A", 1.0, 1, t0)).unwrap();
        store.upsert_rating(&RatingSnapshot::new("A", 2.0, 2, t0 + Duration::days(1))).unwrap();
        let raw = store.ratings.get("A").unwrap().unwrap();
        let row: StoredRating = bincode::deserialize(&raw).unwrap();
        assert_eq!(row.created_at, format_timestamp(t0).unwrap());
        assert_eq!(row.rating, "2");
    }

    #[test]
    fn unreadable_rows_are_skipped() {
        let store = SledStore::temporary().unwrap();
        let bad = StoredRating {
            item_id: "BAD".into(),
            rating: "n/a".into(),
            review_count: 0,
            last_fetched: "2025-01-01T00:00:00Z".into(),
            created_at: "2025-01-01T00:00:00Z".into(),
        };
        store.ratings.insert("BAD", bincode::serialize(&bad).unwrap()).unwrap();
        store.upsert_rating(&RatingSnapshot::new("OK", 3.5, 2, OffsetDateTime::now_utc())).unwrap();
        let rows = store.load_ratings().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "OK");
    }

    #[test]
    fn undecodable_row_is_skipped_and_healed_by_upsert() {
        let store = SledStore::temporary().unwrap();
        let now = OffsetDateTime::now_utc();
        store.upsert_rating(&RatingSnapshot::new("GOOD", 4.1, 3, now)).unwrap();
        store.ratings.insert("BAD", vec![0xff, 0x01]).unwrap();

        let rows = store.load_ratings().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "GOOD");

        store.upsert_rating(&RatingSnapshot::new("BAD", 3.2, 8, now)).unwrap();
        let mut rows = store.load_ratings().unwrap();
        rows.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item_id, "BAD");
        assert_eq!(rows[0].review_count, 8);
    }

    #[test]
    fn clear_removes_ratings_but_not_settings() {
        let store = SledStore::temporary().unwrap();
        store.upsert_rating(&RatingSnapshot::new("A", 3.0, 1, OffsetDateTime::now_utc())).unwrap();
        store.upsert_rating(&RatingSnapshot::new("B", 3.0, 1, OffsetDateTime::now_utc())).unwrap();
        store.put_setting(LAST_REFRESH_KEY, "x").unwrap();
        assert_eq!(store.clear_ratings().unwrap(), 2);
        assert_eq!(store.rating_rows(), 0);
        assert!(store.get_setting(LAST_REFRESH_KEY).unwrap().is_some());
    }

    #[test]
    fn timestamps_round_trip_through_rfc3339() {
        let at = time::macros::datetime!(2025-03-04 05:06:07 UTC);
        let text = format_timestamp(at).unwrap();
        assert_eq!(parse_timestamp(&text), Some(at));
        assert_eq!(parse_timestamp("garbage"), None);
    }
}
