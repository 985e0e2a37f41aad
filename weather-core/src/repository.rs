//! Current city and favorites, persisted as JSON in a [`KeyValueStore`].

use std::sync::Arc;

use tokio_stream::{Stream, StreamExt, wrappers::WatchStream};

use crate::{
    model::Location,
    store::{Entries, KeyValueStore, StoreError},
};

pub const CURRENT_CITY_KEY: &str = "current_city";
pub const FAVORITES_KEY: &str = "favorites";

/// Owns the on-disk format of the current city and the favorites list.
///
/// Reads never fail: an undecodable value reads as "nothing stored" so a
/// single bad write can't wedge the app. Writes propagate store errors.
#[derive(Debug, Clone)]
pub struct LocationRepository {
    store: Arc<dyn KeyValueStore>,
}

impl LocationRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current value first, then one item per store change.
    pub fn observe_current_city(&self) -> impl Stream<Item = Option<Location>> + Send + 'static {
        WatchStream::new(self.store.subscribe())
            .map(|entries| decode_current_city(&entries))
    }

    /// Current value first, then one item per store change.
    pub fn observe_favorites(&self) -> impl Stream<Item = Vec<Location>> + Send + 'static {
        WatchStream::new(self.store.subscribe())
            .map(|entries| decode_favorites(&entries))
    }

    pub async fn current_city(&self) -> Option<Location> {
        decode_current_city(&self.store.snapshot().await)
    }

    pub async fn favorites(&self) -> Vec<Location> {
        decode_favorites(&self.store.snapshot().await)
    }

    pub async fn save_current_city(&self, city: &Location) -> Result<(), StoreError> {
        let json = serde_json::to_string(city).map_err(|source| StoreError::Encode {
            key: CURRENT_CITY_KEY.to_string(),
            source,
        })?;
        self.store.put(CURRENT_CITY_KEY, json).await
    }

    pub async fn save_favorites(&self, list: &[Location]) -> Result<(), StoreError> {
        let json = serde_json::to_string(list).map_err(|source| StoreError::Encode {
            key: FAVORITES_KEY.to_string(),
            source,
        })?;
        self.store.put(FAVORITES_KEY, json).await
    }
}

fn decode_current_city(entries: &Entries) -> Option<Location> {
    let raw = entries.get(CURRENT_CITY_KEY)?;
    match serde_json::from_str(raw) {
        Ok(city) => Some(city),
        Err(e) => {
            tracing::warn!(error = %e, "discarding undecodable current city");
            None
        }
    }
}

fn decode_favorites(entries: &Entries) -> Vec<Location> {
    let Some(raw) = entries.get(FAVORITES_KEY) else {
        return Vec::new();
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "discarding undecodable favorites");
        Vec::new()
    })
}
