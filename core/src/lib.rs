pub mod catalog;
pub mod config;
pub mod gate;
pub mod persist;
pub mod provider;
pub mod service;
pub mod snapshot;

pub use catalog::CATALOG;
pub use config::{ProviderConfig, RefreshConfig};
pub use gate::{client_origin, OriginGate};
pub use persist::{RatingStore, SledStore, StoreError};
pub use provider::{ProviderError, ProviderRating, RainforestClient, RatingProvider};
pub use service::{ClearOutcome, RatingsService, RefreshStatus, SweepOutcome, SweepReport};
pub use snapshot::{ItemId, RatingSnapshot, RatingsTable};
