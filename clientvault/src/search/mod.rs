pub mod cache;
pub mod normalize;
pub mod resilient;
pub mod snapshot;

pub use cache::{LastKnown, Listing, ListingCache};
pub use normalize::{normalize_company_name, normalize_search, record_matches};
pub use resilient::{ResilientSearch, SearchError, SearchOutcome, SearchSource};
pub use snapshot::{SnapshotError, SnapshotStore};
