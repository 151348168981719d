//! HTTP fetch utilities, the spot persistence port, and the search cache.

mod cache;
mod http;
mod pg;
mod store;

pub use cache::{cache_key, source_ttl, SearchCache};
pub use http::{
    classify_reqwest_error, classify_status, BackoffCurve, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, HttpRequest, RetryDisposition,
    SimpleTokenBucket, TokenBucketConfig,
};
pub use pg::PgSpotStore;
pub use store::{InMemorySpotStore, SpotStore, StoreError};

pub const CRATE_NAME: &str = "kidspot-storage";
