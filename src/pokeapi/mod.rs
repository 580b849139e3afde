//! Graph extraction from the PokeAPI
//!
//! The [`GraphExtractor`] fans out from root creatures to their related
//! resources with a bounded number of concurrent fetches. All fetches of a run
//! share one [`RateLimiter`] and one [`SeenSet`], held by a [`FetchSession`].

mod extractor;
mod policy;
mod rate_limiter;
mod retry;
mod seen;

pub use extractor::{FetchSession, GraphExtractor};
pub use policy::RelatedPolicy;
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use seen::SeenSet;
