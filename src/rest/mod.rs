//! REST side of the client layer.
//!
//! - `request`:    immutable request descriptors
//! - `rate_limit`: pacing policies consulted before each attempt
//! - `transport`:  the owned HTTP session (reqwest)
//! - `executor`:   bounded exponential-backoff retry loop

pub mod executor;
pub mod rate_limit;
pub mod request;
pub mod transport;

pub use executor::{RetryPolicy, RetryingRequestExecutor, StatusPolicy};
pub use rate_limit::{FixedWindow, RateLimiter, TokenBucket, Unlimited};
pub use request::RequestDescriptor;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
