//! The router façade and its builder

mod builder;
mod router;

pub use builder::{DEFAULT_MAX_CONCURRENT_REQUESTS, RouterBuilder};
pub use router::ProviderRouter;
