pub mod cache;
pub mod codec;
pub mod dns64;
pub mod events;
pub mod filter;
pub mod forwarder;
pub mod server;
pub mod upstream;

pub use cache::{CacheKey, CachedResponse, ResponseCache};
pub use events::{EventSink, RequestProcessedEvent};
pub use filter::{ListMatcher, RuleMatcher};
pub use forwarder::Forwarder;
pub use server::{create_and_listen, ListenerHandle};
pub use upstream::{build_upstream, Upstream};
