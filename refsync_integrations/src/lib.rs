//! ESI integrations for refsync.
//!
//! - `esi`: the reqwest-backed `ClientHandle`
//! - `feeds`: one `EndpointAdapter` per reference feed, plus the registry the server wires up

pub mod esi;
pub mod feeds;

pub use esi::{EsiClient, EsiClientConfig};
pub use feeds::{FeedSettings, RefEndpoint, registry};
