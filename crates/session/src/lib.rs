//! Session registry, replayable event log, and routing decisions.
//!
//! Components, leaves first:
//! - [`EventLog`]: per-stream ordered record of outbound messages
//! - [`LocalTransportCache`]: live handles held by this node
//! - [`SessionRegistry`]: cross-node session records plus the local cache
//! - [`SessionRouter`]: serve locally, restore, or forward to the owner

pub mod cache;
pub mod config;
pub mod discovery;
pub mod event_log;
pub mod node;
pub mod registry;
pub mod routing;
pub mod transport;

pub use cache::LocalTransportCache;
pub use config::SessionConfig;
pub use discovery::{OwnerResolver, StaticOwnerResolver};
pub use event_log::{EventLog, EventSink};
pub use node::NodeIdentity;
pub use registry::SessionRegistry;
pub use routing::{ForwardTarget, Route, RouteRequest, SessionRouter};
pub use transport::{ChannelTransport, CloseHook, OutboundEvent, StreamGuard, TransportHandle};
