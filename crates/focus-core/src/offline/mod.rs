//! Client-side offline support: durable operation queue, connectivity
//! tracking, sync transport and the agent that ties them together.

mod agent;
mod connectivity;
mod queue;
mod transport;

pub use agent::{ClientIdentity, ReplayReport, SyncAgent, SyncReport};
pub use connectivity::{
    spawn_probe_loop, spawn_reconnect_worker, ConnectivityMonitor, ConnectivityState,
    ReconnectHandler, Transition,
};
pub use queue::OfflineOperationQueue;
pub use transport::{HttpSyncTransport, SyncTransport, TransportError};
