pub mod pending;
pub mod server;
pub mod transport;

pub use pending::{PendingRequests, ResponseEvent, ResponseHandler};
pub use server::BridgeServer;
pub use transport::{ConnectionState, CorrelatedTransport, ReconnectPolicy};
