pub mod agent;
pub mod bridge;
pub mod command_agent;
pub mod config;
pub mod session;

pub use retouch_common::error;
pub use retouch_common::formatter;
pub use retouch_common::protocol;
