pub mod dispatch;
pub mod endpoint;
pub mod registry;
pub mod rest;
pub mod session;
pub mod state;

pub use registry::SubscriptionRegistry;
pub use session::OutboundQueue;
pub use state::AppState;
