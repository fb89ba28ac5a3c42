pub mod pool;
pub mod reconciler;
pub mod sender;

pub use pool::{ConnectionHandle, ConnectionPool, DEFAULT_ACQUIRE_TIMEOUT, HandleState, PooledConnection};
pub use reconciler::FeedbackReconciler;
pub use sender::NotificationSender;
