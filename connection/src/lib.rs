mod lock;
mod service;

pub use lock::{PairGuard, PairLocks};
pub use service::ConnectionService;
