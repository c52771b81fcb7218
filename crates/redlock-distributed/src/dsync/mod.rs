pub mod client;
pub mod context;
pub mod locker;
pub mod memory;
pub mod remote;
pub mod scripts;
pub mod tally;

pub use client::{CLOCK_DRIFT_TOLERANCE_MS, Redlock, expiry_millis};
pub use context::CallContext;
pub use locker::{LockServer, ReleaseReply};
pub use memory::MemoryServer;
pub use remote::RedisServer;
pub use tally::{Vote, VoteTally, quorum};
