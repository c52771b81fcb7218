pub mod dsync;
pub mod errors;
pub mod types;

pub use dsync::{
    CallContext, LockServer, MemoryServer, RedisServer, Redlock, ReleaseReply, Vote, VoteTally,
};
pub use errors::{Result as ServerResult, ServerError};
pub use types::{ServerDescriptor, ServerSetConfig};
