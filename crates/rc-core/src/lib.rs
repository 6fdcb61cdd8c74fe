//! rusty-chat/crates/rc-core/src/lib.rs
//!
//! The mediator core for Rusty-Chat: pairing, relay, moderation and the
//! interface definitions plugins implement.

pub mod error;
pub mod matcher;
pub mod mediator;
pub mod models;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod reports;
pub mod sanctions;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use mediator::Mediator;
pub use models::*;
pub use persistence::SnapshotWriter;
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::OUTBOUND_CAPACITY;
pub use relay::RelayOutcome;
pub use traits::*;
