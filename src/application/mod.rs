//! Application layer - the create and update flows.
//!
//! Each action borrows the runtime, the transport session and the archive
//! codec, and sequences the subsystems for one user command.

mod create;
mod update;

pub use create::{CreateAction, CreateReport};
pub use update::{FetchedPackage, UpdateAction};
