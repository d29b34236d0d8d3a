pub mod config;
pub mod deliverable;
pub mod distgit;
pub mod error;
pub mod evr;
pub mod gerrit;
pub mod ingest;
pub mod lock;
pub mod paths;
pub mod poller;
pub mod rdoinfo;
pub mod reconciler;
pub mod record;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod fakes;

pub use error::{ReleaseError, Result};
