//! tza-archiver library interface
//!
//! Discovers Tezos NFT artifacts on IPFS and submits their gateway URLs to the
//! Wayback Machine, remembering what has been archived between runs.
//!
//! Exposed as a library for integration testing.

pub mod archive;
pub mod cid;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod pipeline;
pub mod state;

pub use crate::archive::{ArchiveSubmitter, SubmitOutcome, WaybackClient};
pub use crate::cid::{ArchiveTarget, ContentId, GatewayResolver};
pub use crate::coordinator::Coordinator;
pub use crate::pipeline::{Pipeline, RunProgress, RunReport};
pub use crate::state::StateStore;
