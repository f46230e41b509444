//! xlens - per-account views over X archive analysis artifacts
//!
//! An offline job leaves a set of artifacts per account: a tweet table
//! (Parquet), a cluster hierarchy (Parquet), conversation trees (pickle),
//! an embedding matrix (npy) and JSON companions. This library decodes them
//! and builds four views: a summary, cluster statistics, reconstructed
//! threads and a 2-D embedding projection.
//!
//! # Modules
//!
//! - [`store`] - Object store backends and the coalescing gateway
//! - [`npy`], [`pickle`], [`table`] - Binary artifact decoders
//! - [`rows`] - Tweet row normalization
//! - [`clusters`], [`ontology`] - Cluster aggregation and metadata
//! - [`threads`] - Thread reconstruction
//! - [`projection`] - Embedding projection
//! - [`summary`] - Account summary
//! - [`bundle`] - [`ArchiveService`], which runs all of the above
//! - [`error`] - Error types with rich context
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xlens::{ArchiveService, Config, store::FsStore};
//!
//! # async fn demo() -> xlens::Result<()> {
//! let config = Config::default();
//! let service = ArchiveService::new(Arc::new(FsStore::new("./data")), &config);
//! let bundle = service.bundle("alice").await?;
//! println!("{} threads", bundle.threads.map_or(0, |t| t.threads.len()));
//! # Ok(())
//! # }
//! ```

pub mod avatar;
pub mod bundle;
pub mod cli;
pub mod clusters;
pub mod config;
pub mod error;
pub mod logging;
pub mod memo;
pub mod model;
pub mod npy;
pub mod ontology;
pub mod pickle;
pub mod projection;
pub mod rows;
pub mod store;
pub mod summary;
pub mod table;
pub mod threads;

pub use avatar::{AvatarResolver, PLACEHOLDER_AVATAR};
pub use bundle::ArchiveService;
pub use config::Config;
pub use error::{LensError, Result};
pub use model::*;
pub use store::{FsStore, Gateway, HttpStore, MemoryStore, ObjectStore};
