//! s3-fs-adapter: filesystem-style access to S3-compatible object storage
//!
//! The adapter exposes path-based verbs (read, write, list, stat, copy,
//! rename, delete, visibility) and translates them into object storage calls.
//!
//! # Architecture
//!
//! - **Client**: the narrow storage interface ([`client::ObjectClient`]) with
//!   an AWS SDK implementation and an in-memory fake.
//! - **Adapter**: [`adapter::FilesystemAdapter`] verbs implemented over a
//!   client, with key prefixing and emulated directories.
//! - **Metadata**: every provider response is normalized into a single
//!   [`metadata::FileMetadata`] record.
//! - **Cache**: an instance-level metadata cache plus an optional session
//!   store shared between adapter instances.
//!
//! # Example
//!
//! ```no_run
//! use s3_fs_adapter::adapter::{FilesystemAdapter, S3Adapter};
//! use s3_fs_adapter::config::{Config, WriteConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"config.yaml".into())?;
//! s3_fs_adapter::logging::init(&config.logging);
//!
//! let adapter = S3Adapter::from_config(&config).await?;
//! adapter
//!     .write("notes/todo.txt", "buy milk".into(), &WriteConfig::new())
//!     .await?;
//!
//! for entry in adapter.list_contents("notes", false).await? {
//!     println!("{} {:?}", entry.path, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod mime;
pub mod path;

pub use error::{AdapterError, ProviderError, Result};
