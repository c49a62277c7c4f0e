//! `kine` presents an etcd-compatible key/value API backed by a single SQL
//! table acting as an append-only revision log. A distributed SQL store
//! provides durability; this crate turns each row into a versioned KV
//! revision, synthesizes watch events by polling the log tail, and
//! periodically compacts obsolete rows.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use kine::config::Config;
//! use kine::supervisor::Supervisor;
//!
//! # async fn run() -> kine::error::CResult<()> {
//! let cfg = Config::default().normalize();
//! let supervisor = Supervisor::start(&cfg).await?;
//!
//! let store = supervisor.store();
//! let (rev, ok) = store.create("foo", b"1".to_vec(), 0).await?;
//! assert!(ok);
//! assert_eq!(rev, 1);
//!
//! supervisor.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod compact;
pub mod config;
pub mod driver;
pub mod error;
pub mod schema;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod watch;
