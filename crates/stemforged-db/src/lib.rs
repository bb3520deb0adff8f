//! Stemforged-DB: the job ledger and account storage.
//!
//! SQLite via rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Embedded schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching the schema
//! - `queries` - Job ledger, user and token operations
//!
//! # Example
//!
//! ```no_run
//! use stemforged_common::{JobStatus, PipelineSettings};
//! use stemforged_db::pool::{init_pool, get_conn};
//! use stemforged_db::queries::jobs;
//!
//! let pool = init_pool("/var/lib/stemforged/stemforged.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! if let Some(job) = jobs::claim_next(&conn, JobStatus::Waiting, "metadata-1").unwrap() {
//!     println!("claimed {}", job.id);
//! }
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
