//! Database query modules.
//!
//! - jobs: the job ledger and its claim protocol
//! - users: account CRUD
//! - auth_tokens: bearer token management

pub mod auth_tokens;
pub mod jobs;
pub mod users;
