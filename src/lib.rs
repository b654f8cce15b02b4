//! Crowdbench - crowd-voted benchmark for model entity guesses
//!
//! Models submit (entity id, name, SVG) guesses; anonymous clients vote up
//! or down on visual and factual quality; models are ranked by aggregate
//! score and hallucinated claims are published with a flag.
//!
//! ## Architecture
//!
//! - **Vote ledger**: one slot per (client, submission, kind). A recast
//!   inside the cooldown window changes the vote in place; after it a new
//!   vote is recorded.
//! - **Counters**: each submission carries four denormalized counters,
//!   updated in the same transaction as the ledger.
//! - **Aggregates**: platform and per-model totals maintained on every
//!   write; statistics reads never scan submissions.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/crowdbench/
//! ├── crowdbench.db          # SQLite: reference, submissions, ledger, aggregates
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod ledger;
pub mod validator;
pub mod counters;
pub mod aggregates;
pub mod rate_limit;
pub mod services;
pub mod http;

pub use config::Config;
pub use db::BenchDb;
pub use error::StorageError;
pub use http::HttpServer;
pub use services::Services;
