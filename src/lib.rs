//! Coordination core for a crawl-and-summarize node fleet: a fixed
//! primary/backup/backup leader set plus a fixed worker set, exchanging
//! heartbeats, dispatching tasks, and failing over deterministically.
//!
//! ```text
//!                 ┌──────────────┐   heartbeat    ┌──────────────┐
//!   client ──────▶│ active leader │◀──────────────▶│   backups    │
//!                 └──────┬───────┘   state pull    └──────────────┘
//!                        │ dispatch
//!                        ▼
//!                 ┌──────────────┐
//!                 │   workers    │
//!                 └──────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod heartbeat;
pub mod leader;
pub mod models;
pub mod state;
pub mod worker;
