//! # chatmem
//!
//! A local-first, searchable memory of chat history.
//!
//! chatmem imports chat exports into a relational chunk store, groups each
//! conversation's messages into content-addressed chunks, and keeps a vector
//! index in step with those chunks. A full rebuild of the index goes through
//! a shadow copy that is swapped in atomically, so a failed rebuild never
//! disturbs the index that searches are served from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Chat export │──▶│ Chunk store │──▶│ Embed sync / │──▶│ Vector index │
//! │   (JSON)    │   │  (SQLite)   │   │   reindex    │   │ live+shadow  │
//! └─────────────┘   └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                                               │
//!                                                          ┌────▼────┐
//!                                                          │ search  │
//!                                                          └─────────┘
//! ```
//!
//! Every write to the chunk store or the index goes through the write gate
//! held by [`db::Database`]. Store methods that mutate take a
//! [`db::WriteGuard`], so an ungated write does not type-check.
//!
//! ## Quick Start
//!
//! ```bash
//! chatmem init
//! chatmem import ./exports/result.json
//! chatmem chunk
//! chatmem embed sync
//! chatmem search "where did we go for dinner"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content and chunk addressing |
//! | [`chunk`] | Conversation chunking |
//! | [`db`] | Database connection and write gate |
//! | [`migrate`] | Schema migrations |
//! | [`chunk_store`] | Conversations, messages, chunks, watermarks |
//! | [`vector_index`] | Live/shadow vector index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_sync`] | Incremental embedding sync |
//! | [`reindex`] | Shadow rebuild and swap |
//! | [`sources`] | Chat source trait |
//! | [`connector_json`] | Chat-export JSON connector |
//! | [`ingest`] | Import, chunk, and sync pipeline |
//! | [`scheduler`] | Background auto-sync |
//! | [`search`] | Similarity search |
//! | [`progress`] | Progress reporting |
//! | [`stats`] | Store statistics and run log |

pub mod chunk;
pub mod chunk_store;
pub mod config;
pub mod connector_json;
pub mod context;
pub mod db;
pub mod embed_sync;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod reindex;
pub mod scheduler;
pub mod search;
pub mod sources;
pub mod stats;
pub mod vector_index;
