//! # ragmill
//!
//! A single-process retrieval-augmented generation core: ingest documents,
//! retrieve grounded context, generate answers.
//!
//! ragmill chunks ingested text, weights terms corpus-wide with a TF-IDF
//! style character-n-gram vectorizer, keeps a fixed-dimension vector index
//! with best-effort persistence, and orchestrates retrieval with generation
//! calls while tracking a daily token-usage quota.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ extract  │──▶│ splitter          │──▶│ vectorizer     │
//! │ pdf/docx │   │ sentence windows  │   │ char n-grams   │
//! └──────────┘   └──────────────────┘   └──────┬────────┘
//!                                              │ sparse
//!                              precise path ◀──┤
//!                                              ▼ projector
//!                                       ┌───────────────┐
//!                                       │ vector index   │
//!                                       │ add/search/del │
//!                                       └──────┬────────┘
//!                                              ▼
//!                 ┌────────────┐       ┌───────────────┐
//!                 │ ledger      │◀──────│ service (ask)  │──▶ generation
//!                 │ token quota │       └───────────────┘     client
//!                 └────────────┘
//! ```
//!
//! Query answering uses the *precise path*: sparse cosine similarity
//! against every stored chunk text at full vocabulary resolution. The dense
//! index serves opaque-vector callers and persistence.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML startup surface + runtime-mutable [`config::RagConfig`] |
//! | [`models`] | Core data types |
//! | [`extract`] | Per-format text extraction |
//! | [`splitter`] | Sentence-boundary-aware chunking |
//! | [`vectorizer`] | Term weighting over character n-grams |
//! | [`projector`] | Sparse → fixed-dimension dense projection |
//! | [`index`] | Flat inner-product index with persistence |
//! | [`retrieval`] | Precise and dense search over the corpus |
//! | [`generation`] | Generation client trait + HTTP implementation |
//! | [`ledger`] | Daily token-usage quota accounting |
//! | [`ingest`] | Document lifecycle and filesystem ingestion |
//! | [`service`] | The RAG orchestrator |

pub mod config;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod projector;
pub mod retrieval;
pub mod service;
pub mod splitter;
pub mod vectorizer;
