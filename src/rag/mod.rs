// src/rag/mod.rs

//! Hybrid retrieval engine: ingestion, chunking, search, and the
//! conversational chat layer over the vector store.

pub mod buffer;
pub mod chat;
pub mod chunker;
pub mod document;
pub mod engine;
pub mod ingest;
pub mod search;
pub mod tokenize;

pub use chat::{filter_sources_for_display, ChatOutcome, HistoryTurn};
pub use document::{ChannelExtras, ContentType, DocumentSource, RagDocument};
pub use engine::RagEngine;
pub use ingest::IngestOutcome;
pub use search::{ScoredNode, SearchFilters};
