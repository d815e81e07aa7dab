//! Courtside answer engine
//!
//! A hybrid retrieval orchestrator for NBA question answering: a rule-based
//! classifier routes each question to a text-to-SQL path over the statistics
//! store, a nearest-neighbor search over the text corpus, or both; the
//! results ground a category-specific prompt, a chat model produces the
//! answer, and the exchange persists as a conversation turn.

pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
