#![allow(clippy::missing_docs_in_private_items)]

pub mod chat;
pub mod generation;
pub mod scoring;
pub mod search;

pub use chat::ChatService;
pub use generation::GenerationService;
