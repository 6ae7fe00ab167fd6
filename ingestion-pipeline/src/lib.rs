#![allow(clippy::missing_docs_in_private_items)]

pub mod chunker;
pub mod dispatcher;
pub mod extract;
pub mod pipeline;
pub mod upload;

pub use chunker::{ChunkWindow, Chunker};
pub use dispatcher::{spawn_detached, spawn_source_processing};
pub use pipeline::SourcePipeline;
pub use upload::{RejectedFile, SourceReceipt, UploadOutcome, UploadService, UploadedFile};
