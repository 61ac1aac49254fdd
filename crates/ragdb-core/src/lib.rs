pub mod chunker;
pub mod config;
pub mod error;
pub mod language;
pub mod logging;
pub mod text;
pub mod topk;
pub mod traits;
pub mod types;

pub use error::{Error, IngestStage, Result};
