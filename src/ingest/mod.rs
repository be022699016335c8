pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use chunker::Chunker;
pub use extract::{extract_text, FileKind};
pub use pipeline::{FileUpload, IngestionOutcome, IngestionPipeline, UploadScope};
