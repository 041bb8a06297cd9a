pub mod diff;
pub mod orchestrate;
pub mod outline;
pub mod rrf;
pub mod vector_index;

pub use diff::{chunk_diff, summarize as summarize_diff, DiffChunk};
pub use orchestrate::{rank_diff_chunks, rank_outline_signatures};
pub use outline::{assemble as assemble_outline, chunk_directory, DirectoryChunk, FileSignature, OutlineService};
pub use rrf::{fuse, RRF_K};
pub use vector_index::StaticVectorIndex;
