pub mod archive;
pub mod genes;
pub mod manifest;
pub mod scores;

pub use archive::{ArchiveWriter, ArrayArchive};
