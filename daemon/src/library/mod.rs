//! Video library: tracked entries, their files on disk and the background
//! extraction that fills in duration, size and thumbnail.

mod bundled;
mod extraction;
mod jobs;
mod paths;
mod recent;
mod store;

pub use extraction::{spawn_all, spawn_extraction};
pub use paths::LibraryPaths;
pub use store::{ExtractionOutcome, LibraryOptions, VideoLibrary};
