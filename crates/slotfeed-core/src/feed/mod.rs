//! Feed orchestration.
//!
//! A [`DataFeed`] drives one consumer through the fixed call sequence
//! `init -> set_file_list -> start -> next*`. Reader threads are managed by a
//! [`ReaderPool`]; they claim files from a shared [`crate::FileList`], parse
//! them, and push records into a bounded [`crate::Channel`].

mod data_feed;
#[cfg(test)]
mod data_feed_tests;
mod reader;
mod state;

pub use data_feed::DataFeed;
pub use reader::{ReaderPool, ReaderTask};
pub use state::FeedState;
