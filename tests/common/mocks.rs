//! Mock versions of item writers and listeners.
use mockall::mock;

use resumable_batch::{
    BatchError,
    core::{
        item::{ItemWriter, ItemWriterResult},
        listener::ChunkListener,
    },
};

mock! {
    pub Writer {}
    impl ItemWriter<u32> for Writer {
        fn write(&self, items: &[u32]) -> ItemWriterResult;
    }
}

mock! {
    pub Chunks {}
    impl ChunkListener for Chunks {
        fn before_chunk(&self);
        fn after_chunk(&self);
        fn after_chunk_error(&self, error: &BatchError);
    }
}
