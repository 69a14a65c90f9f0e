pub mod dispatcher;
pub mod extractor;
pub mod pool;
pub mod queue;
pub mod storage;
pub mod tracker;
