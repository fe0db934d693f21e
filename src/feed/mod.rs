// Market data feed buffering
pub mod aggregator;
pub mod buffer;

pub use aggregator::{AppliedDelta, FeedAggregator};
pub use buffer::FeedBuffer;
