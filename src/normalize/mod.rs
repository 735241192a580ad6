//! Market data normalization engines for reconstructing books, scheduling
//! lookups and surviving disconnects.

/// Snapshot/increment merge state for one instrument's book.
pub mod book_builder;
/// Per-subscriber message fan-out over std or Tokio channels.
pub mod dispatch;
pub mod error;
/// Historical coverage gap detection.
pub mod gaps;
pub mod increment;
/// One-level book synthesis from best bid/ask field updates.
pub mod level1;
pub mod lookup;
/// Outbound buffering while the venue connection is down.
pub mod offline;
mod tests;
mod tracker;
pub mod truncate;

pub use book_builder::BookBuilder;
pub use dispatch::{Fanout, FanoutStd, FanoutTokio};
pub use error::NormalizeError;
pub use gaps::{DateCoverage, DateGap, GapScanner, MemoryCoverage, WeekendPolicy};
pub use increment::{ApplyOutcome, BookIncrementEngine, ProcessedBook};
pub use level1::{Level1DepthEngine, ProcessedLevel1};
pub use lookup::{LookupScheduler, TimedOutLookup};
pub use offline::{InboundOutcome, OfflineBuffer, OfflineDecision};
pub use truncate::DepthTruncator;
