//! # Market Data Normalization Engines
//!
//! A collection of thread-safe engines for turning raw venue feeds into clean, per-subscriber market data streams. The crate reconstructs full order books from incremental diffs, synthesizes depth from best bid/ask quotes, truncates books to each subscriber's requested depth, serializes lookup-style requests, survives disconnects by buffering and replaying outbound traffic, and finds holes in persisted history.
//!
//! ## Key Features
//!
//! - **Book Reconstruction**: Merges snapshot and incremental depth diffs into a coherent full book per instrument. Subscribers to the same instrument share one tracking entry, so a single increment application fans out to every interested request id, including firehose "all instruments" subscribers and pass-through subscribers who want the raw diffs.
//!
//! - **Level1 Synthesis**: Builds a one-level order book from best bid/ask fields carried in generic field-value updates, suppressing output when the quoted quadruple has not changed.
//!
//! - **Depth Truncation**: Groups subscribers by identical requested depth so each distinct depth is cut exactly once per book, however many ids asked for it.
//!
//! - **Lookup Scheduling**: Tracks in-flight security, board and portfolio lookups with per-request timeouts, serializes same-kind lookups through a FIFO queue so at most one is on the wire, and extends timeouts while partial data is still arriving.
//!
//! - **Offline Buffering**: While disconnected, holds outbound requests in a bounded FIFO, answers cancellations of never-sent requests locally, and replays the rest in original order exactly once on reconnect.
//!
//! - **Gap Scanning**: Walks a calendar range against persisted history coverage and reports the first contiguous run of missing days, optionally treating weekends as days that never carry data.
//!
//! ## Pipeline
//!
//! The engines compose into two lanes around a wire adapter. Outbound
//! application requests pass through the offline buffer (connectivity gate),
//! the lookup scheduler (FIFO serialization), and the subscription engines
//! (tracking registration) before reaching the wire. Inbound venue events
//! flow the other way: reconstruction, truncation, timeout bookkeeping and
//! replay correlation, then delivery to per-subscriber channels via the
//! fan-out dispatcher. Each engine exposes pure request/response methods;
//! the caller owns the wiring, so stages can be dropped, reordered or
//! tested in isolation.
//!
//! ## Design Goals
//!
//! 1. **Correctness**: Index invariants hold under any interleaving of subscribe, online, and unsubscribe calls; every emitted book is internally consistent.
//! 2. **Determinism**: Shared entries are keyed by the lowest surviving request id, fan-out lists are ordered, and timers advance only through explicit ticks, so replaying the same inputs yields the same outputs.
//! 3. **Isolation**: Engines perform no I/O and spawn no threads. Each owns exactly one lock, held only for short critical sections.
//! 4. **Composability**: Plain structs with value-type messages at the boundaries; std and Tokio channel delivery are both supported without feature gymnastics.
//!
//! ## Use Cases
//!
//! - **Venue Connectors**: Normalization layer between an exchange protocol adapter and strategy code
//! - **Market Data Gateways**: Fan one upstream feed out to many downstream consumers at individual depths
//! - **History Downloaders**: Drive incremental backfills from the gap scanner's coverage reports
//! - **Simulation and Testing**: Deterministic engines replay captured sessions byte-for-byte
//!
//! ## Status
//! This project is currently in active development and is not yet suitable for production use.

pub mod messages;
pub mod normalize;

pub mod prelude;
mod utils;

pub use messages::{
    BookLevel, BookState, BookUpdate, DataKind, ExecutionReport, FieldValue, InstrumentId,
    Level1Field, Level1Update, LookupKind, LookupRequest, Message, OfflineMode, OrderCommand,
    OrderKind, OrderState, RequestId, Side, SubscribeCommand, SubscriptionKey,
};
pub use normalize::dispatch::{Fanout, FanoutStd, FanoutTokio};
pub use normalize::gaps::{DateCoverage, DateGap, GapScanner, MemoryCoverage, WeekendPolicy};
pub use normalize::{
    ApplyOutcome, BookBuilder, BookIncrementEngine, DepthTruncator, InboundOutcome,
    Level1DepthEngine, LookupScheduler, NormalizeError, OfflineBuffer, OfflineDecision,
    ProcessedBook, ProcessedLevel1, TimedOutLookup,
};
pub use utils::current_time_millis;
