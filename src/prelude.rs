//! Prelude module that re-exports commonly used types and traits.
//!
//! This module provides a convenient way to import the most commonly used
//! types, traits, and functions from the feednorm crate. Instead of
//! importing each type individually, you can use:
//!
//! ```rust
//! use feednorm::prelude::*;
//! ```
//!
//! This will import all the essential types needed for working with the
//! normalization engines.

// Core message types
pub use crate::messages::{
    BookLevel, BookState, BookUpdate, DataKind, FieldValue, InstrumentId, Level1Field,
    Level1Update, LookupKind, LookupRequest, Message, OfflineMode, RequestId, SubscribeCommand,
    SubscriptionKey,
};

// Order-lane message types
pub use crate::messages::{ExecutionReport, OrderCommand, OrderKind, OrderState, Side};

// Reconstruction engines
pub use crate::normalize::book_builder::BookBuilder;
pub use crate::normalize::increment::{ApplyOutcome, BookIncrementEngine, ProcessedBook};
pub use crate::normalize::level1::{Level1DepthEngine, ProcessedLevel1};
pub use crate::normalize::truncate::DepthTruncator;

// Request lifecycle engines
pub use crate::normalize::lookup::{LookupScheduler, TimedOutLookup};
pub use crate::normalize::offline::{InboundOutcome, OfflineBuffer, OfflineDecision};

// History coverage
pub use crate::normalize::gaps::{DateCoverage, DateGap, GapScanner, MemoryCoverage, WeekendPolicy};

// Fan-out delivery
pub use crate::normalize::dispatch::{Fanout, FanoutStd, FanoutTokio};

// Error type shared by every engine
pub use crate::normalize::error::NormalizeError;

// Utility functions
pub use crate::utils::current_time_millis;
