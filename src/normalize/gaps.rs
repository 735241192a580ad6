//! Historical coverage gap detection
//!
//! A history downloader wants to fetch only the days it does not already
//! hold. [`GapScanner`] walks a calendar range against a [`DateCoverage`]
//! source and reports the first contiguous run of missing days, optionally
//! treating weekends as days that never carry data.

use crate::messages::{DataKind, InstrumentId};
use crate::normalize::error::NormalizeError;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, trace};

/// How Saturday and Sunday participate in a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeekendPolicy {
    /// Weekend days count like any other calendar day
    Include,
    /// Weekend days are invisible: never required, never part of a gap
    #[default]
    Skip,
}

/// An inclusive run of calendar days with no persisted data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateGap {
    /// First missing day
    pub start: NaiveDate,
    /// Last missing day, `>= start`
    pub end: NaiveDate,
}

impl DateGap {
    fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }
}

impl fmt::Display for DateGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Answers "which days already hold data" for one instrument and kind.
///
/// Implementations must answer from memory that is already loaded; the
/// scanner performs no I/O of its own.
pub trait DateCoverage {
    /// Days inside `[from, to]` (inclusive) that hold persisted data for
    /// the given instrument and kind.
    fn persisted_dates(
        &self,
        instrument: &InstrumentId,
        kind: DataKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> BTreeSet<NaiveDate>;
}

/// In-memory [`DateCoverage`] keyed by instrument and data kind.
///
/// Suitable for callers that index their storage once at startup and
/// update the set as downloads complete.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoverage {
    dates: HashMap<(InstrumentId, DataKind), BTreeSet<NaiveDate>>,
}

impl MemoryCoverage {
    /// Create an empty coverage map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one persisted day. Returns `false` if it was already known.
    pub fn record(&mut self, instrument: InstrumentId, kind: DataKind, date: NaiveDate) -> bool {
        self.dates.entry((instrument, kind)).or_default().insert(date)
    }

    /// Forget one persisted day. Returns `false` if it was not known.
    pub fn forget(&mut self, instrument: &InstrumentId, kind: DataKind, date: NaiveDate) -> bool {
        match self.dates.get_mut(&(instrument.clone(), kind)) {
            Some(set) => set.remove(&date),
            None => false,
        }
    }

    /// Whether nothing has been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.values().all(BTreeSet::is_empty)
    }
}

impl DateCoverage for MemoryCoverage {
    fn persisted_dates(
        &self,
        instrument: &InstrumentId,
        kind: DataKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> BTreeSet<NaiveDate> {
        self.dates
            .get(&(instrument.clone(), kind))
            .map(|set| set.range(from..=to).copied().collect())
            .unwrap_or_default()
    }
}

/// Finds missing days in a historical range.
///
/// Stateless apart from the coverage source it wraps; all methods take
/// `&self` and are safe to call from multiple threads when `C` is `Sync`.
#[derive(Debug)]
pub struct GapScanner<C> {
    coverage: C,
}

impl<C: DateCoverage> GapScanner<C> {
    /// Wrap a coverage source
    pub fn new(coverage: C) -> Self {
        Self { coverage }
    }

    /// The wrapped coverage source
    pub fn coverage(&self) -> &C {
        &self.coverage
    }

    /// Mutable access to the wrapped coverage source
    pub fn coverage_mut(&mut self) -> &mut C {
        &mut self.coverage
    }

    /// First contiguous run of days in `[from, to]` with no persisted data.
    ///
    /// Walks the range day by day. A day present in the coverage closes any
    /// open run; a missing day opens or extends one. Under
    /// [`WeekendPolicy::Skip`], Saturday and Sunday are neither required nor
    /// counted, and a run that is still open when the walk reaches a weekend
    /// closes out at Friday rather than spanning days that can never hold
    /// data.
    ///
    /// Returns `Ok(None)` when `from >= to` or the range has no gap.
    ///
    /// # Errors
    ///
    /// Rejects the "all instruments" sentinel; coverage is tracked per
    /// concrete instrument.
    pub fn next_gap(
        &self,
        instrument: &InstrumentId,
        kind: DataKind,
        from: NaiveDate,
        to: NaiveDate,
        policy: WeekendPolicy,
    ) -> Result<Option<DateGap>, NormalizeError> {
        if instrument.is_all() {
            return Err(NormalizeError::AllInstrumentsSentinel {
                operation: "next_gap",
            });
        }
        if from >= to {
            return Ok(None);
        }

        let persisted = self.coverage.persisted_dates(instrument, kind, from, to);

        let mut open: Option<DateGap> = None;
        let mut day = from;
        loop {
            if policy == WeekendPolicy::Skip && is_weekend(day) {
                // A run cannot span days that are never required
                if let Some(gap) = open {
                    debug!("Gap for {}/{}: {}", instrument, kind, gap);
                    return Ok(Some(gap));
                }
            } else if persisted.contains(&day) {
                if let Some(gap) = open {
                    debug!("Gap for {}/{}: {}", instrument, kind, gap);
                    return Ok(Some(gap));
                }
            } else {
                match &mut open {
                    Some(gap) => gap.end = day,
                    None => open = Some(DateGap::single(day)),
                }
            }

            if day >= to {
                break;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        match open {
            Some(gap) => {
                debug!("Gap for {}/{}: {}", instrument, kind, gap);
                Ok(Some(gap))
            }
            None => {
                trace!("No gap for {}/{} in {}..{}", instrument, kind, from, to);
                Ok(None)
            }
        }
    }
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}
