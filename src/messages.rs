//! Message and data model shared by all normalization engines
//!
//! Every engine in this crate consumes and produces values from this module.
//! Prices are fixed-point `u128` ticks and volumes are `u64` units; the crate
//! never touches floating point. Timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Opaque correlation identifier for a subscription, order or lookup request.
///
/// Ids are assigned by the embedding adapter and are unique within a session.
/// The derived `Ord` is load-bearing: when several requests share one
/// subscription entry, the lowest id is the entry's index key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(raw: u64) -> Self {
        RequestId(raw)
    }
}

/// Instrument identity: symbol plus trading venue.
///
/// The `Default` value (both fields empty) is the "all instruments" sentinel
/// used by firehose subscriptions that want every update of a given kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId {
    /// Exchange symbol, e.g. `BTC/USD`
    pub symbol: String,
    /// Venue or board code the symbol trades on
    pub venue: String,
}

impl InstrumentId {
    /// Create an instrument identity from a symbol and venue
    pub fn new(symbol: impl Into<String>, venue: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            venue: venue.into(),
        }
    }

    /// The "all instruments" sentinel
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the "all instruments" sentinel
    #[must_use]
    #[inline]
    pub fn is_all(&self) -> bool {
        self.symbol.is_empty() && self.venue.is_empty()
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "<all>")
        } else {
            write!(f, "{}@{}", self.symbol, self.venue)
        }
    }
}

/// Kind of market data a subscription requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    /// Best bid/offer and trade statistics as individual field changes
    Level1,
    /// Full or incremental order book depth
    Depth,
    /// Trade prints
    Trades,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Level1 => write!(f, "level1"),
            DataKind::Depth => write!(f, "depth"),
            DataKind::Trades => write!(f, "trades"),
        }
    }
}

/// Logical identity of a subscription: instrument plus data kind.
///
/// Multiple request ids can map to one key once their subscriptions are
/// confirmed online; the engines coalesce them into a single upstream entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// The instrument the subscription covers
    pub instrument: InstrumentId,
    /// The kind of data requested
    pub kind: DataKind,
}

impl SubscriptionKey {
    /// Create a subscription key
    pub fn new(instrument: InstrumentId, kind: DataKind) -> Self {
        Self { instrument, kind }
    }
}

/// A single price level of an order book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Price in fixed-point ticks
    pub price: u128,
    /// Resting volume at the price; zero in a diff means "delete this level"
    pub volume: u64,
}

impl BookLevel {
    /// Create a price level
    pub fn new(price: u128, volume: u64) -> Self {
        Self { price, volume }
    }
}

/// Phase tag carried by incremental book updates.
///
/// `None` state on a [`BookUpdate`] means the update is already a complete
/// book and needs no reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookState {
    /// First fragment of a new snapshot; discard prior state
    SnapshotStarted,
    /// Continuation fragment of a snapshot in progress
    SnapshotBuilding,
    /// Final fragment; the accumulated book is now complete
    SnapshotComplete,
    /// Differential update relative to the last complete snapshot
    Increment,
}

/// An order book message: either an incremental fragment from the feed or a
/// complete book emitted by the engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    /// Instrument this book belongs to
    pub instrument: InstrumentId,
    /// Exchange timestamp in Unix milliseconds
    pub server_time: u64,
    /// Bid levels, best (highest price) first
    pub bids: Vec<BookLevel>,
    /// Ask levels, best (lowest price) first
    pub asks: Vec<BookLevel>,
    /// Incremental phase, or `None` for a complete book
    pub state: Option<BookState>,
    /// Set when the book was synthesized from another data kind
    pub built_from: Option<DataKind>,
    /// Correlation ids of the subscriptions this update belongs to
    pub subscription_ids: Vec<RequestId>,
}

impl BookUpdate {
    /// Create an empty book update with no levels and no state tag
    pub fn new(instrument: InstrumentId, server_time: u64) -> Self {
        Self {
            instrument,
            server_time,
            bids: Vec::new(),
            asks: Vec::new(),
            state: None,
            built_from: None,
            subscription_ids: Vec::new(),
        }
    }

    /// Returns `true` if the update is a complete book rather than a fragment
    #[must_use]
    #[inline]
    pub fn is_full(&self) -> bool {
        self.state.is_none()
    }
}

/// Individually reportable level1 fields
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Level1Field {
    /// Best bid price
    BestBidPrice,
    /// Volume resting at the best bid
    BestBidVolume,
    /// Best ask price
    BestAskPrice,
    /// Volume resting at the best ask
    BestAskVolume,
    /// Price of the last trade
    LastTradePrice,
    /// Volume of the last trade
    LastTradeVolume,
}

/// Value of a level1 field change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A price in fixed-point ticks
    Price(u128),
    /// A volume in units
    Volume(u64),
}

impl FieldValue {
    /// The contained price, if this is a price value
    #[must_use]
    #[inline]
    pub fn as_price(&self) -> Option<u128> {
        match self {
            FieldValue::Price(p) => Some(*p),
            FieldValue::Volume(_) => None,
        }
    }

    /// The contained volume, if this is a volume value
    #[must_use]
    #[inline]
    pub fn as_volume(&self) -> Option<u64> {
        match self {
            FieldValue::Volume(v) => Some(*v),
            FieldValue::Price(_) => None,
        }
    }
}

/// A batch of level1 field changes for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level1Update {
    /// Instrument the changes apply to
    pub instrument: InstrumentId,
    /// Exchange timestamp in Unix milliseconds
    pub server_time: u64,
    /// Changed fields and their new values
    pub changes: BTreeMap<Level1Field, FieldValue>,
    /// Correlation ids of the subscriptions this update belongs to
    pub subscription_ids: Vec<RequestId>,
}

impl Level1Update {
    /// Create an update with no changes
    pub fn new(instrument: InstrumentId, server_time: u64) -> Self {
        Self {
            instrument,
            server_time,
            changes: BTreeMap::new(),
            subscription_ids: Vec::new(),
        }
    }

    /// Record a field change, replacing any previous value for the field
    pub fn set(&mut self, field: Level1Field, value: FieldValue) {
        self.changes.insert(field, value);
    }

    /// The recorded value for a field, if any
    #[must_use]
    pub fn get(&self, field: Level1Field) -> Option<FieldValue> {
        self.changes.get(&field).copied()
    }

    /// Returns `true` if no fields changed
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// How a request behaves when the connection is down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OfflineMode {
    /// Hold the message and replay it after reconnect
    #[default]
    Buffer,
    /// Send the message regardless of connectivity
    Ignore,
    /// Fail the request immediately instead of holding it
    Cancel,
}

/// A subscription request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeCommand {
    /// Correlation id of this request
    pub request_id: RequestId,
    /// Instrument to subscribe to; the sentinel subscribes to all instruments
    pub instrument: InstrumentId,
    /// Data kind requested
    pub kind: DataKind,
    /// Maximum number of levels per side the subscriber wants, if limited
    pub depth: Option<usize>,
    /// Lookup timeout, when the request doubles as a bounded lookup
    pub timeout: Option<Duration>,
    /// Skip reconstruction and deliver raw feed messages for this id
    pub pass_through: bool,
    /// Behavior while the connection is down
    pub offline_mode: OfflineMode,
}

impl SubscribeCommand {
    /// Create a subscription request with default options
    pub fn new(request_id: RequestId, instrument: InstrumentId, kind: DataKind) -> Self {
        Self {
            request_id,
            instrument,
            kind,
            depth: None,
            timeout: None,
            pass_through: false,
            offline_mode: OfflineMode::default(),
        }
    }

    /// The logical subscription key of this request
    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.instrument.clone(), self.kind)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid side
    Buy,
    /// Ask side
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Rests at a limit price
    Limit,
    /// Executes at the prevailing price
    Market,
}

/// Lifecycle state reported for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Accepted and working
    Active,
    /// Finished: filled, cancelled or expired
    Done,
    /// Rejected
    Failed,
}

/// An order registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCommand {
    /// Correlation id of this registration
    pub request_id: RequestId,
    /// Instrument to trade
    pub instrument: InstrumentId,
    /// Order side
    pub side: Side,
    /// Limit price in ticks; ignored for market orders
    pub price: u128,
    /// Order volume in units
    pub volume: u64,
    /// Order type
    pub kind: OrderKind,
}

/// Category of reference-data lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupKind {
    /// Instrument definitions
    Security,
    /// Venue/board definitions
    Board,
    /// Portfolio definitions
    Portfolio,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Security => write!(f, "security"),
            LookupKind::Board => write!(f, "board"),
            LookupKind::Portfolio => write!(f, "portfolio"),
        }
    }
}

/// A reference-data lookup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Correlation id of this lookup
    pub request_id: RequestId,
    /// Lookup category
    pub kind: LookupKind,
    /// Optional server-side filter expression
    pub filter: Option<String>,
}

impl LookupRequest {
    /// Create an unfiltered lookup request
    pub fn new(request_id: RequestId, kind: LookupKind) -> Self {
        Self {
            request_id,
            kind,
            filter: None,
        }
    }
}

/// Synthesized order lifecycle report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Correlation id of the request this report answers
    pub original_id: RequestId,
    /// Resulting order state
    pub order_state: OrderState,
    /// Type of the order the report concerns
    pub kind: OrderKind,
}

/// The messages flowing through the normalization pipeline.
///
/// Outbound messages travel from the consumer toward the venue; inbound
/// messages travel from the venue toward the consumer. A handful of variants
/// (`ProcessBuffered`, `ConnectionLost`, `ConnectionRestored`) exist only
/// inside the pipeline and never reach a wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Open the venue connection. The same variant answers the request on
    /// the inbound lane, with `error` set when the attempt failed.
    Connect {
        /// Failure description on the inbound lane, `None` otherwise
        error: Option<String>,
    },
    /// Close the venue connection
    Disconnect,
    /// Drop all adapter state
    Reset,
    /// Periodic keep-alive; carries its own offline behavior
    Time {
        /// Behavior while the connection is down
        offline_mode: OfflineMode,
    },
    /// Subscribe to market data
    Subscribe(SubscribeCommand),
    /// Cancel a market data subscription
    Unsubscribe {
        /// Correlation id of the unsubscribe itself
        request_id: RequestId,
        /// Id of the subscription being cancelled
        original_id: RequestId,
    },
    /// Register an order
    RegisterOrder(OrderCommand),
    /// Cancel a working order
    CancelOrder {
        /// Correlation id of the cancel itself
        request_id: RequestId,
        /// Id of the registration being cancelled
        original_id: RequestId,
    },
    /// Replace a working order with a new one
    ReplaceOrder {
        /// Correlation id of the replace itself
        request_id: RequestId,
        /// Id of the registration being replaced
        original_id: RequestId,
        /// The replacement order
        order: OrderCommand,
    },
    /// Request reference data
    Lookup(LookupRequest),
    /// Venue answer to a subscription or control request
    SubscriptionResponse {
        /// Id of the request being answered
        original_id: RequestId,
        /// Failure description, or `None` on success
        error: Option<String>,
    },
    /// The subscription has caught up and is now streaming live data
    SubscriptionOnline {
        /// Id of the subscription
        original_id: RequestId,
    },
    /// The subscription ended normally
    SubscriptionFinished {
        /// Id of the subscription
        original_id: RequestId,
    },
    /// Order lifecycle report
    Execution(ExecutionReport),
    /// Order book data
    Book(BookUpdate),
    /// Level1 field changes
    Level1(Level1Update),
    /// The transport dropped unexpectedly
    ConnectionLost {
        /// `true` when the venue wipes session state on drop, so the
        /// consumer must resubscribe from scratch
        reset_state: bool,
    },
    /// The transport recovered after a drop
    ConnectionRestored,
    /// Internal trigger: replay everything buffered while offline
    ProcessBuffered,
}

impl Message {
    /// Short lowercase label for logging
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::Disconnect => "disconnect",
            Message::Reset => "reset",
            Message::Time { .. } => "time",
            Message::Subscribe(_) => "subscribe",
            Message::Unsubscribe { .. } => "unsubscribe",
            Message::RegisterOrder(_) => "register_order",
            Message::CancelOrder { .. } => "cancel_order",
            Message::ReplaceOrder { .. } => "replace_order",
            Message::Lookup(_) => "lookup",
            Message::SubscriptionResponse { .. } => "subscription_response",
            Message::SubscriptionOnline { .. } => "subscription_online",
            Message::SubscriptionFinished { .. } => "subscription_finished",
            Message::Execution(_) => "execution",
            Message::Book(_) => "book",
            Message::Level1(_) => "level1",
            Message::ConnectionLost { .. } => "connection_lost",
            Message::ConnectionRestored => "connection_restored",
            Message::ProcessBuffered => "process_buffered",
        }
    }

    /// The correlation id carried by this message, when it has exactly one
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Message::Subscribe(cmd) => Some(cmd.request_id),
            Message::Unsubscribe { request_id, .. } => Some(*request_id),
            Message::RegisterOrder(order) => Some(order.request_id),
            Message::CancelOrder { request_id, .. } => Some(*request_id),
            Message::ReplaceOrder { request_id, .. } => Some(*request_id),
            Message::Lookup(lookup) => Some(lookup.request_id),
            Message::SubscriptionResponse { original_id, .. } => Some(*original_id),
            Message::SubscriptionOnline { original_id } => Some(*original_id),
            Message::SubscriptionFinished { original_id } => Some(*original_id),
            Message::Execution(report) => Some(report.original_id),
            _ => None,
        }
    }
}
