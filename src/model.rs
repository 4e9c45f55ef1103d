use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// End sentinel for occupancy that has not been terminated yet
/// (9999-12-31T23:59:59.999Z). Never used in duration math.
pub const OPEN_END: Ms = 253_402_300_799_999;

/// Resource identity. Seats are keyed `"1"..="N"`, the room by [`ROOM_KEY`].
pub type ResourceKey = String;

/// The singleton conference room. Distinct from every seat key.
pub const ROOM_KEY: &str = "conference_room";

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `[start, OPEN_END)`: occupancy with no known end.
    pub fn open_from(start: Ms) -> Self {
        Self::new(start, OPEN_END)
    }

    pub fn is_open(&self) -> bool {
        self.end == OPEN_END
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Occupied time as of `now`. Open spans are measured to `now`, never to the sentinel.
    pub fn elapsed_ms(&self, now: Ms) -> Ms {
        let end = if self.is_open() { now } else { self.end.min(now) };
        (end - self.start).max(0)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Which area a booking targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Area {
    /// Individually keyed seats in the common area.
    Common,
    /// The singleton conference room.
    Room,
}

impl Area {
    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Common => "common",
            Area::Room => "room",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "common" | "seat" | "seats" => Some(Area::Common),
            "room" | "conference" | "conference_room" => Some(Area::Room),
            _ => None,
        }
    }
}

/// Why a resource is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Regular,
    Reserved,
    Promo,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Regular => "regular",
            Source::Reserved => "reserved",
            Source::Promo => "promo",
        }
    }
}

/// Soft marker carried by a blocked-time record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Note {
    None,
    /// Auto-block written for a scheduled reservation. Exclusive, hidden from display.
    Reservation,
    /// Non-exclusive mirror ("temp"). Never enforced, never conflicts.
    Mirror,
}

impl Note {
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, Note::Mirror)
    }

    pub fn hidden_from_display(&self) -> bool {
        matches!(self, Note::Mirror | Note::Reservation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Note::None => "",
            Note::Reservation => "reservation",
            Note::Mirror => "temp",
        }
    }
}

/// The ledger's unit of truth: one resource blocked for one span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: Ulid,
    pub span: Span,
    pub source: Source,
    pub note: Note,
    pub booking_id: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub key: ResourceKey,
    /// All blocked-time records, sorted by `span.start`.
    pub records: Vec<BlockRecord>,
}

impl ResourceState {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            records: Vec::new(),
        }
    }

    /// Insert a record maintaining sort order by span.start.
    pub fn insert_record(&mut self, record: BlockRecord) {
        let pos = self
            .records
            .partition_point(|r| r.span.start <= record.span.start);
        self.records.insert(pos, record);
    }

    pub fn remove_record(&mut self, id: Ulid) -> Option<BlockRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }

    pub fn record(&self, id: Ulid) -> Option<&BlockRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Shorten a record in place. The start is unchanged, so sort order holds.
    pub fn set_end(&mut self, id: Ulid, end: Ms) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.span.end = end;
                true
            }
            None => false,
        }
    }

    /// Records whose span overlaps the query window.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &BlockRecord> {
        let right_bound = self.records.partition_point(|r| r.span.start < query.end);
        self.records[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The fixed resource catalog: `seats` numbered seats plus the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    seats: Vec<ResourceKey>,
}

impl Catalog {
    pub fn with_seats(count: u32) -> Self {
        Self {
            seats: (1..=count).map(|n| n.to_string()).collect(),
        }
    }

    pub fn is_seat(&self, key: &str) -> bool {
        self.seats.iter().any(|s| s == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        key == ROOM_KEY || self.is_seat(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.seats.iter().map(String::as_str).chain(std::iter::once(ROOM_KEY))
    }
}

// ── Bookings ─────────────────────────────────────────────────────

/// Package terms frozen onto a promo booking when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTerms {
    pub name: String,
    pub price: Decimal,
    pub duration_ms: Ms,
    pub max_attempts: u32,
    pub validity_ms: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    Walkin,
    Reservation,
    Promo(PackageTerms),
}

impl BookingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Walkin => "walkin",
            BookingKind::Reservation => "reservation",
            BookingKind::Promo(_) => "promo",
        }
    }

    pub fn source(&self) -> Source {
        match self {
            BookingKind::Walkin => Source::Regular,
            BookingKind::Reservation => Source::Reserved,
            BookingKind::Promo(_) => Source::Promo,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    None,
    Percent,
    Amount,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::None => "none",
            DiscountKind::Percent => "percent",
            DiscountKind::Amount => "amount",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Some(DiscountKind::None),
            "percent" | "%" => Some(DiscountKind::Percent),
            "amount" | "fixed" => Some(DiscountKind::Amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub kind: DiscountKind,
    pub value: Decimal,
}

impl Discount {
    pub const NONE: Discount = Discount {
        kind: DiscountKind::None,
        value: Decimal::ZERO,
    };
}

/// Monetary state of a booking. Derived figures live in `billing::Settlement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub base_cost: Decimal,
    pub discount: Discount,
    pub down_payment: Decimal,
    pub gcash: Decimal,
    pub cash: Decimal,
    pub paid: bool,
    /// Set when `paid` was chosen by staff rather than computed.
    pub paid_override: bool,
}

impl Bill {
    pub fn new(base_cost: Decimal, down_payment: Decimal) -> Self {
        Self {
            base_cost,
            discount: Discount::NONE,
            down_payment,
            gcash: Decimal::ZERO,
            cash: Decimal::ZERO,
            paid: false,
            paid_override: false,
        }
    }
}

/// A booking's reference to one ledger record it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRef {
    pub resource: ResourceKey,
    pub record_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub kind: BookingKind,
    pub customer: Customer,
    /// Opaque staff identity supplied by the identity provider.
    pub created_by: Option<String>,
    pub area: Area,
    pub resources: Vec<ResourceKey>,
    pub start: Ms,
    /// `OPEN_END` while `open`.
    pub end: Ms,
    pub open: bool,
    pub ledger: Vec<LedgerRef>,
    pub bill: Bill,
    pub promo_code: Option<String>,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Upcoming,
    Ongoing,
    Finished,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Upcoming => "upcoming",
            Status::Ongoing => "ongoing",
            Status::Finished => "finished",
        }
    }
}

impl Booking {
    /// Status is a pure function of the window and `now`; it is never stored.
    /// An open booking never reaches `Finished`.
    pub fn status(&self, now: Ms) -> Status {
        if now < self.start {
            Status::Upcoming
        } else if self.open || now <= self.end {
            Status::Ongoing
        } else {
            Status::Finished
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn source(&self) -> Source {
        self.kind.source()
    }

    /// The ledger span this booking occupies, if it is non-empty.
    pub fn span(&self) -> Option<Span> {
        (self.start < self.end).then(|| Span {
            start: self.start,
            end: self.end,
        })
    }

    pub fn elapsed_ms(&self, now: Ms) -> Ms {
        let end = if self.open { now } else { self.end.min(now) };
        (end - self.start).max(0)
    }

    pub fn note(&self) -> Note {
        match self.kind {
            BookingKind::Reservation => Note::Reservation,
            _ => Note::None,
        }
    }
}

// ── Promo codes & attendance ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub booking_id: Ulid,
    pub max_attempts: u32,
    pub attempts_left: u32,
    pub validity_end_at: Ms,
    pub superseded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub id: Ulid,
    pub booking_id: Ulid,
    /// The code presented at check-in.
    pub code: String,
    pub local_day: NaiveDate,
    pub in_at: Ms,
    pub out_at: Option<Ms>,
}

impl AttendanceEntry {
    pub fn is_open(&self) -> bool {
        self.out_at.is_none()
    }
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Blocked {
        resource: ResourceKey,
        record: BlockRecord,
    },
    Truncated {
        resource: ResourceKey,
        id: Ulid,
        end: Ms,
    },
    Released {
        resource: ResourceKey,
        id: Ulid,
    },
    BookingCreated {
        booking: Box<Booking>,
    },
    BookingStopped {
        id: Ulid,
        end: Ms,
        base_cost: Decimal,
    },
    BookingCancelled {
        id: Ulid,
        at: Ms,
    },
    BookingPurged {
        id: Ulid,
    },
    BillUpdated {
        id: Ulid,
        bill: Bill,
    },
    CodeIssued {
        code: PromoCode,
    },
    CodeSuperseded {
        code: String,
    },
    /// `attempts_left` is the code's count after this check-in.
    CheckedIn {
        entry: AttendanceEntry,
        attempts_left: u32,
    },
    CheckedOut {
        booking_id: Ulid,
        entry_id: Ulid,
        at: Ms,
    },
}

impl Event {
    /// The resource whose occupancy this event changes, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Event::Blocked { resource, .. }
            | Event::Truncated { resource, .. }
            | Event::Released { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub id: Ulid,
    pub resource: ResourceKey,
    pub start: Ms,
    pub end: Ms,
    pub source: Source,
    pub note: Note,
    pub booking_id: Option<Ulid>,
}

impl BlockInfo {
    pub fn from_record(resource: &str, record: &BlockRecord) -> Self {
        Self {
            id: record.id,
            resource: resource.to_string(),
            start: record.span.start,
            end: record.span.end,
            source: record.source,
            note: record.note.clone(),
            booking_id: record.booking_id,
        }
    }
}
