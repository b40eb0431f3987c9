use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn shifted(&self, offset: Ms) -> Span {
        Span::new(self.start + offset, self.end + offset)
    }
}

// ── Reservation status ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    /// Reachable value for administrative use; the engine never assigns it.
    Pending,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Pending => "pending",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    /// Whether a reservation in this status still claims its time slot.
    pub fn occupies(&self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "pending" => Ok(ReservationStatus::Pending),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    /// Fixed 30-day step, not calendar months.
    Monthly,
}

impl Frequency {
    pub fn offset_ms(&self) -> Ms {
        match self {
            Frequency::Daily => DAY_MS,
            Frequency::Weekly => 7 * DAY_MS,
            Frequency::Biweekly => 14 * DAY_MS,
            Frequency::Monthly => 30 * DAY_MS,
        }
    }

    /// Recurrence token stored on every member of a series.
    pub fn token(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Biweekly => "BIWEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// Membership of a reservation in a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTag {
    pub id: Ulid,
    pub frequency: Frequency,
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub status: ReservationStatus,
    pub attendees: u32,
    pub series: Option<SeriesTag>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn occupies(&self) -> bool {
        self.status.occupies()
    }

    pub fn series_id(&self) -> Option<Ulid> {
        self.series.map(|s| s.id)
    }

    /// Total cost in cents for a room billed at `hourly_rate_cents`, rounded down.
    pub fn cost_cents(&self, hourly_rate_cents: u64) -> u64 {
        let duration = self.span.duration_ms().max(0) as u128;
        (hourly_rate_cents as u128 * duration / HOUR_MS as u128) as u64
    }
}

// ── Rooms and users ──────────────────────────────────────────────

/// Administrative description of a room. Everything except identity and bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomProfile {
    pub name: String,
    pub capacity: u32,
    pub floor: Option<i32>,
    pub description: Option<String>,
    pub active: bool,
    pub hourly_rate_cents: u64,
    pub equipment: BTreeSet<String>,
}

impl RoomProfile {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            capacity,
            floor: None,
            description: None,
            active: true,
            hourly_rate_cents: 0,
            equipment: BTreeSet::new(),
        }
    }

    pub fn with_equipment<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.equipment = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hourly_rate(mut self, cents: u64) -> Self {
        self.hourly_rate_cents = cents;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_all_equipment(&self, required: &[String]) -> bool {
        required.iter().all(|name| self.equipment.contains(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub department: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub profile: RoomProfile,
    /// All reservations, cancelled ones included, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(id: Ulid, profile: RoomProfile) -> Self {
        Self {
            id,
            profile,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose span overlaps the query window, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Remove every reservation belonging to `series_id`; returns the removed ids.
    pub fn remove_series(&mut self, series_id: &Ulid) -> Vec<Ulid> {
        let mut removed = Vec::new();
        self.reservations.retain(|r| {
            if r.series_id().as_ref() == Some(series_id) {
                removed.push(r.id);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.profile.name.clone(),
            capacity: self.profile.capacity,
            floor: self.profile.floor,
            description: self.profile.description.clone(),
            active: self.profile.active,
            hourly_rate_cents: self.profile.hourly_rate_cents,
            equipment: self.profile.equipment.iter().cloned().collect(),
        }
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        profile: RoomProfile,
    },
    RoomUpdated {
        id: Ulid,
        profile: RoomProfile,
    },
    UserRegistered {
        user: UserInfo,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    /// A whole recurring series in one record, so replay never sees half of it.
    SeriesCreated {
        room_id: Ulid,
        series: SeriesTag,
        reservations: Vec<Reservation>,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
        at: Ms,
    },
    ReservationsCompleted {
        room_id: Ulid,
        ids: Vec<Ulid>,
        at: Ms,
    },
    SeriesDeleted {
        series_id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub floor: Option<i32>,
    pub description: Option<String>,
    pub active: bool,
    pub hourly_rate_cents: u64,
    pub equipment: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub min_capacity: Option<u32>,
    /// Every named item must be present.
    pub equipment: Vec<String>,
}

impl RoomFilter {
    pub fn matches(&self, profile: &RoomProfile) -> bool {
        self.min_capacity.is_none_or(|min| profile.capacity >= min)
            && profile.has_all_equipment(&self.equipment)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    /// Keep reservations overlapping this window.
    pub window: Option<Span>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.is_none_or(|id| r.room_id == id)
            && self.user_id.is_none_or(|id| r.user_id == id)
            && self.status.is_none_or(|s| r.status == s)
            && self.window.is_none_or(|w| w.overlaps(&r.span))
    }
}

/// Request to book one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub attendees: u32,
}

/// Request to book a recurring series. `first` describes occurrence #1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeries {
    pub first: NewReservation,
    pub frequency: Frequency,
    pub occurrences: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            title: "standup".into(),
            description: None,
            span: Span::new(start, end),
            status,
            attendees: 1,
            series: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(150, 250)));
        assert!(a.overlaps(&Span::new(120, 130)));
        assert!(!a.overlaps(&Span::new(200, 300)));
        assert!(!a.overlaps(&Span::new(0, 100)));
    }

    #[test]
    fn span_shifted_keeps_duration() {
        let s = Span::new(1_000, 4_000).shifted(DAY_MS);
        assert_eq!(s.start, DAY_MS + 1_000);
        assert_eq!(s.duration_ms(), 3_000);
    }

    #[test]
    fn frequency_offsets() {
        assert_eq!(Frequency::Daily.offset_ms(), 86_400_000);
        assert_eq!(Frequency::Weekly.offset_ms(), 7 * 86_400_000);
        assert_eq!(Frequency::Biweekly.offset_ms(), 14 * 86_400_000);
        assert_eq!(Frequency::Monthly.offset_ms(), 30 * 86_400_000);
    }

    #[test]
    fn frequency_parse_is_case_insensitive() {
        assert_eq!("WEEKLY".parse::<Frequency>(), Ok(Frequency::Weekly));
        assert_eq!(" biweekly ".parse::<Frequency>(), Ok(Frequency::Biweekly));
        assert!("yearly".parse::<Frequency>().is_err());
        assert_eq!(Frequency::Monthly.to_string(), "MONTHLY");
    }

    #[test]
    fn status_semantics() {
        assert!(ReservationStatus::Confirmed.occupies());
        assert!(ReservationStatus::Pending.occupies());
        assert!(ReservationStatus::Completed.occupies());
        assert!(!ReservationStatus::Cancelled.occupies());
        assert_eq!("Cancelled".parse::<ReservationStatus>(), Ok(ReservationStatus::Cancelled));
    }

    #[test]
    fn cost_is_rate_times_duration() {
        let r = reservation(0, 90 * MINUTE_MS, ReservationStatus::Confirmed);
        assert_eq!(r.cost_cents(10_000), 15_000);
        assert_eq!(r.cost_cents(0), 0);
        // 20 minutes at 1.00/h rounds down
        let short = reservation(0, 20 * MINUTE_MS, ReservationStatus::Confirmed);
        assert_eq!(short.cost_cents(100), 33);
    }

    #[test]
    fn reservations_stay_sorted() {
        let mut rs = RoomState::new(Ulid::new(), RoomProfile::new("A", 4));
        rs.insert_reservation(reservation(300, 400, ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(200, 300, ReservationStatus::Cancelled));
        let starts: Vec<Ms> = rs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(Ulid::new(), RoomProfile::new("A", 4));
        rs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(450, 600, ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(1_000, 1_100, ReservationStatus::Confirmed));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(Ulid::new(), RoomProfile::new("A", 4));
        rs.insert_reservation(reservation(100, 200, ReservationStatus::Confirmed));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_long_reservation_spanning_query() {
        let mut rs = RoomState::new(Ulid::new(), RoomProfile::new("A", 4));
        rs.insert_reservation(reservation(0, 10_000, ReservationStatus::Confirmed));
        assert_eq!(rs.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn remove_series_leaves_other_reservations() {
        let mut rs = RoomState::new(Ulid::new(), RoomProfile::new("A", 4));
        let tag = SeriesTag { id: Ulid::new(), frequency: Frequency::Daily };
        for i in 0..3 {
            let mut r = reservation(i * 1_000, i * 1_000 + 500, ReservationStatus::Confirmed);
            r.series = Some(tag);
            rs.insert_reservation(r);
        }
        let loose = reservation(5_000, 6_000, ReservationStatus::Confirmed);
        let loose_id = loose.id;
        rs.insert_reservation(loose);

        let removed = rs.remove_series(&tag.id);
        assert_eq!(removed.len(), 3);
        assert_eq!(rs.reservations.len(), 1);
        assert_eq!(rs.reservations[0].id, loose_id);
    }

    #[test]
    fn room_filter_requires_all_equipment() {
        let profile = RoomProfile::new("Board", 12).with_equipment(["projector", "whiteboard"]);
        let both = RoomFilter {
            min_capacity: Some(10),
            equipment: vec!["projector".into(), "whiteboard".into()],
        };
        assert!(both.matches(&profile));

        let missing = RoomFilter {
            min_capacity: None,
            equipment: vec!["projector".into(), "videoconference".into()],
        };
        assert!(!missing.matches(&profile));

        let too_small = RoomFilter { min_capacity: Some(13), equipment: vec![] };
        assert!(!too_small.matches(&profile));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            id: Ulid::new(),
            profile: RoomProfile::new("Aula", 30).with_equipment(["projector"]),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
