use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    ResourceNotFound(Ulid),
    RequesterNotFound(Ulid),
    ReservationNotFound(Ulid),
    ResourceInactive(Ulid),
    CapacityExceeded {
        requested: u32,
        capacity: u32,
    },
    PastDateRejected {
        start: Ms,
        now: Ms,
    },
    /// `occurrence` is the 1-based index inside a series request, `None` for single bookings.
    Conflict {
        with: Ulid,
        start: Ms,
        occurrence: Option<u32>,
    },
    AlreadyCancelled(Ulid),
    PastCancellationRejected(Ulid),
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
    },
    InvalidOccurrenceCount(u32),
    AlreadyExists(Ulid),
    DuplicateEmail(String),
    LimitExceeded(&'static str),
    StorageFailure(String),
}

/// Stable classification of an [`EngineError`], one per distinct cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInterval,
    ResourceNotFound,
    RequesterNotFound,
    ReservationNotFound,
    ResourceInactive,
    CapacityExceeded,
    PastDateRejected,
    Conflict,
    AlreadyCancelled,
    PastCancellationRejected,
    InvalidTransition,
    InvalidOccurrenceCount,
    AlreadyExists,
    DuplicateEmail,
    LimitExceeded,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInterval => "invalid_interval",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::RequesterNotFound => "requester_not_found",
            ErrorKind::ReservationNotFound => "reservation_not_found",
            ErrorKind::ResourceInactive => "resource_inactive",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::PastDateRejected => "past_date_rejected",
            ErrorKind::Conflict => "conflict",
            ErrorKind::AlreadyCancelled => "already_cancelled",
            ErrorKind::PastCancellationRejected => "past_cancellation_rejected",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::InvalidOccurrenceCount => "invalid_occurrence_count",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::DuplicateEmail => "duplicate_email",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }

    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInterval => "RB001",
            ErrorKind::ResourceNotFound => "RB002",
            ErrorKind::RequesterNotFound => "RB003",
            ErrorKind::ResourceInactive => "RB004",
            ErrorKind::CapacityExceeded => "RB005",
            ErrorKind::PastDateRejected => "RB006",
            ErrorKind::Conflict => "23P01",
            ErrorKind::AlreadyCancelled => "RB007",
            ErrorKind::PastCancellationRejected => "RB008",
            ErrorKind::ReservationNotFound => "RB009",
            ErrorKind::InvalidTransition => "RB010",
            ErrorKind::InvalidOccurrenceCount => "RB011",
            ErrorKind::AlreadyExists => "23505",
            ErrorKind::DuplicateEmail => "RB012",
            ErrorKind::LimitExceeded => "54000",
            ErrorKind::StorageFailure => "40001",
        }
    }

    /// Storage contention and I/O failures; the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StorageFailure)
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInterval { .. } => ErrorKind::InvalidInterval,
            EngineError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            EngineError::RequesterNotFound(_) => ErrorKind::RequesterNotFound,
            EngineError::ReservationNotFound(_) => ErrorKind::ReservationNotFound,
            EngineError::ResourceInactive(_) => ErrorKind::ResourceInactive,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::PastDateRejected { .. } => ErrorKind::PastDateRejected,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::AlreadyCancelled(_) => ErrorKind::AlreadyCancelled,
            EngineError::PastCancellationRejected(_) => ErrorKind::PastCancellationRejected,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::InvalidOccurrenceCount(_) => ErrorKind::InvalidOccurrenceCount,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::DuplicateEmail(_) => ErrorKind::DuplicateEmail,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "start {start} must be before end {end}")
            }
            EngineError::ResourceNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RequesterNotFound(id) => write!(f, "user not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ResourceInactive(id) => write!(f, "room {id} is inactive"),
            EngineError::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "too many attendees: {requested} requested, room capacity is {capacity}"
            ),
            EngineError::PastDateRejected { start, now } => {
                write!(f, "cannot book in the past: start {start} is before now {now}")
            }
            EngineError::Conflict {
                with,
                start,
                occurrence: None,
            } => write!(f, "room already reserved at {start}: conflicts with {with}"),
            EngineError::Conflict {
                with,
                start,
                occurrence: Some(n),
            } => write!(
                f,
                "occurrence #{n} starting at {start} conflicts with {with}; no reservations were created"
            ),
            EngineError::AlreadyCancelled(id) => write!(f, "reservation {id} is already cancelled"),
            EngineError::PastCancellationRejected(id) => {
                write!(f, "reservation {id} has already started and cannot be cancelled")
            }
            EngineError::InvalidTransition { id, from } => {
                write!(f, "reservation {id} is {from} and cannot change status")
            }
            EngineError::InvalidOccurrenceCount(n) => {
                write!(f, "invalid number of occurrences: {n}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageFailure(e) => write!(f, "storage failure, retry: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
