use time::{Duration, OffsetDateTime, UtcOffset};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now_utc() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn from(dt: OffsetDateTime) -> Self {
        Self(dt.to_offset(UtcOffset::UTC))
    }

    /// Returns the inner UTC `OffsetDateTime` without consuming the wrapper.
    pub fn as_inner(&self) -> OffsetDateTime {
        self.0
    }

    /// Consumes the wrapper and returns the inner UTC `OffsetDateTime`.
    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    /// Returns a new timestamp shifted by `delta` (which may be negative).
    pub fn plus(&self, delta: Duration) -> Self {
        Self(self.0 + delta)
    }

    /// Like [`Timestamp::plus`], but `None` when the result leaves the
    /// representable date range.
    pub fn checked_plus(&self, delta: Duration) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }
}
