//! Strongly-typed identifiers.
//!
//! Both ids are ULIDs behind a phantom-typed wrapper, so a `JobId` and a
//! `WorkerId` can never be mixed up at compile time. ULIDs sort by creation
//! time, which the stores rely on as the final claim tie-break.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Marker trait for id kinds. Provides the display prefix ("job-", "worker-").
pub trait IdKind: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id wrapper. The marker type costs nothing at runtime.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdKind> {
    ulid: Ulid,
    #[serde(skip)]
    _kind: PhantomData<T>,
}

impl<T: IdKind> Id<T> {
    /// Mint a fresh id from the current wall clock.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _kind: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Canonical string form for the storage boundary (no display prefix).
    pub fn as_storage_str(&self) -> String {
        self.ulid.to_string()
    }

    /// Parse the storage form. Accepts the prefixed display form too.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

impl<T: IdKind> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdKind> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for job ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {}

impl IdKind for JobKind {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Marker for worker instance ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkerKind {}

impl IdKind for WorkerKind {
    fn prefix() -> &'static str {
        "worker-"
    }
}

/// Identifier of a persisted job.
pub type JobId = Id<JobKind>;

/// Identifier of a worker instance (one per `Worker` construction).
pub type WorkerId = Id<WorkerKind>;
