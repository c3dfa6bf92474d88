//! # heritage-types: Core types for the heritage access core
//!
//! This crate contains shared types used across the access-decision system:
//! - Entity IDs ([`ObjectId`], [`UserId`], [`InstitutionId`], [`CollectionId`],
//!   [`RepositoryId`] and the row identifiers of each policy table)
//! - Requested actions ([`Action`])
//! - Time sources ([`Clock`], [`SystemClock`], [`FixedClock`])
//! - Listing helpers ([`Page`], [`Paged`])

use std::{
    fmt::{Debug, Display},
    str::FromStr,
    sync::RwLock,
};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| TypeError::InvalidId {
                        kind: stringify!($name),
                        value: s.to_string(),
                    })
            }
        }
    };
}

entity_id!(
    /// A catalogued record (information object) in the archive.
    ObjectId
);
entity_id!(
    /// An authenticated viewer. Absence of a `UserId` means anonymous.
    UserId
);
entity_id!(
    /// An institution that may scope a trust grant.
    InstitutionId
);
entity_id!(
    /// The parent collection of an object in the catalog hierarchy.
    CollectionId
);
entity_id!(
    /// The repository that owns an object.
    RepositoryId
);
entity_id!(TrustLevelId);
entity_id!(GrantId);
entity_id!(EmbargoId);
entity_id!(RuleId);
entity_id!(FlagId);
entity_id!(RequestId);
entity_id!(AuditRecordId);

// ============================================================================
// Errors
// ============================================================================

/// Boundary validation failures for values arriving from callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("unknown action '{0}' (expected view, download, download_master or all)")]
    UnknownAction(String),

    #[error("malformed {kind}: '{value}'")]
    InvalidId { kind: &'static str, value: String },
}

// ============================================================================
// Action
// ============================================================================

/// The operation a viewer wants to perform on an object.
///
/// `All` is only meaningful on rules and grants ("every action"); callers
/// asking for a decision normally pass one of the concrete actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Download,
    DownloadMaster,
    All,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Download => "download",
            Self::DownloadMaster => "download_master",
            Self::All => "all",
        }
    }

    /// Returns true for actions that deliver digital content to the viewer.
    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download | Self::DownloadMaster)
    }

    /// Returns whether a rule or grant declared for `self` covers `requested`.
    ///
    /// ```
    /// # use heritage_types::Action;
    /// assert!(Action::All.covers(Action::Download));
    /// assert!(Action::View.covers(Action::View));
    /// assert!(!Action::View.covers(Action::Download));
    /// ```
    pub fn covers(&self, requested: Action) -> bool {
        *self == Self::All || *self == requested
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "download" => Ok(Self::Download),
            "download_master" => Ok(Self::DownloadMaster),
            "all" => Ok(Self::All),
            _ => Err(TypeError::UnknownAction(s.to_string())),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time.
///
/// Every date comparison in the access core (embargo windows, grant expiry,
/// approval validity) goes through this seam so that decisions can be
/// evaluated deterministically in tests.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// A clock fixed at noon UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        let noon = date.and_hms_opt(12, 0, 0).unwrap_or_default();
        Self::at(Utc.from_utc_datetime(&noon))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Listing
// ============================================================================

/// A 1-based page request for administrative listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.max(1),
        }
    }

    pub fn first(size: usize) -> Self {
        Self::new(1, size)
    }

    /// Items skipped before this page. Saturates, so an absurd page number
    /// yields an empty page.
    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }
}

/// One page of results plus the totals needed to render pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
    pub pages: usize,
}

impl<T> Paged<T> {
    /// Slices an already ordered result set.
    pub fn from_sorted(all: Vec<T>, page: Page) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .collect();

        Self {
            items,
            total,
            page: page.number,
            size: page.size,
            pages: total.div_ceil(page.size),
        }
    }
}
