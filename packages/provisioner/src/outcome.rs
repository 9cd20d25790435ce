//! Per-object outcomes of a reconciliation run.

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Principal,
    Collection,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Principal => f.write_str("principal"),
            ObjectKind::Collection => f.write_str("collection"),
        }
    }
}

/// Identifies one declared object. Displays as `kind:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectRef {
    pub fn principal(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Principal,
            name: name.into(),
        }
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Collection,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    AlreadyExists,
    Updated,
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => f.write_str("created"),
            Outcome::AlreadyExists => f.write_str("already_exists"),
            Outcome::Updated => f.write_str("updated"),
            Outcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// What was observed about the database itself. Databases are created lazily
/// by the engine, so this is never reported as a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseObservation {
    /// The database existed before the run.
    Existing,
    /// The database did not exist yet; the engine materializes it on first write.
    Pending,
}

/// Why a pass stopped before reaching every declared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    /// The run deadline passed.
    Deadline,
    /// The caller cancelled the run.
    Cancelled,
}

impl Interruption {
    /// Failure reason recorded for objects the pass did not get to.
    pub fn reason(&self) -> &'static str {
        match self {
            Interruption::Deadline => "timeout: run deadline exceeded",
            Interruption::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::Deadline => f.write_str("deadline"),
            Interruption::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub already_exists: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub database_name: String,
    pub database: DatabaseObservation,
    /// One entry per declared object, in declaration order.
    pub per_object: IndexMap<ObjectRef, Outcome>,
    /// Set when the pass was cut short; objects it did not finish are `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<Interruption>,
}

impl ReconciliationResult {
    pub fn new(database_name: impl Into<String>, database: DatabaseObservation) -> Self {
        Self {
            database_name: database_name.into(),
            database,
            per_object: IndexMap::new(),
            interrupted: None,
        }
    }

    pub(crate) fn record(&mut self, object: ObjectRef, outcome: Outcome) {
        self.per_object.insert(object, outcome);
    }

    pub fn outcome(&self, object: &ObjectRef) -> Option<&Outcome> {
        self.per_object.get(object)
    }

    /// True when no object failed.
    pub fn is_success(&self) -> bool {
        !self.per_object.values().any(Outcome::is_failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ObjectRef, &str)> {
        self.per_object.iter().filter_map(|(object, outcome)| match outcome {
            Outcome::Failed(reason) => Some((object, reason.as_str())),
            _ => None,
        })
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in self.per_object.values() {
            match outcome {
                Outcome::Created => counts.created += 1,
                Outcome::AlreadyExists => counts.already_exists += 1,
                Outcome::Updated => counts.updated += 1,
                Outcome::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }
}
