use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EntityKey(pub String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ProgramId(pub String);

impl ProgramId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AttributeId(pub String);

impl AttributeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully assembled tracked entity as returned to callers.
///
/// The base fetch creates the record with its scalar fields; the merge step
/// attaches the per-source collections. After `find` returns the value is
/// read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub key: EntityKey,
    pub entity_type: String,
    pub org_unit: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attribute_values: Vec<AttributeValue>,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub program_owners: Vec<ProgramOwner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub attribute: AttributeId,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub uid: String,
    pub program: ProgramId,
    pub entity: EntityKey,
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub followup: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Populated at merge time when events were requested.
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Active,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    /// Uid of the enrollment this event belongs to.
    pub enrollment: String,
    pub program: ProgramId,
    pub program_stage: String,
    pub org_unit: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One endpoint of a relationship. Exactly one of the references is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelationshipItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl RelationshipItem {
    pub fn entity(key: EntityKey) -> Self {
        Self {
            entity: Some(key),
            ..Default::default()
        }
    }

    pub fn enrollment(uid: impl Into<String>) -> Self {
        Self {
            enrollment: Some(uid.into()),
            ..Default::default()
        }
    }

    pub fn event(uid: impl Into<String>) -> Self {
        Self {
            event: Some(uid.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub uid: String,
    pub relationship_type: String,
    pub from: RelationshipItem,
    pub to: RelationshipItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramOwner {
    pub entity: EntityKey,
    pub program: ProgramId,
    pub org_unit: String,
}

/// Query options for a single `find` call.
///
/// The include flags are a cost-control measure: a fetch that is not
/// requested is never issued. `program` additionally restricts the result to
/// entities the caller owns under that program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchParams {
    #[serde(default)]
    pub include_relationships: bool,
    #[serde(default)]
    pub include_enrollments: bool,
    /// Only meaningful together with `include_enrollments`.
    #[serde(default)]
    pub include_events: bool,
    #[serde(default)]
    pub include_program_owners: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramId>,
}

impl FetchParams {
    pub fn wants_events(&self) -> bool {
        self.include_enrollments && self.include_events
    }
}
