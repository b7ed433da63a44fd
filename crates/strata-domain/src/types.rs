use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            /// Generates a fresh random id.
            pub fn generate() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

id_newtype!(ResourceId);
id_newtype!(PlanId);
id_newtype!(PlanUnitId);
id_newtype!(RunId);
id_newtype!(EventId);
id_newtype!(FactId);
id_newtype!(HostId);

// ── Resource ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Unknown,
    Creating,
    Ready,
    Updating,
    Deleting,
    Error,
    Drifted,
    Pending,
    Deleted,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Unknown => "unknown",
            ResourceStatus::Creating => "creating",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Updating => "updating",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::Error => "error",
            ResourceStatus::Drifted => "drifted",
            ResourceStatus::Pending => "pending",
            ResourceStatus::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Token selecting the provider that owns this resource's type, e.g. "vm", "dns_record".
    pub r#type: String,
    pub name: String,
    pub config: serde_json::Value,
    pub state: serde_json::Value,
    pub status: ResourceStatus,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub dependencies: Vec<ResourceId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(r#type: impl Into<String>, name: impl Into<String>, config: serde_json::Value) -> Self {
        let now = Utc::now();
        Resource {
            id: ResourceId::generate(),
            r#type: r#type.into(),
            name: name.into(),
            config,
            state: serde_json::Value::Null,
            status: ResourceStatus::Unknown,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            dependencies: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Matches every `key=value` pair in a selector (AND semantics).
    pub fn matches_labels(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|lv| lv == v).unwrap_or(false))
    }
}

// ── Change ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Remove,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// JSON-path-like selector, e.g. "/network/subnets/0".
    pub path: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub action: ChangeAction,
}

// ── Operation type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Noop,
    Read,
    Recreate,
}

impl OperationType {
    pub fn destructive(self) -> bool {
        matches!(self, OperationType::Delete | OperationType::Recreate)
    }

    pub fn mutating(self) -> bool {
        matches!(
            self,
            OperationType::Create
                | OperationType::Update
                | OperationType::Delete
                | OperationType::Recreate
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Noop => "noop",
            OperationType::Read => "read",
            OperationType::Recreate => "recreate",
        };
        write!(f, "{s}")
    }
}

// ── Dependency / plan unit ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Hard edge: if the upstream unit is not successful, the downstream unit is skipped.
    Require,
    /// Soft trigger: downstream only runs if upstream reported a change; its own failure
    /// does not cascade.
    Notify,
    /// Sequencing only: downstream runs after upstream terminates regardless of outcome.
    Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub upstream: PlanUnitId,
    pub kind: DependencyType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanUnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl PlanUnitStatus {
    pub fn terminal(self) -> bool {
        matches!(
            self,
            PlanUnitStatus::Succeeded
                | PlanUnitStatus::Failed
                | PlanUnitStatus::Skipped
                | PlanUnitStatus::Cancelled
        )
    }

    pub fn successful(self) -> bool {
        matches!(self, PlanUnitStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanUnit {
    pub id: PlanUnitId,
    pub resource_id: ResourceId,
    /// The resource's `(type, name)` identity, not its id — the key
    /// `resource_state` rows and provider reads/writes are addressed by.
    pub resource_name: String,
    pub operation: OperationType,
    pub status: PlanUnitStatus,
    pub desired: serde_json::Value,
    pub actual: serde_json::Value,
    pub changes: Vec<Change>,
    pub provider_name: String,
    pub provider_version: String,
    pub dependencies: Vec<Dependency>,
    /// Level assigned by the DAG builder; `None` until the plan is leveled.
    pub execution_order: Option<u32>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retries: u32,
    pub result: Option<serde_json::Value>,
}

impl PlanUnit {
    pub fn new(resource_id: ResourceId, operation: OperationType) -> Self {
        PlanUnit {
            id: PlanUnitId::generate(),
            resource_id,
            resource_name: String::new(),
            operation,
            status: PlanUnitStatus::Pending,
            desired: serde_json::Value::Null,
            actual: serde_json::Value::Null,
            changes: Vec::new(),
            provider_name: String::new(),
            provider_version: String::new(),
            dependencies: Vec::new(),
            execution_order: None,
            timeout_secs: 300,
            max_retries: 0,
            retries: 0,
            result: None,
        }
    }
}

// ── Plan / execution graph ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: u32,
    pub update: u32,
    pub delete: u32,
    pub noop: u32,
    pub read: u32,
    pub recreate: u32,
}

impl PlanSummary {
    pub fn record(&mut self, op: OperationType) {
        match op {
            OperationType::Create => self.create += 1,
            OperationType::Update => self.update += 1,
            OperationType::Delete => self.delete += 1,
            OperationType::Noop => self.noop += 1,
            OperationType::Read => self.read += 1,
            OperationType::Recreate => self.recreate += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub level: u32,
    pub dependencies: Vec<PlanUnitId>,
    pub dependents: Vec<PlanUnitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: PlanUnitId,
    pub to: PlanUnitId,
    pub kind: DependencyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub nodes: HashMap<PlanUnitId, GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub roots: Vec<PlanUnitId>,
    pub depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub units: Vec<PlanUnit>,
    pub graph: ExecutionGraph,
    pub summary: PlanSummary,
}

// ── Run ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Partial,
}

impl RunStatus {
    pub fn terminal(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
    pub running: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub plan_id: PlanId,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub counters: RunCounters,
    pub user: String,
}

impl Run {
    pub fn new(plan_id: PlanId, user: impl Into<String>) -> Self {
        Run {
            id: RunId::generate(),
            plan_id,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            counters: RunCounters::default(),
            user: user.into(),
        }
    }
}

// ── Event ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    RunFailed,
    RunCancelled,
    UnitStarted,
    UnitRetrying,
    UnitSucceeded,
    UnitFailed,
    UnitSkipped,
    LevelStarted,
    LevelCompleted,
    DriftDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<EventId>,
    pub r#type: EventType,
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<RunId>,
    pub plan_unit_id: Option<PlanUnitId>,
    pub resource_id: Option<ResourceId>,
    pub message: String,
    pub severity: Severity,
    pub details: serde_json::Value,
}

impl Event {
    pub fn new(r#type: EventType, message: impl Into<String>, severity: Severity) -> Self {
        Event {
            id: None,
            r#type,
            timestamp: Utc::now(),
            run_id: None,
            plan_unit_id: None,
            resource_id: None,
            message: message.into(),
            severity,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_unit(mut self, unit_id: PlanUnitId) -> Self {
        self.plan_unit_id = Some(unit_id);
        self
    }

    pub fn with_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ── Fact ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Option<FactId>,
    pub target_id: String,
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub ttl_secs: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(
        target_id: impl Into<String>,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_secs: u64,
    ) -> Self {
        let now = Utc::now();
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(now + chrono::Duration::seconds(ttl_secs as i64))
        };
        Fact {
            id: None,
            target_id: target_id.into(),
            namespace: namespace.into(),
            key: key.into(),
            value,
            ttl_secs,
            expires_at,
            updated_at: now,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(exp) => exp > now,
        }
    }
}

// ── Resource state ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStateRecord {
    pub r#type: String,
    pub name: String,
    pub state: serde_json::Value,
    pub hash: String,
    pub last_run_id: Option<RunId>,
    pub last_applied: DateTime<Utc>,
}

/// Canonical content hash used for unchanged-skip detection.
pub fn compute_state_hash(state: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_vec(state).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

// ── Audit ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Option<u64>,
    pub action: String,
    pub actor: String,
    pub target_id: Option<String>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, actor: impl Into<String>) -> Self {
        AuditEntry {
            id: None,
            action: action.into(),
            actor: actor.into(),
            target_id: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }
}

// ── Host ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<String>,
    pub labels: HashMap<String, String>,
    pub onboarded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn matches_labels(&self, filter: &HashMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|lv| lv == v).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_destructive_and_mutating() {
        assert!(OperationType::Delete.destructive());
        assert!(OperationType::Recreate.destructive());
        assert!(!OperationType::Create.destructive());

        assert!(OperationType::Create.mutating());
        assert!(OperationType::Update.mutating());
        assert!(!OperationType::Noop.mutating());
        assert!(!OperationType::Read.mutating());
    }

    #[test]
    fn plan_unit_status_terminal_and_successful() {
        assert!(PlanUnitStatus::Succeeded.terminal());
        assert!(PlanUnitStatus::Skipped.terminal());
        assert!(!PlanUnitStatus::Running.terminal());
        assert!(PlanUnitStatus::Succeeded.successful());
        assert!(!PlanUnitStatus::Failed.successful());
    }

    #[test]
    fn fact_liveness() {
        let permanent = Fact::new("host-1", "ns", "k", serde_json::json!(1), 0);
        assert!(permanent.is_live(Utc::now()));

        let expiring = Fact::new("host-1", "ns", "k", serde_json::json!(1), 1);
        assert!(expiring.is_live(Utc::now()));
        assert!(!expiring.is_live(Utc::now() + chrono::Duration::seconds(2)));
    }

    #[test]
    fn resource_label_matching_is_and() {
        let mut r = Resource::new("vm", "web-1", serde_json::json!({}));
        r.labels.insert("env".into(), "prod".into());
        r.labels.insert("role".into(), "web".into());

        let mut filter = HashMap::new();
        filter.insert("env".to_string(), "prod".to_string());
        assert!(r.matches_labels(&filter));

        filter.insert("role".to_string(), "db".to_string());
        assert!(!r.matches_labels(&filter));
    }

    #[test]
    fn state_hash_is_stable_for_equal_values() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(compute_state_hash(&a), compute_state_hash(&b));
    }

    #[test]
    fn id_generate_produces_unique_values() {
        let a = ResourceId::generate();
        let b = ResourceId::generate();
        assert_ne!(a, b);
    }
}
