//! Memory types for Engram.
//!
//! These types model the four memory categories an agent keeps per user
//! (working, episodic, semantic, procedural), the key that scopes them,
//! and the request/response shapes of the memory service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::envelope::MemoryEnvelope;

/// Agent id that the literal `"default"` resolves to.
pub const DEFAULT_AGENT_ID: &str = "1";

/// Default number of memories returned by a retrieval.
pub const DEFAULT_RETRIEVE_LIMIT: usize = 10;

/// One of the four memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Working,
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryType {
    /// All memory types in their canonical order.
    pub const ALL: [MemoryType; 4] = [
        MemoryType::Working,
        MemoryType::Episodic,
        MemoryType::Semantic,
        MemoryType::Procedural,
    ];

    /// Name of the SQL table backing this memory type.
    pub fn table_name(&self) -> &'static str {
        match self {
            MemoryType::Working => "working_memories",
            MemoryType::Episodic => "episodic_memories",
            MemoryType::Semantic => "semantic_memories",
            MemoryType::Procedural => "procedural_memories",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Working => write!(f, "working"),
            MemoryType::Episodic => write!(f, "episodic"),
            MemoryType::Semantic => write!(f, "semantic"),
            MemoryType::Procedural => write!(f, "procedural"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(MemoryType::Working),
            "episodic" => Ok(MemoryType::Episodic),
            "semantic" => Ok(MemoryType::Semantic),
            "procedural" => Ok(MemoryType::Procedural),
            other => Err(format!("invalid memory type: '{other}'")),
        }
    }
}

/// Resolve a raw agent id to its canonical form.
///
/// `"default"` maps to [`DEFAULT_AGENT_ID`]; everything else is trimmed.
pub fn canonical_agent_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("default") {
        DEFAULT_AGENT_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Composite key of a memory instance: one agent serving one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub agent_id: String,
    pub user_id: String,
}

impl InstanceKey {
    /// Build a key, canonicalizing the agent id.
    pub fn new(agent_id: impl AsRef<str>, user_id: impl Into<String>) -> Self {
        Self {
            agent_id: canonical_agent_id(agent_id.as_ref()),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.agent_id, self.user_id)
    }
}

/// Accepts an agent id written as a JSON number or string.
pub fn deserialize_agent_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAgentId {
        Number(i64),
        Text(String),
    }

    Ok(match RawAgentId::deserialize(deserializer)? {
        RawAgentId::Number(n) => n.to_string(),
        RawAgentId::Text(s) => canonical_agent_id(&s),
    })
}

/// Caller context for a memory operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    #[serde(deserialize_with = "deserialize_agent_id")]
    pub agent_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Anything else the caller attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemoryContext {
    pub fn new(agent_id: impl AsRef<str>, user_id: impl Into<String>) -> Self {
        Self {
            agent_id: canonical_agent_id(agent_id.as_ref()),
            user_id: user_id.into(),
            session_id: None,
            extra: Map::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// The instance key this context addresses.
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.agent_id, self.user_id.clone())
    }
}

/// Caller-supplied hints about a piece of content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub is_immediate: bool,
    /// Importance in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Free-form label such as "context", "interaction", "fact", "pattern".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub is_knowledge: bool,
    #[serde(default)]
    pub is_learned: bool,
    /// Explicit expiry for working memory; overrides the configured TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemoryMetadata {
    /// Importance with a missing value treated as zero.
    pub fn importance_or_zero(&self) -> f64 {
        self.importance.unwrap_or(0.0)
    }

    /// Whether `content_type` equals any of `kinds`.
    pub fn content_type_is(&self, kinds: &[&str]) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| kinds.iter().any(|k| ct.eq_ignore_ascii_case(k)))
    }
}

/// Which memory types receive a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTargets {
    pub working: bool,
    pub episodic: bool,
    pub semantic: bool,
    pub procedural: bool,
}

impl StorageTargets {
    pub fn get(&self, memory_type: MemoryType) -> bool {
        match memory_type {
            MemoryType::Working => self.working,
            MemoryType::Episodic => self.episodic,
            MemoryType::Semantic => self.semantic,
            MemoryType::Procedural => self.procedural,
        }
    }

    /// Whether at least one target is set.
    pub fn any(&self) -> bool {
        self.working || self.episodic || self.semantic || self.procedural
    }

    /// Selected memory types in canonical order.
    pub fn targets(&self) -> Vec<MemoryType> {
        MemoryType::ALL
            .into_iter()
            .filter(|t| self.get(*t))
            .collect()
    }
}

/// A stored memory, owned by the store of its `memory_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub memory_type: MemoryType,
    pub agent_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub content: MemoryEnvelope,
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    /// Only set for working memory.
    pub expires_at: Option<DateTime<Utc>>,
    /// Times this record was returned by a retrieval (procedural memory).
    pub usage_count: u32,
}

/// A record returned by a store together with the store's own relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub relevance_score: f64,
}

/// A retrieval candidate after cross-type ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub record: MemoryRecord,
    pub memory_type: MemoryType,
    pub base_score: f64,
    pub final_score: f64,
}

/// Candidate lists keyed by memory type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerTypeMemories {
    pub working: Vec<ScoredMemory>,
    pub episodic: Vec<ScoredMemory>,
    pub semantic: Vec<ScoredMemory>,
    pub procedural: Vec<ScoredMemory>,
}

impl PerTypeMemories {
    pub fn get(&self, memory_type: MemoryType) -> &[ScoredMemory] {
        match memory_type {
            MemoryType::Working => &self.working,
            MemoryType::Episodic => &self.episodic,
            MemoryType::Semantic => &self.semantic,
            MemoryType::Procedural => &self.procedural,
        }
    }

    pub fn get_mut(&mut self, memory_type: MemoryType) -> &mut Vec<ScoredMemory> {
        match memory_type {
            MemoryType::Working => &mut self.working,
            MemoryType::Episodic => &mut self.episodic,
            MemoryType::Semantic => &mut self.semantic,
            MemoryType::Procedural => &mut self.procedural,
        }
    }

    pub fn breakdown(&self) -> MemoryBreakdown {
        MemoryBreakdown {
            working: self.working.len(),
            episodic: self.episodic.len(),
            semantic: self.semantic.len(),
            procedural: self.procedural.len(),
        }
    }
}

/// Options for a retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveOptions {
    /// Maximum results. `None` takes the service's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Stores drop candidates scoring below this.
    #[serde(default)]
    pub min_relevance: f64,
}

impl RetrieveOptions {
    /// Fill an unset limit with `default`.
    pub fn with_default_limit(mut self, default: usize) -> Self {
        self.limit.get_or_insert(default);
        self
    }

    /// The limit to apply, falling back to [`DEFAULT_RETRIEVE_LIMIT`].
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RETRIEVE_LIMIT)
    }
}

/// Per-type candidate counts of a retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub working: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub procedural: usize,
}

/// Identifier of a record written by a store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub memory_type: MemoryType,
    pub memory_id: Uuid,
}

/// Result of `store_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMemoryResponse {
    pub success: bool,
    pub response_time_ms: u64,
    pub storage_targets: Vec<MemoryType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<StoredMemory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `retrieve_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveMemoryResponse {
    pub success: bool,
    pub response_time_ms: u64,
    pub memories: Vec<RankedCandidate>,
    pub breakdown: MemoryBreakdown,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row counts per memory table plus the pattern table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTableCounts {
    pub working: u64,
    pub episodic: u64,
    pub semantic: u64,
    pub procedural: u64,
    pub patterns: u64,
}

impl MemoryTableCounts {
    pub fn total(&self) -> u64 {
        self.working + self.episodic + self.semantic + self.procedural + self.patterns
    }
}

/// Result of `clear_memories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearMemoriesReport {
    pub success: bool,
    pub agent_id: String,
    pub user_id: String,
    pub deleted: MemoryTableCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
