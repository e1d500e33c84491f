//! Contracts of the services the pipeline consumes but does not own.
//!
//! Segment storage and the glossary live elsewhere; the pipeline only reads
//! them. The audit writer is consumed for its failure semantics: an error
//! from [`AuditWriter::write`] aborts the operation that triggered it.

use thiserror::Error;

use crate::db::audit_repo::{self, AuditEntry};
use crate::db::Database;
use crate::error::{AuditError, PipelineError};
use crate::model::{Category, Segment};
use crate::tenant::TenantId;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    /// The collaborator could not be reached. Retried like a provider error.
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid data from {service}: {reason}")]
    Invalid { service: &'static str, reason: String },
}

impl From<CollaboratorError> for PipelineError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable { .. } => PipelineError::TransientProvider(err.to_string()),
            CollaboratorError::NotFound { .. } | CollaboratorError::Invalid { .. } => {
                PipelineError::Validation(err.to_string())
            }
        }
    }
}

/// Read-only access to the segments extracted from a file.
pub trait SegmentSource: Send + Sync {
    /// Segments of the file in segment-number order.
    fn get_segments(&self, tenant: &TenantId, file_id: &str) -> Result<Vec<Segment>, CollaboratorError>;
}

/// A category as defined by the tenant's taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDefinition {
    pub category: Category,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryTerm {
    pub source_term: String,
    pub target_term: String,
    pub case_sensitive: bool,
}

pub trait GlossaryProvider: Send + Sync {
    fn get_active_categories(&self, tenant: &TenantId) -> Result<Vec<CategoryDefinition>, CollaboratorError>;

    fn get_terms(&self, tenant: &TenantId, glossary_id: &str) -> Result<Vec<GlossaryTerm>, CollaboratorError>;
}

pub trait AuditWriter: Send + Sync {
    fn write(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Audit writer backed by the `audit_log` table.
pub struct DbAuditWriter {
    db: Database,
}

impl DbAuditWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl AuditWriter for DbAuditWriter {
    fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.db
            .with_conn(|conn| audit_repo::insert(conn, entry))
            .map_err(|e| AuditError(e.to_string()))
    }
}

/// In-memory collaborators for embedding and tests.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::*;

    /// Segments held in memory, keyed by tenant and file.
    #[derive(Default)]
    pub struct InMemorySegmentSource {
        segments: RwLock<HashMap<(TenantId, String), Vec<Segment>>>,
    }

    impl InMemorySegmentSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, tenant: &TenantId, file_id: &str, segments: Vec<Segment>) {
            if let Ok(mut map) = self.segments.write() {
                map.insert((tenant.clone(), file_id.to_string()), segments);
            }
        }
    }

    impl SegmentSource for InMemorySegmentSource {
        fn get_segments(&self, tenant: &TenantId, file_id: &str) -> Result<Vec<Segment>, CollaboratorError> {
            let map = self.segments.read().map_err(|_| CollaboratorError::Unavailable {
                service: "segment source",
                reason: "lock poisoned".to_string(),
            })?;
            map.get(&(tenant.clone(), file_id.to_string()))
                .cloned()
                .ok_or_else(|| CollaboratorError::NotFound {
                    entity: "segments for file",
                    id: file_id.to_string(),
                })
        }
    }

    /// Fixed glossary: every tenant sees the same categories and terms.
    pub struct StaticGlossary {
        categories: Vec<CategoryDefinition>,
        terms: HashMap<String, Vec<GlossaryTerm>>,
    }

    impl StaticGlossary {
        /// All internal categories active, no terms.
        pub fn new() -> Self {
            Self {
                categories: Category::all()
                    .iter()
                    .map(|c| CategoryDefinition {
                        category: *c,
                        label: c.as_str().to_string(),
                    })
                    .collect(),
                terms: HashMap::new(),
            }
        }

        pub fn with_categories(mut self, categories: &[Category]) -> Self {
            self.categories = categories
                .iter()
                .map(|c| CategoryDefinition {
                    category: *c,
                    label: c.as_str().to_string(),
                })
                .collect();
            self
        }

        pub fn with_terms(mut self, glossary_id: &str, terms: Vec<GlossaryTerm>) -> Self {
            self.terms.insert(glossary_id.to_string(), terms);
            self
        }
    }

    impl Default for StaticGlossary {
        fn default() -> Self {
            Self::new()
        }
    }

    impl GlossaryProvider for StaticGlossary {
        fn get_active_categories(&self, _tenant: &TenantId) -> Result<Vec<CategoryDefinition>, CollaboratorError> {
            Ok(self.categories.clone())
        }

        fn get_terms(&self, _tenant: &TenantId, glossary_id: &str) -> Result<Vec<GlossaryTerm>, CollaboratorError> {
            Ok(self.terms.get(glossary_id).cloned().unwrap_or_default())
        }
    }
}
