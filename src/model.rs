//! Shared data model: identifiers, documents, and per-coder annotations.
//!
//! A [`Document`] carries every annotation any coder produced for it. Entity
//! identity is resolved upstream by the document store; reconciliation only
//! ever matches on `entity_id`, never on names.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type CoderId = i64;
pub type EntityId = i64;
pub type DocumentId = i64;

/// 1-based comparison position ("coder 1", "coder 2", ...).
pub type SlotIndex = usize;

// =============================================================================
// Annotations
// =============================================================================

/// Which side of the document an entity was found on.
///
/// An entity that is both author and subject of one document yields two
/// separate comparison rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleHint {
    Author,
    Subject,
}

impl RoleHint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Subject => "subject",
        }
    }
}

impl fmt::Display for RoleHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an entity's first quotation in the document text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePosition {
    /// Paragraph number (1-based) holding the first quote.
    pub paragraph: i64,
    /// Character offset of the first quote in the document body.
    pub index: i64,
}

/// One coder's finding about one entity in one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub coder_id: CoderId,
    /// Resolved identity. `None` (or a non-positive id) means the coder found
    /// someone the store could not link to a known entity.
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub entity_name: Option<String>,
    pub role_hint: RoleHint,
    /// Categorical role label, e.g. "author", "subject", "source".
    pub role_type: String,
    #[serde(default)]
    pub organization_text: Option<String>,
    #[serde(default)]
    pub quote_position: Option<QuotePosition>,
}

impl Annotation {
    pub fn new(
        coder_id: CoderId,
        entity_id: EntityId,
        role_hint: RoleHint,
        role_type: impl Into<String>,
    ) -> Self {
        Self {
            coder_id,
            entity_id: Some(entity_id),
            entity_name: None,
            role_hint,
            role_type: role_type.into(),
            organization_text: None,
            quote_position: None,
        }
    }

    /// Author annotation with the conventional "author" role type.
    pub fn author(coder_id: CoderId, entity_id: EntityId) -> Self {
        Self::new(coder_id, entity_id, RoleHint::Author, "author")
    }

    pub fn subject(coder_id: CoderId, entity_id: EntityId, role_type: impl Into<String>) -> Self {
        Self::new(coder_id, entity_id, RoleHint::Subject, role_type)
    }

    pub fn unresolved(coder_id: CoderId, role_hint: RoleHint, role_type: impl Into<String>) -> Self {
        Self {
            entity_id: None,
            ..Self::new(coder_id, 0, role_hint, role_type)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization_text = Some(organization.into());
        self
    }

    pub fn with_quote(mut self, paragraph: i64, index: i64) -> Self {
        self.quote_position = Some(QuotePosition { paragraph, index });
        self
    }

    /// The linkable entity id, if any.
    pub fn resolved_entity(&self) -> Option<EntityId> {
        self.entity_id.filter(|id| *id > 0)
    }
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Every annotation, in the order the store returned them.
    pub fn annotations_by_coder(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotations_from(&self, coder_id: CoderId) -> impl Iterator<Item = &Annotation> + '_ {
        self.annotations
            .iter()
            .filter(move |annotation| annotation.coder_id == coder_id)
    }

    /// True when the coder left at least one annotation record on this document.
    pub fn has_data_from(&self, coder_id: CoderId) -> bool {
        self.annotations.iter().any(|a| a.coder_id == coder_id)
    }

    pub fn coder_ids(&self) -> BTreeSet<CoderId> {
        self.annotations.iter().map(|a| a.coder_id).collect()
    }

    /// Empty `tags` matches every document.
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.is_empty() || self.tags.iter().any(|t| tags.contains(t))
    }
}

// =============================================================================
// Warnings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidDocument,
    DuplicateDocument,
    IdentityUnresolved,
    DuplicateAnnotation,
    UnknownRoleType,
    ExcludedCoder,
    SlotOutOfRange,
    ComparisonFailed,
}

/// Non-fatal problem recorded during a run. A run always returns whatever it
/// could compute together with these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub document_id: Option<DocumentId>,
    pub message: String,
}

impl RunWarning {
    pub fn new(kind: WarningKind, document_id: Option<DocumentId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            document_id,
            message: message.into(),
        }
    }

    pub fn for_document(kind: WarningKind, document_id: DocumentId, message: impl Into<String>) -> Self {
        Self::new(kind, Some(document_id), message)
    }
}
