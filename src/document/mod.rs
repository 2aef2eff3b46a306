#![forbid(unsafe_code)]

//! Minimal document model and type repository consumed by block stores.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::types::{DocumentId, GlobalId, Result, StoreError};

/// A stored document: identifier, type and two groups of fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Full identifier.
    pub id: DocumentId,
    /// Registered document type; empty for identifier-only headers.
    pub doc_type: String,
    /// Global id; normally derived from `id`.
    pub gid: GlobalId,
    /// Fields stored in the header part.
    pub header: BTreeMap<String, String>,
    /// Fields stored in the body part.
    pub body: BTreeMap<String, String>,
}

impl Document {
    /// Creates an empty document of the given type.
    pub fn new(id: DocumentId, doc_type: impl Into<String>) -> Self {
        let gid = id.global_id();
        Self {
            id,
            doc_type: doc_type.into(),
            gid,
            header: BTreeMap::new(),
            body: BTreeMap::new(),
        }
    }

    /// Document carrying only its identifier, as synthesized for removes.
    pub fn identifier_only(id: DocumentId) -> Self {
        Self::new(id, String::new())
    }

    /// Overrides the global id (document types that rewrite their identity).
    pub fn with_global_id(mut self, gid: GlobalId) -> Self {
        self.gid = gid;
        self
    }

    /// Adds a header field.
    pub fn with_header_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(name.into(), value.into());
        self
    }

    /// Adds a body field.
    pub fn with_body_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    /// Returns `true` when the document has body content to store.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Returns a copy stripped of body fields.
    pub fn header_only(&self) -> Self {
        Self {
            body: BTreeMap::new(),
            ..self.clone()
        }
    }
}

/// Which parts of a document a read should materialize.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GetFlag {
    /// Header fields only.
    HeaderOnly,
    /// Header and body.
    All,
}

/// Registry of document types a store may deserialize.
#[derive(Clone, Debug, Default)]
pub struct DocumentTypeRepo {
    types: FxHashSet<String>,
}

impl DocumentTypeRepo {
    /// Creates a repository with the given type names.
    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Registers an additional type.
    pub fn register(&mut self, doc_type: impl Into<String>) {
        self.types.insert(doc_type.into());
    }

    /// Checks that a decoded header may be handed to callers.
    pub fn check(&self, doc: &Document) -> Result<()> {
        if doc.doc_type.is_empty() || self.types.contains(&doc.doc_type) {
            Ok(())
        } else {
            Err(StoreError::UnknownDocumentType(doc.doc_type.clone()))
        }
    }
}
