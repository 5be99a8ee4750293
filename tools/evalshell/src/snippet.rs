use crate::image::{ClassImage, ExecutionException};
use crate::types::{Severity, SnippetKind, Status};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Arena index of a snippet; stable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnippetKey(pub usize);

impl fmt::Display for SnippetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub key: SnippetKey,
    /// User-visible id: `1`, `2`, ... or `s1`, `s2`, ... for startup input.
    pub id: String,
    pub kind: SnippetKind,
    /// Declared name; the qualified path for imports, `$<id>` for expressions.
    pub name: String,
    pub type_name: String,
    /// Parameter types of a method, e.g. `(int,String)`; empty otherwise.
    pub signature: String,
    pub arity: usize,
    pub source: String,
    pub class_name: String,
    pub status: Status,
    pub dependencies: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub image: Option<ClassImage>,
    /// Whether `image` has been handed to the backend.
    pub loaded: bool,
}

impl Snippet {
    /// Two active snippets with the same identity cannot coexist; the newer
    /// one overwrites the older.
    pub fn identity(&self) -> Option<(SnippetKind, &str, &str)> {
        if !self.kind.is_persistent() {
            return None;
        }
        Some((self.kind, &self.name, &self.signature))
    }

    pub fn is_startup(&self) -> bool {
        self.id.starts_with('s')
    }

    /// Short description used in feedback, e.g. `method f(int)`.
    pub fn describe(&self) -> String {
        match self.kind {
            SnippetKind::Method => format!("method {}{}", self.name, self.signature),
            SnippetKind::Class => format!("{} {}", self.type_name, self.name),
            SnippetKind::Var => format!("variable {}", self.name),
            SnippetKind::Import => format!("import {}", self.name),
            SnippetKind::Expression | SnippetKind::Erroneous => self.source.clone(),
        }
    }
}

/// One status change reported by `eval` or `drop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetEvent {
    pub key: SnippetKey,
    pub previous_status: Status,
    pub status: Status,
    pub value: Option<String>,
    pub exception: Option<ExecutionException>,
    /// The snippet whose evaluation triggered this update, if not this one.
    pub cause: Option<SnippetKey>,
}

impl SnippetEvent {
    pub fn new(key: SnippetKey, previous_status: Status, status: Status) -> Self {
        Self {
            key,
            previous_status,
            status,
            value: None,
            exception: None,
            cause: None,
        }
    }

    pub fn caused_by(mut self, cause: SnippetKey) -> Self {
        self.cause = Some(cause);
        self
    }
}
