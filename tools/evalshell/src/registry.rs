use crate::compiler::{Symbol, SymbolKind, SymbolTable};
use crate::errors::ShellError;
use crate::snippet::{Diagnostic, Snippet, SnippetKey};
use crate::types::{SnippetKind, Status};
use std::collections::BTreeSet;

/// Arena of every snippet a session has seen. Records are never removed;
/// dropping or overwriting only changes their status.
#[derive(Debug, Default)]
pub struct SnippetRegistry {
    snippets: Vec<Snippet>,
}

impl SnippetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key the next inserted snippet must carry.
    pub fn next_key(&self) -> SnippetKey {
        SnippetKey(self.snippets.len())
    }

    /// Inserts a new snippet or replaces the record under an existing key.
    ///
    /// A replacement returns the old record. A new declaration marks any
    /// active snippet with the same identity `OVERWRITTEN` and returns that
    /// snippet as it was before.
    pub fn put(&mut self, snippet: Snippet) -> Result<Option<Snippet>, ShellError> {
        let key = snippet.key;
        if let Some(existing) = self.snippets.get_mut(key.0) {
            validate_transition(existing.status, snippet.status)?;
            return Ok(Some(std::mem::replace(existing, snippet)));
        }
        if key != self.next_key() {
            return Err(ShellError::InvalidArgument(format!(
                "snippet key {key} is not the next free key {}",
                self.next_key()
            )));
        }
        validate_transition(Status::Nonexistent, snippet.status)?;

        let overwritten = if snippet.status.is_active() {
            self.active_with_identity(&snippet)
        } else {
            None
        };
        let previous = match overwritten {
            Some(old_key) => {
                let before = self.snippets[old_key.0].clone();
                self.set_status(old_key, Status::Overwritten)?;
                Some(before)
            }
            None => None,
        };
        self.snippets.push(snippet);
        Ok(previous)
    }

    /// Returns the previous status.
    pub fn set_status(&mut self, key: SnippetKey, status: Status) -> Result<Status, ShellError> {
        let snippet = self
            .snippets
            .get_mut(key.0)
            .ok_or_else(|| ShellError::UnknownSnippet(key.to_string()))?;
        let previous = snippet.status;
        validate_transition(previous, status)?;
        snippet.status = status;
        Ok(previous)
    }

    /// Marks an active snippet `DROPPED`; the record stays queryable.
    pub fn drop(&mut self, key: SnippetKey) -> Result<Status, ShellError> {
        self.set_status(key, Status::Dropped)
    }

    pub fn lookup(&self, key: SnippetKey) -> Option<&Snippet> {
        self.snippets.get(key.0)
    }

    pub fn all(&self) -> &[Snippet] {
        &self.snippets
    }

    pub fn all_of_kind(&self, kind: SnippetKind) -> Vec<&Snippet> {
        self.snippets
            .iter()
            .filter(|snippet| snippet.kind == kind)
            .collect()
    }

    pub fn active_of_kind(&self, kind: SnippetKind) -> Vec<&Snippet> {
        self.snippets
            .iter()
            .filter(|snippet| snippet.kind == kind && snippet.status.is_active())
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Snippet> {
        self.snippets.iter().find(|snippet| snippet.id == id)
    }

    /// Most recent active declaration called `name`, of any kind.
    pub fn active_declaration(&self, name: &str) -> Option<&Snippet> {
        self.snippets
            .iter()
            .rev()
            .find(|snippet| {
                snippet.kind.is_persistent()
                    && snippet.status.is_active()
                    && declared_name(snippet) == name
            })
    }

    /// Active declarations that reference `name`, oldest first.
    pub fn dependents_of(&self, name: &str) -> Vec<SnippetKey> {
        self.snippets
            .iter()
            .filter(|snippet| {
                snippet.kind.is_persistent()
                    && snippet.status.is_active()
                    && snippet.dependencies.contains(name)
            })
            .map(|snippet| snippet.key)
            .collect()
    }

    /// Referenced names that no `VALID` declaration currently provides.
    pub fn unresolved_dependencies(&self, key: SnippetKey) -> Option<BTreeSet<String>> {
        let snippet = self.lookup(key)?;
        Some(
            snippet
                .dependencies
                .iter()
                .filter(|name| !self.has_valid_declaration(name))
                .cloned()
                .collect(),
        )
    }

    pub fn diagnostics(&self, key: SnippetKey) -> Option<&[Diagnostic]> {
        self.lookup(key).map(|snippet| snippet.diagnostics.as_slice())
    }

    fn has_valid_declaration(&self, name: &str) -> bool {
        self.snippets.iter().any(|snippet| {
            snippet.kind.is_persistent()
                && snippet.status == Status::Valid
                && declared_name(snippet) == name
        })
    }

    fn active_with_identity(&self, snippet: &Snippet) -> Option<SnippetKey> {
        let identity = snippet.identity()?;
        self.snippets
            .iter()
            .find(|other| other.status.is_active() && other.identity() == Some(identity))
            .map(|other| other.key)
    }

    fn defined(&self, kind: SnippetKind, name: &str) -> impl Iterator<Item = &Snippet> + '_ {
        let name = name.to_string();
        self.snippets.iter().rev().filter(move |snippet| {
            snippet.kind == kind && snippet.status.is_defined() && snippet.name == name
        })
    }
}

impl SymbolTable for SnippetRegistry {
    fn resolve(&self, kind: SymbolKind, name: &str) -> Option<Symbol> {
        match kind {
            SymbolKind::Var => self.defined(SnippetKind::Var, name).next().map(|snippet| Symbol {
                kind,
                class_name: snippet.class_name.clone(),
                member: snippet.name.clone(),
                type_name: snippet.type_name.clone(),
            }),
            SymbolKind::Method => self
                .defined(SnippetKind::Method, name)
                .next()
                .map(method_symbol),
            SymbolKind::Type => {
                if let Some(snippet) = self.defined(SnippetKind::Class, name).next() {
                    return Some(Symbol {
                        kind,
                        class_name: snippet.class_name.clone(),
                        member: snippet.name.clone(),
                        type_name: snippet.type_name.clone(),
                    });
                }
                self.snippets
                    .iter()
                    .rev()
                    .find(|snippet| {
                        snippet.kind == SnippetKind::Import
                            && snippet.status.is_active()
                            && imports_type(&snippet.name, name)
                    })
                    .map(|snippet| Symbol {
                        kind,
                        class_name: snippet.name.clone(),
                        member: name.to_string(),
                        type_name: snippet.name.clone(),
                    })
            }
        }
    }

    fn resolve_call(&self, name: &str, arity: usize) -> Option<Symbol> {
        let mut candidates = self.defined(SnippetKind::Method, name).peekable();
        let first = candidates.peek().map(|snippet| method_symbol(snippet));
        candidates
            .find(|snippet| snippet.arity == arity)
            .map(method_symbol)
            .or(first)
    }
}

fn method_symbol(snippet: &Snippet) -> Symbol {
    Symbol {
        kind: SymbolKind::Method,
        class_name: snippet.class_name.clone(),
        member: snippet.name.clone(),
        type_name: snippet.type_name.clone(),
    }
}

/// Name a declaration makes available; imports provide their last segment.
pub fn declared_name(snippet: &Snippet) -> &str {
    if snippet.kind == SnippetKind::Import {
        return snippet.name.rsplit('.').next().unwrap_or(&snippet.name);
    }
    &snippet.name
}

fn imports_type(path: &str, name: &str) -> bool {
    path.ends_with(".*") || path.rsplit('.').next() == Some(name)
}

pub fn validate_transition(from: Status, to: Status) -> Result<(), ShellError> {
    use Status as S;

    let allowed = match from {
        S::Nonexistent => matches!(
            to,
            S::Valid | S::RecoverableDefined | S::RecoverableNotDefined | S::Rejected
        ),
        S::Valid | S::RecoverableDefined | S::RecoverableNotDefined => matches!(
            to,
            S::Valid
                | S::RecoverableDefined
                | S::RecoverableNotDefined
                | S::Overwritten
                | S::Dropped
        ),
        S::Dropped | S::Overwritten | S::Rejected => false,
    };

    if !allowed {
        return Err(ShellError::InvalidArgument(format!(
            "illegal status transition: {} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}
