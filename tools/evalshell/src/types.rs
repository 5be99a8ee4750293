use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetKind {
    Import,
    Class,
    Method,
    Var,
    Expression,
    Erroneous,
}

impl SnippetKind {
    /// Declarations survive across evaluations and can be dropped.
    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Import | Self::Class | Self::Method | Self::Var)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Class => "class",
            Self::Method => "method",
            Self::Var => "variable",
            Self::Expression => "expression",
            Self::Erroneous => "erroneous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Nonexistent,
    RecoverableDefined,
    RecoverableNotDefined,
    Valid,
    Dropped,
    Overwritten,
    Rejected,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Valid | Self::RecoverableDefined | Self::RecoverableNotDefined
        )
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Self::Valid | Self::RecoverableDefined)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nonexistent => "NONEXISTENT",
            Self::RecoverableDefined => "RECOVERABLE_DEFINED",
            Self::RecoverableNotDefined => "RECOVERABLE_NOT_DEFINED",
            Self::Valid => "VALID",
            Self::Dropped => "DROPPED",
            Self::Overwritten => "OVERWRITTEN",
            Self::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    Loaded,
    Loadable,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}
