//! Compiled form of a snippet as handed to an execution backend.
//!
//! A class image is plain data so the same value can be interpreted in
//! process or shipped to a remote agent unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassImage {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldImage>,
    #[serde(default)]
    pub methods: Vec<MethodImage>,
}

impl ClassImage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Image with every member removed; redefining a class with it detaches
    /// the declaration from the running program.
    pub fn tombstone(&self) -> Self {
        Self::new(self.name.clone())
    }

    pub fn field(&self, name: &str) -> Option<&FieldImage> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn method(&self, name: &str, arity: usize) -> Option<&MethodImage> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.params.len() == arity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldImage {
    pub name: String,
    pub type_name: String,
    pub default_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodImage {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    Unit,
    Literal {
        value: String,
    },
    Local {
        name: String,
    },
    Field {
        class_name: String,
        field: String,
    },
    Call {
        class_name: String,
        method: String,
        args: Vec<Expr>,
    },
    Add {
        left: Box<Expr>,
        right: Box<Expr>,
        /// Static type of the sum when the compiler knows it; `int` sums wrap
        /// at 32 bits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
    },
    Assign {
        class_name: String,
        field: String,
        value: Box<Expr>,
    },
    Throw {
        exception_class: String,
        message: Option<String>,
    },
    Unresolved {
        name: String,
    },
}

/// Failure raised by the evaluated code itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionException {
    Thrown {
        exception_class: String,
        message: Option<String>,
    },
    Unresolved {
        name: String,
    },
}

impl fmt::Display for ExecutionException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thrown {
                exception_class,
                message: Some(message),
            } => write!(f, "{exception_class}: {message}"),
            Self::Thrown {
                exception_class,
                message: None,
            } => write!(f, "{exception_class}"),
            Self::Unresolved { name } => {
                write!(f, "attempted to use {name}, which is not yet declared")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassImage, ExecutionException, Expr, MethodImage};

    #[test]
    fn method_lookup_matches_on_arity() {
        let mut image = ClassImage::new("$Snippet1");
        image.methods.push(MethodImage {
            name: "f".to_string(),
            params: vec!["x".to_string()],
            body: Expr::Local {
                name: "x".to_string(),
            },
        });
        assert!(image.method("f", 1).is_some());
        assert!(image.method("f", 0).is_none());
        assert!(image.tombstone().methods.is_empty());
    }

    #[test]
    fn image_json_uses_tagged_expressions() {
        let json = r#"{"name":"Lib","methods":[{"name":"answer","body":{"expr":"literal","value":"42"}}]}"#;
        let image: ClassImage = serde_json::from_str(json).expect("parse image");
        assert_eq!(
            image.method("answer", 0).map(|m| m.body.clone()),
            Some(Expr::Literal {
                value: "42".to_string()
            })
        );
        assert!(image.fields.is_empty());
    }

    #[test]
    fn thrown_exception_renders_class_and_message() {
        let thrown = ExecutionException::Thrown {
            exception_class: "IllegalStateException".to_string(),
            message: Some("nope".to_string()),
        };
        assert_eq!(thrown.to_string(), "IllegalStateException: nope");
    }
}
