//! Compiler collaborator.
//!
//! The session hands each input to a [`SnippetCompiler`] together with a
//! [`SymbolTable`] over the declarations accepted so far, and gets back the
//! snippet's kind, the names it references and a [`ClassImage`] for the
//! backend. [`BasicCompiler`] covers a small Java-like subset; anything it
//! cannot parse comes back as [`SnippetKind::Erroneous`] with a diagnostic.

use crate::errors::ShellError;
use crate::image::{ClassImage, Expr, FieldImage, MethodImage};
use crate::snippet::Diagnostic;
use crate::types::SnippetKind;
use std::collections::BTreeSet;

pub const INIT_METHOD: &str = "$init";
pub const EVAL_METHOD: &str = "$eval";
/// Upper bound on operators and nested expressions in one snippet. Keeps
/// every later tree walk, and the agent's JSON decoding, shallow.
pub const MAX_EXPRESSION_NODES: usize = 100;

const BUILTIN_TYPES: &[&str] = &[
    "boolean",
    "byte",
    "char",
    "short",
    "int",
    "long",
    "float",
    "double",
    "void",
    "Boolean",
    "Byte",
    "Character",
    "Short",
    "Integer",
    "Long",
    "Float",
    "Double",
    "Number",
    "Object",
    "String",
    "CharSequence",
    "StringBuilder",
    "Comparable",
    "Iterable",
    "Runnable",
    "Throwable",
    "Exception",
    "RuntimeException",
    "Error",
];

const KEYWORDS: &[&str] = &[
    "class",
    "interface",
    "enum",
    "record",
    "import",
    "return",
    "throw",
    "throws",
    "new",
    "true",
    "false",
    "null",
    "extends",
    "implements",
];

const MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "static",
    "final",
    "abstract",
    "synchronized",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Method,
    Type,
}

/// Where a declared name lives in the running program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub class_name: String,
    pub member: String,
    pub type_name: String,
}

pub trait SymbolTable {
    fn resolve(&self, kind: SymbolKind, name: &str) -> Option<Symbol>;

    fn resolve_call(&self, name: &str, arity: usize) -> Option<Symbol> {
        let _ = arity;
        self.resolve(SymbolKind::Method, name)
    }
}

/// Table with nothing declared.
pub struct NoSymbols;

impl SymbolTable for NoSymbols {
    fn resolve(&self, _kind: SymbolKind, _name: &str) -> Option<Symbol> {
        None
    }
}

pub struct CompileRequest<'a> {
    pub source: &'a str,
    /// Wrapper class the snippet's members are compiled into.
    pub class_name: &'a str,
    pub symbols: &'a dyn SymbolTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSnippet {
    pub kind: SnippetKind,
    pub name: String,
    pub type_name: String,
    pub signature: String,
    pub arity: usize,
    pub dependencies: BTreeSet<String>,
    pub unresolved: BTreeSet<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub image: Option<ClassImage>,
    /// Method to invoke for a value: [`INIT_METHOD`] or [`EVAL_METHOD`].
    pub entry: Option<String>,
}

impl CompiledSnippet {
    fn new(kind: SnippetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            type_name: String::new(),
            signature: String::new(),
            arity: 0,
            dependencies: BTreeSet::new(),
            unresolved: BTreeSet::new(),
            diagnostics: Vec::new(),
            image: None,
            entry: None,
        }
    }

    pub fn erroneous(message: impl Into<String>) -> Self {
        let mut compiled = Self::new(SnippetKind::Erroneous, "");
        compiled.diagnostics.push(Diagnostic::error(message));
        compiled
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

pub trait SnippetCompiler: Send {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledSnippet, ShellError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicCompiler;

impl SnippetCompiler for BasicCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledSnippet, ShellError> {
        let tokens = match lex(request.source) {
            Ok(tokens) => tokens,
            Err(message) => return Ok(CompiledSnippet::erroneous(message)),
        };
        if tokens.is_empty() {
            return Ok(CompiledSnippet::erroneous("empty input"));
        }
        let decl = match Parser::new(tokens).snippet() {
            Ok(decl) => decl,
            Err(message) => return Ok(CompiledSnippet::erroneous(message)),
        };
        let lowering = Lowering {
            class_name: request.class_name,
            symbols: request.symbols,
            locals: Vec::new(),
            this_method: None,
            dependencies: BTreeSet::new(),
            unresolved: BTreeSet::new(),
        };
        Ok(lowering
            .lower(decl)
            .unwrap_or_else(CompiledSnippet::erroneous))
    }
}

pub fn is_builtin_type(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name)
}

pub fn default_value(type_name: &str) -> &'static str {
    match type_name {
        "int" | "long" | "short" | "byte" => "0",
        "float" | "double" => "0.0",
        "boolean" => "false",
        "char" => "'\\u0000'",
        _ => "null",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(String),
    Long(String),
    Double(String),
    Str(String),
    Char(String),
    Punct(char),
}

fn lex(source: &str) -> Result<Vec<Token>, String> {
    let chars = source.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err("unclosed comment".to_string());
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            let mut is_double = false;
            if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                is_double = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let digits = chars[start..i]
                .iter()
                .filter(|c| **c != '_')
                .collect::<String>();
            match chars.get(i) {
                Some('L' | 'l') if !is_double => {
                    i += 1;
                    tokens.push(Token::Long(digits));
                }
                Some('d' | 'D' | 'f' | 'F') => {
                    i += 1;
                    tokens.push(Token::Double(as_double(&digits)));
                }
                _ if is_double => tokens.push(Token::Double(digits)),
                _ => tokens.push(Token::Int(digits)),
            }
        } else if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            loop {
                match chars.get(i) {
                    None | Some('\n') => {
                        return Err(if c == '"' {
                            "unclosed string literal".to_string()
                        } else {
                            "unclosed character literal".to_string()
                        });
                    }
                    Some('\\') => i += 2,
                    Some(end) if *end == c => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            let literal = chars[start..i].iter().collect::<String>();
            tokens.push(if c == '"' {
                Token::Str(literal)
            } else {
                Token::Char(literal)
            });
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    Ok(tokens)
}

fn as_double(digits: &str) -> String {
    if digits.contains('.') {
        digits.to_string()
    } else {
        format!("{digits}.0")
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TypeRef {
    text: String,
    /// Simple names the type mentions; qualified names are left out.
    names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Literal { value: String, type_name: Option<String> },
    Name(String),
    Call { name: String, args: Vec<Ast> },
    Add(Box<Ast>, Box<Ast>),
    Assign { name: String, value: Box<Ast> },
    Throw { exception_class: String, message: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
enum Decl {
    Import {
        path: String,
        is_static: bool,
    },
    Class {
        keyword: String,
        name: String,
        supertypes: Vec<TypeRef>,
    },
    Method {
        return_type: TypeRef,
        name: String,
        params: Vec<(TypeRef, String)>,
        body: Option<Ast>,
    },
    Var {
        declared: Option<TypeRef>,
        name: String,
        init: Option<Ast>,
    },
    Expression(Ast),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nodes: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nodes: 0,
        }
    }

    fn charge(&mut self) -> Result<(), String> {
        self.nodes += 1;
        if self.nodes > MAX_EXPRESSION_NODES {
            return Err("expression too complex".to_string());
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, c: char) -> Result<(), String> {
        if self.eat_punct(c) {
            return Ok(());
        }
        if self.at_end() {
            return Err("reached end of file while parsing".to_string());
        }
        Err(format!("'{c}' expected"))
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn ident(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(Token::Ident(name)) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err("<identifier> expected".to_string()),
        }
    }

    fn finish(&mut self) -> Result<(), String> {
        self.eat_punct(';');
        if self.at_end() {
            Ok(())
        } else {
            Err("';' expected".to_string())
        }
    }

    fn snippet(mut self) -> Result<Decl, String> {
        if self.eat_word("import") {
            return self.import();
        }
        while MODIFIERS.iter().any(|modifier| self.is_word(modifier)) {
            self.pos += 1;
        }
        if ["class", "interface", "enum", "record"]
            .iter()
            .any(|keyword| self.is_word(keyword))
        {
            return self.class();
        }

        let save = self.pos;
        if let Ok(declared) = self.type_ref() {
            if let Ok(name) = self.ident() {
                if self.is_punct('(') {
                    return self.method(declared, name);
                }
                return self.var(declared, name);
            }
        }
        self.pos = save;
        let expr = self.expr()?;
        self.finish()?;
        Ok(Decl::Expression(expr))
    }

    fn import(&mut self) -> Result<Decl, String> {
        let is_static = self.eat_word("static");
        let mut path = self.ident()?;
        while self.eat_punct('.') {
            if self.eat_punct('*') {
                path.push_str(".*");
                break;
            }
            path.push('.');
            path.push_str(&self.ident()?);
        }
        self.finish()?;
        Ok(Decl::Import { path, is_static })
    }

    fn class(&mut self) -> Result<Decl, String> {
        let keyword = match self.next() {
            Some(Token::Ident(keyword)) => keyword,
            _ => return Err("class, interface, enum, or record expected".to_string()),
        };
        let name = self.ident()?;
        if self.is_punct('<') {
            self.skip_balanced('<', '>')?;
        }
        if keyword == "record" {
            if !self.is_punct('(') {
                return Err("'(' expected".to_string());
            }
            self.skip_balanced('(', ')')?;
        }
        let mut supertypes = Vec::new();
        while ["extends", "implements", "permits"]
            .iter()
            .any(|word| self.is_word(word))
        {
            self.pos += 1;
            supertypes.push(self.type_ref()?);
            while self.eat_punct(',') {
                supertypes.push(self.type_ref()?);
            }
        }
        if !self.is_punct('{') {
            return Err("'{' expected".to_string());
        }
        self.skip_balanced('{', '}')?;
        self.finish()?;
        Ok(Decl::Class {
            keyword,
            name,
            supertypes,
        })
    }

    fn method(&mut self, return_type: TypeRef, name: String) -> Result<Decl, String> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        if !self.eat_punct(')') {
            loop {
                let param_type = self.type_ref()?;
                let param_name = self.ident()?;
                params.push((param_type, param_name));
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        if self.eat_word("throws") {
            self.type_ref()?;
            while self.eat_punct(',') {
                self.type_ref()?;
            }
        }
        self.expect_punct('{')?;
        let body = if self.eat_punct('}') {
            None
        } else if self.eat_word("return") {
            if self.eat_punct(';') {
                self.expect_punct('}')?;
                None
            } else {
                let expr = self.expr()?;
                self.expect_punct(';')?;
                self.expect_punct('}')?;
                Some(expr)
            }
        } else {
            let expr = self.expr()?;
            self.expect_punct(';')?;
            self.expect_punct('}')?;
            Some(expr)
        };
        if !self.at_end() {
            return Err("unsupported statement after method body".to_string());
        }
        Ok(Decl::Method {
            return_type,
            name,
            params,
            body,
        })
    }

    fn var(&mut self, declared: TypeRef, name: String) -> Result<Decl, String> {
        let init = if self.eat_punct('=') {
            Some(self.expr()?)
        } else {
            None
        };
        self.finish()?;
        let declared = (declared.text != "var").then_some(declared);
        Ok(Decl::Var {
            declared,
            name,
            init,
        })
    }

    fn type_ref(&mut self) -> Result<TypeRef, String> {
        let first = self.ident()?;
        let mut text = first.clone();
        let mut qualified = false;
        while self.is_punct('.') && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.pos += 1;
            let segment = self.ident()?;
            text.push('.');
            text.push_str(&segment);
            qualified = true;
        }
        let mut names = if qualified { Vec::new() } else { vec![first] };
        if self.eat_punct('<') {
            text.push('<');
            if !self.is_punct('>') {
                loop {
                    let arg = self.type_ref()?;
                    text.push_str(&arg.text);
                    names.extend(arg.names);
                    if !self.eat_punct(',') {
                        break;
                    }
                    text.push(',');
                }
            }
            self.expect_punct('>')?;
            text.push('>');
        }
        while self.is_punct('[') && self.peek_at(1) == Some(&Token::Punct(']')) {
            self.pos += 2;
            text.push_str("[]");
        }
        Ok(TypeRef { text, names })
    }

    fn skip_balanced(&mut self, open: char, close: char) -> Result<(), String> {
        let mut depth = 0usize;
        loop {
            match self.next() {
                Some(Token::Punct(c)) if c == open => depth += 1,
                Some(Token::Punct(c)) if c == close => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err("reached end of file while parsing".to_string()),
            }
        }
    }

    fn expr(&mut self) -> Result<Ast, String> {
        self.charge()?;
        if let (Some(Token::Ident(name)), Some(Token::Punct('='))) = (self.peek(), self.peek_at(1)) {
            if self.peek_at(2) != Some(&Token::Punct('=')) && !KEYWORDS.contains(&name.as_str()) {
                let name = name.clone();
                self.pos += 2;
                let value = self.expr()?;
                return Ok(Ast::Assign {
                    name,
                    value: Box::new(value),
                });
            }
        }
        let mut left = self.primary()?;
        while self.eat_punct('+') {
            self.charge()?;
            let right = self.primary()?;
            left = Ast::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Ast, String> {
        let Some(token) = self.next() else {
            return Err("reached end of file while parsing".to_string());
        };
        match token {
            Token::Int(value) => Ok(literal(value, "int")),
            Token::Long(value) => Ok(literal(value, "long")),
            Token::Double(value) => Ok(literal(value, "double")),
            Token::Str(value) => Ok(literal(value, "String")),
            Token::Char(value) => Ok(literal(value, "char")),
            Token::Punct('-') => match self.next() {
                Some(Token::Int(value)) => Ok(literal(format!("-{value}"), "int")),
                Some(Token::Long(value)) => Ok(literal(format!("-{value}"), "long")),
                Some(Token::Double(value)) => Ok(literal(format!("-{value}"), "double")),
                _ => Err("unsupported unary operator".to_string()),
            },
            Token::Punct('(') => {
                let inner = self.expr()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            Token::Ident(word) => match word.as_str() {
                "true" | "false" => Ok(literal(word, "boolean")),
                "null" => Ok(Ast::Literal {
                    value: word,
                    type_name: None,
                }),
                "throw" => self.throw(),
                _ if KEYWORDS.contains(&word.as_str()) => {
                    Err("illegal start of expression".to_string())
                }
                _ => {
                    if self.is_punct('.') {
                        return Err(format!("unsupported member access on {word}"));
                    }
                    if self.eat_punct('(') {
                        let mut args = Vec::new();
                        if !self.eat_punct(')') {
                            loop {
                                args.push(self.expr()?);
                                if self.eat_punct(')') {
                                    break;
                                }
                                self.expect_punct(',')?;
                            }
                        }
                        return Ok(Ast::Call { name: word, args });
                    }
                    Ok(Ast::Name(word))
                }
            },
            Token::Punct(_) => Err("illegal start of expression".to_string()),
        }
    }

    fn throw(&mut self) -> Result<Ast, String> {
        if !self.eat_word("new") {
            return Err("unsupported throw; expected 'throw new'".to_string());
        }
        let exception = self.type_ref()?;
        self.expect_punct('(')?;
        let message = match self.peek() {
            Some(Token::Str(text)) => {
                let text = unquote(text).to_string();
                self.pos += 1;
                Some(text)
            }
            _ => None,
        };
        self.expect_punct(')')?;
        Ok(Ast::Throw {
            exception_class: exception.text,
            message,
        })
    }
}

fn literal(value: impl Into<String>, type_name: &str) -> Ast {
    Ast::Literal {
        value: value.into(),
        type_name: Some(type_name.to_string()),
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text)
}

struct Lowering<'a> {
    class_name: &'a str,
    symbols: &'a dyn SymbolTable,
    locals: Vec<String>,
    this_method: Option<(String, usize)>,
    dependencies: BTreeSet<String>,
    unresolved: BTreeSet<String>,
}

impl Lowering<'_> {
    fn lower(mut self, decl: Decl) -> Result<CompiledSnippet, String> {
        let mut compiled = match decl {
            Decl::Import { path, is_static } => {
                let mut compiled = CompiledSnippet::new(SnippetKind::Import, path);
                if is_static {
                    compiled.type_name = "static".to_string();
                }
                compiled
            }
            Decl::Class {
                keyword,
                name,
                supertypes,
            } => {
                for supertype in &supertypes {
                    self.lower_type(supertype, Some(name.as_str()));
                }
                let mut compiled = CompiledSnippet::new(SnippetKind::Class, name);
                compiled.type_name = keyword;
                compiled.image = Some(ClassImage::new(self.class_name));
                compiled
            }
            Decl::Method {
                return_type,
                name,
                params,
                body,
            } => self.lower_method(return_type, name, params, body)?,
            Decl::Var {
                declared,
                name,
                init,
            } => self.lower_var(declared, name, init)?,
            Decl::Expression(ast) => {
                let name = match &ast {
                    Ast::Name(name) => self
                        .symbols
                        .resolve(SymbolKind::Var, name)
                        .map(|_| name.clone())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                let type_name = self.static_type(&ast).unwrap_or_default();
                let body = self.lower_expr(&ast)?;
                let mut compiled = CompiledSnippet::new(SnippetKind::Expression, name);
                compiled.type_name = type_name;
                compiled.image = Some(ClassImage {
                    name: self.class_name.to_string(),
                    fields: Vec::new(),
                    methods: vec![MethodImage {
                        name: EVAL_METHOD.to_string(),
                        params: Vec::new(),
                        body,
                    }],
                });
                compiled.entry = Some(EVAL_METHOD.to_string());
                compiled
            }
        };
        compiled.dependencies = self.dependencies;
        compiled.unresolved = self.unresolved;
        Ok(compiled)
    }

    fn lower_method(
        &mut self,
        return_type: TypeRef,
        name: String,
        params: Vec<(TypeRef, String)>,
        body: Option<Ast>,
    ) -> Result<CompiledSnippet, String> {
        self.lower_type(&return_type, None);
        for (param_type, _) in &params {
            self.lower_type(param_type, None);
        }
        self.locals = params.iter().map(|(_, name)| name.clone()).collect();
        self.this_method = Some((name.clone(), params.len()));
        let body = match &body {
            Some(ast) => self.lower_expr(ast)?,
            None => Expr::Unit,
        };

        let mut compiled = CompiledSnippet::new(SnippetKind::Method, name.clone());
        compiled.type_name = return_type.text;
        compiled.signature = format!(
            "({})",
            params
                .iter()
                .map(|(param_type, _)| param_type.text.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        compiled.arity = params.len();
        compiled.image = Some(ClassImage {
            name: self.class_name.to_string(),
            fields: Vec::new(),
            methods: vec![MethodImage {
                name,
                params: params.into_iter().map(|(_, name)| name).collect(),
                body,
            }],
        });
        Ok(compiled)
    }

    fn lower_var(
        &mut self,
        declared: Option<TypeRef>,
        name: String,
        init: Option<Ast>,
    ) -> Result<CompiledSnippet, String> {
        let type_name = match &declared {
            Some(declared) => {
                self.lower_type(declared, None);
                declared.text.clone()
            }
            None => {
                let Some(init) = &init else {
                    return Err(format!(
                        "cannot infer type for variable {name} (cannot use 'var' on variable without initializer)"
                    ));
                };
                if matches!(init, Ast::Literal { type_name: None, .. }) {
                    return Err(format!(
                        "cannot infer type for variable {name} (variable initializer is 'null')"
                    ));
                }
                self.static_type(init).unwrap_or_else(|| "Object".to_string())
            }
        };
        let init = match &init {
            Some(ast) => Some(self.lower_expr(ast)?),
            None => None,
        };

        let mut compiled = CompiledSnippet::new(SnippetKind::Var, name.clone());
        compiled.image = Some(ClassImage {
            name: self.class_name.to_string(),
            fields: vec![FieldImage {
                name: name.clone(),
                type_name: type_name.clone(),
                default_value: default_value(&type_name).to_string(),
            }],
            methods: init
                .map(|value| MethodImage {
                    name: INIT_METHOD.to_string(),
                    params: Vec::new(),
                    body: Expr::Assign {
                        class_name: self.class_name.to_string(),
                        field: name,
                        value: Box::new(value),
                    },
                })
                .into_iter()
                .collect(),
        });
        if compiled
            .image
            .as_ref()
            .is_some_and(|image| !image.methods.is_empty())
        {
            compiled.entry = Some(INIT_METHOD.to_string());
        }
        compiled.type_name = type_name;
        Ok(compiled)
    }

    fn lower_type(&mut self, type_ref: &TypeRef, declaring: Option<&str>) {
        for name in &type_ref.names {
            if is_builtin_type(name) || Some(name.as_str()) == declaring {
                continue;
            }
            self.dependencies.insert(name.clone());
            if self.symbols.resolve(SymbolKind::Type, name).is_none() {
                self.unresolved.insert(name.clone());
            }
        }
    }

    fn lower_expr(&mut self, ast: &Ast) -> Result<Expr, String> {
        match ast {
            Ast::Literal { value, .. } => Ok(Expr::Literal {
                value: value.clone(),
            }),
            Ast::Name(name) => {
                if self.locals.contains(name) {
                    return Ok(Expr::Local { name: name.clone() });
                }
                Ok(self.reference(name, SymbolKind::Var, |symbol| Expr::Field {
                    class_name: symbol.class_name,
                    field: symbol.member,
                }))
            }
            Ast::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.lower_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                if self.this_method.as_ref() == Some(&(name.clone(), args.len())) {
                    return Ok(Expr::Call {
                        class_name: self.class_name.to_string(),
                        method: name.clone(),
                        args,
                    });
                }
                self.dependencies.insert(name.clone());
                match self.symbols.resolve_call(name, args.len()) {
                    Some(symbol) => Ok(Expr::Call {
                        class_name: symbol.class_name,
                        method: symbol.member,
                        args,
                    }),
                    None => {
                        self.unresolved.insert(name.clone());
                        Ok(Expr::Unresolved { name: name.clone() })
                    }
                }
            }
            Ast::Add(left, right) => Ok(Expr::Add {
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
                type_name: self.static_type(ast),
            }),
            Ast::Assign { name, value } => {
                if self.locals.contains(name) {
                    return Err(format!("assignment to parameter {name} is not supported"));
                }
                let value = self.lower_expr(value)?;
                Ok(self.reference(name, SymbolKind::Var, move |symbol| Expr::Assign {
                    class_name: symbol.class_name,
                    field: symbol.member,
                    value: Box::new(value),
                }))
            }
            Ast::Throw {
                exception_class,
                message,
            } => Ok(Expr::Throw {
                exception_class: exception_class.clone(),
                message: message.clone(),
            }),
        }
    }

    fn reference(
        &mut self,
        name: &str,
        kind: SymbolKind,
        build: impl FnOnce(Symbol) -> Expr,
    ) -> Expr {
        self.dependencies.insert(name.to_string());
        match self.symbols.resolve(kind, name) {
            Some(symbol) => build(symbol),
            None => {
                self.unresolved.insert(name.to_string());
                Expr::Unresolved {
                    name: name.to_string(),
                }
            }
        }
    }

    fn static_type(&self, ast: &Ast) -> Option<String> {
        match ast {
            Ast::Literal { type_name, .. } => type_name.clone(),
            Ast::Name(name) => self
                .symbols
                .resolve(SymbolKind::Var, name)
                .map(|symbol| symbol.type_name),
            Ast::Call { name, args } => self
                .symbols
                .resolve_call(name, args.len())
                .map(|symbol| symbol.type_name),
            Ast::Add(left, right) => {
                let left = self.static_type(left)?;
                let right = self.static_type(right)?;
                if left == "String" || right == "String" {
                    return Some("String".to_string());
                }
                ["double", "float", "long", "int"]
                    .into_iter()
                    .find(|wider| left == *wider || right == *wider)
                    .map(str::to_string)
            }
            Ast::Assign { value, .. } => self.static_type(value),
            Ast::Throw { .. } => None,
        }
    }
}
