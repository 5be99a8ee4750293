//! Line-oriented front end: dispatches `/` commands and renders snippet
//! events as feedback lines.

use crate::errors::ShellError;
use crate::runtime::{FileSystem, Terminal};
use crate::session::Session;
use crate::snippet::{Snippet, SnippetEvent, SnippetKey};
use crate::types::{SnippetKind, Status};
use std::path::Path;

const FEEDBACK: &str = "|  ";
const DETAIL: &str = "|    ";

const HELP: &[&str] = &[
    "/list [all|start|<id|name>]  list the source of snippets",
    "/vars                list declared variables and their values",
    "/methods             list declared methods",
    "/types               list declared classes, interfaces, enums and records",
    "/imports             list active imports",
    "/drop <id|name>      drop a declaration",
    "/classpath <path>    add a path to the backend classpath",
    "/status <id|name>    show status, diagnostics and unresolved references",
    "/history             list everything typed in this shell",
    "/save [-all|-start|-history] <file>  save snippet source to a file",
    "/open <file>         evaluate each line of a file",
    "/reset               discard all state and start a new session",
    "/reload              reset, then replay the active snippets",
    "/!                   re-run the last snippet",
    "/<id>                re-run the snippet with that id",
    "/-<n>                re-run the n-th previous snippet",
    "/help                show this help",
    "/exit                leave the shell",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
    /// Active snippets typed by the user.
    Active,
    All,
    Start,
    Matching(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveScope {
    Active,
    All,
    Start,
    History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Eval(String),
    List(ListFilter),
    Vars,
    Methods,
    Types,
    Imports,
    Drop(String),
    Classpath(String),
    Status(String),
    History,
    Save { scope: SaveScope, path: String },
    Open(String),
    Reset,
    Reload,
    RerunLast,
    Rerun(String),
    RerunRelative(usize),
    Help,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub fn parse_command(line: &str) -> Result<Command, ShellError> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(Command::Eval(line.to_string()));
    }
    let (name, argument) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let required = |command: &str| {
        if argument.is_empty() {
            Err(ShellError::InvalidArgument(format!(
                "{command} needs an argument"
            )))
        } else {
            Ok(argument.to_string())
        }
    };
    match name {
        "/list" => Ok(Command::List(match argument {
            "" => ListFilter::Active,
            "all" | "-all" => ListFilter::All,
            "start" | "-start" => ListFilter::Start,
            other => ListFilter::Matching(other.to_string()),
        })),
        "/vars" => Ok(Command::Vars),
        "/methods" => Ok(Command::Methods),
        "/types" => Ok(Command::Types),
        "/imports" => Ok(Command::Imports),
        "/drop" => required("/drop").map(Command::Drop),
        "/classpath" | "/cp" => required("/classpath").map(Command::Classpath),
        "/status" => required("/status").map(Command::Status),
        "/history" => Ok(Command::History),
        "/save" => parse_save(argument),
        "/open" => required("/open").map(Command::Open),
        "/reset" => Ok(Command::Reset),
        "/reload" => Ok(Command::Reload),
        "/!" => Ok(Command::RerunLast),
        "/help" | "/?" => Ok(Command::Help),
        "/exit" | "/quit" => Ok(Command::Exit),
        other => parse_rerun(other),
    }
}

fn parse_save(argument: &str) -> Result<Command, ShellError> {
    let (scope, path) = match argument.split_once(char::is_whitespace) {
        Some(("-all", path)) => (SaveScope::All, path),
        Some(("-start", path)) => (SaveScope::Start, path),
        Some(("-history", path)) => (SaveScope::History, path),
        _ => (SaveScope::Active, argument),
    };
    let path = path.trim();
    if path.is_empty() || path.starts_with('-') {
        return Err(ShellError::InvalidArgument(
            "/save needs a file name".to_string(),
        ));
    }
    Ok(Command::Save {
        scope,
        path: path.to_string(),
    })
}

/// `/<id>` and `/-<n>`.
fn parse_rerun(name: &str) -> Result<Command, ShellError> {
    let rest = &name[1..];
    if let Some(back) = rest.strip_prefix('-') {
        if let Ok(n) = back.parse::<usize>() {
            if n > 0 {
                return Ok(Command::RerunRelative(n));
            }
        }
    }
    let digits = rest.strip_prefix('s').unwrap_or(rest);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return Ok(Command::Rerun(rest.to_string()));
    }
    Err(ShellError::InvalidArgument(format!(
        "unknown command: {name}"
    )))
}

/// Builds the replacement session for `/reset` and `/reload`.
pub type Reopen<'a> = Box<dyn FnMut() -> Result<Session, ShellError> + 'a>;

pub struct Shell<'a> {
    session: &'a mut Session,
    terminal: &'a dyn Terminal,
    file_system: &'a dyn FileSystem,
    reopen: Option<Reopen<'a>>,
    history: Vec<String>,
}

impl<'a> Shell<'a> {
    pub fn new(
        session: &'a mut Session,
        terminal: &'a dyn Terminal,
        file_system: &'a dyn FileSystem,
    ) -> Self {
        Self {
            session,
            terminal,
            file_system,
            reopen: None,
            history: Vec::new(),
        }
    }

    pub fn with_reopen(mut self, reopen: Reopen<'a>) -> Self {
        self.reopen = Some(reopen);
        self
    }

    /// Reads until end of input or `/exit`. Only a failed backend search ends
    /// the loop with an error.
    pub fn run(&mut self) -> Result<(), ShellError> {
        while let Some(line) = self.terminal.read_line()? {
            if line.trim().is_empty() {
                continue;
            }
            if self.handle_line(&line)? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    pub fn handle_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        self.history.push(line.trim().to_string());
        let (flow, lines) = self.process(line)?;
        for line in lines {
            self.terminal.write_line(&line)?;
        }
        Ok(flow)
    }

    fn process(&mut self, line: &str) -> Result<(Flow, Vec<String>), ShellError> {
        let outcome = parse_command(line).and_then(|command| self.execute(command));
        match outcome {
            Ok(result) => Ok(result),
            Err(err @ ShellError::AllBackendsFailed(_)) => Err(err),
            Err(ShellError::Execution(exception)) => Ok((
                Flow::Continue,
                vec![format!("{FEEDBACK}Exception {exception}")],
            )),
            Err(ShellError::SessionClosed) => Ok((
                Flow::Continue,
                vec![format!("{FEEDBACK}{}", ShellError::SessionClosed)],
            )),
            Err(err) => Ok((Flow::Continue, vec![format!("{FEEDBACK}Error: {err}")])),
        }
    }

    fn execute(&mut self, command: Command) -> Result<(Flow, Vec<String>), ShellError> {
        let lines = match command {
            Command::Eval(source) => {
                let events = self.session.eval(&source)?;
                render_events(self.session, &events)
            }
            Command::List(filter) => self.list(&filter)?,
            Command::Vars => {
                let vars = self
                    .session
                    .variables()?
                    .into_iter()
                    .map(|snippet| (snippet.key, snippet.type_name.clone(), snippet.name.clone()))
                    .collect::<Vec<_>>();
                let mut lines = Vec::with_capacity(vars.len());
                for (key, type_name, name) in vars {
                    let value = match self.session.var_value(key) {
                        Ok(value) => value,
                        Err(ShellError::InvalidArgument(_)) => "(not initialized)".to_string(),
                        Err(err) => return Err(err),
                    };
                    lines.push(format!("{DETAIL}{type_name} {name} = {value}"));
                }
                lines
            }
            Command::Methods => self
                .session
                .methods()?
                .into_iter()
                .map(|snippet| {
                    format!(
                        "{DETAIL}{} {}{}",
                        snippet.type_name, snippet.name, snippet.signature
                    )
                })
                .collect(),
            Command::Types => self
                .session
                .types()?
                .into_iter()
                .map(|snippet| format!("{DETAIL}{}", snippet.describe()))
                .collect(),
            Command::Imports => self
                .session
                .imports()?
                .into_iter()
                .map(|snippet| format!("{DETAIL}{}", import_line(snippet)))
                .collect(),
            Command::Drop(reference) => {
                let key = self.resolve(&reference)?;
                let events = self.session.drop(key)?;
                render_events(self.session, &events)
            }
            Command::Classpath(path) => {
                if self.session.add_to_classpath(&path)? {
                    vec![format!("{FEEDBACK}Path '{path}' added to classpath")]
                } else {
                    vec![format!("{FEEDBACK}Path '{path}' was not added to classpath")]
                }
            }
            Command::Status(reference) => {
                let key = self.resolve(&reference)?;
                status_lines(self.session, key)?
            }
            Command::History => self.history.clone(),
            Command::Save { scope, path } => {
                let sources = self.saved_sources(scope)?;
                let mut contents = sources.join("\n");
                if !contents.is_empty() {
                    contents.push('\n');
                }
                self.file_system.write_string(Path::new(&path), &contents)?;
                Vec::new()
            }
            Command::Open(path) => return self.open(&path),
            Command::Reset => {
                self.reset()?;
                vec![format!("{FEEDBACK}Resetting state.")]
            }
            Command::Reload => return self.reload(),
            Command::RerunLast => {
                let source = self
                    .session
                    .snippets()?
                    .last()
                    .map(|snippet| snippet.source.clone())
                    .ok_or_else(|| ShellError::InvalidArgument("no snippet to re-run".to_string()))?;
                self.rerun(source)?
            }
            Command::Rerun(id) => {
                let source = self
                    .session
                    .snippets()?
                    .into_iter()
                    .find(|snippet| snippet.id == id)
                    .map(|snippet| snippet.source.clone())
                    .ok_or(ShellError::UnknownSnippet(id))?;
                self.rerun(source)?
            }
            Command::RerunRelative(back) => {
                let snippets = self.session.snippets()?;
                let source = snippets
                    .len()
                    .checked_sub(back)
                    .map(|index| snippets[index].source.clone())
                    .ok_or_else(|| {
                        ShellError::InvalidArgument(format!("no snippet {back} back"))
                    })?;
                self.rerun(source)?
            }
            Command::Help => HELP.iter().map(|line| format!("{FEEDBACK}{line}")).collect(),
            Command::Exit => {
                return Ok((Flow::Exit, vec![format!("{FEEDBACK}Goodbye")]));
            }
        };
        Ok((Flow::Continue, lines))
    }

    fn resolve(&self, reference: &str) -> Result<SnippetKey, ShellError> {
        self.session
            .find(reference)
            .map(|snippet| snippet.key)
            .ok_or_else(|| ShellError::UnknownSnippet(reference.to_string()))
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<String>, ShellError> {
        let listed = self
            .session
            .snippets()?
            .into_iter()
            .filter(|snippet| match filter {
                ListFilter::Active => snippet.status.is_active() && !snippet.is_startup(),
                ListFilter::All => true,
                ListFilter::Start => snippet.is_startup(),
                ListFilter::Matching(reference) => {
                    snippet.id == *reference
                        || (snippet.kind.is_persistent() && snippet.name == *reference)
                }
            })
            .map(|snippet| format!("{:>4} : {}", snippet.id, snippet.source))
            .collect::<Vec<_>>();
        if let ListFilter::Matching(reference) = filter {
            if listed.is_empty() {
                return Err(ShellError::UnknownSnippet(reference.clone()));
            }
        }
        Ok(listed)
    }

    fn saved_sources(&self, scope: SaveScope) -> Result<Vec<String>, ShellError> {
        if scope == SaveScope::History {
            return Ok(self.history.clone());
        }
        Ok(self
            .session
            .snippets()?
            .into_iter()
            .filter(|snippet| match scope {
                SaveScope::Active => snippet.status.is_active() && !snippet.is_startup(),
                SaveScope::Start => snippet.is_startup(),
                SaveScope::All | SaveScope::History => true,
            })
            .map(|snippet| snippet.source.clone())
            .collect())
    }

    /// Feeds each non-blank line of `path` through the shell.
    fn open(&mut self, path: &str) -> Result<(Flow, Vec<String>), ShellError> {
        let contents = self.file_system.read_to_string(Path::new(path))?;
        let mut lines = Vec::new();
        for line in contents.lines().filter(|line| !line.trim().is_empty()) {
            let (flow, output) = self.process(line)?;
            lines.extend(output);
            if flow == Flow::Exit {
                return Ok((Flow::Exit, lines));
            }
        }
        Ok((Flow::Continue, lines))
    }

    fn reset(&mut self) -> Result<(), ShellError> {
        let reopen = self
            .reopen
            .as_mut()
            .ok_or_else(|| ShellError::InvalidArgument("this shell cannot reset".to_string()))?;
        self.session.close();
        *self.session = reopen()?;
        Ok(())
    }

    fn reload(&mut self) -> Result<(Flow, Vec<String>), ShellError> {
        let replay = self
            .session
            .snippets()?
            .into_iter()
            .filter(|snippet| snippet.status.is_active() && !snippet.is_startup())
            .map(|snippet| snippet.source.clone())
            .collect::<Vec<_>>();
        self.reset()?;
        let mut lines = vec![format!("{FEEDBACK}Restarting and restoring state.")];
        for source in replay {
            lines.push(format!("-: {source}"));
            let (_, output) = self.process(&source)?;
            lines.extend(output);
        }
        Ok((Flow::Continue, lines))
    }

    /// Echoes `source`, then evaluates it as a new snippet.
    fn rerun(&mut self, source: String) -> Result<Vec<String>, ShellError> {
        let events = self.session.eval(&source)?;
        let mut lines = vec![source];
        lines.extend(render_events(self.session, &events));
        Ok(lines)
    }
}

/// Feedback for one `eval` or `drop` result, main event first.
pub fn render_events(session: &Session, events: &[SnippetEvent]) -> Vec<String> {
    let mut lines = Vec::new();
    let Some((main, updates)) = events.split_first() else {
        return lines;
    };
    let Some(snippet) = session.snippet(main.key) else {
        return lines;
    };
    let replaced = updates
        .iter()
        .any(|event| event.status == Status::Overwritten && event.cause == Some(main.key));

    match main.status {
        Status::Rejected => {
            lines.push(format!("{FEEDBACK}Error:"));
            lines.extend(
                snippet
                    .diagnostics
                    .iter()
                    .map(|diagnostic| format!("{FEEDBACK}{}", diagnostic.message)),
            );
        }
        Status::Dropped => lines.push(format!("{FEEDBACK}dropped {}", snippet.describe())),
        _ => {
            if let Some(exception) = &main.exception {
                lines.push(format!("{FEEDBACK}Exception {exception}"));
            }
            match snippet.kind {
                SnippetKind::Expression | SnippetKind::Var if main.status == Status::Valid => {
                    if let Some(value) = main.value.as_deref() {
                        if !(value.is_empty() && snippet.type_name == "void") {
                            lines.push(format!("{} ==> {value}", snippet.name));
                        }
                    }
                }
                _ => {
                    let verb = if replaced { "replaced" } else { "created" };
                    lines.push(format!(
                        "{FEEDBACK}{verb} {}{}",
                        snippet.describe(),
                        recoverable_suffix(session, snippet, main.status)
                    ));
                }
            }
        }
    }

    for update in updates {
        let Some(other) = session.snippet(update.key) else {
            continue;
        };
        let verb = match update.status {
            Status::Overwritten => "overwritten",
            Status::Dropped => "dropped",
            _ => "modified",
        };
        lines.push(format!(
            "{DETAIL}update {verb} {}{}",
            other.describe(),
            recoverable_suffix(session, other, update.status)
        ));
    }
    lines
}

fn recoverable_suffix(session: &Session, snippet: &Snippet, status: Status) -> String {
    if !matches!(
        status,
        Status::RecoverableDefined | Status::RecoverableNotDefined
    ) {
        return String::new();
    }
    let missing = session
        .unresolved_dependencies(snippet.key)
        .map(|names| names.into_iter().collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    let action = if snippet.kind == SnippetKind::Method {
        "invoked"
    } else {
        "referenced"
    };
    format!(", however, it cannot be {action} until {missing} is declared")
}

fn status_lines(session: &Session, key: SnippetKey) -> Result<Vec<String>, ShellError> {
    let status = session.status(key)?;
    let mut lines = Vec::new();
    if let Some(snippet) = session.snippet(key) {
        lines.push(format!(
            "{FEEDBACK}{} {}: {}",
            snippet.id,
            snippet.describe(),
            status.as_str()
        ));
    }
    for diagnostic in session.diagnostics(key)? {
        lines.push(format!("{DETAIL}{:?}: {}", diagnostic.severity, diagnostic.message));
    }
    let unresolved = session.unresolved_dependencies(key)?;
    if !unresolved.is_empty() {
        lines.push(format!(
            "{DETAIL}unresolved: {}",
            unresolved.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    Ok(lines)
}

fn import_line(snippet: &Snippet) -> String {
    if snippet.type_name == "static" {
        format!("import static {}", snippet.name)
    } else {
        format!("import {}", snippet.name)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command, ListFilter, SaveScope, Shell};
    use crate::backend::failover::FailOverBackend;
    use crate::backend::{BackendFactory, ExecutionBackend, FakeBackend, FnFactory};
    use crate::compiler::BasicCompiler;
    use crate::config::SessionConfig;
    use crate::errors::ShellError;
    use crate::runtime::{FakeFileSystem, FakeTerminal, FileSystem};
    use crate::session::Session;
    use std::path::Path;
    use std::sync::Arc;

    fn backend_over(fake: &FakeBackend) -> FailOverBackend {
        let fake = fake.clone();
        let factory: Arc<dyn BackendFactory> = Arc::new(FnFactory::new("fake", move || {
            Box::new(fake.clone()) as Box<dyn ExecutionBackend>
        }));
        FailOverBackend::new(vec![factory])
    }

    fn session() -> Session {
        Session::new(backend_over(&FakeBackend::new("fake")), Box::new(BasicCompiler))
    }

    fn transcript_with(fs: &FakeFileSystem, input: &[&str]) -> Vec<String> {
        let mut session = session();
        let terminal = FakeTerminal::with_input(input);
        Shell::new(&mut session, &terminal, fs).run().expect("run");
        terminal.written_lines()
    }

    fn transcript(input: &[&str]) -> Vec<String> {
        transcript_with(&FakeFileSystem::default(), input)
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(
            parse_command("/drop  f ").expect("drop"),
            Command::Drop("f".to_string())
        );
        assert_eq!(
            parse_command("/list all").expect("list"),
            Command::List(ListFilter::All)
        );
        assert_eq!(
            parse_command("/list f").expect("list"),
            Command::List(ListFilter::Matching("f".to_string()))
        );
        assert_eq!(
            parse_command(" 1 + 2").expect("eval"),
            Command::Eval("1 + 2".to_string())
        );
        assert!(matches!(
            parse_command("/drop"),
            Err(ShellError::InvalidArgument(_))
        ));
        assert!(parse_command("/bogus").is_err());
    }

    #[test]
    fn rerun_and_save_commands_parse() {
        assert_eq!(parse_command("/!").expect("last"), Command::RerunLast);
        assert_eq!(
            parse_command("/12").expect("id"),
            Command::Rerun("12".to_string())
        );
        assert_eq!(
            parse_command("/s1").expect("startup id"),
            Command::Rerun("s1".to_string())
        );
        assert_eq!(
            parse_command("/-2").expect("relative"),
            Command::RerunRelative(2)
        );
        assert!(parse_command("/-0").is_err());
        assert!(parse_command("/sx").is_err());
        assert_eq!(
            parse_command("/save -history out.jsh").expect("save"),
            Command::Save {
                scope: SaveScope::History,
                path: "out.jsh".to_string()
            }
        );
        assert_eq!(
            parse_command("/save out.jsh").expect("save"),
            Command::Save {
                scope: SaveScope::Active,
                path: "out.jsh".to_string()
            }
        );
        assert!(parse_command("/save -all").is_err());
        assert!(parse_command("/open").is_err());
    }

    #[test]
    fn feedback_for_declarations_and_values() {
        let lines = transcript(&[
            "int a;",
            "int f() { return a + 1; }",
            "f()",
            "int boom() { throw new RuntimeException(\"boom\"); }",
            "boom()",
        ]);
        assert_eq!(
            lines,
            vec![
                "a ==> 0",
                "|  created method f()",
                "$3 ==> 1",
                "|  created method boom()",
                "|  Exception RuntimeException: boom",
            ]
        );
    }

    #[test]
    fn forward_references_are_reported_and_updated() {
        let lines = transcript(&["int f() { return g(); }", "int g() { return 7; }"]);
        assert_eq!(
            lines,
            vec![
                "|  created method f(), however, it cannot be invoked until g is declared",
                "|  created method g()",
                "|    update modified method f()",
            ]
        );
    }

    #[test]
    fn listing_and_dropping_by_name() {
        let lines = transcript(&["int a = 4;", "/vars", "/drop a", "/vars", "/list all", "/exit", "1"]);
        assert_eq!(
            lines,
            vec![
                "a ==> 4",
                "|    int a = 4",
                "|  dropped variable a",
                "   1 : int a = 4;",
                "|  Goodbye",
            ]
        );
    }

    #[test]
    fn list_filters_startup_and_named_snippets() {
        let config = SessionConfig {
            classpath: Vec::new(),
            startup: vec!["int base = 10;".to_string()],
        };
        let mut session = Session::open(
            &config,
            backend_over(&FakeBackend::new("fake")),
            Box::new(BasicCompiler),
            None,
        )
        .expect("open");
        let terminal = FakeTerminal::with_input(&[
            "int a = 1;",
            "/list start",
            "/list",
            "/list a",
            "/list 9",
        ]);
        let fs = FakeFileSystem::default();
        Shell::new(&mut session, &terminal, &fs).run().expect("run");
        assert_eq!(
            terminal.written_lines(),
            vec![
                "a ==> 1",
                "  s1 : int base = 10;",
                "   1 : int a = 1;",
                "   1 : int a = 1;",
                "|  Error: unknown snippet: 9",
            ]
        );
    }

    #[test]
    fn rejected_input_shows_diagnostics() {
        let lines = transcript(&["nope + 1"]);
        assert_eq!(lines, vec!["|  Error:", "|  cannot find symbol: nope"]);
    }

    #[test]
    fn closed_session_renders_a_notice() {
        let mut session = session();
        session.close();
        let terminal = FakeTerminal::with_input(&["int a;", "/status 1"]);
        let fs = FakeFileSystem::default();
        Shell::new(&mut session, &terminal, &fs).run().expect("run");
        assert_eq!(
            terminal.written_lines(),
            vec!["|  session is closed", "|  Error: unknown snippet: 1"]
        );
    }

    #[test]
    fn history_and_save_go_through_the_file_system() {
        let fs = FakeFileSystem::default();
        let lines = transcript_with(
            &fs,
            &["int a = 1;", "a + 1", "nope", "/save /work/out.jsh", "/history"],
        );
        assert_eq!(
            lines,
            vec![
                "a ==> 1",
                "$2 ==> 2",
                "|  Error:",
                "|  cannot find symbol: nope",
                "int a = 1;",
                "a + 1",
                "nope",
                "/save /work/out.jsh",
                "/history",
            ]
        );
        assert_eq!(
            fs.read_to_string(Path::new("/work/out.jsh")).expect("saved"),
            "int a = 1;\na + 1\n"
        );
    }

    #[test]
    fn open_evaluates_each_line_of_a_file() {
        let fs = FakeFileSystem::with_file("/work/setup.jsh", "int b = 2;\n\nb + 3\n/vars\n");
        let lines = transcript_with(&fs, &["/open /work/setup.jsh", "/open /work/missing.jsh"]);
        assert_eq!(lines[..3], ["b ==> 2", "$2 ==> 5", "|    int b = 2"]);
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("|  Error: io error: missing file"));
    }

    #[test]
    fn rerun_commands_evaluate_earlier_source_again() {
        let lines = transcript(&["int a = 1;", "a + 1", "/!", "/-1", "/7"]);
        assert_eq!(
            lines,
            vec![
                "a ==> 1",
                "$2 ==> 2",
                "a + 1",
                "$3 ==> 2",
                "a + 1",
                "$4 ==> 2",
                "|  Error: unknown snippet: 7",
            ]
        );
    }

    #[test]
    fn reset_and_reload_replace_the_session() {
        let first = FakeBackend::new("fake");
        let mut session = Session::new(backend_over(&first), Box::new(BasicCompiler));
        let reopened = FakeBackend::new("fake");
        let for_reopen = reopened.clone();
        let terminal = FakeTerminal::with_input(&[
            "int a = 5;",
            "int f() { return a; }",
            "nope",
            "/reload",
            "/vars",
            "/reset",
            "/vars",
            "/list",
        ]);
        let fs = FakeFileSystem::default();
        Shell::new(&mut session, &terminal, &fs)
            .with_reopen(Box::new(move || {
                Ok(Session::new(backend_over(&for_reopen), Box::new(BasicCompiler)))
            }))
            .run()
            .expect("run");

        assert_eq!(
            terminal.written_lines(),
            vec![
                "a ==> 5",
                "|  created method f()",
                "|  Error:",
                "|  cannot find symbol: nope",
                "|  Restarting and restoring state.",
                "-: int a = 5;",
                "a ==> 5",
                "-: int f() { return a; }",
                "|  created method f()",
                "|    int a = 5",
                "|  Resetting state.",
            ]
        );
        assert_eq!(first.count("stop"), 1);
        assert_eq!(reopened.count("stop"), 1);
        assert!(!session.is_closed());
    }

    #[test]
    fn reset_without_a_reopen_hook_is_refused() {
        let lines = transcript(&["/reset"]);
        assert_eq!(
            lines,
            vec!["|  Error: invalid argument: this shell cannot reset"]
        );
    }
}
