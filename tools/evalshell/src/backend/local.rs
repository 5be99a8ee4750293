use crate::backend::ExecutionBackend;
use crate::errors::ShellError;
use crate::image::{ClassImage, ExecutionException, Expr};
use crate::runtime::FileSystem;
use crate::types::ClassStatus;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const LOCAL_BACKEND_NAME: &str = "local";
/// Nested evaluations, calls included, before `StackOverflowError`.
pub const MAX_EVAL_DEPTH: usize = 256;

struct LoadedClass {
    image: ClassImage,
    statics: BTreeMap<String, String>,
}

impl LoadedClass {
    fn new(image: ClassImage) -> Self {
        let statics = image
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.default_value.clone()))
            .collect();
        Self { image, statics }
    }

    fn redefine(&mut self, image: ClassImage) {
        let mut statics = BTreeMap::new();
        for field in &image.fields {
            let value = self
                .statics
                .remove(&field.name)
                .unwrap_or_else(|| field.default_value.clone());
            statics.insert(field.name.clone(), value);
        }
        self.statics = statics;
        self.image = image;
    }
}

/// Interprets class images inside the current process.
pub struct LocalBackend {
    file_system: Arc<dyn FileSystem>,
    running: bool,
    classpath: Vec<PathBuf>,
    classes: BTreeMap<String, LoadedClass>,
}

impl LocalBackend {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            file_system,
            running: false,
            classpath: Vec::new(),
            classes: BTreeMap::new(),
        }
    }

    fn ensure_running(&self) -> Result<(), ShellError> {
        if !self.running {
            return Err(ShellError::Backend(
                "local backend is not running".to_string(),
            ));
        }
        Ok(())
    }

    fn find_on_classpath(&self, class_name: &str) -> Option<PathBuf> {
        self.classpath
            .iter()
            .map(|entry| entry.join(format!("{class_name}.json")))
            .find(|path| self.file_system.exists(path))
    }

    fn ensure_loaded(&mut self, class_name: &str) -> Result<(), ShellError> {
        if self.classes.contains_key(class_name) {
            return Ok(());
        }
        let Some(path) = self.find_on_classpath(class_name) else {
            return Err(thrown("NoClassDefFoundError", class_name));
        };
        let text = self.file_system.read_to_string(&path)?;
        let image: ClassImage = serde_json::from_str(&text)
            .map_err(|e| thrown("ClassFormatError", &format!("{}: {e}", path.display())))?;
        if image.name != class_name {
            return Err(thrown(
                "NoClassDefFoundError",
                &format!("{class_name} (wrong name: {})", image.name),
            ));
        }
        self.classes
            .insert(class_name.to_string(), LoadedClass::new(image));
        Ok(())
    }

    fn read_static(&mut self, class_name: &str, field: &str) -> Result<String, ShellError> {
        self.ensure_loaded(class_name)?;
        self.classes
            .get(class_name)
            .and_then(|class| class.statics.get(field))
            .cloned()
            .ok_or_else(|| thrown("NoSuchFieldError", &format!("{class_name}.{field}")))
    }

    fn write_static(
        &mut self,
        class_name: &str,
        field: &str,
        value: String,
    ) -> Result<(), ShellError> {
        self.ensure_loaded(class_name)?;
        let slot = self
            .classes
            .get_mut(class_name)
            .and_then(|class| class.statics.get_mut(field))
            .ok_or_else(|| thrown("NoSuchFieldError", &format!("{class_name}.{field}")))?;
        *slot = value;
        Ok(())
    }

    fn call(
        &mut self,
        class_name: &str,
        method: &str,
        args: Vec<String>,
        depth: usize,
    ) -> Result<String, ShellError> {
        self.ensure_loaded(class_name)?;
        let (params, body) = self
            .classes
            .get(class_name)
            .and_then(|class| class.image.method(method, args.len()))
            .map(|m| (m.params.clone(), m.body.clone()))
            .ok_or_else(|| thrown("NoSuchMethodError", &format!("{class_name}.{method}")))?;
        let locals = params.into_iter().zip(args).collect::<BTreeMap<_, _>>();
        self.eval(&body, &locals, depth)
    }

    fn eval(
        &mut self,
        expr: &Expr,
        locals: &BTreeMap<String, String>,
        depth: usize,
    ) -> Result<String, ShellError> {
        if depth >= MAX_EVAL_DEPTH {
            return Err(ShellError::Execution(ExecutionException::Thrown {
                exception_class: "StackOverflowError".to_string(),
                message: None,
            }));
        }
        let inner = depth + 1;
        match expr {
            Expr::Unit => Ok(String::new()),
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Local { name } => locals
                .get(name)
                .cloned()
                .ok_or_else(|| thrown("IllegalStateException", &format!("no local {name}"))),
            Expr::Field { class_name, field } => self.read_static(class_name, field),
            Expr::Call {
                class_name,
                method,
                args,
            } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, locals, inner)?);
                }
                self.call(class_name, method, values, inner)
            }
            Expr::Add {
                left,
                right,
                type_name,
            } => {
                let left = self.eval(left, locals, inner)?;
                let right = self.eval(right, locals, inner)?;
                add_values(&left, &right, type_name.as_deref())
            }
            Expr::Assign {
                class_name,
                field,
                value,
            } => {
                let value = self.eval(value, locals, inner)?;
                self.write_static(class_name, field, value.clone())?;
                Ok(value)
            }
            Expr::Throw {
                exception_class,
                message,
            } => Err(ShellError::Execution(ExecutionException::Thrown {
                exception_class: exception_class.clone(),
                message: message.clone(),
            })),
            Expr::Unresolved { name } => Err(ShellError::Execution(
                ExecutionException::Unresolved { name: name.clone() },
            )),
        }
    }
}

impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &str {
        LOCAL_BACKEND_NAME
    }

    fn start(&mut self) -> Result<(), ShellError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ShellError> {
        self.running = false;
        self.classes.clear();
        Ok(())
    }

    fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError> {
        self.ensure_running()?;
        let entry = PathBuf::from(path);
        if !self.classpath.contains(&entry) {
            self.classpath.push(entry);
        }
        Ok(true)
    }

    fn load(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.ensure_running()?;
        let mut all_loaded = true;
        for image in classes {
            if self.classes.contains_key(&image.name) {
                all_loaded = false;
                continue;
            }
            self.classes
                .insert(image.name.clone(), LoadedClass::new(image.clone()));
        }
        Ok(all_loaded)
    }

    fn redefine(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.ensure_running()?;
        let mut all_redefined = true;
        for image in classes {
            match self.classes.get_mut(&image.name) {
                Some(loaded) => loaded.redefine(image.clone()),
                None => all_redefined = false,
            }
        }
        Ok(all_redefined)
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, ShellError> {
        self.ensure_running()?;
        self.call(class_name, method, Vec::new(), 0)
    }

    fn class_status(&mut self, class_name: &str) -> Result<ClassStatus, ShellError> {
        self.ensure_running()?;
        if self.classes.contains_key(class_name) {
            return Ok(ClassStatus::Loaded);
        }
        if self.find_on_classpath(class_name).is_some() {
            return Ok(ClassStatus::Loadable);
        }
        Ok(ClassStatus::NotFound)
    }

    fn var_value(&mut self, class_name: &str, field: &str) -> Result<String, ShellError> {
        self.ensure_running()?;
        self.read_static(class_name, field)
    }
}

fn thrown(exception_class: &str, message: &str) -> ShellError {
    ShellError::Execution(ExecutionException::Thrown {
        exception_class: exception_class.to_string(),
        message: Some(message.to_string()),
    })
}

fn add_values(left: &str, right: &str, type_name: Option<&str>) -> Result<String, ShellError> {
    if let (Ok(l), Ok(r)) = (left.parse::<i64>(), right.parse::<i64>()) {
        if type_name == Some("int") {
            return Ok((l as i32).wrapping_add(r as i32).to_string());
        }
        return Ok(l.wrapping_add(r).to_string());
    }
    if let (Some(l), Some(r)) = (string_content(left), string_content(right)) {
        return Ok(format!("\"{l}{r}\""));
    }
    if let Some(l) = string_content(left) {
        return Ok(format!("\"{l}{right}\""));
    }
    if let Some(r) = string_content(right) {
        return Ok(format!("\"{left}{r}\""));
    }
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return Ok(format!("{:?}", l + r));
    }
    Err(thrown(
        "UnsupportedOperationException",
        &format!("cannot add {left} and {right}"),
    ))
}

fn string_content(value: &str) -> Option<&str> {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
}
