use crate::executor::ArgValue;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use taskflow_core::{Result, TaskResult, TaskflowError};

/// Trait for task handlers.
///
/// A handler declares the type tags of its parameters; the executor
/// validates arity and coerces the signature's weakly typed args against
/// them before invocation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Type tags of the parameters this handler expects, in order.
    fn arg_types(&self) -> &'static [&'static str];

    /// Execute with the coerced arguments.
    async fn run(&self, args: Vec<ArgValue>) -> Result<Vec<TaskResult>>;
}

/// Registry of task handlers by task name.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under a task name.
    pub fn register<H: TaskHandler + 'static>(&self, name: impl Into<String>, handler: H) {
        self.handlers.write().insert(name.into(), Arc::new(handler));
    }

    /// Register several pre-built handlers at once.
    pub fn register_all(&self, handlers: HashMap<String, Arc<dyn TaskHandler>>) {
        self.handlers.write().extend(handlers);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// All registered task names.
    pub fn task_names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds two integers. The stock demo handler.
pub struct AddHandler;

#[async_trait]
impl TaskHandler for AddHandler {
    fn arg_types(&self) -> &'static [&'static str] {
        &["int64", "int64"]
    }

    async fn run(&self, args: Vec<ArgValue>) -> Result<Vec<TaskResult>> {
        match (&args[0], &args[1]) {
            (ArgValue::Int(a), ArgValue::Int(b)) => Ok(vec![TaskResult::new("int64", a + b)]),
            _ => Err(TaskflowError::Failed("add expects two integers".to_string())),
        }
    }
}

/// Concatenates two strings.
pub struct ConcatHandler;

#[async_trait]
impl TaskHandler for ConcatHandler {
    fn arg_types(&self) -> &'static [&'static str] {
        &["string", "string"]
    }

    async fn run(&self, args: Vec<ArgValue>) -> Result<Vec<TaskResult>> {
        match (&args[0], &args[1]) {
            (ArgValue::String(a), ArgValue::String(b)) => {
                Ok(vec![TaskResult::new("string", format!("{}{}", a, b))])
            }
            _ => Err(TaskflowError::Failed("concat expects two strings".to_string())),
        }
    }
}
