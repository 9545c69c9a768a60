use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A single task argument: a type tag plus a transport-neutral value.
///
/// The tag (e.g. `"int64"`, `"string"`, `"float64"`) tells the execution
/// runtime how to coerce `value` into the native parameter type the
/// registered handler declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: serde_json::Value,
}

impl Arg {
    pub fn new(type_tag: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Arg {
            type_tag: type_tag.into(),
            value: value.into(),
        }
    }
}

/// A task signature: the serialized unit of work that travels through the
/// broker. Carries identity, dispatch info, scheduling state, and the
/// callback composition (success/error chains, group membership, chord).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Opaque unique identity. Survives retries: a retried signature is the
    /// same task, not a new one.
    pub uuid: String,

    /// Registry key of the handler that executes this task.
    pub name: String,

    /// Ordered arguments passed to the handler.
    pub args: Vec<Arg>,

    /// Opaque headers used to propagate distributed trace context.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Earliest execution time. `None` means "now". Honored by the broker.
    pub eta: Option<DateTime<Utc>>,

    /// Remaining implicit retries.
    pub retry_count: u32,

    /// Last backoff interval in seconds; carried across retries so
    /// successive retries produce a growing interval.
    pub retry_timeout: u64,

    /// Children submitted after this task succeeds.
    pub on_success: Vec<Signature>,

    /// Children submitted after this task fails, each with the error
    /// message prepended as argument 0.
    pub on_error: Vec<Signature>,

    /// Callback fired exactly once when every member of the containing
    /// group has succeeded.
    pub chord_callback: Option<Box<Signature>>,

    /// Group this signature belongs to, if any.
    pub group_uuid: Option<String>,

    /// Size of the containing group.
    pub group_task_count: usize,

    /// If true, this signature's args are never extended with upstream
    /// results.
    pub immutable: bool,
}

impl Signature {
    /// Create a signature with a fresh identity and no callbacks attached.
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Signature {
            uuid: format!("task_{}", Uuid::new_v4()),
            name: name.into(),
            args,
            headers: HashMap::new(),
            eta: None,
            retry_count: 0,
            retry_timeout: 0,
            on_success: Vec::new(),
            on_error: Vec::new(),
            chord_callback: None,
            group_uuid: None,
            group_task_count: 0,
            immutable: false,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_on_success(mut self, child: Signature) -> Self {
        self.on_success.push(child);
        self
    }

    pub fn with_on_error(mut self, child: Signature) -> Self {
        self.on_error.push(child);
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}
