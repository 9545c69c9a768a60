use crate::handler::TaskHandler;
use std::sync::Arc;
use taskflow_core::{Arg, Result, TaskResult, TaskflowError};

/// A native argument value, coerced from an [`Arg`]'s tagged JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ArgValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Coerce one tagged JSON value into the native type the handler declared
/// at this position.
fn coerce(index: usize, expected: &str, value: &serde_json::Value) -> Result<ArgValue> {
    let bind_err = || TaskflowError::ArgBinding {
        index,
        expected: expected.to_string(),
        value: value.clone(),
    };

    match expected {
        "string" => value
            .as_str()
            .map(|s| ArgValue::String(s.to_string()))
            .ok_or_else(bind_err),
        "bool" => value.as_bool().map(ArgValue::Bool).ok_or_else(bind_err),
        "int" | "int8" | "int16" | "int32" | "int64" => {
            value.as_i64().map(ArgValue::Int).ok_or_else(bind_err)
        }
        "uint" | "uint8" | "uint16" | "uint32" | "uint64" => {
            value.as_u64().map(ArgValue::Uint).ok_or_else(bind_err)
        }
        "float32" | "float64" => value.as_f64().map(ArgValue::Float).ok_or_else(bind_err),
        other => Err(TaskflowError::UnsupportedArgType(other.to_string())),
    }
}

/// An invocable task: a registered handler plus its args validated and
/// coerced against the handler's declared parameter tags.
///
/// Binding happens before any backend transition to `Started`, so an
/// invalid delivery fails without ever appearing to run.
pub struct BoundTask {
    handler: Arc<dyn TaskHandler>,
    args: Vec<ArgValue>,
}

impl std::fmt::Debug for BoundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTask")
            .field("args", &self.args)
            .finish()
    }
}

impl BoundTask {
    pub fn bind(handler: Arc<dyn TaskHandler>, args: &[Arg]) -> Result<Self> {
        let expected = handler.arg_types();
        if expected.len() != args.len() {
            return Err(TaskflowError::ArgCountMismatch {
                expected: expected.len(),
                actual: args.len(),
            });
        }

        let args = expected
            .iter()
            .zip(args)
            .enumerate()
            .map(|(index, (tag, arg))| coerce(index, tag, &arg.value))
            .collect::<Result<Vec<_>>>()?;

        Ok(BoundTask { handler, args })
    }

    pub async fn call(&self) -> Result<Vec<TaskResult>> {
        self.handler.run(self.args.clone()).await
    }
}
