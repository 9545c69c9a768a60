use serde::{Deserialize, Serialize};

/// A single value produced by a task invocation. A task may produce zero
/// or more of these; the tag mirrors [`crate::Arg`] so results can be fed
/// back into downstream signatures unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: serde_json::Value,
}

impl TaskResult {
    pub fn new(type_tag: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        TaskResult {
            type_tag: type_tag.into(),
            value: value.into(),
        }
    }
}

/// Render a result list for log lines, e.g. `[5, "ok"]`.
pub fn human_readable_results(results: &[TaskResult]) -> String {
    let rendered: Vec<String> = results.iter().map(|r| r.value.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}
