//! Producer-side composition helpers: chains, groups, and chords.

use crate::error::{Result, TaskflowError};
use crate::signature::Signature;
use uuid::Uuid;

/// Link signatures into a chain: each runs after its predecessor succeeds,
/// receiving the predecessor's results as extra args unless marked
/// immutable. Returns the head signature with the rest nested under
/// `on_success`.
pub fn chain(mut tasks: Vec<Signature>) -> Result<Signature> {
    let mut tail = tasks.pop().ok_or(TaskflowError::EmptyChain)?;
    while let Some(mut prev) = tasks.pop() {
        prev.on_success.push(tail);
        tail = prev;
    }
    Ok(tail)
}

/// A set of sibling signatures sharing a `group_uuid`, enabling fan-in.
#[derive(Debug, Clone)]
pub struct Group {
    pub group_uuid: String,
    pub tasks: Vec<Signature>,
}

impl Group {
    /// Stamp every member with a fresh shared group identity and the group
    /// size, so workers can detect group completion.
    pub fn new(mut tasks: Vec<Signature>) -> Self {
        let group_uuid = format!("group_{}", Uuid::new_v4());
        let count = tasks.len();
        for task in &mut tasks {
            task.group_uuid = Some(group_uuid.clone());
            task.group_task_count = count;
        }
        Group { group_uuid, tasks }
    }

    pub fn task_uuids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.uuid.clone()).collect()
    }
}

/// A group plus a callback that fires once, when every member succeeds,
/// with the members' collected results.
#[derive(Debug, Clone)]
pub struct Chord {
    pub group: Group,
    pub callback: Signature,
}

impl Chord {
    pub fn new(mut group: Group, callback: Signature) -> Self {
        for task in &mut group.tasks {
            task.chord_callback = Some(Box::new(callback.clone()));
        }
        Chord { group, callback }
    }
}
