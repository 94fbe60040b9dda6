//! Scoped tagging - Agent names and metadata attached by scope
//!
//! Two flavours share one resolution order:
//!
//! - Thread scopes ([`agent_scope`], [`metadata_scope`]) push onto a
//!   thread-local stack and pop when the returned guard drops. Guards are
//!   `!Send`, so a scope cannot leak onto another thread.
//! - Task scopes ([`with_agent`], [`with_metadata`]) wrap a future in a tokio
//!   task-local, so the tag follows the future across await points and
//!   worker threads.
//!
//! A task scope takes precedence over a thread scope. Nested scopes of the
//! same flavour compose: the innermost agent wins and metadata maps merge
//! outer to inner.

use crate::event::{Metadata, MetadataValue};
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;

thread_local! {
    static AGENT_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static METADATA_STACK: RefCell<Vec<Metadata>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_AGENT: String;
    static TASK_METADATA: Metadata;
}

/// Guard for a thread-scoped agent name. Pops on drop.
#[must_use = "the scope ends when the guard is dropped"]
#[derive(Debug)]
pub struct AgentScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AgentScope {
    fn drop(&mut self) {
        AGENT_STACK.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Guard for thread-scoped metadata. Pops on drop.
#[must_use = "the scope ends when the guard is dropped"]
#[derive(Debug)]
pub struct MetadataScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for MetadataScope {
    fn drop(&mut self) {
        METADATA_STACK.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Tag events tracked on this thread with `name` until the guard drops
///
/// ```ignore
/// let _scope = agentcost_core::agent_scope("researcher");
/// tracker.track(UsageRecord::new("gpt-4o", 120, 40))?; // agent_name = "researcher"
/// ```
pub fn agent_scope(name: impl Into<String>) -> AgentScope {
    let depth = AGENT_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.push(name.into());
        depth
    });
    AgentScope {
        depth,
        _not_send: PhantomData,
    }
}

/// Attach metadata to events tracked on this thread until the guard drops
pub fn metadata_scope<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> MetadataScope
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    let map: Metadata = entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    let depth = METADATA_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.push(map);
        depth
    });
    MetadataScope {
        depth,
        _not_send: PhantomData,
    }
}

/// Run `fut` with `name` as its agent
pub fn with_agent<F: Future>(name: impl Into<String>, fut: F) -> impl Future<Output = F::Output> {
    TASK_AGENT.scope(name.into(), fut)
}

/// Run `fut` with `entries` merged over any enclosing task metadata
pub fn with_metadata<F, K, V>(
    entries: impl IntoIterator<Item = (K, V)>,
    fut: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
    K: Into<String>,
    V: Into<MetadataValue>,
{
    let mut merged = TASK_METADATA.try_with(Clone::clone).unwrap_or_default();
    merged.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
    TASK_METADATA.scope(merged, fut)
}

/// Innermost scoped agent name: task scope, then thread scope
#[must_use]
pub fn current_agent() -> Option<String> {
    TASK_AGENT
        .try_with(Clone::clone)
        .ok()
        .or_else(|| AGENT_STACK.with(|stack| stack.borrow().last().cloned()))
}

/// Scoped metadata: thread scopes merged outer to inner, then task scope on top
#[must_use]
pub fn current_metadata() -> Metadata {
    let mut merged = METADATA_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .fold(Metadata::new(), |mut acc, map| {
                acc.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                acc
            })
    });
    if let Ok(task) = TASK_METADATA.try_with(Clone::clone) {
        merged.extend(task);
    }
    merged
}

/// Resolve the agent for an event: explicit, then scoped, then `default`
#[must_use]
pub fn resolve_agent(explicit: Option<&str>, default: &str) -> String {
    explicit
        .map(str::to_string)
        .or_else(current_agent)
        .unwrap_or_else(|| default.to_string())
}

/// Merge metadata layers: global, then scoped, then the record's own
#[must_use]
pub fn resolve_metadata(global: &Metadata, record: &Metadata) -> Metadata {
    let mut merged = global.clone();
    merged.extend(current_metadata());
    merged.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
