//! Hook dispatcher: listener registry plus action/filter dispatch.
//!
//! Registration takes a write lock; dispatch clones the matching listeners
//! under a read lock and runs them after releasing it, so listeners may
//! dispatch (or even register) other hooks without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde_json::Value;

use super::signal::{HookError, InterceptSignal};

/// Priority used when a listener does not ask for one.
pub const DEFAULT_PRIORITY: i32 = 20;

type ActionFn = Arc<dyn Fn(&[Value]) -> Result<(), HookError> + Send + Sync>;
type FilterFn = Arc<dyn Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync>;

/// Listener flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Action,
    Filter,
}

#[derive(Clone)]
enum Listener {
    Action(ActionFn),
    Filter(FilterFn),
}

impl Listener {
    fn kind(&self) -> HookKind {
        match self {
            Self::Action(_) => HookKind::Action,
            Self::Filter(_) => HookKind::Filter,
        }
    }
}

#[derive(Clone)]
struct HookEntry {
    listener: Listener,
    priority: i32,
    sequence: u64,
    /// Extension code that registered this listener, if any.
    owner: Option<String>,
}

/// In-process registry of named hooks.
#[derive(Default)]
pub struct HookDispatcher {
    hooks: RwLock<HashMap<String, Vec<HookEntry>>>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.read();
        f.debug_struct("HookDispatcher")
            .field("hooks", &hooks.len())
            .field(
                "listeners",
                &hooks.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an action listener with [`DEFAULT_PRIORITY`].
    pub fn register<F>(&self, hook: &str, callback: F)
    where
        F: Fn(&[Value]) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_at(hook, DEFAULT_PRIORITY, callback);
    }

    /// Adds an action listener with an explicit priority.
    pub fn register_at<F>(&self, hook: &str, priority: i32, callback: F)
    where
        F: Fn(&[Value]) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.insert(hook, priority, None, Listener::Action(Arc::new(callback)));
    }

    /// Adds a filter listener with [`DEFAULT_PRIORITY`].
    pub fn register_filter<F>(&self, hook: &str, callback: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.register_filter_at(hook, DEFAULT_PRIORITY, callback);
    }

    /// Adds a filter listener with an explicit priority.
    pub fn register_filter_at<F>(&self, hook: &str, priority: i32, callback: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.insert(hook, priority, None, Listener::Filter(Arc::new(callback)));
    }

    /// Returns a registrar that tags every listener with `owner`, so they
    /// can later be dropped with [`HookDispatcher::remove_owner`].
    pub fn registrar(&self, owner: &str) -> HookRegistrar<'_> {
        HookRegistrar {
            dispatcher: self,
            owner: owner.to_string(),
        }
    }

    /// Broadcasts `hook` to every action listener.
    ///
    /// Listener failures are logged and skipped. An intercept aborts the
    /// broadcast and is returned to the caller.
    pub fn call(&self, hook: &str, args: &[Value]) -> Result<(), InterceptSignal> {
        let listeners = self.snapshot(hook, HookKind::Action);
        if listeners.is_empty() {
            return Ok(());
        }
        debug!(
            "event=hook_call module=hooks hook={hook} listeners={}",
            listeners.len()
        );

        for (position, entry) in listeners.iter().enumerate() {
            let Listener::Action(callback) = &entry.listener else {
                continue;
            };
            match callback(args) {
                Ok(()) => {}
                Err(HookError::Intercepted(signal)) => {
                    info!(
                        "event=hook_intercepted module=hooks kind=action hook={hook} owner={} position={position}",
                        owner_label(entry)
                    );
                    return Err(signal);
                }
                Err(err) => {
                    warn!(
                        "event=hook_action_failed module=hooks status=error hook={hook} owner={} position={position} error={err}",
                        owner_label(entry)
                    );
                }
            }
        }
        Ok(())
    }

    /// Folds `value` through every filter listener of `hook`.
    ///
    /// Returns `value` unchanged when nothing listens.
    pub fn filter(&self, hook: &str, value: Value, args: &[Value]) -> Result<Value, HookError> {
        let listeners = self.snapshot(hook, HookKind::Filter);
        if listeners.is_empty() {
            return Ok(value);
        }
        debug!(
            "event=hook_filter module=hooks hook={hook} listeners={}",
            listeners.len()
        );

        let mut current = value;
        for (position, entry) in listeners.iter().enumerate() {
            let Listener::Filter(callback) = &entry.listener else {
                continue;
            };
            current = match callback(current, args) {
                Ok(next) => next,
                Err(HookError::Intercepted(signal)) => {
                    info!(
                        "event=hook_intercepted module=hooks kind=filter hook={hook} owner={} position={position}",
                        owner_label(entry)
                    );
                    return Err(HookError::Intercepted(signal));
                }
                Err(HookError::Failed(source)) => {
                    return Err(HookError::Filter {
                        hook: hook.to_string(),
                        position,
                        source,
                    });
                }
                Err(nested) => {
                    return Err(HookError::Filter {
                        hook: hook.to_string(),
                        position,
                        source: Box::new(nested),
                    });
                }
            };
        }
        Ok(current)
    }

    /// Drops every listener (any kind) registered under `hook`.
    pub fn remove(&self, hook: &str) {
        if let Some(entries) = self.write().remove(hook) {
            debug!(
                "event=hook_remove module=hooks hook={hook} removed={}",
                entries.len()
            );
        }
    }

    /// Drops every listener registered through `owner`'s registrar.
    /// Returns the number of listeners removed.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut hooks = self.write();
        let mut removed = 0;
        for entries in hooks.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.owner.as_deref() != Some(owner));
            removed += before - entries.len();
        }
        hooks.retain(|_, entries| !entries.is_empty());
        drop(hooks);

        if removed > 0 {
            info!("event=hook_remove_owner module=hooks owner={owner} removed={removed}");
        }
        removed
    }

    pub fn has_listeners(&self, hook: &str) -> bool {
        self.listener_count(hook) > 0
    }

    /// Number of listeners of any kind registered under `hook`.
    pub fn listener_count(&self, hook: &str) -> usize {
        self.read().get(hook).map_or(0, Vec::len)
    }

    /// Registered hook names, sorted.
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(&self, hook: &str, priority: i32, owner: Option<&str>, listener: Listener) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let kind = listener.kind();
        let entry = HookEntry {
            listener,
            priority,
            sequence,
            owner: owner.map(str::to_string),
        };

        let mut hooks = self.write();
        let entries = hooks.entry(hook.to_string()).or_default();
        let position =
            entries.partition_point(|e| (e.priority, e.sequence) <= (priority, sequence));
        entries.insert(position, entry);
        drop(hooks);

        debug!(
            "event=hook_register module=hooks hook={hook} kind={kind:?} priority={priority} owner={}",
            owner.unwrap_or("-")
        );
    }

    fn snapshot(&self, hook: &str, kind: HookKind) -> Vec<HookEntry> {
        self.read()
            .get(hook)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.listener.kind() == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<HookEntry>>> {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<HookEntry>>> {
        self.hooks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn owner_label(entry: &HookEntry) -> &str {
    entry.owner.as_deref().unwrap_or("-")
}

/// Registration handle scoped to one extension.
pub struct HookRegistrar<'a> {
    dispatcher: &'a HookDispatcher,
    owner: String,
}

impl HookRegistrar<'_> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn register<F>(&self, hook: &str, callback: F)
    where
        F: Fn(&[Value]) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_at(hook, DEFAULT_PRIORITY, callback);
    }

    pub fn register_at<F>(&self, hook: &str, priority: i32, callback: F)
    where
        F: Fn(&[Value]) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.dispatcher.insert(
            hook,
            priority,
            Some(&self.owner),
            Listener::Action(Arc::new(callback)),
        );
    }

    pub fn register_filter<F>(&self, hook: &str, callback: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.register_filter_at(hook, DEFAULT_PRIORITY, callback);
    }

    pub fn register_filter_at<F>(&self, hook: &str, priority: i32, callback: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync + 'static,
    {
        self.dispatcher.insert(
            hook,
            priority,
            Some(&self.owner),
            Listener::Filter(Arc::new(callback)),
        );
    }
}
