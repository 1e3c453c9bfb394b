// 📥 Command Queue - append-only entry point in front of the registry
// Commands buffered before a registry exists are replayed in push order.

use serde_json::Value;

use crate::command::{Command, CommandBuffer};
use crate::error::Result;
use crate::registry::{DispatchOutcome, TrackerRegistry};

#[derive(Debug)]
pub struct CommandQueue {
    registry: TrackerRegistry,
}

impl CommandQueue {
    /// Attach to `registry`, replaying everything buffered so far.
    ///
    /// A failing buffered command is logged and the replay continues with
    /// the next one; nobody is left to receive its error.
    pub fn attach(registry: TrackerRegistry, mut buffer: CommandBuffer) -> Self {
        let mut queue = CommandQueue { registry };
        let buffered = buffer.len();

        for command in buffer.drain() {
            if let Err(e) = queue.push(command) {
                tracing::warn!(error = %e, "buffered usage tracking command failed");
            }
        }

        if buffered > 0 {
            tracing::debug!(buffered, "replayed buffered usage tracking commands");
        }
        queue
    }

    pub fn push(&mut self, command: Command) -> Result<DispatchOutcome> {
        self.registry.dispatch_command(command)
    }

    /// `push(["name", ...args])`
    pub fn push_call(&mut self, name: &str, args: Vec<Value>) -> Result<DispatchOutcome> {
        self.registry.dispatch(name, &args)
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TrackerRegistry {
        &mut self.registry
    }

    pub fn into_registry(self) -> TrackerRegistry {
        self.registry
    }
}

// ============================================================================
// THREAD-CONFINED GLOBAL
// ============================================================================

/// Drop-in global queue for hosts that expect one, confined to the current
/// thread. Pushes before `install` are buffered.
pub mod global {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static PENDING: RefCell<CommandBuffer> = RefCell::new(CommandBuffer::new());
        static QUEUE: RefCell<Option<CommandQueue>> = RefCell::new(None);
    }

    fn take_pending() -> CommandBuffer {
        PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()))
    }

    fn take_queue() -> Option<CommandQueue> {
        QUEUE.with(|slot| slot.borrow_mut().take())
    }

    fn restore_queue(queue: CommandQueue) {
        QUEUE.with(|slot| *slot.borrow_mut() = Some(queue));
    }

    /// Run everything pushed while the queue was out of its slot, including
    /// commands those commands push in turn
    fn drain_nested(queue: &mut CommandQueue) {
        loop {
            let mut nested = take_pending();
            if nested.is_empty() {
                return;
            }
            for command in nested.drain() {
                if let Err(e) = run(queue, command) {
                    tracing::warn!(error = %e, "nested usage tracking command failed");
                }
            }
        }
    }

    /// Dispatch `command`, then whatever it pushed while running
    fn run(queue: &mut CommandQueue, command: Command) -> Result<DispatchOutcome> {
        let result = queue.push(command);
        drain_nested(queue);
        result
    }

    /// Dispatch now if a registry is installed, otherwise buffer.
    ///
    /// While a command runs the queue is out of its slot, so commands pushed
    /// from inside a callback are buffered and run right after it.
    pub fn push(command: Command) -> Result<Option<DispatchOutcome>> {
        let mut queue = match take_queue() {
            Some(queue) => queue,
            None => {
                PENDING.with(|pending| pending.borrow_mut().push(command));
                return Ok(None);
            }
        };

        let result = run(&mut queue, command);
        restore_queue(queue);
        result.map(Some)
    }

    /// Install `registry` and replay everything pushed so far, in push order
    pub fn install(registry: TrackerRegistry) {
        let mut buffered = take_pending();
        let mut queue = CommandQueue::attach(registry, CommandBuffer::new());

        for command in buffered.drain() {
            if let Err(e) = run(&mut queue, command) {
                tracing::warn!(error = %e, "buffered usage tracking command failed");
            }
        }

        restore_queue(queue);
    }

    /// Remove the installed registry; later pushes buffer again
    pub fn uninstall() -> Option<TrackerRegistry> {
        QUEUE.with(|slot| slot.borrow_mut().take().map(CommandQueue::into_registry))
    }

    pub fn is_installed() -> bool {
        QUEUE.with(|slot| slot.borrow().is_some())
    }

    pub fn pending() -> usize {
        PENDING.with(|pending| pending.borrow().len())
    }

    /// Run `f` against the installed registry; pushes made by `f` run after it
    pub fn with_registry<R, F>(f: F) -> Option<R>
    where
        F: FnOnce(&mut TrackerRegistry) -> R,
    {
        let mut queue = take_queue()?;
        let result = f(queue.registry_mut());
        drain_nested(&mut queue);
        restore_queue(queue);
        Some(result)
    }
}

// ============================================================================
// TESTS
// ============================================================================
