// 🧾 Commands - what callers queue for every tracker
// A command either names a tracker operation or carries a callback

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::tracker::AnonymizingTracker;

// ============================================================================
// OPERATION
// ============================================================================

/// Tracker operations addressable by name from the command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetSiteId,
    GetSiteId,
    GetTrackerUrl,
    SetCustomVariable,
    GetCustomVariable,
    DeleteCustomVariable,
    SetCustomData,
    GetCustomData,
    SetCustomUrl,
    SetReferrerUrl,
    SetDocumentTitle,
    GetRequest,
    TrackPageView,
    TrackEvent,
}

impl Operation {
    pub const ALL: [Operation; 14] = [
        Operation::SetSiteId,
        Operation::GetSiteId,
        Operation::GetTrackerUrl,
        Operation::SetCustomVariable,
        Operation::GetCustomVariable,
        Operation::DeleteCustomVariable,
        Operation::SetCustomData,
        Operation::GetCustomData,
        Operation::SetCustomUrl,
        Operation::SetReferrerUrl,
        Operation::SetDocumentTitle,
        Operation::GetRequest,
        Operation::TrackPageView,
        Operation::TrackEvent,
    ];

    /// Name used in queued commands
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetSiteId => "setSiteId",
            Operation::GetSiteId => "getSiteId",
            Operation::GetTrackerUrl => "getTrackerUrl",
            Operation::SetCustomVariable => "setCustomVariable",
            Operation::GetCustomVariable => "getCustomVariable",
            Operation::DeleteCustomVariable => "deleteCustomVariable",
            Operation::SetCustomData => "setCustomData",
            Operation::GetCustomData => "getCustomData",
            Operation::SetCustomUrl => "setCustomUrl",
            Operation::SetReferrerUrl => "setReferrerUrl",
            Operation::SetDocumentTitle => "setDocumentTitle",
            Operation::GetRequest => "getRequest",
            Operation::TrackPageView => "trackPageView",
            Operation::TrackEvent => "trackEvent",
        }
    }

    /// Core operations every tracker handles; the rest depend on the client
    pub fn is_core(&self) -> bool {
        !matches!(
            self,
            Operation::DeleteCustomVariable
                | Operation::SetCustomUrl
                | Operation::SetReferrerUrl
                | Operation::SetDocumentTitle
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == name)
            .ok_or_else(|| format!("Unknown tracker operation: {}", name))
    }
}

// ============================================================================
// COMMAND
// ============================================================================

/// Callback run once per tracker, with that tracker as receiver
pub type TrackerCallback = Box<dyn FnMut(&mut AnonymizingTracker) -> anyhow::Result<()> + Send>;

pub enum Command {
    /// `[operationName, ...args]`
    Call { name: String, args: Vec<Value> },

    /// `[callback]`
    Invoke(TrackerCallback),
}

impl Command {
    pub fn call(name: impl Into<String>, args: Vec<Value>) -> Self {
        Command::Call {
            name: name.into(),
            args,
        }
    }

    pub fn invoke<F>(callback: F) -> Self
    where
        F: FnMut(&mut AnonymizingTracker) -> anyhow::Result<()> + Send + 'static,
    {
        Command::Invoke(Box::new(callback))
    }

    /// Build a command from the array form `[name, ...args]`
    pub fn from_json(entry: &Value) -> Option<Self> {
        let items = entry.as_array()?;
        let (name, args) = items.split_first()?;
        Some(Command::call(name.as_str()?, args.to_vec()))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Call { name, args } => f
                .debug_struct("Call")
                .field("name", name)
                .field("args", args)
                .finish(),
            Command::Invoke(_) => f.write_str("Invoke(<callback>)"),
        }
    }
}

// ============================================================================
// COMMAND BUFFER
// ============================================================================

/// Append-only buffer filled before any registry is attached
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer { commands: Vec::new() }
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Hand over the buffered commands in push order
    pub fn drain(&mut self) -> std::vec::Drain<'_, Command> {
        self.commands.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>(), Ok(op));
        }
        assert!("setNotExisTiNGmeThod".parse::<Operation>().is_err());
    }

    #[test]
    fn test_optional_operations() {
        assert!(Operation::SetCustomData.is_core());
        assert!(Operation::GetRequest.is_core());
        assert!(!Operation::SetCustomUrl.is_core());
        assert!(!Operation::DeleteCustomVariable.is_core());
    }

    #[test]
    fn test_command_from_json() {
        let command = Command::from_json(&json!(["setCustomData", "mykey", "myvalue"])).unwrap();
        match command {
            Command::Call { name, args } => {
                assert_eq!(name, "setCustomData");
                assert_eq!(args, vec![json!("mykey"), json!("myvalue")]);
            }
            Command::Invoke(_) => panic!("expected a named call"),
        }

        assert!(Command::from_json(&json!([])).is_none());
        assert!(Command::from_json(&json!([42])).is_none());
        assert!(Command::from_json(&json!("getSiteId")).is_none());
    }

    #[test]
    fn test_buffer_drains_in_order() {
        let mut buffer = CommandBuffer::new();
        buffer.push(Command::call("a", vec![]));
        buffer.push(Command::invoke(|_| Ok(())));
        buffer.push(Command::call("b", vec![]));
        assert_eq!(buffer.len(), 3);

        let drained: Vec<String> = buffer
            .drain()
            .map(|c| match c {
                Command::Call { name, .. } => name,
                Command::Invoke(_) => "callback".to_string(),
            })
            .collect();

        assert_eq!(drained, vec!["a", "callback", "b"]);
        assert!(buffer.is_empty());
    }
}
