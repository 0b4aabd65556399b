//! External control of a running engine.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::core::variable_pool::Selector;

#[derive(Debug, Clone)]
pub enum Command {
    /// Stop dispatching, cancel in-flight nodes and end the run as aborted.
    Abort { reason: Option<String> },
    /// Let in-flight nodes finish, then pause with a snapshot.
    Pause { reason: Option<String> },
    /// Write values into the variable pool.
    UpdateVariables { variables: Vec<(Selector, Value)> },
}

/// Source of commands the engine polls between dispatches.
pub trait CommandChannel: Send {
    /// Next pending command, without waiting.
    fn try_recv(&mut self) -> Option<Command>;

    /// Every pending command, in arrival order.
    fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Some(command) = self.try_recv() {
            commands.push(command);
        }
        commands
    }
}

/// Cloneable handle for sending commands to one run.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Returns false once the run has finished.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.send(Command::Abort {
            reason: Some(reason.into()),
        })
    }

    pub fn pause(&self) -> bool {
        self.send(Command::Pause { reason: None })
    }

    pub fn update_variables(&self, variables: HashMap<Selector, Value>) -> bool {
        self.send(Command::UpdateVariables {
            variables: variables.into_iter().collect(),
        })
    }
}

pub struct InMemoryCommandChannel {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl InMemoryCommandChannel {
    pub fn new() -> (CommandSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSender { tx }, Self { rx })
    }
}

impl CommandChannel for InMemoryCommandChannel {
    fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}
