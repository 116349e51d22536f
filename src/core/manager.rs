//! Channel registry and operator command dispatch
//!
//! [`ChannelManager`] owns every configured channel by name and opens or
//! closes them as a group. [`CommandRegistry`] maps operator-facing
//! command names to typed async handlers, built explicitly at startup —
//! unknown names and malformed arguments surface as errors to the caller
//! rather than being swallowed.

use crate::core::channel::Channel;
use crate::core::transport::TransportError;
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Command dispatch failure, returned to the immediate caller
#[derive(Error, Debug)]
pub enum CommandError {
    /// No handler registered under this name
    #[error("unknown command: {0}")]
    Unknown(String),
    /// Handler rejected the argument list
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArgs {
        /// Command that rejected the arguments
        command: String,
        /// What was wrong with them
        reason: String,
    },
    /// Handler ran and the device operation failed
    #[error("{0}")]
    Failed(String),
}

/// Result of one dispatched command: a rendered reply string
pub type CommandResult = Result<String, CommandError>;

type CommandHandler = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Explicit name → handler table for operator commands.
///
/// Lookup is case-insensitive.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous one
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.handlers.insert(
            name.to_lowercase(),
            Arc::new(move |args| Box::pin(handler(args))),
        );
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a command by name
    pub async fn invoke(&self, name: &str, args: Vec<String>) -> CommandResult {
        match self.handlers.get(&name.to_lowercase()) {
            Some(handler) => handler(args).await,
            None => Err(CommandError::Unknown(name.to_string())),
        }
    }
}

/// Parse one positional argument for a command handler
pub fn parse_arg<T: std::str::FromStr>(
    command: &str,
    args: &[String],
    index: usize,
) -> Result<T, CommandError> {
    let raw = args.get(index).ok_or_else(|| CommandError::InvalidArgs {
        command: command.to_string(),
        reason: format!("missing argument {index}"),
    })?;
    raw.parse().map_err(|_| CommandError::InvalidArgs {
        command: command.to_string(),
        reason: format!("cannot parse argument {index}: {raw:?}"),
    })
}

/// Named collection of channels plus the command table operating on them
#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Channel>,
    registry: CommandRegistry,
}

impl ChannelManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel, keyed by its configured name (case-insensitive)
    pub fn insert(&mut self, channel: Channel) {
        self.channels
            .insert(channel.name().to_lowercase(), channel);
    }

    /// Look up a channel by name
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&name.to_lowercase())
    }

    /// Iterate over all channels
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Open every channel concurrently; returns per-channel outcomes
    pub async fn open_all(&self) -> Vec<(String, Result<(), TransportError>)> {
        join_all(self.channels.values().map(|ch| async move {
            let name = ch.name().to_string();
            (name, ch.open().await)
        }))
        .await
    }

    /// Close every channel concurrently
    pub async fn close_all(&self) {
        join_all(self.channels.values().map(Channel::close)).await;
    }

    /// The command table
    pub fn commands(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Mutable access for startup registration
    pub fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Dispatch an operator command
    pub async fn invoke(&self, name: &str, args: Vec<String>) -> CommandResult {
        self.registry.invoke(name, args).await
    }
}
