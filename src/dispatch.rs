use crate::connection::Transport;
use crate::protocol::Request;
use crate::registers::{ERROR_REGISTER, RegisterId, STATE_REGISTER};
use std::sync::Arc;
use tracing::{debug, warn};

/// The commands a stove controller understands, fixed by its firmware generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSet {
    /// Explicit on, off and unblock commands, with the error register exposed as a switch.
    Full,
    /// Older firmware: on and off only.
    Legacy,
}

impl CommandSet {
    pub fn new(legacy: bool) -> Self {
        if legacy { CommandSet::Legacy } else { CommandSet::Full }
    }

    pub fn turn_on(&self) -> Request {
        match self {
            CommandSet::Full => Request::TurnOn,
            CommandSet::Legacy => Request::LegacySwitch { off: false },
        }
    }

    pub fn turn_off(&self) -> Request {
        match self {
            CommandSet::Full => Request::TurnOff,
            CommandSet::Legacy => Request::LegacySwitch { off: true },
        }
    }

    pub fn unblock(&self) -> Option<Request> {
        match self {
            CommandSet::Full => Some(Request::Unblock),
            CommandSet::Legacy => None,
        }
    }

    /// Registers that double as on/off toggles.
    pub fn switch_registers(&self) -> &'static [RegisterId] {
        match self {
            CommandSet::Full => &[STATE_REGISTER, ERROR_REGISTER],
            CommandSet::Legacy => &[STATE_REGISTER],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    /// The stove acknowledged the command with a response.
    Delivered,
    /// The command could not be delivered. It is not retried.
    Undelivered,
    /// The command set has no such command, nothing was sent.
    Unsupported,
}

/// Sends commands to the stove, exactly once each.
///
/// Repeating a command a stove may already have acted upon is not safe, so failed deliveries are
/// only logged. Nothing here refreshes the register readings, that is up to the caller.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    commands: CommandSet,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, commands: CommandSet) -> Self {
        Self { transport, commands }
    }

    pub fn commands(&self) -> CommandSet {
        self.commands
    }

    pub async fn turn_on(&self) -> Delivery {
        self.deliver(self.commands.turn_on()).await
    }

    pub async fn turn_off(&self) -> Delivery {
        self.deliver(self.commands.turn_off()).await
    }

    pub async fn unblock(&self) -> Delivery {
        match self.commands.unblock() {
            Some(request) => self.deliver(request).await,
            None => {
                debug!("the legacy command set has no unblock command");
                Delivery::Unsupported
            }
        }
    }

    /// Write a register. The caller is responsible for checking that the register is settable.
    pub async fn set_value(&self, register: RegisterId, value: i64) -> Delivery {
        self.deliver(Request::SetValue { register, value }).await
    }

    async fn deliver(&self, request: Request) -> Delivery {
        debug!(?request, "sending a command");
        match self.transport.send(&request).await {
            Ok(response) => {
                debug!(?request, response = ?response.fields, "command delivered");
                Delivery::Delivered
            }
            Err(e) => {
                warn!(
                    message = "command was not delivered",
                    ?request,
                    error = (&e as &dyn std::error::Error)
                );
                Delivery::Undelivered
            }
        }
    }
}
