use crate::connection::Transport;
use crate::dispatch::{CommandSet, Delivery, Dispatcher};
use crate::engine::{self, PollOutcome, PollState, PollingEngine};
use crate::protocol::SETTABLE_VALUES;
use crate::registers::{self, ERROR_REGISTER, Marker, RegisterId, STATE_REGISTER};
use crate::store::Snapshot;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(clap::Parser, Clone, Debug, Default)]
#[group(id = "stove::Args")]
pub struct Args {
    #[clap(flatten)]
    pub engine: engine::Args,

    /// Use the reduced command set of older controller firmware, which has no unblock command.
    #[arg(long)]
    pub legacy: bool,

    /// Do not poll the stove right after sending it a command.
    #[arg(long)]
    pub no_refresh: bool,

    /// Register to report on. May be given multiple times, defaults to every register.
    #[arg(long = "monitor", value_name = "REGISTER")]
    pub monitored: Vec<RegisterId>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("register {0} has not been read from the stove yet")]
    UnknownRegister(RegisterId),
    #[error("register {register} is not settable (marker `{marker}`)")]
    NotSettable { register: RegisterId, marker: Marker },
    #[error("register {0} is not a switch")]
    NotASwitch(RegisterId),
    #[error("value {value} for register {register} does not fit a command item")]
    ValueOutOfRange { register: RegisterId, value: i64 },
}

/// A single stove: its readings and the commands that can be sent to it.
pub struct Stove<T> {
    engine: PollingEngine<T>,
    dispatcher: Dispatcher<T>,
    refresh_after_command: bool,
    monitored: Vec<RegisterId>,
}

impl<T: Transport> Stove<T> {
    pub fn new(transport: T, args: &Args) -> Self {
        let transport = Arc::new(transport);
        Self {
            engine: PollingEngine::new(Arc::clone(&transport), &args.engine),
            dispatcher: Dispatcher::new(transport, CommandSet::new(args.legacy)),
            refresh_after_command: !args.no_refresh,
            monitored: args.monitored.clone(),
        }
    }

    pub async fn poll(&self) -> Result<PollOutcome, engine::Error> {
        self.engine.poll().await
    }

    pub fn watch(
        &self,
        period: Duration,
    ) -> impl Stream<Item = Result<PollOutcome, engine::Error>> + '_ {
        self.engine.watch(period)
    }

    pub async fn discover(&self) -> Vec<RegisterId> {
        self.engine.discover().await
    }

    pub fn state(&self) -> PollState {
        self.engine.state()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.engine.snapshot()
    }

    pub fn monitored(&self) -> &[RegisterId] {
        &self.monitored
    }

    pub fn monitored_snapshot(&self) -> Snapshot {
        self.snapshot().select(&self.monitored)
    }

    pub fn switch_registers(&self) -> &'static [RegisterId] {
        self.dispatcher.commands().switch_registers()
    }

    /// The on/off state of a switch register, if it is one and it has been read.
    pub fn switch_state(&self, register: RegisterId) -> Option<bool> {
        if !self.switch_registers().contains(&register) {
            return None;
        }
        let entry = self.engine.entry(register)?;
        registers::switch_state(register, entry.value)
    }

    pub async fn turn_on(&self) -> Delivery {
        let delivery = self.dispatcher.turn_on().await;
        self.after_command(delivery).await
    }

    pub async fn turn_off(&self) -> Delivery {
        let delivery = self.dispatcher.turn_off().await;
        self.after_command(delivery).await
    }

    /// Clear a blocked stove. Does nothing at all with the legacy command set.
    pub async fn unblock(&self) -> Delivery {
        let delivery = self.dispatcher.unblock().await;
        self.after_command(delivery).await
    }

    /// Write a register that the stove reported as settable.
    pub async fn set_value(&self, register: RegisterId, value: i64) -> Result<Delivery, Rejection> {
        let entry = self.engine.entry(register).ok_or(Rejection::UnknownRegister(register))?;
        if !entry.marker.is_settable() {
            return Err(Rejection::NotSettable { register, marker: entry.marker });
        }
        if !SETTABLE_VALUES.contains(&value) {
            return Err(Rejection::ValueOutOfRange { register, value });
        }
        info!(%register, value, "setting a register");
        let delivery = self.dispatcher.set_value(register, value).await;
        Ok(self.after_command(delivery).await)
    }

    /// Flip a switch register.
    ///
    /// The state register turns the stove on and off. Switching the error register off unblocks
    /// the stove; it cannot be switched on.
    pub async fn set_switch(&self, register: RegisterId, on: bool) -> Result<Delivery, Rejection> {
        if !self.switch_registers().contains(&register) {
            return Err(Rejection::NotASwitch(register));
        }
        Ok(match (register, on) {
            (STATE_REGISTER, true) => self.turn_on().await,
            (STATE_REGISTER, false) => self.turn_off().await,
            (ERROR_REGISTER, false) => self.unblock().await,
            _ => Delivery::Unsupported,
        })
    }

    async fn after_command(&self, delivery: Delivery) -> Delivery {
        if delivery == Delivery::Unsupported || !self.refresh_after_command {
            return delivery;
        }
        if let Err(e) = self.engine.poll().await {
            warn!(
                message = "could not refresh after a command",
                error = (&e as &dyn std::error::Error)
            );
        }
        delivery
    }
}
