use crate::output::Row;
use crate::registers::{Marker, RegisterId, Unit};
use crate::store::Snapshot;

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

/// One register of a stove read-out.
#[derive(serde::Serialize)]
pub struct ReadingRecord {
    pub register: RegisterId,
    pub name: &'static str,
    pub value: i64,
    pub text: String,
    pub unit: Unit,
    pub marker: Marker,
    /// `false` when the stove did not answer and this is the last known value.
    pub fresh: bool,
    pub updated_at: Option<jiff::Timestamp>,
}

impl ReadingRecord {
    pub fn from_snapshot(snapshot: &Snapshot, fresh: bool) -> impl Iterator<Item = Self> + '_ {
        snapshot.iter().map(move |(register, entry)| ReadingRecord {
            register,
            name: register.name(),
            value: entry.value,
            text: crate::registers::describe(register, entry.value),
            unit: register.unit(),
            marker: entry.marker,
            fresh,
            updated_at: snapshot.updated_at(),
        })
    }
}

impl Row for ReadingRecord {
    const HEADERS: &'static [&'static str] =
        &["Register", "Name", "Value", "Text", "Unit", "Marker", "Fresh", "Updated"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.register.to_string(),
            self.name.to_string(),
            self.value.to_string(),
            self.text.clone(),
            self.unit.to_string(),
            self.marker.to_string(),
            if self.fresh { "yes".to_string() } else { "stale".to_string() },
            self.updated_at.map(|t| t.to_string()).unwrap_or_default(),
        ]
    }
}

pub mod registers {
    use crate::output::{self, Row};
    use crate::registers::{CATALOG, RegisterId, RegisterInfo, Unit};

    /// Search and output known stove registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list registers whose id, name or value names contain this text.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the registers")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub register: RegisterId,
        pub name: &'static str,
        pub unit: Unit,
        pub values: Vec<(i64, &'static str)>,
    }

    impl RegisterSchema {
        pub fn new(info: &'static RegisterInfo) -> Self {
            RegisterSchema {
                register: info.id,
                name: info.name.unwrap_or(""),
                unit: info.unit,
                values: info.names.map(|n| n.entries().to_vec()).unwrap_or_default(),
            }
        }

        pub fn all_registers() -> impl Iterator<Item = Self> {
            CATALOG.iter().map(Self::new)
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_lowercase();
            self.register.as_str().contains(&pattern)
                || self.name.to_lowercase().contains(&pattern)
                || self.values.iter().any(|(_, name)| name.to_lowercase().contains(&pattern))
        }
    }

    impl Row for RegisterSchema {
        const HEADERS: &'static [&'static str] = &["Register", "Name", "Unit", "Values"];

        fn cells(&self) -> Vec<String> {
            let values = self
                .values
                .iter()
                .map(|(value, name)| format!("{value}: {name}"))
                .collect::<Vec<_>>()
                .join(", ");
            vec![self.register.to_string(), self.name.to_string(), self.unit.to_string(), values]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output::<RegisterSchema>()?;
        for register in RegisterSchema::all_registers() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.row(&register)?;
        }
        Ok(output.commit()?)
    }

}

pub mod discover {
    use crate::connection::{self, Connection};
    use crate::engine::{self, PollingEngine};
    use crate::output::{self, Row};
    use crate::registers::{RegisterId, Unit};
    use std::sync::Arc;

    /// List the registers a stove reports when queried.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        engine: engine::Args,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("the stove did not report any registers")]
        NothingDiscovered,
        #[error("could not output the discovered registers")]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct DiscoveredRegister {
        pub register: RegisterId,
        pub name: &'static str,
        pub unit: Unit,
        pub known: bool,
    }

    impl Row for DiscoveredRegister {
        const HEADERS: &'static [&'static str] = &["Register", "Name", "Unit", "Known"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.register.to_string(),
                self.name.to_string(),
                self.unit.to_string(),
                if self.known { "yes".to_string() } else { "no".to_string() },
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let connection = Arc::new(Connection::new(args.connection));
        let engine = PollingEngine::new(connection, &args.engine);
        let registers = runtime_block_on(engine.discover())?;
        if registers.is_empty() {
            return Err(Error::NothingDiscovered);
        }
        let mut output = args.output.to_output::<DiscoveredRegister>()?;
        for register in registers {
            output.row(&DiscoveredRegister {
                register,
                name: register.name(),
                unit: register.unit(),
                known: register.info().is_some(),
            })?;
        }
        Ok(output.commit()?)
    }

    fn runtime_block_on<F: Future>(future: F) -> Result<F::Output, Error> {
        Ok(super::runtime().map_err(Error::Runtime)?.block_on(future))
    }
}

pub mod read {
    use super::ReadingRecord;
    use crate::connection::{self, Connection};
    use crate::engine::{self, PollOutcome};
    use crate::output::{self, Output};
    use crate::stove::{self, Stove};
    use futures::StreamExt as _;
    use tracing::warn;

    /// Read the registers of a stove, once or periodically.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        stove: stove::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Keep polling the stove with this period, printing every read-out.
        #[arg(long, value_name = "PERIOD", num_args = 0..=1, default_missing_value = "60s")]
        watch: Option<humantime::Duration>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not read the stove")]
        Poll(#[from] engine::Error),
        #[error("could not output the readings")]
        Output(#[from] output::Error),
    }

    fn print(
        output: &mut Output<ReadingRecord>,
        stove: &Stove<Connection>,
        outcome: &PollOutcome,
    ) -> Result<(), Error> {
        let snapshot = outcome.snapshot().select(stove.monitored());
        for record in ReadingRecord::from_snapshot(&snapshot, outcome.is_success()) {
            output.row(&record)?;
        }
        Ok(output.flush()?)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let stove = Stove::new(Connection::new(args.connection), &args.stove);
        let mut output = args.output.to_output::<ReadingRecord>()?;
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let watch = args.watch.map(|period| *period);
        runtime.block_on(async {
            let Some(period) = watch else {
                let outcome = stove.poll().await?;
                return print(&mut output, &stove, &outcome);
            };
            let mut outcomes = std::pin::pin!(stove.watch(period));
            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    Ok(outcome) => print(&mut output, &stove, &outcome)?,
                    Err(e) => warn!(
                        message = "nothing to report yet",
                        error = (&e as &dyn std::error::Error)
                    ),
                }
            }
            Ok::<_, Error>(())
        })?;
        Ok(output.commit()?)
    }
}

pub mod control {
    use crate::connection::{self, Connection};
    use crate::dispatch::Delivery;
    use crate::engine;
    use crate::registers::RegisterId;
    use crate::stove::{self, Rejection, Stove};
    use tracing::info;

    /// Send a command to a stove.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        stove: stove::Args,
    }

    /// Write a value to a settable register of a stove.
    #[derive(clap::Parser)]
    pub struct SetArgs {
        #[clap(flatten)]
        control: Args,
        register: RegisterId,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
    #[strum(serialize_all = "kebab-case")]
    pub enum Command {
        On,
        Off,
        Unblock,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not read the stove before writing to it")]
        Poll(#[source] engine::Error),
        #[error("the write was refused")]
        Rejected(#[source] Rejection),
        #[error("the `{0}` command was not delivered to the stove")]
        Undelivered(&'static str),
    }

    fn delivered(command: &'static str, delivery: Delivery) -> Result<(), Error> {
        match delivery {
            Delivery::Delivered => {
                info!(command, "command delivered");
                Ok(())
            }
            Delivery::Undelivered => Err(Error::Undelivered(command)),
            Delivery::Unsupported => {
                info!(command, "the legacy command set has no such command, nothing was sent");
                Ok(())
            }
        }
    }

    pub fn run(command: Command, args: Args) -> Result<(), Error> {
        let stove = Stove::new(Connection::new(args.connection), &args.stove);
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let delivery = runtime.block_on(async {
            match command {
                Command::On => stove.turn_on().await,
                Command::Off => stove.turn_off().await,
                Command::Unblock => stove.unblock().await,
            }
        });
        delivered(command.into(), delivery)
    }

    pub fn set(args: SetArgs) -> Result<(), Error> {
        let stove = Stove::new(Connection::new(args.control.connection), &args.control.stove);
        let runtime = super::runtime().map_err(Error::Runtime)?;
        let delivery = runtime.block_on(async {
            // The marker that says whether a register is writable only comes with a read-out.
            stove.poll().await.map_err(Error::Poll)?;
            stove.set_value(args.register, args.value).await.map_err(Error::Rejected)
        })?;
        delivered("set", delivery)
    }

}
