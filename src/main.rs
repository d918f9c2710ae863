use clap::Parser as _;
use fourheat_tools::commands;
use fourheat_tools::commands::control::Command;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_ENV: &str = "FOURHEAT_TOOLS_LOG";

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Discover(commands::discover::Args),
    Read(commands::read::Args),
    /// Turn the stove on.
    On(commands::control::Args),
    /// Turn the stove off.
    Off(commands::control::Args),
    /// Clear a stove that has blocked itself after an error.
    Unblock(commands::control::Args),
    Set(commands::control::SetArgs),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description = std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string());
    let filter = match filter_description.parse::<Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("warning: ignoring {LOG_ENV}, it is not a valid log filter: {e}");
            Targets::new().with_default(LevelFilter::WARN)
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Discover(args) => end(commands::discover::run(args)),
        Commands::Read(args) => end(commands::read::run(args)),
        Commands::On(args) => end(commands::control::run(Command::On, args)),
        Commands::Off(args) => end(commands::control::run(Command::Off, args)),
        Commands::Unblock(args) => end(commands::control::run(Command::Unblock, args)),
        Commands::Set(args) => end(commands::control::set(args)),
    }
}
