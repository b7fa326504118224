use crate::cli::Commands;
use anyhow::Result;

pub mod inspect;
pub mod run;

/// Dispatch command to appropriate handler
pub fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run::execute(args),
        Commands::Inspect { pid } => inspect::execute(pid),
    }
}
