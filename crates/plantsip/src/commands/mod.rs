//! Command dispatch: bridges CLI args to core operations and output formatting.

pub mod devices;
pub mod reauth;
pub mod setup;
pub mod status;
pub mod util;
pub mod watch;
pub mod water;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Setup(args) => setup::handle(args, global).await,
        Command::Devices(args) => devices::handle(args, global),
        Command::Reauth(args) => reauth::handle(args, global).await,
        Command::Status(args) => status::handle(args, global).await,
        Command::Water(args) => water::handle_water(args, global).await,
        Command::SetAmount(args) => water::handle_set_amount(args, global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        // Completions are handled before dispatch
        Command::Completions(_) => Ok(()),
    }
}
