//! `water` and `set-amount`.

use plantsip_core::{Command as CoreCommand, WateringCommand};

use crate::cli::{GlobalOpts, SetAmountArgs, WaterArgs};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle_water(args: WaterArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;
    let command = WateringCommand::new(args.channel, args.amount);
    // Reject bad amounts before touching the device list.
    command.validate(loaded.core.max_water_amount_ml)?;

    let device = loaded.device(&args.device)?;
    let coordinator = loaded.coordinator(std::slice::from_ref(&device))?;
    coordinator.dispatcher().dispatch(&device.id(), command).await?;

    output::print_output(
        &format!(
            "Watering channel {} of {} with {} ml",
            args.channel,
            device.id().short(),
            args.amount
        ),
        global.quiet,
    );
    Ok(())
}

pub async fn handle_set_amount(args: SetAmountArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = util::load(global)?;
    let command = CoreCommand::SetWaterAmount {
        channel_id: args.channel,
        mode: args.mode.into(),
        amount_ml: args.amount,
    };
    WateringCommand::new(args.channel, args.amount).validate(loaded.core.max_water_amount_ml)?;

    let device = loaded.device(&args.device)?;
    let coordinator = loaded.coordinator(std::slice::from_ref(&device))?;
    coordinator.dispatcher().execute(&device.id(), command).await?;

    output::print_output(
        &format!(
            "Channel {} {} amount set to {} ml",
            args.channel,
            plantsip_core::WaterAmountMode::from(args.mode),
            args.amount
        ),
        global.quiet,
    );
    Ok(())
}
