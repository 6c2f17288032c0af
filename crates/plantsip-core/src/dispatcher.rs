// ── Command dispatch ──
//
// Validates and sends watering commands. A successful command marks the
// affected channel stale; the next poll brings the real numbers back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use plantsip_api::models::ChannelConfigUpdate;

use crate::coordinator::SlotMap;
use crate::error::CoreError;
use crate::model::DeviceId;
use crate::store::StatusStore;

// ── Commands ─────────────────────────────────────────────────────────

/// Water one channel once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WateringCommand {
    pub channel_id: u32,
    pub amount_ml: u32,
}

impl WateringCommand {
    pub fn new(channel_id: u32, amount_ml: u32) -> Self {
        Self {
            channel_id,
            amount_ml,
        }
    }

    pub fn validate(&self, max_amount_ml: u32) -> Result<(), CoreError> {
        validate_amount(self.amount_ml, max_amount_ml)
    }
}

/// Which configured amount a [`Command::SetWaterAmount`] writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WaterAmountMode {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Water(WateringCommand),
    SetWaterAmount {
        channel_id: u32,
        mode: WaterAmountMode,
        amount_ml: u32,
    },
}

impl Command {
    pub fn channel_id(&self) -> u32 {
        match self {
            Self::Water(cmd) => cmd.channel_id,
            Self::SetWaterAmount { channel_id, .. } => *channel_id,
        }
    }

    pub fn amount_ml(&self) -> u32 {
        match self {
            Self::Water(cmd) => cmd.amount_ml,
            Self::SetWaterAmount { amount_ml, .. } => *amount_ml,
        }
    }
}

fn validate_amount(amount_ml: u32, max_amount_ml: u32) -> Result<(), CoreError> {
    if amount_ml == 0 {
        return Err(CoreError::validation("amount_ml", "must be at least 1 ml"));
    }
    if amount_ml > max_amount_ml {
        return Err(CoreError::validation(
            "amount_ml",
            format!("must not exceed {max_amount_ml} ml"),
        ));
    }
    Ok(())
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Sends commands through the coordinator's per-device clients.
///
/// Obtained from [`PollingCoordinator::dispatcher`](crate::PollingCoordinator::dispatcher).
#[derive(Clone)]
pub struct CommandDispatcher {
    slots: Arc<SlotMap>,
    store: Arc<StatusStore>,
    max_amount_ml: u32,
}

impl CommandDispatcher {
    pub(crate) fn new(slots: Arc<SlotMap>, store: Arc<StatusStore>, max_amount_ml: u32) -> Self {
        Self {
            slots,
            store,
            max_amount_ml,
        }
    }

    pub fn max_amount_ml(&self) -> u32 {
        self.max_amount_ml
    }

    /// Trigger a manual watering run.
    pub async fn dispatch(
        &self,
        device_id: &DeviceId,
        command: WateringCommand,
    ) -> Result<(), CoreError> {
        self.execute(device_id, Command::Water(command)).await
    }

    /// Validate and send `command`, then mark the channel stale.
    ///
    /// Invalid amounts fail before the device is even looked up.
    pub async fn execute(&self, device_id: &DeviceId, command: Command) -> Result<(), CoreError> {
        validate_amount(command.amount_ml(), self.max_amount_ml)?;

        let slot = self
            .slots
            .get(device_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device_id.to_string(),
            })?;
        let client = slot.client();
        let remote_id = slot.remote_id();

        let channel_id = command.channel_id();
        debug!(device = %device_id, ?command, "dispatching command");

        let result = match command {
            Command::Water(cmd) => {
                client
                    .trigger_watering(remote_id, cmd.channel_id, cmd.amount_ml)
                    .await
            }
            Command::SetWaterAmount {
                channel_id,
                mode,
                amount_ml,
            } => {
                let update = match mode {
                    WaterAmountMode::Manual => ChannelConfigUpdate {
                        manual_water_amount: Some(amount_ml),
                        ..ChannelConfigUpdate::default()
                    },
                    WaterAmountMode::Automatic => ChannelConfigUpdate {
                        automatic_water_amount: Some(amount_ml),
                        ..ChannelConfigUpdate::default()
                    },
                };
                client.update_channel(remote_id, channel_id, &update).await
            }
        };

        if let Err(e) = result {
            let err = CoreError::from(e);
            warn!(device = %device_id, channel = channel_id, error = %err, "command failed");
            return Err(err);
        }

        self.store.mark_channel_stale(device_id, channel_id);
        info!(device = %device_id, channel = channel_id, "command accepted");
        Ok(())
    }
}
