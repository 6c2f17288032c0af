// ── Domain model ──
//
// Canonical types handed to consumers (CLI, config registry). Wire types
// from plantsip-api are converted into these in `crate::convert`.

pub mod device;
pub mod status;

pub use device::{Credentials, Device, DeviceId, RemoteDevice};
pub use status::{ChannelReading, DeviceStatus};
