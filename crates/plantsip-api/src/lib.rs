// plantsip-api: Async Rust client for the PlantSip watering appliance API

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::{PlantSipClient, normalize_host};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
