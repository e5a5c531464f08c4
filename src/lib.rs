//! Coordinator for chains of serial-attached Braille solenoid modules.
//!
//! Text is spread over every module of every live controller, one
//! character per module, one module energized at a time.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod monitor;
pub mod sequencer;
pub mod serial;
pub mod sim;

pub use config::{ConfigError, CoordinatorConfig, EndpointConfig};
pub use coordinator::Coordinator;
pub use device::{DeviceError, Endpoint, ModuleSlot, SystemStatus};
pub use sequencer::{CancelToken, CharOutcome, JobResult, ProgressEvent};
