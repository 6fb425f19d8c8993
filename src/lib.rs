//! NextMove bridge: DPE send and poll strategies over Azure Service Bus
//! and Azure Blob Storage.

pub mod attachment;
pub mod azure;
pub mod config;
pub mod error;
pub mod harness;
pub mod host;
pub mod model;
pub mod plugin;
pub mod poller;
pub mod queue;
pub mod sender;
pub mod storage;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use plugin::{DpePlugin, DpeStrategy, spawn_poll_loop};
pub use poller::{PollReport, Poller};
pub use sender::{SendOutcome, Sender};
