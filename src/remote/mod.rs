//! Client side of the remote process engine tier.

pub mod client;
pub mod error;
pub mod factory;
pub mod job;
pub mod types;

pub use client::{HttpProcessEngineClient, ProcessEngineClient};
pub use error::RemoteEngineError;
pub use factory::ProcessNextRequestFactory;
pub use job::{ProcessEngineItemStatus, ProcessEngineStatusResponse, ProcessEngineTaskStatus};
pub use types::{InstanceInformation, ProcessEngineActor, ProcessNextRequest};
