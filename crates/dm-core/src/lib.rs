//! Device model engine: parameter tree, authorization, transactions,
//! subscriptions, and serialization.

pub mod asset;
pub mod authorizer;
pub mod command;
pub mod config;
pub mod constraint;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod events;
pub mod language;
pub mod menu;
pub mod param;
pub mod path;
pub mod registry;
pub mod scope;
pub mod serializer;
pub mod subscription;

pub use authorizer::Authorizer;
pub use device::{Device, DeviceBuilder};
pub use error::{DmResult, DmStatus, StatusCode};
pub use registry::DeviceRegistry;
pub use scope::Scope;
