//! Generated wire types and the `DeviceService` tonic service definition.
//!
//! This crate owns the `.proto` → Rust codegen step; [`dm_core`](../dm_core)
//! and the transport crates (`dm-grpc`, `dm-http`) operate directly on the
//! types re-exported here, the same way Catena's C++ SDK passes
//! protobuf-generated `catena::Value` through its `IParam`/`Device` layer
//! without a separate domain-type translation.

tonic::include_proto!("devicemodel.v1");

pub use device_service_client::DeviceServiceClient;
pub use device_service_server::{DeviceService, DeviceServiceServer};
