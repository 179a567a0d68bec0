//! End-to-end coverage of `DeviceModelService` driven directly through the
//! `DeviceService` trait, without standing up a real listener.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tonic::Request;

use dm_core::descriptor::ParamDescriptor;
use dm_core::device::DeviceBuilder;
use dm_core::registry::DeviceRegistry;
use dm_core::scope::Scope;
use dm_grpc::DeviceModelService;

use dm_proto::device_service_server::DeviceService;
use dm_proto::value::Kind;
use dm_proto::{
    ConnectPayload, GetValuePayload, ParamType, SetValuePayload, SingleSetValuePayload,
    SlotRequest, SlottedMultiSetValuePayload,
};

fn int32(v: i32) -> dm_proto::Value {
    dm_proto::Value {
        kind: Some(Kind::Int32Value(v)),
    }
}

fn service_with_device() -> DeviceModelService {
    let device = DeviceBuilder::new(1, Scope::Operate)
        .with_param(
            "/power",
            Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
        )
        .with_param(
            "/struct",
            Arc::new(
                ParamDescriptor::new("/struct", ParamType::Struct, Scope::Operate).with_sub_param(
                    "field",
                    Arc::new(ParamDescriptor::new("field", ParamType::Int32, Scope::Operate)),
                ),
            ),
        )
        .build();
    let registry = Arc::new(DeviceRegistry::new());
    registry.insert(1, Arc::new(device));
    DeviceModelService::new(registry, true)
}

#[tokio::test]
async fn single_set_then_get_round_trips() {
    let svc = service_with_device();
    svc.set_value(Request::new(SingleSetValuePayload {
        slot: 1,
        oid: "/power".into(),
        value: Some(int32(7)),
    }))
    .await
    .unwrap();

    let got = svc
        .get_value(Request::new(GetValuePayload {
            slot: 1,
            oid: "/power".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(got, int32(7));
}

#[tokio::test]
async fn multi_set_rejects_overlapping_oids() {
    let svc = service_with_device();
    let err = svc
        .multi_set_value(Request::new(SlottedMultiSetValuePayload {
            slot: 1,
            values: vec![
                SetValuePayload {
                    oid: "/struct".into(),
                    value: Some(int32(0)),
                },
                SetValuePayload {
                    oid: "/struct/field".into(),
                    value: Some(int32(1)),
                },
            ],
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn connect_does_not_observe_updates_to_unsubscribed_params() {
    let svc = service_with_device();
    let mut stream = svc
        .connect(Request::new(ConnectPayload {
            detail_level: 0,
            force_connection: false,
        }))
        .await
        .unwrap()
        .into_inner();

    svc.set_value(Request::new(SingleSetValuePayload {
        slot: 1,
        oid: "/power".into(),
        value: Some(int32(3)),
    }))
    .await
    .unwrap();

    let next = tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
    assert!(next.is_err(), "no subscription was registered, so no push update should arrive");
}

#[tokio::test]
async fn get_populated_slots_reports_every_registered_slot() {
    let svc = service_with_device();
    let slots = svc
        .get_populated_slots(Request::new(dm_proto::Empty {}))
        .await
        .unwrap()
        .into_inner()
        .slots;
    assert_eq!(slots, vec![1]);
}

#[tokio::test]
async fn languages_reports_empty_list_with_no_packs() {
    let svc = service_with_device();
    let list = svc
        .languages(Request::new(SlotRequest { slot: 1 }))
        .await
        .unwrap()
        .into_inner();
    assert!(list.languages.is_empty());
}
