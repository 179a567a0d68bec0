//! gRPC transport: `DeviceService` implemented over a `DeviceRegistry`.

pub mod auth;

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures_core::Stream;
use futures_util::stream::select_all;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};
use tracing::instrument;

use dm_core::device::Device;
use dm_core::error::DmStatus;
use dm_core::param::Param;
use dm_core::path::K_END;
use dm_core::registry::DeviceRegistry;
use dm_core::serializer;
use dm_core::Authorizer;

use dm_proto::{
    command_response, device_service_server::DeviceService, push_updates, CommandResponse,
    CommandResponseException, ComponentLanguagePack, ConnectPayload, DeviceComponent,
    DeviceRequestPayload, Empty, ExecuteCommandPayload, GetParamPayload, GetValuePayload,
    LanguageList, LanguagePackRequestPayload, ParamComponent, ParamInfoRequestPayload,
    ParamInfoResponse, PushUpdates, SingleSetValuePayload, SlotList, SlotRequest,
    SlottedAddLanguagePayload, SlottedMultiSetValuePayload, UpdateSubscriptionsPayload, Value,
    ValueUpdate,
};

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

pub struct DeviceModelService {
    registry: Arc<DeviceRegistry>,
    authz_disabled: bool,
}

impl DeviceModelService {
    pub fn new(registry: Arc<DeviceRegistry>, authz_disabled: bool) -> Self {
        Self {
            registry,
            authz_disabled,
        }
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<Authorizer, Status> {
        Ok(auth::authorizer_from_metadata(request, self.authz_disabled)?)
    }
}

fn device_event_stream(slot: u32, device: Arc<Device>, authz: Authorizer) -> BoxStream<PushUpdates> {
    Box::pin(stream! {
        let mut rx = device.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(dm_core::events::DeviceEvent::Shutdown) => break,
                Ok(dm_core::events::DeviceEvent::ValueSetByClient { oid, element_index, value })
                | Ok(dm_core::events::DeviceEvent::ValueSetByServer { oid, element_index, value }) => {
                    if device.should_send(&oid, &authz) {
                        yield Ok(PushUpdates {
                            slot,
                            kind: Some(push_updates::Kind::Value(ValueUpdate {
                                oid,
                                element_index: element_index.unwrap_or(K_END),
                                value: Some(value),
                            })),
                        });
                    }
                }
                Ok(dm_core::events::DeviceEvent::LanguageAdded { id }) => {
                    if let Ok(pack) = device.get_language_pack(&id) {
                        yield Ok(PushUpdates {
                            slot,
                            kind: Some(push_updates::Kind::LanguagePack(ComponentLanguagePack {
                                id,
                                language_pack: Some(pack.into()),
                            })),
                        });
                    }
                }
                Ok(dm_core::events::DeviceEvent::LanguageRemoved { .. }) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn param_info_entry(
    oid: &str,
    param: &Param,
    include_value: bool,
    authz: &Authorizer,
) -> Result<ParamInfoResponse, DmStatus> {
    let mut info = serializer::to_param_component(oid, param, authz)?;
    if !include_value {
        info.value = None;
    }
    let array_lengths = info.array_lengths.clone();
    Ok(ParamInfoResponse { info: Some(info), array_lengths })
}

#[tonic::async_trait]
impl DeviceService for DeviceModelService {
    async fn get_value(&self, request: Request<GetValuePayload>) -> Result<Response<Value>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let value = device.get_value(&payload.oid, &authz).await?;
        Ok(Response::new(value))
    }

    #[instrument(skip(self, request))]
    async fn set_value(
        &self,
        request: Request<SingleSetValuePayload>,
    ) -> Result<Response<Empty>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let value = payload
            .value
            .ok_or_else(|| DmStatus::invalid_argument("Missing value"))?;
        device.set_value(&payload.oid, value, &authz).await?;
        Ok(Response::new(Empty {}))
    }

    async fn multi_set_value(
        &self,
        request: Request<SlottedMultiSetValuePayload>,
    ) -> Result<Response<Empty>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let entries = payload
            .values
            .into_iter()
            .map(|v| {
                let value = v
                    .value
                    .ok_or_else(|| DmStatus::invalid_argument("Missing value in multi-set entry"))?;
                Ok((v.oid, value))
            })
            .collect::<Result<Vec<_>, DmStatus>>()?;
        device.commit_multi_set_value(entries, &authz).await?;
        Ok(Response::new(Empty {}))
    }

    async fn get_param(
        &self,
        request: Request<GetParamPayload>,
    ) -> Result<Response<ParamComponent>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let param = device.get_param(&payload.oid, &authz).await?;
        let component = serializer::to_param_component(&payload.oid, &param, &authz)?;
        Ok(Response::new(component))
    }

    type DeviceRequestStream = BoxStream<DeviceComponent>;

    async fn device_request(
        &self,
        request: Request<DeviceRequestPayload>,
    ) -> Result<Response<Self::DeviceRequestStream>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let detail_level = dm_proto::DetailLevel::try_from(payload.detail_level)
            .unwrap_or(dm_proto::DetailLevel::Full);
        let stream = serializer::serialize(
            device,
            detail_level,
            payload.subscribed_oids,
            payload.shallow,
            authz,
        )
        .map(|item| item.map_err(Status::from));
        Ok(Response::new(Box::pin(stream)))
    }

    type ParamInfoRequestStream = BoxStream<ParamInfoResponse>;

    async fn param_info_request(
        &self,
        request: Request<ParamInfoRequestPayload>,
    ) -> Result<Response<Self::ParamInfoRequestStream>, Status> {
        self.param_info_stream(request, true).await
    }

    type BasicParamInfoRequestStream = BoxStream<ParamInfoResponse>;

    async fn basic_param_info_request(
        &self,
        request: Request<ParamInfoRequestPayload>,
    ) -> Result<Response<Self::BasicParamInfoRequestStream>, Status> {
        self.param_info_stream(request, false).await
    }

    type ExecuteCommandStream = BoxStream<CommandResponse>;

    async fn execute_command(
        &self,
        request: Request<ExecuteCommandPayload>,
    ) -> Result<Response<Self::ExecuteCommandStream>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let command = device.get_command(&payload.oid)?.clone();
        let arg = payload.value.unwrap_or(Value { kind: None });
        let respond = payload.respond;
        let stream = stream! {
            if !respond {
                yield Ok(CommandResponse {
                    kind: Some(command_response::Kind::NoResponse(true)),
                });
                return;
            }
            match command.execute(arg, &authz) {
                Ok(value) => yield Ok(CommandResponse {
                    kind: Some(command_response::Kind::Response(value)),
                }),
                Err(status) => yield Ok(CommandResponse {
                    kind: Some(command_response::Kind::Exception(CommandResponseException {
                        r#type: format!("{:?}", status.code),
                        details: status.message,
                    })),
                }),
            }
        };
        Ok(Response::new(Box::pin(stream)))
    }

    async fn language_pack_request(
        &self,
        request: Request<LanguagePackRequestPayload>,
    ) -> Result<Response<ComponentLanguagePack>, Status> {
        self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let pack = device.get_language_pack(&payload.id)?;
        Ok(Response::new(ComponentLanguagePack {
            id: payload.id,
            language_pack: Some(pack.into()),
        }))
    }

    async fn add_language(
        &self,
        request: Request<SlottedAddLanguagePayload>,
    ) -> Result<Response<Empty>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let pack: dm_core::language::LanguagePack = payload
            .language_pack
            .ok_or_else(|| DmStatus::invalid_argument("Missing language_pack"))?
            .into();
        device.add_language(&payload.id, pack, &authz).await?;
        Ok(Response::new(Empty {}))
    }

    async fn remove_language(
        &self,
        request: Request<dm_proto::SlottedRemoveLanguagePayload>,
    ) -> Result<Response<Empty>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        device.remove_language(&payload.id, &authz).await?;
        Ok(Response::new(Empty {}))
    }

    async fn languages(
        &self,
        request: Request<SlotRequest>,
    ) -> Result<Response<LanguageList>, Status> {
        self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        Ok(Response::new(LanguageList {
            languages: device.list_languages(),
        }))
    }

    async fn get_populated_slots(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<SlotList>, Status> {
        self.authorize(&request)?;
        Ok(Response::new(SlotList {
            slots: self.registry.populated_slots(),
        }))
    }

    type UpdateSubscriptionsStream = BoxStream<ParamComponent>;

    async fn update_subscriptions(
        &self,
        request: Request<UpdateSubscriptionsPayload>,
    ) -> Result<Response<Self::UpdateSubscriptionsStream>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let snapshot = device
            .update_subscriptions(&payload.add_oids, &payload.remove_oids, &authz)
            .await?;
        let stream = stream! {
            for (oid, value) in snapshot {
                yield Ok(ParamComponent {
                    oid,
                    value: Some(value),
                    r#type: 0,
                    scope: String::new(),
                    read_only: false,
                    is_command: false,
                    max_length: 0,
                    total_length: 0,
                    array_lengths: Default::default(),
                });
            }
        };
        Ok(Response::new(Box::pin(stream)))
    }

    type ConnectStream = BoxStream<PushUpdates>;

    async fn connect(
        &self,
        request: Request<ConnectPayload>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let authz = self.authorize(&request)?;
        let devices = self.registry.as_map();
        let streams: Vec<BoxStream<PushUpdates>> = devices
            .into_iter()
            .map(|(slot, device)| device_event_stream(slot, device, authz.clone()))
            .collect();
        Ok(Response::new(Box::pin(select_all(streams))))
    }
}

impl DeviceModelService {
    async fn param_info_stream(
        &self,
        request: Request<ParamInfoRequestPayload>,
        include_value: bool,
    ) -> Result<Response<BoxStream<ParamInfoResponse>>, Status> {
        let authz = self.authorize(&request)?;
        let payload = request.into_inner();
        let device = self.registry.get(payload.slot)?;
        let prefix = payload.oid_prefix;
        let recursive = payload.recursive;
        let mut entries = Vec::new();
        for (oid, param) in device.params() {
            let matches = if prefix.is_empty() {
                true
            } else if recursive {
                oid == &prefix || oid.starts_with(&format!("{prefix}/"))
            } else {
                oid == &prefix
            };
            if !matches || !authz.read_authz(param) {
                continue;
            }
            entries.push(param_info_entry(oid, param, include_value, &authz).map_err(Status::from)?);
        }
        let stream = stream! {
            for entry in entries {
                yield Ok(entry);
            }
        };
        Ok(Response::new(Box::pin(stream)))
    }
}
