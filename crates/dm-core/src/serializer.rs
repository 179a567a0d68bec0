//! Lazy, filtered enumeration of a device's components.
//!
//! `DeviceRequest` (gRPC) and its HTTP/SSE counterpart both drive this
//! producer rather than building a full response in memory: a device with
//! thousands of params streams its components one at a time, and a
//! `shallow` request short-circuits after the header without touching a
//! single param.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures_core::Stream;

use dm_proto::{device_component, DetailLevel, DeviceComponent, ParamComponent};

use crate::authorizer::{Authorizable, Authorizer};
use crate::device::Device;
use crate::error::DmResult;
use crate::subscription::SubscriptionSet;

/// Reads `param`'s current value and metadata into wire form. Shared by the
/// device serializer and by `GetParam`/`UpdateSubscriptions` responders.
pub fn to_param_component(oid: &str, param: &crate::param::Param, authz: &Authorizer) -> DmResult<ParamComponent> {
    let value = param.get_value(authz)?;
    let array_length = param.array_length(authz)?;
    let mut array_lengths = HashMap::new();
    if let Some(len) = array_length {
        array_lengths.insert(oid.to_string(), len);
    }
    Ok(ParamComponent {
        oid: oid.to_string(),
        value: Some(value),
        r#type: param.descriptor.kind as i32,
        scope: param.descriptor.scope.to_string(),
        read_only: param.descriptor.read_only,
        is_command: param.descriptor.is_command,
        max_length: param.descriptor.max_length.unwrap_or(0),
        total_length: param.descriptor.total_length.unwrap_or(0),
        array_lengths,
    })
}

/// Streams `device`'s components filtered by `detail_level` and (for
/// `Subscriptions`) `subscribed_oids`. `shallow` emits only the header.
pub fn serialize(
    device: Arc<Device>,
    detail_level: DetailLevel,
    subscribed_oids: Vec<String>,
    shallow: bool,
    authz: Authorizer,
) -> impl Stream<Item = DmResult<DeviceComponent>> {
    stream! {
        let mut subs = SubscriptionSet::new();
        for oid in &subscribed_oids {
            subs.add(oid);
        }

        yield Ok(DeviceComponent {
            kind: Some(device_component::Kind::Device(
                device.header(detail_level, subscribed_oids.clone()),
            )),
        });

        if shallow || matches!(detail_level, DetailLevel::None) {
            return;
        }

        if matches!(detail_level, DetailLevel::Commands) {
            for (oid, command) in device.commands() {
                if !authz.read_authz(command) {
                    continue;
                }
                yield Ok(DeviceComponent {
                    kind: Some(device_component::Kind::Command(ParamComponent {
                        oid: oid.clone(),
                        value: None,
                        r#type: command.descriptor.kind as i32,
                        scope: command.descriptor.scope.to_string(),
                        read_only: command.descriptor.read_only,
                        is_command: true,
                        max_length: 0,
                        total_length: 0,
                        array_lengths: HashMap::new(),
                    })),
                });
            }
            return;
        }

        if matches!(detail_level, DetailLevel::Full) {
            for (id, pack) in device.language_packs() {
                yield Ok(DeviceComponent {
                    kind: Some(device_component::Kind::LanguagePack(
                        dm_proto::ComponentLanguagePack {
                            id,
                            language_pack: Some(pack.into()),
                        },
                    )),
                });
            }
            for (oid, constraint) in device.shared_constraints() {
                let _ = constraint;
                yield Ok(DeviceComponent {
                    kind: Some(device_component::Kind::SharedConstraint(
                        dm_proto::SharedConstraintComponent {
                            oid: oid.clone(),
                            kind: format!("{constraint:?}"),
                        },
                    )),
                });
            }
        }

        for (oid, param) in device.params() {
            if matches!(detail_level, DetailLevel::Minimal) && !param.descriptor.minimal_set {
                continue;
            }
            if matches!(detail_level, DetailLevel::Subscriptions)
                && (param.descriptor.minimal_set || !subs.is_subscribed(oid))
            {
                continue;
            }
            if !authz.read_authz(param) {
                continue;
            }
            match to_param_component(oid, param, &authz) {
                Ok(component) => {
                    yield Ok(DeviceComponent {
                        kind: Some(device_component::Kind::Param(component)),
                    });
                }
                Err(err) => yield Err(err),
            }
        }

        if matches!(detail_level, DetailLevel::Full) {
            for (oid, command) in device.commands() {
                if !authz.read_authz(command) {
                    continue;
                }
                yield Ok(DeviceComponent {
                    kind: Some(device_component::Kind::Command(ParamComponent {
                        oid: oid.clone(),
                        value: None,
                        r#type: command.descriptor.kind as i32,
                        scope: command.descriptor.scope.to_string(),
                        read_only: command.descriptor.read_only,
                        is_command: true,
                        max_length: 0,
                        total_length: 0,
                        array_lengths: HashMap::new(),
                    })),
                });
            }
            for (id, group) in device.menus() {
                let _ = id;
                let menus = group
                    .menus
                    .iter()
                    .map(|(key, menu)| {
                        (
                            key.clone(),
                            dm_proto::MenuEntry {
                                name: menu.name.clone(),
                                param_oids: menu.param_oids.clone(),
                                hidden: menu.hidden,
                            },
                        )
                    })
                    .collect();
                yield Ok(DeviceComponent {
                    kind: Some(device_component::Kind::Menu(dm_proto::MenuGroupComponent {
                        id: group.id.clone(),
                        name: group.name.clone(),
                        menus,
                    })),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ParamDescriptor;
    use crate::device::DeviceBuilder;
    use crate::scope::Scope;
    use dm_proto::ParamType;
    use tokio_stream::StreamExt;

    fn sample_device() -> Arc<Device> {
        Arc::new(
            DeviceBuilder::new(0, Scope::Operate)
                .with_param(
                    "/power",
                    Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
                )
                .build(),
        )
    }

    #[tokio::test]
    async fn shallow_request_yields_only_the_header() {
        let device = sample_device();
        let authz = Authorizer::disabled();
        let stream = serialize(device, DetailLevel::Full, vec![], true, authz);
        let components: Vec<_> = stream.collect().await;
        assert_eq!(components.len(), 1);
        assert!(matches!(
            components[0].as_ref().unwrap().kind,
            Some(device_component::Kind::Device(_))
        ));
    }

    #[tokio::test]
    async fn full_detail_includes_the_param() {
        let device = sample_device();
        let authz = Authorizer::disabled();
        let stream = serialize(device, DetailLevel::Full, vec![], false, authz);
        let components: Vec<_> = stream.collect().await;
        assert!(components.len() >= 2);
    }

    #[tokio::test]
    async fn subscriptions_detail_excludes_unsubscribed_params() {
        let device = Arc::new(
            DeviceBuilder::new(0, Scope::Operate)
                .with_param(
                    "/power",
                    Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
                )
                .with_param(
                    "/name",
                    Arc::new(ParamDescriptor::new("/name", ParamType::String, Scope::Operate)),
                )
                .build(),
        );
        let authz = Authorizer::disabled();
        let stream = serialize(
            device,
            DetailLevel::Subscriptions,
            vec!["/power".to_string()],
            false,
            authz,
        );
        let components: Vec<_> = stream.collect().await;
        let param_oids: Vec<String> = components
            .into_iter()
            .filter_map(|c| match c.unwrap().kind {
                Some(device_component::Kind::Param(p)) => Some(p.oid),
                _ => None,
            })
            .collect();
        assert_eq!(param_oids, vec!["/power".to_string()]);
    }

    #[tokio::test]
    async fn subscriptions_detail_excludes_minimal_set_params_even_if_subscribed() {
        let device = Arc::new(
            DeviceBuilder::new(0, Scope::Operate)
                .with_param(
                    "/power",
                    Arc::new(
                        ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)
                            .minimal_set(true),
                    ),
                )
                .build(),
        );
        let authz = Authorizer::disabled();
        let stream = serialize(
            device,
            DetailLevel::Subscriptions,
            vec!["/power".to_string()],
            false,
            authz,
        );
        let components: Vec<_> = stream.collect().await;
        let has_param = components
            .into_iter()
            .any(|c| matches!(c.unwrap().kind, Some(device_component::Kind::Param(_))));
        assert!(!has_param);
    }

    #[tokio::test]
    async fn full_detail_emits_language_packs() {
        let device = Arc::new(
            DeviceBuilder::new(0, Scope::Operate)
                .with_shipped_language(
                    "en",
                    crate::language::LanguagePack::new("English", Default::default()),
                )
                .build(),
        );
        let authz = Authorizer::disabled();
        let stream = serialize(device, DetailLevel::Full, vec![], false, authz);
        let components: Vec<_> = stream.collect().await;
        assert!(components
            .into_iter()
            .any(|c| matches!(c.unwrap().kind, Some(device_component::Kind::LanguagePack(_)))));
    }
}
