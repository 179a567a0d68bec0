//! The aggregate root: one addressable device in one slot.
//!
//! All mutation and all multi-step reads go through a single per-device
//! `tokio::sync::Mutex` (`Device::guard`): operations that touch more than
//! one param (`try_multi_set_value`) must appear atomic to concurrent
//! callers, and a device-wide lock is the simplest thing that provides that
//! without per-param lock ordering.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use dm_proto::{DeviceHeader, DetailLevel, Value};

use crate::authorizer::{Authorizable, Authorizer};
use crate::command::Command;
use crate::constraint::Constraint;
use crate::descriptor::ParamDescriptor;
use crate::error::{DmResult, DmStatus};
use crate::events::{DeviceEvent, EventBus};
use crate::language::LanguagePack;
use crate::menu::MenuGroup;
use crate::param::Param;
use crate::path::{Path, Segment};
use crate::scope::Scope;

/// One entry of a validated-but-not-yet-committed multi-set batch.
struct PreparedWrite {
    oid: String,
    param: Param,
    value: Value,
    /// Whether resolving this entry appended an array element (a trailing
    /// `-` oid). Appends are real, immediate mutations, so a later entry's
    /// validation failure must `pop_back` them in reverse order to keep
    /// this pass side-effect-free from the caller's perspective.
    appended: bool,
}

pub struct Device {
    pub slot: u32,
    pub default_detail_level: DetailLevel,
    pub default_scope: Scope,
    pub multi_set_enabled: bool,
    pub subscriptions_enabled: bool,
    pub access_scopes: Vec<Scope>,
    params: HashMap<String, Param>,
    commands: HashMap<String, Command>,
    shared_constraints: HashMap<String, Arc<Constraint>>,
    menus: HashMap<String, MenuGroup>,
    language_packs: StdMutex<HashMap<String, LanguagePack>>,
    shipped_language_ids: HashSet<String>,
    subscriptions: StdMutex<crate::subscription::SubscriptionSet>,
    guard: AsyncMutex<()>,
    pub events: EventBus,
}

pub struct DeviceBuilder {
    device: Device,
}

impl DeviceBuilder {
    pub fn new(slot: u32, default_scope: Scope) -> Self {
        Self {
            device: Device {
                slot,
                default_detail_level: DetailLevel::Full,
                default_scope,
                multi_set_enabled: true,
                subscriptions_enabled: true,
                access_scopes: vec![Scope::Monitor, Scope::Operate, Scope::Config, Scope::Admin],
                params: HashMap::new(),
                commands: HashMap::new(),
                shared_constraints: HashMap::new(),
                menus: HashMap::new(),
                language_packs: StdMutex::new(HashMap::new()),
                shipped_language_ids: HashSet::new(),
                subscriptions: StdMutex::new(crate::subscription::SubscriptionSet::new()),
                guard: AsyncMutex::new(()),
                events: EventBus::default(),
            },
        }
    }

    pub fn multi_set_enabled(mut self, enabled: bool) -> Self {
        self.device.multi_set_enabled = enabled;
        self
    }

    pub fn subscriptions_enabled(mut self, enabled: bool) -> Self {
        self.device.subscriptions_enabled = enabled;
        self
    }

    pub fn default_detail_level(mut self, level: DetailLevel) -> Self {
        self.device.default_detail_level = level;
        self
    }

    pub fn with_param(mut self, oid: impl Into<String>, descriptor: Arc<ParamDescriptor>) -> Self {
        let param = Param::with_default(descriptor);
        self.device.params.insert(oid.into(), param);
        self
    }

    pub fn with_command(mut self, oid: impl Into<String>, command: Command) -> Self {
        self.device.commands.insert(oid.into(), command);
        self
    }

    pub fn with_shared_constraint(mut self, oid: impl Into<String>, constraint: Constraint) -> Self {
        self.device
            .shared_constraints
            .insert(oid.into(), Arc::new(constraint));
        self
    }

    pub fn with_menu_group(mut self, id: impl Into<String>, group: MenuGroup) -> Self {
        self.device.menus.insert(id.into(), group);
        self
    }

    pub fn with_shipped_language(mut self, id: impl Into<String>, pack: LanguagePack) -> Self {
        let id = id.into();
        self.device.shipped_language_ids.insert(id.clone());
        self.device
            .language_packs
            .get_mut()
            .unwrap()
            .insert(id, pack);
        self
    }

    pub fn build(self) -> Device {
        self.device
    }
}

impl Device {
    fn split_oid(oid: &str) -> DmResult<(String, Path)> {
        let path = Path::parse(oid)?;
        let mut remaining = path.clone();
        let first = remaining
            .pop_front()
            .ok_or_else(|| DmStatus::invalid_argument("Path cannot be empty"))?;
        let root = match first {
            crate::path::Segment::Field(name) => format!("/{name}"),
            _ => return Err(DmStatus::invalid_argument("oid must start with a field segment")),
        };
        Ok((root, remaining))
    }

    fn resolve_param(&self, oid: &str, authz: &Authorizer) -> DmResult<Param> {
        let (root, rest) = Self::split_oid(oid)?;
        let top = self
            .params
            .get(&root)
            .ok_or_else(|| DmStatus::not_found(format!("No param at {oid}")))?;
        if rest.is_empty() {
            return Ok(top.copy());
        }
        top.get_param(&rest, authz)
    }

    pub async fn get_value(&self, oid: &str, authz: &Authorizer) -> DmResult<Value> {
        let _lock = self.guard.lock().await;
        self.resolve_param(oid, authz)?.get_value(authz)
    }

    pub async fn get_param(&self, oid: &str, authz: &Authorizer) -> DmResult<Param> {
        let _lock = self.guard.lock().await;
        self.resolve_param(oid, authz)
    }

    pub fn get_command(&self, oid: &str) -> DmResult<&Command> {
        self.commands
            .get(oid)
            .ok_or_else(|| DmStatus::not_found(format!("No command at {oid}")))
    }

    pub fn params(&self) -> impl Iterator<Item = (&String, &Param)> {
        self.params.iter()
    }

    pub fn commands(&self) -> impl Iterator<Item = (&String, &Command)> {
        self.commands.iter()
    }

    pub fn shared_constraints(&self) -> impl Iterator<Item = (&String, &Arc<Constraint>)> {
        self.shared_constraints.iter()
    }

    pub fn menus(&self) -> impl Iterator<Item = (&String, &MenuGroup)> {
        self.menus.iter()
    }

    /// `setValue` — single-param write, expressed as a one-element
    /// `commitMultiSetValue` transaction so it shares the same validation
    /// ordering and atomicity guarantees as a batch write.
    pub async fn set_value(&self, oid: &str, value: Value, authz: &Authorizer) -> DmResult<()> {
        self.commit_multi_set_value(vec![(oid.to_string(), value)], authz)
            .await
    }

    /// Validates every entry of a batch without committing it. Rejects
    /// `PERMISSION_DENIED` if the batch has more than one entry and
    /// `multi_set_enabled` is false, and `INVALID_ARGUMENT` if any two oids
    /// in the batch overlap (one is a path-prefix of, or equal to, another).
    async fn try_multi_set_value(
        &self,
        entries: &[(String, Value)],
        authz: &Authorizer,
    ) -> DmResult<Vec<PreparedWrite>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        if entries.len() > 1 && !self.multi_set_enabled {
            return Err(DmStatus::permission_denied(format!(
                "Multi-set is disabled for the device in slot {}",
                self.slot
            )));
        }
        let paths: Vec<Path> = entries
            .iter()
            .map(|(oid, _)| Path::parse(oid))
            .collect::<DmResult<_>>()?;
        for i in 0..paths.len() {
            for j in (i + 1)..paths.len() {
                if paths[i].is_prefix_of_or_eq(&paths[j]) || paths[j].is_prefix_of_or_eq(&paths[i])
                {
                    return Err(DmStatus::invalid_argument(format!(
                        "Overlapping actions for {} and {}",
                        entries[i].0, entries[j].0
                    )));
                }
            }
        }
        let mut prepared: Vec<PreparedWrite> = Vec::with_capacity(entries.len());
        for (i, (oid, value)) in entries.iter().enumerate() {
            let appended = matches!(paths[i].segments().last(), Some(Segment::End));
            let param = match self.resolve_param(oid, authz) {
                Ok(param) => param,
                Err(err) => {
                    Self::rollback_appends(&prepared);
                    return Err(err);
                }
            };
            if let Err(err) = param.validate_set_value(value, authz) {
                if appended {
                    let _ = param.pop_back();
                }
                Self::rollback_appends(&prepared);
                return Err(err);
            }
            prepared.push(PreparedWrite {
                oid: oid.clone(),
                param,
                value: value.clone(),
                appended,
            });
        }
        Ok(prepared)
    }

    /// Undo every appended array element in `prepared`, most recent first.
    fn rollback_appends(prepared: &[PreparedWrite]) {
        for write in prepared.iter().rev() {
            if write.appended {
                let _ = write.param.pop_back();
            }
        }
    }

    /// `commitMultiSetValue` — applies every prepared write. If a write
    /// fails partway through the batch (which `validate_set_value` should
    /// have already ruled out), the failure is logged and surfaced as
    /// `INTERNAL`; earlier writes in the batch are **not** rolled back,
    /// mirroring the source's documented behavior (see DESIGN.md).
    pub async fn commit_multi_set_value(
        &self,
        entries: Vec<(String, Value)>,
        authz: &Authorizer,
    ) -> DmResult<()> {
        let _lock = self.guard.lock().await;
        let prepared = self.try_multi_set_value(&entries, authz).await?;
        for write in &prepared {
            if let Err(err) = write.param.from_proto(write.value.clone(), authz) {
                warn!(oid = %write.oid, error = %err, "multi-set commit failed partway through batch");
                return Err(DmStatus::internal(format!(
                    "Commit failed on {}: {err}",
                    write.oid
                )));
            }
        }
        for write in prepared {
            self.events.publish(DeviceEvent::ValueSetByClient {
                oid: write.oid,
                element_index: None,
                value: write.value,
            });
        }
        Ok(())
    }

    pub async fn add_language(
        &self,
        id: &str,
        pack: LanguagePack,
        authz: &Authorizer,
    ) -> DmResult<()> {
        let _lock = self.guard.lock().await;
        if !authz.write_authz(&(Scope::Admin, false)) {
            return Err(DmStatus::permission_denied(
                "Not authorized to add a language pack",
            ));
        }
        if id.is_empty() || pack.name.is_empty() {
            return Err(DmStatus::invalid_argument(
                "Language pack id and name must not be empty",
            ));
        }
        if self.shipped_language_ids.contains(id) {
            return Err(DmStatus::already_exists(format!(
                "Language pack '{id}' is shipped with the device and cannot be overwritten"
            )));
        }
        self.language_packs
            .lock()
            .unwrap()
            .insert(id.to_string(), pack);
        self.events.publish(DeviceEvent::LanguageAdded { id: id.to_string() });
        info!(id, "language pack added");
        Ok(())
    }

    /// `removeLanguage` — requires `admin:w`; shipped language packs cannot
    /// be deleted.
    pub async fn remove_language(&self, id: &str, authz: &Authorizer) -> DmResult<()> {
        let _lock = self.guard.lock().await;
        if !authz.write_authz(&(Scope::Admin, false)) {
            return Err(DmStatus::permission_denied(
                "Not authorized to remove a language pack",
            ));
        }
        if self.shipped_language_ids.contains(id) {
            return Err(DmStatus::permission_denied(
                "Cannot delete language pack shipped with device",
            ));
        }
        let removed = self.language_packs.lock().unwrap().remove(id);
        if removed.is_none() {
            return Err(DmStatus::not_found(format!("Language pack '{id}' not found")));
        }
        self.events.publish(DeviceEvent::LanguageRemoved { id: id.to_string() });
        info!(id, "language pack removed");
        Ok(())
    }

    pub fn get_language_pack(&self, id: &str) -> DmResult<LanguagePack> {
        if id.is_empty() {
            return Err(DmStatus::invalid_argument("Language pack id must not be empty"));
        }
        self.language_packs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DmStatus::not_found(format!("Language pack '{id}' not found")))
    }

    /// All currently installed language packs, keyed by id.
    pub fn language_packs(&self) -> Vec<(String, LanguagePack)> {
        self.language_packs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, pack)| (id.clone(), pack.clone()))
            .collect()
    }

    pub fn list_languages(&self) -> Vec<String> {
        self.language_packs.lock().unwrap().keys().cloned().collect()
    }

    /// `UpdateSubscriptions` — adds then removes oids/prefix patterns from
    /// this device's persistent subscription set, returning the current
    /// value of every newly-added oid so the caller can send an initial
    /// snapshot.
    pub async fn update_subscriptions(
        &self,
        add_oids: &[String],
        remove_oids: &[String],
        authz: &Authorizer,
    ) -> DmResult<Vec<(String, Value)>> {
        if !self.subscriptions_enabled {
            return Err(DmStatus::failed_precondition(
                "Subscriptions are not enabled on this device",
            ));
        }
        let _lock = self.guard.lock().await;
        let mut snapshot = Vec::new();
        {
            let mut subs = self.subscriptions.lock().unwrap();
            for oid in add_oids {
                subs.add(oid);
            }
            for oid in remove_oids {
                subs.remove(oid);
            }
        }
        for oid in add_oids {
            if let Some(stripped) = oid.strip_suffix("/*") {
                let _ = stripped;
                continue;
            }
            if let Ok(param) = self.resolve_param(oid, authz) {
                if let Ok(value) = param.get_value(authz) {
                    snapshot.push((oid.clone(), value));
                }
            }
        }
        Ok(snapshot)
    }

    pub fn subscribed_oids(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .explicit_oids()
            .map(str::to_string)
            .collect()
    }

    /// `shouldSendParam` against this device's own persistent subscription
    /// set, as consulted by the `Connect` push stream.
    pub fn should_send(&self, oid: &str, authz: &Authorizer) -> bool {
        let subs = self.subscriptions.lock().unwrap();
        self.should_send_param(oid, authz, &subs)
    }

    /// `shouldSendParam` — a push for `oid` is only forwarded to a
    /// subscribed client if it is both subscribed to the oid and still
    /// authorized to read it (a client that loses read access mid-stream
    /// stops seeing that oid's updates).
    pub fn should_send_param(
        &self,
        oid: &str,
        authz: &Authorizer,
        subs: &crate::subscription::SubscriptionSet,
    ) -> bool {
        if !self.subscriptions_enabled {
            return true;
        }
        if !subs.is_subscribed(oid) {
            return false;
        }
        match self.resolve_param(oid, authz) {
            Ok(param) => authz.read_authz(&param),
            Err(_) => false,
        }
    }

    pub fn header(&self, detail_level: DetailLevel, subscribed_oids: Vec<String>) -> DeviceHeader {
        DeviceHeader {
            slot: self.slot,
            detail_level: detail_level as i32,
            default_scope: self.default_scope.to_string(),
            multi_set_enabled: self.multi_set_enabled,
            subscriptions_enabled: self.subscriptions_enabled,
            access_scopes: self.access_scopes.iter().map(|s| s.to_string()).collect(),
            subscribed_oids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_proto::value::Kind;
    use dm_proto::ParamType;

    fn device() -> Device {
        DeviceBuilder::new(1, Scope::Operate)
            .with_param(
                "/power",
                Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
            )
            .with_param(
                "/name",
                Arc::new(ParamDescriptor::new("/name", ParamType::String, Scope::Operate)),
            )
            .build()
    }

    #[tokio::test]
    async fn single_set_then_get_round_trips() {
        let d = device();
        let authz = Authorizer::disabled();
        d.set_value(
            "/power",
            Value {
                kind: Some(Kind::Int32Value(1)),
            },
            &authz,
        )
        .await
        .unwrap();
        let v = d.get_value("/power", &authz).await.unwrap();
        assert_eq!(v, Value { kind: Some(Kind::Int32Value(1)) });
    }

    #[tokio::test]
    async fn multi_set_rejects_overlapping_oids() {
        let d = DeviceBuilder::new(1, Scope::Operate)
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
        let authz = Authorizer::disabled();
        let err = d
            .commit_multi_set_value(
                vec![
                    (
                        "/struct".to_string(),
                        Value { kind: Some(Kind::Int32Value(0)) },
                    ),
                    (
                        "/struct/field".to_string(),
                        Value { kind: Some(Kind::Int32Value(1)) },
                    ),
                ],
                &authz,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn multi_set_disabled_is_rejected() {
        let d = DeviceBuilder::new(1, Scope::Operate)
            .multi_set_enabled(false)
            .with_param(
                "/power",
                Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
            )
            .with_param(
                "/name",
                Arc::new(ParamDescriptor::new("/name", ParamType::String, Scope::Operate)),
            )
            .build();
        let authz = Authorizer::disabled();
        let err = d
            .commit_multi_set_value(
                vec![
                    (
                        "/power".to_string(),
                        Value { kind: Some(Kind::Int32Value(1)) },
                    ),
                    (
                        "/name".to_string(),
                        Value { kind: Some(Kind::StringValue("x".into())) },
                    ),
                ],
                &authz,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::PermissionDenied);
    }

    #[tokio::test]
    async fn single_set_succeeds_even_with_multi_set_disabled() {
        let d = DeviceBuilder::new(1, Scope::Operate)
            .multi_set_enabled(false)
            .with_param(
                "/power",
                Arc::new(ParamDescriptor::new("/power", ParamType::Int32, Scope::Operate)),
            )
            .build();
        let authz = Authorizer::disabled();
        d.set_value(
            "/power",
            Value { kind: Some(Kind::Int32Value(9)) },
            &authz,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn language_add_rejects_overwriting_a_shipped_pack() {
        let d = DeviceBuilder::new(1, Scope::Operate)
            .with_shipped_language("en", LanguagePack::new("English", Default::default()))
            .build();
        let authz = Authorizer::from_claims(&serde_json::json!({ "scopes": ["admin:w"] })).unwrap();
        let err = d
            .add_language("en", LanguagePack::new("English2", Default::default()), &authz)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::AlreadyExists);
    }

    #[tokio::test]
    async fn language_remove_rejects_shipped_pack_and_removes_custom_one() {
        let d = DeviceBuilder::new(1, Scope::Operate)
            .with_shipped_language("en", LanguagePack::new("English", Default::default()))
            .build();
        let authz = Authorizer::from_claims(&serde_json::json!({ "scopes": ["admin:w"] })).unwrap();
        d.add_language("fr", LanguagePack::new("French", Default::default()), &authz)
            .await
            .unwrap();

        let err = d.remove_language("en", &authz).await.unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::PermissionDenied);

        d.remove_language("fr", &authz).await.unwrap();
        assert_eq!(d.get_language_pack("fr").unwrap_err().code, crate::error::StatusCode::NotFound);
    }

    #[tokio::test]
    async fn should_send_param_requires_both_subscription_and_read_authz() {
        let d = device();
        let mut subs = crate::subscription::SubscriptionSet::new();
        subs.add("/power");
        let authz = Authorizer::disabled();
        assert!(d.should_send_param("/power", &authz, &subs));
        assert!(!d.should_send_param("/name", &authz, &subs));
    }
}
