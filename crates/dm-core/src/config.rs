//! TOML device descriptions and layered file + env-var server configuration.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use dm_proto::ParamType;

use crate::command::Command;
use crate::constraint::Constraint;
use crate::descriptor::ParamDescriptor;
use crate::device::{Device, DeviceBuilder};
use crate::error::{DmResult, DmStatus};
use crate::language::LanguagePack;
use crate::menu::{Menu, MenuGroup};
use crate::scope::Scope;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintSpec {
    IntRange { min: i32, max: i32 },
    FloatRange { min: f32, max: f32 },
    StringChoice { choices: Vec<String> },
    Alarm { bitmasks: Vec<u32> },
}

impl From<ConstraintSpec> for Constraint {
    fn from(spec: ConstraintSpec) -> Self {
        match spec {
            ConstraintSpec::IntRange { min, max } => Constraint::IntRange { min, max },
            ConstraintSpec::FloatRange { min, max } => Constraint::FloatRange { min, max },
            ConstraintSpec::StringChoice { choices } => Constraint::StringChoice { choices },
            ConstraintSpec::Alarm { bitmasks } => Constraint::Alarm { bitmasks },
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub kind: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub minimal_set: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub total_length: Option<u32>,
    #[serde(default)]
    pub constraint: Option<ConstraintSpec>,
    #[serde(default)]
    pub sub_params: HashMap<String, ParamSpec>,
    #[serde(default)]
    pub alternatives: HashMap<String, ParamSpec>,
}

fn parse_param_type(kind: &str) -> DmResult<ParamType> {
    match kind {
        "empty" => Ok(ParamType::Empty),
        "int32" => Ok(ParamType::Int32),
        "float32" => Ok(ParamType::Float32),
        "string" => Ok(ParamType::String),
        "struct" => Ok(ParamType::Struct),
        "int32_array" => Ok(ParamType::Int32Array),
        "float32_array" => Ok(ParamType::Float32Array),
        "string_array" => Ok(ParamType::StringArray),
        "struct_array" => Ok(ParamType::StructArray),
        "struct_variant" => Ok(ParamType::StructVariant),
        "struct_variant_array" => Ok(ParamType::StructVariantArray),
        other => Err(DmStatus::invalid_argument(format!(
            "Unknown param kind '{other}' in device description"
        ))),
    }
}

impl ParamSpec {
    fn into_descriptor(self, oid: &str, default_scope: Scope) -> DmResult<Arc<ParamDescriptor>> {
        let kind = parse_param_type(&self.kind)?;
        let scope = match &self.scope {
            Some(s) => Scope::parse(s)
                .ok_or_else(|| DmStatus::invalid_argument(format!("Unknown scope '{s}' on {oid}")))?,
            None => default_scope,
        };
        let mut descriptor = ParamDescriptor::new(oid, kind, scope)
            .read_only(self.read_only)
            .minimal_set(self.minimal_set);
        if let Some(max) = self.max_length {
            descriptor = descriptor.max_length(max);
        }
        if let Some(total) = self.total_length {
            descriptor = descriptor.total_length(total);
        }
        if let Some(c) = self.constraint {
            descriptor = descriptor.constraint(c.into());
        }
        for (name, sub) in self.sub_params {
            let sub_oid = format!("{oid}/{name}");
            let sub_desc = sub.into_descriptor(&sub_oid, default_scope)?;
            descriptor = descriptor.with_sub_param(name, sub_desc);
        }
        for (tag, alt) in self.alternatives {
            let alt_oid = format!("{oid}#{tag}");
            let alt_desc = alt.into_descriptor(&alt_oid, default_scope)?;
            descriptor = descriptor.with_alternative(tag, alt_desc);
        }
        Ok(Arc::new(descriptor))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuSpec {
    pub name: String,
    #[serde(default)]
    pub param_oids: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuGroupSpec {
    pub name: String,
    #[serde(default)]
    pub menus: HashMap<String, MenuSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanguagePackSpec {
    pub name: String,
    #[serde(default)]
    pub words: HashMap<String, String>,
}

/// Top-level shape of one `[[device]]` TOML table.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescription {
    pub slot: u32,
    #[serde(default = "default_scope_name")]
    pub default_scope: String,
    #[serde(default = "default_true")]
    pub multi_set_enabled: bool,
    #[serde(default = "default_true")]
    pub subscriptions_enabled: bool,
    #[serde(default)]
    pub params: HashMap<String, ParamSpec>,
    #[serde(default)]
    pub commands: HashMap<String, CommandSpec>,
    #[serde(default)]
    pub shared_constraints: HashMap<String, ConstraintSpec>,
    #[serde(default)]
    pub menus: HashMap<String, MenuGroupSpec>,
    #[serde(default)]
    pub shipped_language_packs: HashMap<String, LanguagePackSpec>,
}

fn default_scope_name() -> String {
    "operate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptionFile {
    #[serde(default)]
    pub device: Vec<DeviceDescription>,
}

impl DeviceDescription {
    /// Parses this table's `params`/`commands`/etc. into an owned `Device`.
    /// Malformed entries surface a descriptive `INVALID_ARGUMENT`; this
    /// never panics, so a broken config file fails the bootstrap cleanly.
    pub fn build(self) -> DmResult<Device> {
        let default_scope = Scope::parse(&self.default_scope).ok_or_else(|| {
            DmStatus::invalid_argument(format!(
                "Unknown default_scope '{}' for device in slot {}",
                self.default_scope, self.slot
            ))
        })?;
        let mut builder = DeviceBuilder::new(self.slot, default_scope)
            .multi_set_enabled(self.multi_set_enabled)
            .subscriptions_enabled(self.subscriptions_enabled);

        for (oid, spec) in self.params {
            let descriptor = spec.into_descriptor(&oid, default_scope)?;
            builder = builder.with_param(oid, descriptor);
        }
        for (oid, spec) in self.commands {
            let scope = match &spec.scope {
                Some(s) => Scope::parse(s).ok_or_else(|| {
                    DmStatus::invalid_argument(format!("Unknown scope '{s}' on command {oid}"))
                })?,
                None => default_scope,
            };
            let descriptor = Arc::new(
                ParamDescriptor::new(&oid, ParamType::Empty, scope)
                    .read_only(spec.read_only)
                    .is_command_flag(),
            );
            builder = builder.with_command(oid, Command::new(descriptor));
        }
        for (oid, spec) in self.shared_constraints {
            builder = builder.with_shared_constraint(oid, spec.into());
        }
        for (id, spec) in self.menus {
            let mut group = MenuGroup::new(id.clone(), spec.name);
            for (key, menu_spec) in spec.menus {
                let menu = Menu::new(menu_spec.name)
                    .with_oids(menu_spec.param_oids)
                    .hidden(menu_spec.hidden);
                group = group.with_menu(key, menu);
            }
            builder = builder.with_menu_group(id, group);
        }
        for (id, spec) in self.shipped_language_packs {
            builder = builder.with_shipped_language(id, LanguagePack::new(spec.name, spec.words));
        }
        Ok(builder.build())
    }
}

/// Server-level listener/bootstrap configuration, layered `file < env`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default)]
    pub authz_disabled: bool,
    #[serde(default = "default_asset_root")]
    pub asset_root: String,
}

fn default_grpc_addr() -> String {
    "0.0.0.0:50051".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_asset_root() -> String {
    "./assets".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            http_addr: default_http_addr(),
            authz_disabled: false,
            asset_root: default_asset_root(),
        }
    }
}

impl ServerConfig {
    /// Parses `contents` as TOML, then applies `DM_*` environment overrides
    /// (`DM_GRPC_ADDR`, `DM_HTTP_ADDR`, `DM_AUTHZ_DISABLED`, `DM_ASSET_ROOT`).
    /// Any malformed value aborts with a descriptive error rather than
    /// silently falling back to the default.
    pub fn load_from_str(contents: &str) -> DmResult<Self> {
        let mut config: ServerConfig = if contents.trim().is_empty() {
            ServerConfig::default()
        } else {
            toml::from_str(contents)
                .map_err(|e| DmStatus::invalid_argument(format!("Invalid server config: {e}")))?
        };
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            match key.as_str() {
                "DM_GRPC_ADDR" => self.grpc_addr = value,
                "DM_HTTP_ADDR" => self.http_addr = value,
                "DM_ASSET_ROOT" => self.asset_root = value,
                "DM_AUTHZ_DISABLED" => {
                    self.authz_disabled = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
                }
                _ => {}
            }
        }
    }
}

/// Parses a full device-description TOML document into its `Device`s,
/// keyed by slot.
pub fn load_devices(contents: &str) -> DmResult<Vec<Device>> {
    let file: DeviceDescriptionFile = toml::from_str(contents)
        .map_err(|e| DmStatus::invalid_argument(format!("Invalid device description: {e}")))?;
    file.device.into_iter().map(DeviceDescription::build).collect()
}
