//! Static metadata describing one parameter.

use std::collections::HashMap;
use std::sync::Arc;

use dm_proto::ParamType;

use crate::authorizer::Authorizable;
use crate::constraint::Constraint;
use crate::scope::Scope;

/// Static, read-only-after-construction metadata for one parameter.
///
/// Descriptors form a DAG via `sub_params`/`alternatives` (struct fields,
/// variant alternatives) and are held by strong `Arc` reference from both
/// the owning `Device` and any parent descriptor; in practice a device
/// model never builds a cycle, so there is no weak-reference bookkeeping.
#[derive(Clone, Debug)]
pub struct ParamDescriptor {
    pub oid: String,
    pub kind: ParamType,
    pub scope: Scope,
    pub read_only: bool,
    pub minimal_set: bool,
    pub is_command: bool,
    /// Max array length (arrays only).
    pub max_length: Option<u32>,
    /// Max cumulative string length (string arrays only).
    pub total_length: Option<u32>,
    pub constraint: Option<Arc<Constraint>>,
    pub sub_params: HashMap<String, Arc<ParamDescriptor>>,
    pub alternatives: HashMap<String, Arc<ParamDescriptor>>,
}

impl ParamDescriptor {
    pub fn new(oid: impl Into<String>, kind: ParamType, scope: Scope) -> Self {
        Self {
            oid: oid.into(),
            kind,
            scope,
            read_only: false,
            minimal_set: false,
            is_command: false,
            max_length: None,
            total_length: None,
            constraint: None,
            sub_params: HashMap::new(),
            alternatives: HashMap::new(),
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn minimal_set(mut self, minimal: bool) -> Self {
        self.minimal_set = minimal;
        self
    }

    pub fn is_command_flag(mut self) -> Self {
        self.is_command = true;
        self
    }

    pub fn max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn total_length(mut self, max: u32) -> Self {
        self.total_length = Some(max);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(Arc::new(constraint));
        self
    }

    pub fn with_sub_param(mut self, name: impl Into<String>, desc: Arc<ParamDescriptor>) -> Self {
        self.sub_params.insert(name.into(), desc);
        self
    }

    pub fn with_alternative(mut self, tag: impl Into<String>, desc: Arc<ParamDescriptor>) -> Self {
        self.alternatives.insert(tag.into(), desc);
        self
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self.kind,
            ParamType::Int32Array
                | ParamType::Float32Array
                | ParamType::StringArray
                | ParamType::StructArray
                | ParamType::StructVariantArray
        )
    }
}

impl Authorizable for ParamDescriptor {
    fn scope(&self) -> Scope {
        self.scope
    }
    fn read_only(&self) -> bool {
        self.read_only
    }
}
