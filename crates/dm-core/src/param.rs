//! Runtime binding of a descriptor to a value cell.
//!
//! A `Param` is a `(descriptor, cell, path-within-cell)` triple. The path
//! lets sub-fields/elements of a struct or array share the exact same
//! backing cell as their parent: `copy()` clones the triple, so a copy's
//! `from_proto` mutates the very storage the device's own `Param` reads
//! from, which is how two-phase commit (validate on a copy, commit into the
//! shared cell) works without a separate "apply to the real node" step.
//! Read access (`get_value`) and mutating access
//! (`validate_set_value`/`from_proto`) stay disjoint methods over an
//! explicit path, so a read-only handle never needs, and is never given, a
//! way to mutate through it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dm_proto::value::Kind;
use dm_proto::{StructValue, Value};

use crate::authorizer::{Authorizable, Authorizer};
use crate::descriptor::ParamDescriptor;
use crate::error::DmStatus;
use crate::path::{Path, Segment, K_END};
use crate::scope::Scope;

fn empty_value() -> Value {
    Value {
        kind: Some(Kind::Empty(())),
    }
}

/// Produce a zero value matching a descriptor's type, used to seed arrays
/// and to synthesize the virtual element validated by a `/-` append.
fn default_for(descriptor: &ParamDescriptor) -> Value {
    use dm_proto::ParamType::*;
    let kind = match descriptor.kind {
        Int32 | Int32Array => Kind::Int32Value(0),
        Float32 | Float32Array => Kind::Float32Value(0.0),
        String | StringArray => Kind::StringValue(String::new()),
        Struct | StructArray => Kind::StructValue(StructValue {
            fields: descriptor
                .sub_params
                .iter()
                .map(|(name, d)| (name.clone(), default_for(d)))
                .collect(),
        }),
        _ => return empty_value(),
    };
    Value { kind: Some(kind) }
}

/// Shared, thread-safe storage for one top-level parameter's whole value
/// tree (including all struct fields / array elements).
pub type ValueCell = Arc<Mutex<Value>>;

#[derive(Clone, Debug)]
pub struct Param {
    pub descriptor: Arc<ParamDescriptor>,
    cell: ValueCell,
    /// Steps from the cell's root value down to this `Param`'s data.
    /// Empty for the top-level param itself.
    path: Vec<Segment>,
}

impl Authorizable for Param {
    fn scope(&self) -> Scope {
        self.descriptor.scope
    }
    fn read_only(&self) -> bool {
        self.descriptor.read_only
    }
}

impl Param {
    pub fn new(descriptor: Arc<ParamDescriptor>, initial: Value) -> Self {
        Self {
            descriptor,
            cell: Arc::new(Mutex::new(initial)),
            path: Vec::new(),
        }
    }

    pub fn with_default(descriptor: Arc<ParamDescriptor>) -> Self {
        let initial = default_for(&descriptor);
        Self::new(descriptor, initial)
    }

    /// A handle sharing the same backing cell — the two-phase-commit
    /// building block described above.
    pub fn copy(&self) -> Param {
        self.clone()
    }

    /// Read-only access to the element this `Param` addresses: top-level
    /// values, struct-field navigation, and array-element navigation.
    fn read_at_path(root: &Value, path: &[Segment]) -> Option<Value> {
        if path.is_empty() {
            return Some(root.clone());
        }
        match (&path[0], &root.kind) {
            (Segment::Field(name), Some(Kind::StructValue(s))) => {
                let child = s.fields.get(name)?;
                Self::read_at_path(child, &path[1..])
            }
            (Segment::Index(i), Some(Kind::StructArrayValues(arr))) => {
                let child = arr.values.get(*i as usize)?;
                let wrapped = Value {
                    kind: Some(Kind::StructValue(child.clone())),
                };
                Self::read_at_path(&wrapped, &path[1..])
            }
            (Segment::Index(i), Some(Kind::Int32ArrayValues(arr))) if path.len() == 1 => {
                arr.values.get(*i as usize).map(|v| Value {
                    kind: Some(Kind::Int32Value(*v)),
                })
            }
            (Segment::Index(i), Some(Kind::Float32ArrayValues(arr))) if path.len() == 1 => {
                arr.values.get(*i as usize).map(|v| Value {
                    kind: Some(Kind::Float32Value(*v)),
                })
            }
            (Segment::Index(i), Some(Kind::StringArrayValues(arr))) if path.len() == 1 => {
                arr.values.get(*i as usize).map(|v| Value {
                    kind: Some(Kind::StringValue(v.clone())),
                })
            }
            _ => None,
        }
    }

    fn write_at_path(root: &mut Value, path: &[Segment], new_value: Value) -> Result<(), DmStatus> {
        if path.is_empty() {
            *root = new_value;
            return Ok(());
        }
        match (&path[0], &mut root.kind) {
            (Segment::Field(name), Some(Kind::StructValue(s))) => {
                if path.len() == 1 {
                    s.fields.insert(name.clone(), new_value);
                    Ok(())
                } else {
                    let child = s.fields.entry(name.clone()).or_insert_with(|| Value {
                        kind: Some(Kind::StructValue(StructValue {
                            fields: HashMap::new(),
                        })),
                    });
                    Self::write_at_path(child, &path[1..], new_value)
                }
            }
            (Segment::Index(i), Some(Kind::StructArrayValues(arr))) => {
                let child = arr
                    .values
                    .get_mut(*i as usize)
                    .ok_or_else(|| DmStatus::out_of_range("array index out of bounds"))?;
                let mut wrapped = Value {
                    kind: Some(Kind::StructValue(child.clone())),
                };
                Self::write_at_path(&mut wrapped, &path[1..], new_value)?;
                if let Some(Kind::StructValue(s)) = wrapped.kind {
                    *child = s;
                }
                Ok(())
            }
            (Segment::Index(i), Some(Kind::Int32ArrayValues(arr))) => {
                if let Some(Kind::Int32Value(v)) = new_value.kind {
                    *arr.values
                        .get_mut(*i as usize)
                        .ok_or_else(|| DmStatus::out_of_range("array index out of bounds"))? = v;
                    Ok(())
                } else {
                    Err(DmStatus::invalid_argument("type mismatch in array write"))
                }
            }
            (Segment::Index(i), Some(Kind::Float32ArrayValues(arr))) => {
                if let Some(Kind::Float32Value(v)) = new_value.kind {
                    *arr.values
                        .get_mut(*i as usize)
                        .ok_or_else(|| DmStatus::out_of_range("array index out of bounds"))? = v;
                    Ok(())
                } else {
                    Err(DmStatus::invalid_argument("type mismatch in array write"))
                }
            }
            (Segment::Index(i), Some(Kind::StringArrayValues(arr))) => {
                if let Some(Kind::StringValue(v)) = new_value.kind {
                    *arr.values
                        .get_mut(*i as usize)
                        .ok_or_else(|| DmStatus::out_of_range("array index out of bounds"))? = v;
                    Ok(())
                } else {
                    Err(DmStatus::invalid_argument("type mismatch in array write"))
                }
            }
            _ => Err(DmStatus::invalid_argument("cannot navigate into this value")),
        }
    }

    /// `toProto` — read the cell into the wire form.
    ///
    /// Fails `PERMISSION_DENIED` if `!readAuthz(pd)`. Struct reads recurse
    /// field-by-field; if any sub-field is denied the **entire** struct
    /// fails (no partial serialization).
    pub fn get_value(&self, authz: &Authorizer) -> Result<Value, DmStatus> {
        if !authz.read_authz(&self.descriptor) {
            return Err(DmStatus::permission_denied(format!(
                "Not authorized to read the param {}",
                self.descriptor.oid
            )));
        }
        let root = self.cell.lock().unwrap();
        let value = Self::read_at_path(&root, &self.path).ok_or_else(|| {
            DmStatus::not_found(format!("Param {} does not exist", self.descriptor.oid))
        })?;
        self.check_struct_subfields_readable(&value, authz)?;
        Ok(value)
    }

    fn check_struct_subfields_readable(
        &self,
        value: &Value,
        authz: &Authorizer,
    ) -> Result<(), DmStatus> {
        if let Some(Kind::StructValue(_)) = &value.kind {
            for (name, sub_desc) in &self.descriptor.sub_params {
                if !authz.read_authz(sub_desc.as_ref()) {
                    return Err(DmStatus::permission_denied(format!(
                        "Not authorized to read sub-field {name} of {}",
                        self.descriptor.oid
                    )));
                }
            }
        }
        Ok(())
    }

    /// `validFromProto` — boolean validation pass over a proposed write
    /// without mutating the cell.
    pub fn validate_set_value(&self, value: &Value, authz: &Authorizer) -> Result<(), DmStatus> {
        if !authz.write_authz(&self.descriptor) {
            return Err(DmStatus::permission_denied(format!(
                "Not authorized to write to param {}",
                self.descriptor.oid
            )));
        }
        if let Some(max) = self.descriptor.max_length {
            if let Some(len) = array_len(value) {
                if len > max as usize {
                    return Err(DmStatus::out_of_range(format!(
                        "Value exceeds maximum length of {}",
                        self.descriptor.oid
                    )));
                }
            }
        }
        if let Some(total) = self.descriptor.total_length {
            if let Some(Kind::StringArrayValues(arr)) = &value.kind {
                let sum: usize = arr.values.iter().map(|s| s.len()).sum();
                if sum > total as usize {
                    return Err(DmStatus::out_of_range(format!(
                        "Cumulative string length exceeds {total} for {}",
                        self.descriptor.oid
                    )));
                }
            }
        }
        if let Some(c) = &self.descriptor.constraint {
            if !c.is_range() && !c.satisfied(value) {
                return Err(DmStatus::invalid_argument(format!(
                    "Value does not satisfy constraint on {}",
                    self.descriptor.oid
                )));
            }
        }
        if let Some(Kind::StructVariantValue(v)) = &value.kind {
            let alt = self
                .descriptor
                .alternatives
                .get(&v.variant_type)
                .ok_or_else(|| {
                    DmStatus::invalid_argument(format!(
                        "Unknown variant_type '{}' for {}",
                        v.variant_type, self.descriptor.oid
                    ))
                })?;
            if let Some(inner) = &v.value {
                for name in alt.sub_params.keys() {
                    if !inner.fields.contains_key(name) {
                        return Err(DmStatus::invalid_argument(format!(
                            "Variant value missing field '{name}' for {}",
                            self.descriptor.oid
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// `fromProto` — commit. Applies range-constraint clamping element-wise,
    /// then writes into the cell.
    pub fn from_proto(&self, mut value: Value, _authz: &Authorizer) -> Result<(), DmStatus> {
        if let Some(c) = &self.descriptor.constraint {
            if c.is_range() {
                c.apply(&mut value);
            }
        }
        let mut root = self.cell.lock().unwrap();
        Self::write_at_path(&mut root, &self.path, value)
    }

    /// `addBack` — append a virtual/real element at the next array index.
    /// Returns a `Param` handle addressing the newly appended element.
    pub fn add_back(&self, authz: &Authorizer) -> Result<Param, DmStatus> {
        if !authz.write_authz(&self.descriptor) {
            return Err(DmStatus::permission_denied(format!(
                "Not authorized to write to param {}",
                self.descriptor.oid
            )));
        }
        let mut root = self.cell.lock().unwrap();
        let target = Self::navigate_mut(&mut root, &self.path).ok_or_else(|| {
            DmStatus::not_found(format!("Param {} does not exist", self.descriptor.oid))
        })?;
        let new_index = match &mut target.kind {
            Some(Kind::Int32ArrayValues(arr)) => {
                arr.values.push(0);
                arr.values.len() - 1
            }
            Some(Kind::Float32ArrayValues(arr)) => {
                arr.values.push(0.0);
                arr.values.len() - 1
            }
            Some(Kind::StringArrayValues(arr)) => {
                arr.values.push(String::new());
                arr.values.len() - 1
            }
            Some(Kind::StructArrayValues(arr)) => {
                let default = default_for(&self.descriptor);
                let empty = if let Some(Kind::StructValue(s)) = default.kind {
                    s
                } else {
                    StructValue {
                        fields: HashMap::new(),
                    }
                };
                arr.values.push(empty);
                arr.values.len() - 1
            }
            _ => {
                return Err(DmStatus::invalid_argument(format!(
                    "{} is not an array param",
                    self.descriptor.oid
                )))
            }
        };
        drop(root);
        let mut path = self.path.clone();
        path.push(Segment::Index(new_index as u32));
        Ok(Param {
            descriptor: self.descriptor.clone(),
            cell: self.cell.clone(),
            path,
        })
    }

    /// Undo an `addBack` — used to roll back a batch when a later entry in
    /// the same `tryMultiSetValue` call fails. Called on the `Param` handle
    /// `addBack` returned (whose path ends in the new element's index), so
    /// it navigates to the parent array, not to the element itself.
    pub fn pop_back(&self) -> Result<(), DmStatus> {
        let array_path = &self.path[..self.path.len().saturating_sub(1)];
        let mut root = self.cell.lock().unwrap();
        let target = Self::navigate_mut(&mut root, array_path).ok_or_else(|| {
            DmStatus::not_found(format!("Param {} does not exist", self.descriptor.oid))
        })?;
        match &mut target.kind {
            Some(Kind::Int32ArrayValues(arr)) => {
                arr.values.pop();
            }
            Some(Kind::Float32ArrayValues(arr)) => {
                arr.values.pop();
            }
            Some(Kind::StringArrayValues(arr)) => {
                arr.values.pop();
            }
            Some(Kind::StructArrayValues(arr)) => {
                arr.values.pop();
            }
            _ => {}
        }
        Ok(())
    }

    fn navigate_mut<'v>(root: &'v mut Value, path: &[Segment]) -> Option<&'v mut Value> {
        let mut cur = root;
        for seg in path {
            cur = match (seg, &mut cur.kind) {
                (Segment::Field(name), Some(Kind::StructValue(s))) => s.fields.get_mut(name)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// No-op: `validate_set_value` never mutates the cell, so there is
    /// nothing to unwind on a failed batch. Kept as an explicit step so
    /// call sites read the same whether or not a given `Param` kind ever
    /// needs to undo partial validation state.
    pub fn reset_validate(&self) {}

    /// Navigate to a sub-param (struct field, array element, or variant
    /// alternative) addressed by `path`.
    pub fn get_param(&self, path: &Path, authz: &Authorizer) -> Result<Param, DmStatus> {
        if !authz.read_authz(&self.descriptor) {
            return Err(DmStatus::permission_denied(format!(
                "Not authorized to read the param {}",
                self.descriptor.oid
            )));
        }
        let mut cur = self.copy();
        let mut remaining = path.clone();
        while let Some(seg) = remaining.pop_front() {
            cur = cur.step(&seg, authz)?;
        }
        Ok(cur)
    }

    fn step(&self, seg: &Segment, authz: &Authorizer) -> Result<Param, DmStatus> {
        match seg {
            Segment::Field(name) => {
                let sub_desc = self
                    .descriptor
                    .sub_params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        DmStatus::not_found(format!(
                            "Param {}/{name} does not exist",
                            self.descriptor.oid
                        ))
                    })?;
                let mut path = self.path.clone();
                path.push(Segment::Field(name.clone()));
                Ok(Param {
                    descriptor: sub_desc,
                    cell: self.cell.clone(),
                    path,
                })
            }
            Segment::Index(i) => {
                let mut path = self.path.clone();
                path.push(Segment::Index(*i));
                Ok(Param {
                    descriptor: self.descriptor.clone(),
                    cell: self.cell.clone(),
                    path,
                })
            }
            // A trailing `-` in an oid path addresses "the slot after the
            // last element": appending is the only meaningful navigation.
            Segment::End => self.add_back(authz),
        }
    }

    pub fn array_length(&self, authz: &Authorizer) -> Result<Option<u32>, DmStatus> {
        let value = self.get_value(authz)?;
        Ok(array_len(&value).map(|n| n as u32))
    }
}

fn array_len(value: &Value) -> Option<usize> {
    match &value.kind {
        Some(Kind::Int32ArrayValues(a)) => Some(a.values.len()),
        Some(Kind::Float32ArrayValues(a)) => Some(a.values.len()),
        Some(Kind::StringArrayValues(a)) => Some(a.values.len()),
        Some(Kind::StructArrayValues(a)) => Some(a.values.len()),
        Some(Kind::StructVariantArrayValues(a)) => Some(a.values.len()),
        _ => None,
    }
}

pub const APPEND_SENTINEL: u32 = K_END;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ParamDescriptor;
    use dm_proto::{ParamType, StringArray};

    fn string_array_param(max_length: u32) -> Param {
        let descriptor = Arc::new(
            ParamDescriptor::new("/arrayParam", ParamType::StringArray, Scope::Operate)
                .max_length(max_length),
        );
        let initial = Value {
            kind: Some(Kind::StringArrayValues(StringArray {
                values: vec!["a".into(), "b".into(), "c".into()],
            })),
        };
        Param::new(descriptor, initial)
    }

    #[test]
    fn scalar_round_trip_without_constraint() {
        let descriptor = Arc::new(ParamDescriptor::new("/a", ParamType::Int32, Scope::Operate));
        let param = Param::with_default(descriptor);
        let authz = Authorizer::disabled();
        let value = Value {
            kind: Some(Kind::Int32Value(42)),
        };
        param.validate_set_value(&value, &authz).unwrap();
        param.from_proto(value.clone(), &authz).unwrap();
        assert_eq!(param.get_value(&authz).unwrap(), value);
    }

    #[test]
    fn array_append_respects_max_length() {
        let param = string_array_param(4);
        let authz = Authorizer::disabled();
        let appended = param.add_back(&authz).unwrap();
        appended
            .from_proto(
                Value {
                    kind: Some(Kind::StringValue("new".into())),
                },
                &authz,
            )
            .unwrap();
        assert_eq!(param.array_length(&authz).unwrap(), Some(4));

        let full_value = param.get_value(&authz).unwrap();
        assert!(param.validate_set_value(&full_value, &authz).is_ok());
    }

    #[test]
    fn array_append_is_readable_at_new_index() {
        let param = string_array_param(5);
        let authz = Authorizer::disabled();
        let appended = param.add_back(&authz).unwrap();
        appended
            .from_proto(
                Value {
                    kind: Some(Kind::StringValue("new".into())),
                },
                &authz,
            )
            .unwrap();
        assert_eq!(param.array_length(&authz).unwrap(), Some(4));
        let last = param
            .get_param(&Path::parse("/3").unwrap(), &authz)
            .unwrap();
        assert_eq!(
            last.get_value(&authz).unwrap(),
            Value {
                kind: Some(Kind::StringValue("new".into()))
            }
        );
    }

    #[test]
    fn trailing_dash_path_appends_via_get_param() {
        let param = string_array_param(5);
        let authz = Authorizer::disabled();
        let appended = param.get_param(&Path::parse("/-").unwrap(), &authz).unwrap();
        appended
            .from_proto(
                Value {
                    kind: Some(Kind::StringValue("new".into())),
                },
                &authz,
            )
            .unwrap();
        assert_eq!(param.array_length(&authz).unwrap(), Some(4));
        assert_eq!(
            appended.get_value(&authz).unwrap(),
            Value {
                kind: Some(Kind::StringValue("new".into()))
            }
        );
    }

    #[test]
    fn pop_back_undoes_add_back_on_the_returned_handle() {
        let param = string_array_param(5);
        let authz = Authorizer::disabled();
        let appended = param.add_back(&authz).unwrap();
        assert_eq!(param.array_length(&authz).unwrap(), Some(4));
        appended.pop_back().unwrap();
        assert_eq!(param.array_length(&authz).unwrap(), Some(3));
    }

    #[test]
    fn read_denied_on_scalar_outside_client_scope() {
        let descriptor = Arc::new(ParamDescriptor::new("/secret", ParamType::Int32, Scope::Admin));
        let param = Param::with_default(descriptor);
        let authz = Authorizer::from_claims(&serde_json::json!({ "scopes": ["monitor"] })).unwrap();
        let err = param.get_value(&authz).unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::PermissionDenied);
    }

    #[test]
    fn write_denied_when_read_only() {
        let descriptor = Arc::new(
            ParamDescriptor::new("/ro", ParamType::Int32, Scope::Operate).read_only(true),
        );
        let param = Param::with_default(descriptor);
        let authz = Authorizer::from_claims(&serde_json::json!({ "scopes": ["operate:w"] })).unwrap();
        let value = Value {
            kind: Some(Kind::Int32Value(1)),
        };
        let err = param.validate_set_value(&value, &authz).unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::PermissionDenied);
    }

    #[test]
    fn copy_shares_backing_cell() {
        let descriptor = Arc::new(ParamDescriptor::new("/a", ParamType::Int32, Scope::Operate));
        let param = Param::with_default(descriptor);
        let authz = Authorizer::disabled();
        let handle = param.copy();
        handle
            .from_proto(
                Value {
                    kind: Some(Kind::Int32Value(7)),
                },
                &authz,
            )
            .unwrap();
        assert_eq!(
            param.get_value(&authz).unwrap(),
            Value {
                kind: Some(Kind::Int32Value(7))
            }
        );
    }
}
