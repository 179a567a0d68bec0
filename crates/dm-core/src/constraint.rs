//! Per-parameter validity predicates and range clamping.

use dm_proto::Value;

/// A named, shared constraint. Range kinds additionally clamp via `apply`;
/// the rest are satisfied-only — range constraints are skipped during
/// validation because `from_proto` clamps them instead of rejecting.
#[derive(Clone, Debug)]
pub enum Constraint {
    IntRange { min: i32, max: i32 },
    FloatRange { min: f32, max: f32 },
    StringChoice { choices: Vec<String> },
    Alarm { bitmasks: Vec<u32> },
}

impl Constraint {
    pub fn is_range(&self) -> bool {
        matches!(self, Constraint::IntRange { .. } | Constraint::FloatRange { .. })
    }

    /// Non-mutating validity check, used by `validFromProto` for non-range
    /// constraints.
    pub fn satisfied(&self, value: &Value) -> bool {
        match (self, &value.kind) {
            (Constraint::IntRange { min, max }, Some(dm_proto::value::Kind::Int32Value(v))) => {
                v >= min && v <= max
            }
            (
                Constraint::FloatRange { min, max },
                Some(dm_proto::value::Kind::Float32Value(v)),
            ) => v >= min && v <= max,
            (
                Constraint::StringChoice { choices },
                Some(dm_proto::value::Kind::StringValue(v)),
            ) => choices.iter().any(|c| c == v),
            (Constraint::Alarm { bitmasks }, Some(dm_proto::value::Kind::Int32Value(v))) => {
                let bits = *v as u32;
                bitmasks.iter().any(|mask| bits & mask == bits)
            }
            _ => false,
        }
    }

    /// Element-wise clamp for range constraints, applied by `fromProto` at
    /// commit time (never during validation).
    pub fn apply(&self, value: &mut Value) {
        match (self, &mut value.kind) {
            (
                Constraint::IntRange { min, max },
                Some(dm_proto::value::Kind::Int32Value(v)),
            ) => {
                *v = (*v).clamp(*min, *max);
            }
            (
                Constraint::FloatRange { min, max },
                Some(dm_proto::value::Kind::Float32Value(v)),
            ) => {
                *v = v.clamp(*min, *max);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_proto::value::Kind;

    fn int(v: i32) -> Value {
        Value {
            kind: Some(Kind::Int32Value(v)),
        }
    }

    #[test]
    fn int_range_clamps_out_of_bounds_values() {
        let c = Constraint::IntRange { min: 0, max: 10 };
        let mut v = int(42);
        c.apply(&mut v);
        assert_eq!(v.kind, Some(Kind::Int32Value(10)));
    }

    #[test]
    fn int_range_satisfied_checks_bounds_without_mutating() {
        let c = Constraint::IntRange { min: 0, max: 10 };
        assert!(c.satisfied(&int(5)));
        assert!(!c.satisfied(&int(42)));
    }

    #[test]
    fn string_choice_is_not_a_range_constraint() {
        let c = Constraint::StringChoice {
            choices: vec!["a".into(), "b".into()],
        };
        assert!(!c.is_range());
    }
}
