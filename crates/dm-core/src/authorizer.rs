//! Scope-based authorization.
//!
//! Construction mirrors `AuthenticatedUser`: a verified JWT claim set is
//! turned into a flat list of granted permission strings (here,
//! device-model scopes) rather than re-verifying any signature, since
//! signature verification happens upstream of this crate.

use std::collections::HashSet;

use crate::error::DmStatus;
use crate::scope::Scope;

/// Anything that can be authorization-checked: a `ParamDescriptor`, a
/// `Command`, or a bare `(Scope, read_only)` pair.
pub trait Authorizable {
    fn scope(&self) -> Scope;
    fn read_only(&self) -> bool;
}

impl Authorizable for (Scope, bool) {
    fn scope(&self) -> Scope {
        self.0
    }
    fn read_only(&self) -> bool {
        self.1
    }
}

/// Claim set a request was authenticated with. The `scopes` claim (or
/// Keycloak-style `realm_access.roles`) is expected to enumerate permission
/// strings like `"operate"` or `"admin:w"`.
#[derive(Clone, Debug)]
pub struct ClaimSet {
    granted: HashSet<String>,
}

impl ClaimSet {
    /// Parse a verified claim set (already signature-checked upstream) into
    /// the flat permission-string set the `Authorizer` consumes.
    ///
    /// Fails `UNAUTHENTICATED` only here, at construction. Permission checks
    /// themselves never fail afterward; they just return booleans.
    pub fn from_claims(claims: &serde_json::Value) -> Result<Self, DmStatus> {
        let mut granted = HashSet::new();
        let scopes = claims
            .get("scope")
            .and_then(|v| v.as_str())
            .map(|s| s.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .or_else(|| {
                claims.get("scopes").and_then(|v| v.as_array()).map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
            })
            .or_else(|| {
                claims
                    .get("realm_access")
                    .and_then(|v| v.get("roles"))
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str())
                            .map(str::to_string)
                            .collect()
                    })
            });

        match scopes {
            Some(list) => {
                granted.extend(list);
                Ok(Self { granted })
            }
            None => Err(DmStatus::new(
                crate::error::StatusCode::Unauthenticated,
                "Claim set carries no recognizable scope claim",
            )),
        }
    }

    pub fn contains(&self, perm: &str) -> bool {
        self.granted.contains(perm)
    }
}

/// Decides read/write permission against a resource's declared scope and
/// read-only flag.
#[derive(Clone, Debug)]
pub enum Authorizer {
    Disabled,
    Claims(ClaimSet),
}

impl Authorizer {
    /// `kAuthzDisabled` — returns true for every read and every
    /// non-read-only write.
    pub fn disabled() -> Self {
        Authorizer::Disabled
    }

    pub fn from_claims(claims: &serde_json::Value) -> Result<Self, DmStatus> {
        Ok(Authorizer::Claims(ClaimSet::from_claims(claims)?))
    }

    /// Set-membership check against a raw permission string
    /// (`"<scope>"` or `"<scope>:w"`).
    pub fn has_authz(&self, perm: &str) -> bool {
        match self {
            Authorizer::Disabled => true,
            Authorizer::Claims(claims) => claims.contains(perm),
        }
    }

    /// `readAuthz(x)` ⇔ client holds either `x.scope` or `x.scope:w`.
    pub fn read_authz(&self, x: &impl Authorizable) -> bool {
        if matches!(self, Authorizer::Disabled) {
            return true;
        }
        self.has_authz(&x.scope().read_perm()) || self.has_authz(&x.scope().write_perm())
    }

    /// `writeAuthz(x)` ⇔ `x` is not read-only **and** client holds `x.scope:w`.
    pub fn write_authz(&self, x: &impl Authorizable) -> bool {
        if x.read_only() {
            return false;
        }
        if matches!(self, Authorizer::Disabled) {
            return true;
        }
        self.has_authz(&x.scope().write_perm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(scopes: &[&str]) -> Authorizer {
        let value = serde_json::json!({ "scopes": scopes });
        Authorizer::from_claims(&value).unwrap()
    }

    #[test]
    fn write_authz_requires_not_read_only_and_write_scope() {
        let a = claims(&["operate:w"]);
        assert!(a.write_authz(&(Scope::Operate, false)));
        assert!(!a.write_authz(&(Scope::Operate, true)));
        assert!(!a.write_authz(&(Scope::Config, false)));
    }

    #[test]
    fn read_authz_accepts_read_or_write_scope() {
        let read_only = claims(&["monitor"]);
        assert!(read_only.read_authz(&(Scope::Monitor, false)));
        let write_only = claims(&["monitor:w"]);
        assert!(write_only.read_authz(&(Scope::Monitor, false)));
        let neither = claims(&["admin"]);
        assert!(!neither.read_authz(&(Scope::Monitor, false)));
    }

    #[test]
    fn disabled_authorizer_allows_all_reads_and_non_read_only_writes() {
        let a = Authorizer::disabled();
        assert!(a.read_authz(&(Scope::Admin, true)));
        assert!(a.write_authz(&(Scope::Admin, false)));
        assert!(!a.write_authz(&(Scope::Admin, true)));
    }

    #[test]
    fn from_claims_rejects_unrecognized_claim_shape() {
        let value = serde_json::json!({ "sub": "abc" });
        assert!(Authorizer::from_claims(&value).is_err());
    }

    #[test]
    fn keycloak_realm_access_roles_are_recognized() {
        let value = serde_json::json!({ "realm_access": { "roles": ["admin:w"] } });
        let a = Authorizer::from_claims(&value).unwrap();
        assert!(a.has_authz("admin:w"));
    }
}
