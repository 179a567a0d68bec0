//! Invocable, named resources.

use std::sync::Arc;

use crate::authorizer::{Authorizable, Authorizer};
use crate::descriptor::ParamDescriptor;
use crate::error::DmStatus;
use crate::scope::Scope;

/// A command is a param descriptor with `is_command = true` plus an
/// optional registered handler. Commands with no handler still appear in
/// device enumeration but fail `UNIMPLEMENTED` when executed, mirroring an
/// `IParam` that declares a command oid without a bound implementation.
#[derive(Clone)]
pub struct Command {
    pub descriptor: Arc<ParamDescriptor>,
    handler: Option<Arc<dyn Fn(dm_proto::Value) -> Result<dm_proto::Value, DmStatus> + Send + Sync>>,
}

impl Authorizable for Command {
    fn scope(&self) -> Scope {
        self.descriptor.scope
    }
    fn read_only(&self) -> bool {
        self.descriptor.read_only
    }
}

impl Command {
    pub fn new(descriptor: Arc<ParamDescriptor>) -> Self {
        Self {
            descriptor,
            handler: None,
        }
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(dm_proto::Value) -> Result<dm_proto::Value, DmStatus> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn is_registered(&self) -> bool {
        self.handler.is_some()
    }

    /// Runs the bound handler after an `writeAuthz` check. `PERMISSION_DENIED`
    /// if unauthorized, `UNIMPLEMENTED` if no handler has been registered.
    pub fn execute(&self, arg: dm_proto::Value, authz: &Authorizer) -> Result<dm_proto::Value, DmStatus> {
        if !authz.write_authz(&self.descriptor) {
            return Err(DmStatus::permission_denied(format!(
                "Not authorized to execute command {}",
                self.descriptor.oid
            )));
        }
        match &self.handler {
            Some(f) => f(arg),
            None => Err(DmStatus::unimplemented(format!(
                "Command {} has no registered implementation",
                self.descriptor.oid
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dm_proto::value::Kind;
    use dm_proto::{ParamType, Value};

    fn descriptor() -> Arc<ParamDescriptor> {
        Arc::new(
            ParamDescriptor::new("/doThing", ParamType::Empty, Scope::Operate).is_command_flag(),
        )
    }

    #[test]
    fn unregistered_command_is_unimplemented() {
        let cmd = Command::new(descriptor());
        let authz = Authorizer::disabled();
        let err = cmd
            .execute(Value { kind: Some(Kind::Empty(())) }, &authz)
            .unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::Unimplemented);
    }

    #[test]
    fn registered_command_runs_handler() {
        let cmd = Command::new(descriptor()).with_handler(|_| {
            Ok(Value {
                kind: Some(Kind::StringValue("done".into())),
            })
        });
        let authz = Authorizer::disabled();
        let result = cmd
            .execute(Value { kind: Some(Kind::Empty(())) }, &authz)
            .unwrap();
        assert_eq!(
            result,
            Value {
                kind: Some(Kind::StringValue("done".into()))
            }
        );
    }

    #[test]
    fn execute_denied_without_write_scope() {
        let cmd = Command::new(descriptor()).with_handler(|v| Ok(v));
        let authz = Authorizer::from_claims(&serde_json::json!({ "scopes": ["operate"] })).unwrap();
        let err = cmd
            .execute(Value { kind: Some(Kind::Empty(())) }, &authz)
            .unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::PermissionDenied);
    }
}
