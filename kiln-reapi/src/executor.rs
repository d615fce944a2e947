//! The boundary between this adapter and whatever actually runs an action.
//!
//! `kiln-reapi` does not know how to execute a command — that is
//! `kiln-sandbox`'s job. A server built on this crate supplies an
//! [`ActionExecutor`] that bridges `execute()` calls to a real sandbox.

use crate::error::ReapiError;
use crate::wire::ActionResult;
use kiln_hash::Action;

/// Runs an action and reports its outcome. Implementations are expected to
/// enforce `action.timeout_ms` themselves and surface a timeout as
/// `ReapiError::Timeout` rather than hanging the caller.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &Action) -> Result<ActionResult, ReapiError>;
}

/// An executor that always returns a fixed outcome, for wiring up a server
/// or client before a real sandbox-backed executor is available.
pub struct FixedExecutor(pub ActionResult);

impl ActionExecutor for FixedExecutor {
    fn execute(&self, _action: &Action) -> Result<ActionResult, ReapiError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hash::Platform;

    #[test]
    fn fixed_executor_ignores_its_input() {
        let executor = FixedExecutor(ActionResult { exit_code: 0, stdout: Vec::new(), stderr: Vec::new(), output_files: Vec::new() });
        let action = Action {
            command: vec!["true".into()],
            env: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            platform: Platform::empty(),
            timeout_ms: 1000,
            salt: None,
        };
        assert_eq!(executor.execute(&action).unwrap().exit_code, 0);
    }
}
