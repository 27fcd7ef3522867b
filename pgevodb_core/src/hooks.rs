use crate::errors::HookError;


/// Runs a bundle's `pre_hooks`/`post_hooks` commands.
///
/// Subprocess handling is outside the engine; the executor only cares
/// whether a command succeeded. Hooks run inside the advisory-lock scope,
/// pre-hooks before the migration's state is first touched and post-hooks
/// after its scripts have committed.
pub trait HookRunner {
    fn run_hook(&self, command: &str) -> Result<(), HookError>;
}


/// A [`HookRunner`] for contexts without hook support (tests, dry runs).
pub struct NoopHookRunner;

impl HookRunner for NoopHookRunner {
    fn run_hook(&self, _command: &str) -> Result<(), HookError> {
        Ok(())
    }
}
