/// Implemented on a configuration type that can be validated or resolved,
/// where that process can fail.
pub trait TryResolve {
    type Resolved;
    type Error;

    /// Attempt to resolve the configuration into its [`Self::Resolved`] type.
    fn try_resolve(self) -> Result<Self::Resolved, Self::Error>;
}


/// Implemented on a configuration type that can be validated or resolved
/// with some additional user-provided context, where that process can fail.
pub trait TryResolveWithContext {
    type Context;
    type Resolved;
    type Error;

    /// Attempt to resolve the configuration into its [`Self::Resolved`] type
    /// using some `context`.
    fn try_resolve_with_context(self, context: Self::Context)
        -> Result<Self::Resolved, Self::Error>;
}
