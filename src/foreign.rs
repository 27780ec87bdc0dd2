use crate::config::ShimConfig;
use crate::error::Result;

/// The msos engine as seen from the extension: one text-in, text-out call.
pub trait ForeignObject {
    fn echo(&self, message: &str) -> Result<String>;
}

/// Produces the foreign object. Runs at most once per extension load.
pub trait ObjectFactory {
    /// What the factory may hand to the engine, the debugger client in
    /// production.
    type Host: ?Sized;

    fn create(&self, config: &ShimConfig, host: &Self::Host)
        -> Result<Box<dyn ForeignObject + Send>>;
}
