//! Plugin seam.
//!
//! A plugin is a named initialization hook invoked with the client once at
//! construction, after the engine is wired but before the deferred automatic
//! open. Typical plugins install transformers or subscribe to lifecycle
//! events. Names must be unique per client; registering two plugins under
//! the same name fails construction with a validation error.

use crate::Result;
use crate::connection::Client;

/// A named extension initialized at client construction.
pub trait Plugin: Send + Sync + 'static {
    /// Registry name; duplicates are rejected at construction.
    fn name(&self) -> &str;

    /// Wire the plugin up. Errors abort client construction.
    fn init(&self, client: &Client) -> Result<()>;
}
