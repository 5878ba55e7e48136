//! Platform adapter seam.
//!
//! Environment-specific workaround logic (feature detection, runtime
//! sniffing) lives entirely outside the engine. The engine queries the
//! adapter exactly once at construction and exposes the answers to
//! transport drivers.

/// Capability queries for the platform the client runs on.
pub trait PlatformAdapter: Send + Sync + 'static {
    /// Whether the preferred transport of the embedding application is known
    /// to misbehave on this platform and a fallback should be used instead.
    fn should_avoid_preferred_transport(&self) -> bool {
        false
    }
}

/// Adapter for platforms without quirks: every query returns the default.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlatform;

impl PlatformAdapter for DefaultPlatform {}
