//! bucket-fs shared library.

/// The lazy-hydration caching filesystem.
pub mod fs;
/// Remote object-store access.
pub mod store;
