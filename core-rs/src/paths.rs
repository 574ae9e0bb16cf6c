//! Path component validation
//!
//! Target identifiers and bundle identifiers both become directory names
//! inside a storage root.

/// True if `name` can be used as a single, visible directory entry name.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
