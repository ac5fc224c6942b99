//! Domain model module declarations.

pub mod process;
pub mod session;

/// Whether a session kind name is usable as a registry key, multiplexer
/// session prefix, and file-name component.
#[must_use]
pub fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
