//! Schema and wire format versioning.

/// Current schema version for JSON metadata streams (directories, machine
/// table, existence map).
///
/// Follows semver: MAJOR.MINOR.PATCH
/// - MAJOR: Breaking changes (field removals, type changes)
/// - MINOR: Additive changes (new optional fields)
/// - PATCH: Bug fixes, documentation
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version stamped into spatial cache keys for segment streams.
///
/// Bumping it lets a migration write new-format segments next to old ones
/// without key collisions.
pub const SEGMENT_FORMAT_VERSION: i64 = 1;

/// Version byte of the immutable (read-optimized) segment encoding.
pub const IMMUTABLE_SEGMENT_VERSION: u8 = 1;

/// Check if a schema version is compatible with current.
pub fn is_compatible(version: &str) -> bool {
    let major = |v: &str| {
        v.split('.')
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0)
    };

    major(SCHEMA_VERSION) == major(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_major_compatible() {
        assert!(is_compatible("1.0.0"));
        assert!(is_compatible("1.4.2"));
    }

    #[test]
    fn test_different_major_incompatible() {
        assert!(!is_compatible("0.9.0"));
        assert!(!is_compatible("2.0.0"));
    }
}
