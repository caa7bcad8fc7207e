//! Validation of URL-derived path segments.

/// Rejects segments that could escape the mirror root once joined into a
/// filesystem path. Upstream repository names are otherwise taken verbatim.
pub fn validate_path_segment(segment: &str) -> Result<(), String> {
    let is_valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);

    if is_valid {
        Ok(())
    } else {
        Err(format!("invalid repository path segment '{segment}'"))
    }
}
