use crate::TransferError;

/// Longest entry name the service stores, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validates a user-visible entry name before anything is sent.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - Path separators (`/` or `\`)
/// - The relative components `.` and `..`
/// - Control characters
/// - Names longer than [`MAX_NAME_LEN`] bytes
pub fn validate_entry_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "relative component not allowed: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidName(
            "control characters not allowed".into(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "name is {} bytes, limit is {MAX_NAME_LEN}",
            name.len()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("   ").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_entry_name("a/b.txt").is_err());
        assert!(validate_entry_name("..\\evil").is_err());
    }

    #[test]
    fn rejects_relative_components() {
        assert!(validate_entry_name(".").is_err());
        assert!(validate_entry_name("..").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(validate_entry_name("bad\nname").is_err());
        assert!(validate_entry_name("nul\0").is_err());
    }

    #[test]
    fn rejects_overlong_names() {
        assert!(validate_entry_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_entry_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_entry_name("report.pdf").is_ok());
        assert!(validate_entry_name("..hidden").is_ok());
        assert!(validate_entry_name("photo 2024 (1).jpg").is_ok());
        assert!(validate_entry_name("résumé.docx").is_ok());
    }
}
