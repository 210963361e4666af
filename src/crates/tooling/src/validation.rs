//! Identifier validation shared by the registry and the shell

use crate::{Result, ToolingError};

/// Validate a component or CI identifier
///
/// Identifiers are lower-case slugs: ASCII lower-case letters and digits
/// separated by single hyphens, starting with a letter.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ToolingError::Validation("Identifier is empty".to_string()));
    }
    if id.len() > 64 {
        return Err(ToolingError::Validation(format!(
            "Identifier too long ({} chars, max 64): {}",
            id.len(),
            id
        )));
    }
    let mut chars = id.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_lowercase() {
        return Err(ToolingError::Validation(format!(
            "Identifier must start with a lower-case letter: {}",
            id
        )));
    }
    let mut prev_hyphen = false;
    for c in id.chars() {
        match c {
            'a'..='z' | '0'..='9' => prev_hyphen = false,
            '-' => {
                if prev_hyphen {
                    return Err(ToolingError::Validation(format!(
                        "Identifier contains consecutive hyphens: {}",
                        id
                    )));
                }
                prev_hyphen = true;
            }
            _ => {
                return Err(ToolingError::Validation(format!(
                    "Identifier contains invalid character {:?}: {}",
                    c, id
                )))
            }
        }
    }
    if id.ends_with('-') {
        return Err(ToolingError::Validation(format!(
            "Identifier ends with a hyphen: {}",
            id
        )));
    }
    Ok(())
}

/// Validate a human-facing display name (non-empty, printable, bounded)
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ToolingError::Validation("Name is empty".to_string()));
    }
    if name.len() > 128 {
        return Err(ToolingError::Validation(format!(
            "Name too long ({} chars, max 128)",
            name.len()
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ToolingError::Validation("Name contains control characters".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["apollo", "ci-worker-3", "a", "team-chat"] {
            assert!(validate_id(id).is_ok(), "expected valid: {}", id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", "Apollo", "3pollo", "a--b", "a-", "a_b", "a b", "-a"] {
            assert!(validate_id(id).is_err(), "expected invalid: {}", id);
        }
    }

    #[test]
    fn test_names() {
        assert!(validate_name("Apollo Prediction Service").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name("bad\x07name").is_err());
    }
}
