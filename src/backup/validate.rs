//! Validation functions for configuration values.
//!
//! Used through `#[validate(custom(function = ...))]` on the task
//! configuration structs.

use validator::ValidationError;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_delimiter<S: AsRef<str>>(delimiter: S) -> Result<(), ValidationError> {
    let delimiter = delimiter.as_ref();
    if delimiter.is_empty() || delimiter.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("InvalidDelimiter").with_message(
            format!("delimiter {delimiter:?} must be non-empty and contain no whitespace").into(),
        ));
    }

    Ok(())
}

/// Module and domain names become path segments of the storage layout.
pub fn validate_name_segment<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ValidationError::new("InvalidName")
            .with_message(format!("{name:?} is not a valid single path segment").into()));
    }

    Ok(())
}

pub fn validate_name_set(names: &HashSet<Arc<str>>) -> Result<(), ValidationError> {
    names.iter().try_for_each(validate_name_segment)
}
