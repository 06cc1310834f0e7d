use std::borrow::Cow;

use validator::ValidationError;

pub fn username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();

    let err = if len < 1 || len > 31 {
        ValidationError::new("length").with_message(Cow::Borrowed(
            "Must be between 1 and 31 characters long.",
        ))
    } else if username.chars().any(|c| c.is_whitespace() || c.is_control()) {
        ValidationError::new("invalid_chars").with_message(Cow::Borrowed(
            "Must not contain whitespace or control characters.",
        ))
    } else {
        return Ok(());
    };
    Err(err)
}

pub fn password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        let err = ValidationError::new("length")
            .with_message(Cow::Borrowed("Must not be empty."));
        return Err(err);
    }

    Ok(())
}
