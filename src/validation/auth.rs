use crate::error::{AppError, Result};

/// Validates a portal user id (the portal username, often an email address).
///
/// # Arguments
///
/// * `user_id` - The user id to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the user id is valid.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }

    if user_id.len() > 255 {
        return Err(AppError::Validation(
            "userId must be at most 255 characters".to_string(),
        ));
    }

    if user_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::Validation(
            "userId cannot contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a portal password before it is sent anywhere.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(AppError::Validation("password is required".to_string()));
    }

    if password.len() > 128 {
        return Err(AppError::Validation(
            "password must be at most 128 characters".to_string(),
        ));
    }

    Ok(())
}
