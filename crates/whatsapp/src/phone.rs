use courier_channels::BackendError;

/// Reduce a phone identifier to its digits (`+1 (555) 123-4567` → `15551234567`).
///
/// The Cloud API wants bare international numbers without `+` or separators.
pub fn normalize_recipient(to: &str) -> Result<String, BackendError> {
    let digits: String = to.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(BackendError::InvalidRecipient(to.to_string()));
    }
    Ok(digits)
}
