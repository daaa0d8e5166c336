//! Validation rules for operator input in the authoring dialog.
//!
//! All failures here are recoverable: the dialog reports the error and
//! re-prompts the same step without advancing.

use crate::model::MAX_EVENT_NAME_LEN;

/// Errors produced while validating sheet rows or dialog input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A deadline cell matched neither accepted timestamp format.
    #[error("row {row}: deadline {value:?} is not in YYYY-MM-DD HH:MM:SS or YYYY-MM-DD HH:MM format")]
    MalformedDeadline {
        /// 1-based data row number.
        row: usize,
        /// The offending cell.
        value: String,
    },

    /// The event name is longer than allowed.
    #[error("event name is longer than {max} characters")]
    EventNameTooLong {
        /// Maximum allowed length.
        max: usize,
    },

    /// The event name contains a forbidden character.
    #[error("event name must not contain {0:?}")]
    EventNameIllegalChar(char),

    /// The lead time is not an integer.
    #[error("lead time {0:?} is not a whole number")]
    LeadTimeNotNumeric(String),

    /// The lead time is zero or negative.
    #[error("lead time must be positive, got {0}")]
    LeadTimeNotPositive(i64),

    /// The lead time does not fit the stored range.
    #[error("lead time {0} is too large")]
    LeadTimeOutOfRange(i64),
}

/// Checks an event keyname: at most [`MAX_EVENT_NAME_LEN`] characters, no `/`.
///
/// # Errors
///
/// Returns [`ValidationError::EventNameTooLong`] or
/// [`ValidationError::EventNameIllegalChar`].
pub fn validate_event_name(name: &str) -> Result<(), ValidationError> {
    if name.chars().count() > MAX_EVENT_NAME_LEN {
        return Err(ValidationError::EventNameTooLong {
            max: MAX_EVENT_NAME_LEN,
        });
    }
    if name.contains('/') {
        return Err(ValidationError::EventNameIllegalChar('/'));
    }
    Ok(())
}

/// Parses a reminder lead time in minutes. Must be a positive integer.
///
/// # Errors
///
/// Returns [`ValidationError::LeadTimeNotNumeric`] for non-integers,
/// [`ValidationError::LeadTimeNotPositive`] for zero or negative values and
/// [`ValidationError::LeadTimeOutOfRange`] for values above `u32::MAX`.
pub fn parse_lead_time(input: &str) -> Result<u32, ValidationError> {
    let trimmed = input.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ValidationError::LeadTimeNotNumeric(trimmed.to_string()))?;
    if value <= 0 {
        return Err(ValidationError::LeadTimeNotPositive(value));
    }
    u32::try_from(value).map_err(|_| ValidationError::LeadTimeOutOfRange(value))
}
