//! Registration validation.
//!
//! Checks a descriptor before it is stored:
//! - Non-empty id and provider name
//! - At least one data category
//! - Reliability is a finite number in `[0, 1]`
//! - Rate limit, when given, allows at least one request

use log::warn;

use crate::errors::RoutingError;
use crate::models::BackendDescriptor;

/// Validate a descriptor for registration.
///
/// Returns the first problem found. Nothing is registered on error.
pub fn validate_descriptor(descriptor: &BackendDescriptor) -> Result<(), RoutingError> {
    if descriptor.id.trim().is_empty() {
        return Err(RoutingError::Validation(
            "Backend id must not be empty".to_string(),
        ));
    }

    if descriptor.provider.trim().is_empty() {
        return Err(RoutingError::Validation(format!(
            "Backend '{}' has no provider name",
            descriptor.id
        )));
    }

    if descriptor.categories.is_empty() {
        return Err(RoutingError::Validation(format!(
            "Backend '{}' declares no data categories",
            descriptor.id
        )));
    }

    if !descriptor.reliability.is_finite() || !(0.0..=1.0).contains(&descriptor.reliability) {
        return Err(RoutingError::Validation(format!(
            "Backend '{}' reliability {} is outside [0, 1]",
            descriptor.id, descriptor.reliability
        )));
    }

    if let Some(limit) = &descriptor.rate_limit {
        if limit.requests_per_minute == 0 || limit.burst == 0 {
            return Err(RoutingError::Validation(format!(
                "Backend '{}' rate limit must allow at least one request",
                descriptor.id
            )));
        }
    }

    if descriptor.reliability == 0.0 {
        warn!(
            "Backend '{}' registered with zero reliability; it will rank last",
            descriptor.id
        );
    }

    Ok(())
}
