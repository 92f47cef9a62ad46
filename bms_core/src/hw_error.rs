//! Maps `Box<dyn Error>` from trait boundaries to typed `BmsError`.
//!
//! The traits in `bms_traits` return `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `bms_hardware::HwError` downcasting.

use crate::error::BmsError;

/// Map a trait-boundary error to a typed `BmsError`.
///
/// Known hardware error types are downcast first, then string heuristics
/// apply.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BmsError {
    #[cfg(feature = "hardware-errors")]
    {
        use bms_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout | HwError::NoResponse { .. } => BmsError::Timeout,
                HwError::Io(io) => BmsError::Io(io.to_string()),
                other => BmsError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        BmsError::Timeout
    } else {
        BmsError::Hardware(s)
    }
}
