//! Price series validation
//!
//! The simulator trusts its input series only after these checks pass:
//! strictly increasing dates, finite values, positive closes.

use crate::error::{BacktestError, Result};
use crate::types::PricePoint;

/// Validate the points the simulation will touch.
///
/// Rejects non-finite closes/volumes, non-positive closes, negative volumes,
/// and dates that are not strictly increasing (duplicates included).
pub fn validate(points: &[PricePoint]) -> Result<()> {
    for (i, point) in points.iter().enumerate() {
        if !point.close.is_finite() {
            return Err(BacktestError::DataIntegrity(format!(
                "non-finite close {} at {}",
                point.close, point.date
            )));
        }
        if point.close <= 0.0 {
            return Err(BacktestError::DataIntegrity(format!(
                "non-positive close {} at {}",
                point.close, point.date
            )));
        }
        if !point.volume.is_finite() || point.volume < 0.0 {
            return Err(BacktestError::DataIntegrity(format!(
                "invalid volume {} at {}",
                point.volume, point.date
            )));
        }
        if i > 0 && points[i - 1].date >= point.date {
            return Err(BacktestError::DataIntegrity(format!(
                "dates not strictly increasing: {} followed by {}",
                points[i - 1].date,
                point.date
            )));
        }
    }
    Ok(())
}
