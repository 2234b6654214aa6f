use crate::criteria::RatingBand;
use crate::error::ConfigurationError;

/// Highest band that admits `score`.
///
/// Expects bands validated by [`check_bands`]; a score equal to a band's
/// lower bound falls in that band unless the bound is exclusive. Returns
/// `None` below the lowest band.
pub fn rate(score: f64, bands: &[RatingBand]) -> Option<&RatingBand> {
    bands.iter().rev().find(|band| band.admits(score))
}

pub fn check_bands(
    scope: &str,
    bands: &[RatingBand],
    require_non_empty: bool,
) -> Result<(), ConfigurationError> {
    if require_non_empty && bands.is_empty() {
        return Err(ConfigurationError::EmptyBands {
            scope: scope.to_string(),
        });
    }
    for (index, band) in bands.iter().enumerate() {
        // `>=50` followed by `>50` is a valid split at the same bound.
        let ascending = match index {
            0 => true,
            _ => {
                let previous = &bands[index - 1];
                band.lower_bound > previous.lower_bound
                    || (band.lower_bound == previous.lower_bound
                        && band.exclusive
                        && !previous.exclusive)
            }
        };
        if !band.lower_bound.is_finite() || !ascending {
            return Err(ConfigurationError::BandsNotAscending {
                scope: scope.to_string(),
                index,
                label: band.label.clone(),
            });
        }
    }
    Ok(())
}
