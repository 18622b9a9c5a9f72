/// Measurement unit conversion for streamflow values.
///
/// Observed and predicted series frequently arrive in different discharge
/// units (USGS reports ft^3/s, NWM output is m^3/s), so the evaluator
/// normalizes predictions to the observation unit before scoring. Only the
/// discharge units the data sources actually emit are supported; anything
/// else is an error rather than a silent passthrough.

use crate::errors::EvaluationError;

/// Cubic feet per second in one cubic meter per second.
pub const CFS_PER_CMS: f64 = 35.314666721;

/// Canonical unit spellings, to which all synonyms are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    CubicMetersPerSecond,
    CubicFeetPerSecond,
    ThousandCubicFeetPerSecond,
}

impl Unit {
    /// Value of one of this unit, expressed in ft^3/s.
    fn cfs_factor(self) -> f64 {
        match self {
            Unit::CubicMetersPerSecond => CFS_PER_CMS,
            Unit::CubicFeetPerSecond => 1.0,
            Unit::ThousandCubicFeetPerSecond => 1000.0,
        }
    }
}

/// Resolve a unit name, accepting the NetCDF-style spellings ("m3 s-1"),
/// slash spellings ("ft3/s"), caret spellings ("m^3/s"), and the common
/// named aliases (cfs/CFS/KCFS/kcfs/cms/CMS).
fn resolve(name: &str) -> Result<Unit, EvaluationError> {
    let normalized = name.trim().to_lowercase();
    match normalized.as_str() {
        "cms" | "m3 s-1" | "m3/s" | "m^3/s" => Ok(Unit::CubicMetersPerSecond),
        "cfs" | "ft3 s-1" | "ft3/s" | "ft^3/s" => Ok(Unit::CubicFeetPerSecond),
        "kcfs" | "kft3/s" | "kft^3/s" => Ok(Unit::ThousandCubicFeetPerSecond),
        _ => Err(EvaluationError::UnknownUnit(name.to_string())),
    }
}

/// Whether two unit names refer to the same unit.
pub fn same_unit(left: &str, right: &str) -> bool {
    match (resolve(left), resolve(right)) {
        (Ok(left), Ok(right)) => left == right,
        // Unknown units still compare equal on identical spelling, so a
        // run whose sources agree on an exotic unit can skip conversion.
        _ => left.trim().eq_ignore_ascii_case(right.trim()),
    }
}

/// Convert a value between discharge units.
pub fn convert(value: f64, from: &str, to: &str) -> Result<f64, EvaluationError> {
    let from = resolve(from)?;
    let to = resolve(to)?;
    if from == to {
        return Ok(value);
    }
    Ok(value * from.cfs_factor() / to.cfs_factor())
}
