use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT_M_PER_S: f64 = 299_792_458.0;
/// Reduced Planck constant in GeV·s.
pub const REDUCED_PLANCK_GEV_S: f64 = 6.582_119_569e-25;

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*(.*?)\s*$")
        .expect("quantity pattern is a valid regex")
});

#[derive(Debug, Error, PartialEq, Clone)]
pub enum UnitError {
    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("Cannot convert '{from}' to '{to}': incompatible dimensions")]
    IncompatibleUnits { from: String, to: String },
    #[error("Cannot parse '{0}' as a quantity")]
    InvalidQuantity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Dimensionless,
    Energy,
    EnergySquared,
    Length,
    Time,
    Angle,
}

/// A physical unit expressed as a scale to the base unit of its dimension.
///
/// Base units are GeV, eV², m, s and rad.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    name: String,
    dimension: Dimension,
    scale: f64,
}

impl Unit {
    fn new(name: &str, dimension: Dimension, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            scale,
        }
    }

    pub fn dimensionless() -> Self {
        Self::new("dimensionless", Dimension::Dimensionless, 1.0)
    }

    pub fn gev() -> Self {
        Self::new("GeV", Dimension::Energy, 1.0)
    }

    pub fn meter() -> Self {
        Self::new("m", Dimension::Length, 1.0)
    }

    pub fn second() -> Self {
        Self::new("s", Dimension::Time, 1.0)
    }

    pub fn nanosecond() -> Self {
        Self::new("ns", Dimension::Time, 1e-9)
    }

    pub fn radian() -> Self {
        Self::new("radian", Dimension::Angle, 1.0)
    }

    pub fn degree() -> Self {
        Self::new("degree", Dimension::Angle, std::f64::consts::PI / 180.0)
    }

    pub fn parse(s: &str) -> Result<Self, UnitError> {
        let normalized: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let compact = normalized.replace(' ', "");
        let unit = match compact.as_str() {
            "" | "dimensionless" | "1" => Self::dimensionless(),
            "GeV" | "gigaelectron_volt" => Self::gev(),
            "MeV" | "megaelectron_volt" => Self::new("MeV", Dimension::Energy, 1e-3),
            "TeV" | "teraelectron_volt" => Self::new("TeV", Dimension::Energy, 1e3),
            "eV" | "electron_volt" => Self::new("eV", Dimension::Energy, 1e-9),
            "eV**2" | "electron_volt**2" | "eV^2" => {
                Self::new("electron_volt ** 2", Dimension::EnergySquared, 1.0)
            }
            "m" | "meter" | "metre" => Self::meter(),
            "km" | "kilometer" | "kilometre" => Self::new("km", Dimension::Length, 1e3),
            "cm" | "centimeter" | "centimetre" => Self::new("cm", Dimension::Length, 1e-2),
            "s" | "second" => Self::second(),
            "ns" | "nanosecond" => Self::nanosecond(),
            "ms" | "millisecond" => Self::new("ms", Dimension::Time, 1e-3),
            "degree" | "deg" => Self::degree(),
            "radian" | "rad" => Self::radian(),
            _ => return Err(UnitError::UnknownUnit(s.to_string())),
        };
        Ok(unit)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dimension == Dimension::Dimensionless
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A magnitude tagged with its unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub magnitude: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: Unit) -> Self {
        Self { magnitude, unit }
    }

    pub fn dimensionless(magnitude: f64) -> Self {
        Self::new(magnitude, Unit::dimensionless())
    }

    /// Returns the magnitude expressed in `target`.
    pub fn m_as(&self, target: &Unit) -> Result<f64, UnitError> {
        if self.unit.dimension != target.dimension {
            return Err(UnitError::IncompatibleUnits {
                from: self.unit.name.clone(),
                to: target.name.clone(),
            });
        }
        Ok(self.magnitude * self.unit.scale / target.scale)
    }

    pub fn to(&self, target: &Unit) -> Result<Quantity, UnitError> {
        Ok(Quantity::new(self.m_as(target)?, target.clone()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

impl FromStr for Quantity {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = parse_quantity_string(s)?;
        Ok(Quantity::new(parsed.value, Unit::parse(&parsed.units)?))
    }
}

/// The two halves of a serialized quantity such as `"2.5e-3 electron_volt ** 2"`.
///
/// Units are kept verbatim so that labels can be produced for units this crate
/// does not know how to convert.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuantity {
    pub value: f64,
    pub units: String,
}

pub fn parse_quantity_string(s: &str) -> Result<ParsedQuantity, UnitError> {
    let caps = QUANTITY_RE
        .captures(s)
        .ok_or_else(|| UnitError::InvalidQuantity(s.to_string()))?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| UnitError::InvalidQuantity(s.to_string()))?;
    let units = caps.get(2).map_or("", |m| m.as_str()).trim();
    Ok(ParsedQuantity {
        value,
        units: if units.is_empty() {
            "dimensionless".to_string()
        } else {
            units.to_string()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn parse_quantity_string_splits_value_and_units() {
        let parsed = parse_quantity_string("2.5e-3 electron_volt ** 2").unwrap();
        assert_eq!(parsed.value, 2.5e-3);
        assert_eq!(parsed.units, "electron_volt ** 2");
    }

    #[test]
    fn parse_quantity_string_defaults_bare_numbers_to_dimensionless() {
        let parsed = parse_quantity_string("-0.45").unwrap();
        assert_eq!(parsed.value, -0.45);
        assert_eq!(parsed.units, "dimensionless");
    }

    #[test]
    fn parse_quantity_string_rejects_text() {
        assert!(matches!(
            parse_quantity_string("degree"),
            Err(UnitError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn energy_conversion_scales_magnitude() {
        let q: Quantity = "1500 MeV".parse().unwrap();
        assert!((q.m_as(&Unit::gev()).unwrap() - 1.5).abs() < TOLERANCE);
    }

    #[test]
    fn time_conversion_handles_nanoseconds() {
        let q = Quantity::new(3.0, Unit::nanosecond());
        assert!((q.m_as(&Unit::second()).unwrap() - 3e-9).abs() < TOLERANCE);
    }

    #[test]
    fn incompatible_conversion_is_an_error() {
        let q = Quantity::new(1.0, Unit::gev());
        assert!(matches!(
            q.m_as(&Unit::meter()),
            Err(UnitError::IncompatibleUnits { .. })
        ));
    }

    #[test]
    fn squared_energy_spellings_are_equivalent() {
        let a = Unit::parse("electron_volt ** 2").unwrap();
        let b = Unit::parse("eV**2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_unit_is_reported() {
        assert_eq!(
            Unit::parse("furlong"),
            Err(UnitError::UnknownUnit("furlong".to_string()))
        );
    }
}
