use super::StageError;
use crate::core::units::{Quantity, Unit};
use std::collections::BTreeMap;

/// Named parameter values handed to a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    values: BTreeMap<String, Quantity>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Quantity) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: Quantity) {
        self.values.insert(name.to_string(), value);
    }

    /// Parses `"<number> [units]"` and stores the result under `name`.
    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<(), StageError> {
        let quantity: Quantity = value.parse()?;
        self.set(name, quantity);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn value(&self, name: &str) -> Result<&Quantity, StageError> {
        self.values
            .get(name)
            .ok_or_else(|| StageError::MissingParam(name.to_string()))
    }

    pub fn m_as(&self, name: &str, unit: &Unit) -> Result<f64, StageError> {
        Ok(self.value(name)?.m_as(unit)?)
    }

    pub fn dimensionless(&self, name: &str) -> Result<f64, StageError> {
        self.m_as(name, &Unit::dimensionless())
    }

    /// Fails unless the set holds exactly the `expected` names.
    pub fn require_exactly(&self, stage: &str, expected: &[&str]) -> Result<(), StageError> {
        let missing: Vec<String> = expected
            .iter()
            .filter(|n| !self.values.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        let unexpected: Vec<String> = self
            .values
            .keys()
            .filter(|k| !expected.contains(&k.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        Err(StageError::Params {
            stage: stage.to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            missing,
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_exactly_reports_missing_and_unexpected_together() {
        let params = ParamSet::new()
            .with("a", Quantity::dimensionless(1.0))
            .with("c", Quantity::dimensionless(2.0));
        match params.require_exactly("test", &["a", "b"]) {
            Err(StageError::Params {
                missing,
                unexpected,
                ..
            }) => {
                assert_eq!(missing, vec!["b"]);
                assert_eq!(unexpected, vec!["c"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(params.require_exactly("test", &["a", "c"]).is_ok());
    }

    #[test]
    fn m_as_converts_units() {
        let mut params = ParamSet::new();
        params.set_from_str("energy_pivot", "24 GeV").unwrap();
        params.set_from_str("delta_index", "0.1").unwrap();
        assert_eq!(params.m_as("energy_pivot", &Unit::gev()).unwrap(), 24.0);
        assert_eq!(params.dimensionless("delta_index").unwrap(), 0.1);
        assert!(matches!(
            params.dimensionless("energy_pivot"),
            Err(StageError::Unit(_))
        ));
        assert!(matches!(
            params.value("pion_ratio"),
            Err(StageError::MissingParam(_))
        ));
    }
}
