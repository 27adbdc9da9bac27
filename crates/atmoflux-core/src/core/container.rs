use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ContainerError {
    #[error("Container '{container}' has {expected} events but field '{field}' has {actual}")]
    LengthMismatch {
        container: String,
        field: String,
        expected: usize,
        actual: usize,
    },
    #[error("Container '{container}' has no field '{field}'")]
    MissingField { container: String, field: String },
    #[error("Field '{field}' in container '{container}' has width {width}, expected 1")]
    NotAColumn {
        container: String,
        field: String,
        width: usize,
    },
    #[error("Container '{container}' has no aux value '{key}'")]
    MissingAux { container: String, key: String },
    #[error("No container named '{0}'")]
    UnknownContainer(String),
}

/// Per-event data: `width` values per event, stored event-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub width: usize,
    pub data: Vec<f64>,
}

impl Field {
    pub fn column(data: Vec<f64>) -> Self {
        Self { width: 1, data }
    }

    pub fn filled(size: usize, width: usize, value: f64) -> Self {
        Self {
            width,
            data: vec![value; size * width],
        }
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, event: usize) -> &[f64] {
        &self.data[event * self.width..(event + 1) * self.width]
    }

    pub fn row_mut(&mut self, event: usize) -> &mut [f64] {
        &mut self.data[event * self.width..(event + 1) * self.width]
    }
}

/// Named set of per-event fields for one event category.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub name: String,
    size: usize,
    fields: BTreeMap<String, Field>,
    aux: BTreeMap<String, i64>,
}

impl Container {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
            fields: BTreeMap::new(),
            aux: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn insert(&mut self, key: &str, field: Field) -> Result<(), ContainerError> {
        if field.width == 0 || field.data.len() != self.size * field.width {
            return Err(ContainerError::LengthMismatch {
                container: self.name.clone(),
                field: key.to_string(),
                expected: self.size,
                actual: field.len(),
            });
        }
        self.fields.insert(key.to_string(), field);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Result<&Field, ContainerError> {
        self.fields.get(key).ok_or_else(|| self.missing(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut Field, ContainerError> {
        let container = &self.name;
        self.fields
            .get_mut(key)
            .ok_or_else(|| ContainerError::MissingField {
                container: container.clone(),
                field: key.to_string(),
            })
    }

    /// Values of a width-1 field.
    pub fn column(&self, key: &str) -> Result<&[f64], ContainerError> {
        let field = self.get(key)?;
        if field.width != 1 {
            return Err(ContainerError::NotAColumn {
                container: self.name.clone(),
                field: key.to_string(),
                width: field.width,
            });
        }
        Ok(&field.data)
    }

    pub fn set_aux_data(&mut self, key: &str, value: i64) {
        self.aux.insert(key.to_string(), value);
    }

    pub fn aux(&self, key: &str) -> Result<i64, ContainerError> {
        self.aux
            .get(key)
            .copied()
            .ok_or_else(|| ContainerError::MissingAux {
                container: self.name.clone(),
                key: key.to_string(),
            })
    }

    pub fn mark_changed(&self, key: &str) {
        trace!(container = %self.name, field = key, "Field updated");
    }

    fn missing(&self, key: &str) -> ContainerError {
        ContainerError::MissingField {
            container: self.name.clone(),
            field: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSet {
    pub name: String,
    containers: Vec<Container>,
}

impl ContainerSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            containers: Vec::new(),
        }
    }

    pub fn add_container(&mut self, container: Container) {
        self.containers.push(container);
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Result<&Container, ContainerError> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ContainerError::UnknownContainer(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.containers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_checks_event_count() {
        let mut c = Container::new("numu_cc", 3);
        assert!(c.insert("energy", Field::column(vec![1.0, 2.0, 3.0])).is_ok());
        let err = c.insert("bad", Field::column(vec![1.0])).unwrap_err();
        assert!(matches!(err, ContainerError::LengthMismatch { actual: 1, .. }));
        assert!(c.insert("flux", Field::filled(3, 2, 0.0)).is_ok());
        assert_eq!(c.get("flux").unwrap().row(2), &[0.0, 0.0]);
    }

    #[test]
    fn column_requires_width_one() {
        let mut c = Container::new("nue_cc", 2);
        c.insert("flux", Field::filled(2, 2, 1.0)).unwrap();
        assert!(matches!(
            c.column("flux"),
            Err(ContainerError::NotAColumn { width: 2, .. })
        ));
        assert!(matches!(
            c.column("energy"),
            Err(ContainerError::MissingField { .. })
        ));
    }

    #[test]
    fn aux_data_round_trip_and_missing_key() {
        let mut c = Container::new("nuebar_nc", 0);
        c.set_aux_data("nubar", -1);
        assert_eq!(c.aux("nubar"), Ok(-1));
        assert!(c.aux("flav").is_err());
    }

    #[test]
    fn container_set_preserves_insertion_order() {
        let mut set = ContainerSet::new("events");
        set.add_container(Container::new("numu_cc", 0));
        set.add_container(Container::new("nue_cc", 0));
        assert_eq!(set.names(), vec!["numu_cc", "nue_cc"]);
        assert!(set.get("nutau_cc").is_err());
    }
}
