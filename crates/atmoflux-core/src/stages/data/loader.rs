use crate::core::container::{Container, ContainerError, ContainerSet, Field};
use crate::core::cuts::Cut;
use crate::stages::config::{LoaderConfig, VariableSource};
use crate::stages::{Stage, StageError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Column naming the event category of each row.
pub const GROUP_COLUMN: &str = "group";

/// Events read from one or more CSV files, grouped by category in order of
/// first appearance.
struct RawEvents {
    columns: Vec<String>,
    groups: Vec<String>,
    data: BTreeMap<String, (usize, Vec<Vec<f64>>)>,
}

impl RawEvents {
    fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            groups: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    fn push(&mut self, group: &str, values: Vec<f64>) {
        if !self.data.contains_key(group) {
            self.groups.push(group.to_string());
            self.data.insert(
                group.to_string(),
                (0, vec![Vec::new(); self.columns.len()]),
            );
        }
        if let Some((count, columns)) = self.data.get_mut(group) {
            *count += 1;
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }
    }

    fn into_containers(self) -> Result<Vec<Container>, ContainerError> {
        let RawEvents {
            columns,
            groups,
            mut data,
        } = self;
        groups
            .into_iter()
            .map(|group| {
                let (size, values) = data.remove(&group).unwrap_or_default();
                let mut container = Container::new(&group, size);
                for (name, column) in columns.iter().zip(values) {
                    container.insert(name, Field::column(column))?;
                }
                Ok(container)
            })
            .collect()
    }
}

fn keep_event(rng: &mut StdRng, fraction: Option<f64>, keep_inverse: bool) -> bool {
    match fraction {
        None => true,
        Some(fraction) => {
            let draw: f64 = rng.random();
            (draw < fraction) != keep_inverse
        }
    }
}

fn read_event_files(config: &LoaderConfig) -> Result<RawEvents, StageError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut loaded: Option<RawEvents> = None;
    let (mut total, mut kept) = (0usize, 0usize);

    for path in &config.events_files {
        let csv_error = |source| StageError::Csv {
            path: path.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_error)?;
        let headers = reader.headers().map_err(csv_error)?.clone();
        let group_idx = headers
            .iter()
            .position(|h| h == GROUP_COLUMN)
            .ok_or_else(|| StageError::Table {
                path: path.clone(),
                message: format!("missing '{GROUP_COLUMN}' column"),
            })?;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != group_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let events = loaded.get_or_insert_with(|| RawEvents::new(columns.clone()));
        if events.columns != columns {
            return Err(StageError::Table {
                path: path.clone(),
                message: format!(
                    "columns {:?} differ from previously loaded {:?}",
                    columns, events.columns
                ),
            });
        }

        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(csv_error)?;
            total += 1;
            if !keep_event(&mut rng, config.fraction_events_to_keep, config.keep_inverse) {
                continue;
            }
            let mut values = Vec::with_capacity(columns.len());
            for (i, field) in record.iter().enumerate() {
                if i == group_idx {
                    continue;
                }
                let value = field.parse::<f64>().map_err(|_| StageError::Table {
                    path: path.clone(),
                    message: format!("line {}: '{field}' is not a number", row + 2),
                })?;
                values.push(value);
            }
            events.push(&record[group_idx], values);
            kept += 1;
        }
        debug!(path = %path.display(), "Read events file");
    }

    info!(total, kept, "Loaded events");
    loaded.ok_or_else(|| StageError::InvalidConfig("no events files given".to_string()))
}

fn select_events(container: &Container, mask: &[bool]) -> Result<Container, ContainerError> {
    let size = mask.iter().filter(|&&keep| keep).count();
    let mut selected = Container::new(&container.name, size);
    for key in container.keys() {
        let field = container.get(key)?;
        let mut data = Vec::with_capacity(size * field.width);
        for (event, _) in mask.iter().enumerate().filter(|(_, keep)| **keep) {
            data.extend_from_slice(field.row(event));
        }
        selected.insert(
            key,
            Field {
                width: field.width,
                data,
            },
        )?;
    }
    Ok(selected)
}

fn map_variables(
    container: &Container,
    data_dict: &BTreeMap<String, VariableSource>,
) -> Result<Container, ContainerError> {
    let mut mapped = Container::new(&container.name, container.size());
    for (name, source) in data_dict {
        let field = match source {
            VariableSource::Column(column) => Field::column(container.column(column)?.to_vec()),
            VariableSource::Stack(columns) => {
                let sources = columns
                    .iter()
                    .map(|c| container.column(c))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut data = Vec::with_capacity(container.size() * sources.len());
                for event in 0..container.size() {
                    data.extend(sources.iter().map(|s| s[event]));
                }
                Field {
                    width: sources.len(),
                    data,
                }
            }
        };
        mapped.insert(name, field)?;
    }
    Ok(mapped)
}

/// Flavour index and particle sign for a neutrino container name.
pub fn neutrino_aux(name: &str) -> Option<(i64, i64)> {
    let nubar = if name.contains("bar") { -1 } else { 1 };
    let flav = if name.starts_with("nutau") {
        2
    } else if name.starts_with("numu") {
        1
    } else if name.starts_with("nue") {
        0
    } else {
        return None;
    };
    Some((flav, nubar))
}

/// Loads grouped events from CSV files into one container per category.
///
/// Events are read, down-sampled and cut at construction; `setup` adds
/// weight fields and neutrino aux data, `apply` resets the weights.
pub struct SimpleDataLoader {
    config: LoaderConfig,
    events: Vec<Container>,
}

impl SimpleDataLoader {
    #[instrument(skip_all, name = "simple_data_loader_new")]
    pub fn new(config: LoaderConfig) -> Result<Self, StageError> {
        let cut = config.mc_cuts.as_deref().map(Cut::parse).transpose()?;
        let mut events = read_event_files(&config)?.into_containers()?;

        if let Some(data_dict) = &config.data_dict {
            events = events
                .iter()
                .map(|c| map_variables(c, data_dict))
                .collect::<Result<_, _>>()?;
        }

        if let Some(cut) = &cut {
            for container in events.iter_mut() {
                let mask = cut.evaluate(container)?;
                let selected = select_events(container, &mask)?;
                debug!(
                    container = %container.name,
                    before = container.size(),
                    after = selected.size(),
                    cut = cut.source(),
                    "Applied cut"
                );
                *container = selected;
            }
        }

        Ok(Self { config, events })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Categories found in the events files.
    pub fn groups(&self) -> Vec<&str> {
        self.events.iter().map(|c| c.name.as_str()).collect()
    }

    fn initial_weight(&self) -> f64 {
        match self.config.fraction_events_to_keep {
            Some(fraction) if self.config.keep_inverse => 1.0 / (1.0 - fraction),
            Some(fraction) => 1.0 / fraction,
            None => 1.0,
        }
    }

    fn output_names(&self) -> Vec<String> {
        if self.config.output_names.is_empty() {
            self.events.iter().map(|c| c.name.clone()).collect()
        } else {
            self.config.output_names.clone()
        }
    }

    fn make_container(&self, name: &str) -> Result<Container, StageError> {
        let mut container = self
            .events
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| {
                StageError::InvalidConfig(format!(
                    "output name '{name}' not found in events; found {:?}",
                    self.groups()
                ))
            })?;

        if container.contains("weights") {
            return Err(StageError::InvalidConfig(format!(
                "found an existing 'weights' field in '{name}' which would be overwritten; \
                 consider renaming it to 'initial_weights'"
            )));
        }
        let size = container.size();
        container.insert("weights", Field::filled(size, 1, 1.0))?;
        if !container.contains("initial_weights") {
            container.insert("initial_weights", Field::filled(size, 1, self.initial_weight()))?;
        }

        if self.config.neutrinos {
            let (flav, nubar) = neutrino_aux(name).ok_or_else(|| {
                StageError::InvalidConfig(format!("cannot determine flavour of '{name}'"))
            })?;
            container.set_aux_data("nubar", nubar);
            container.set_aux_data("flav", flav);
        }
        Ok(container)
    }
}

impl Stage for SimpleDataLoader {
    fn name(&self) -> &str {
        "simple_data_loader"
    }

    #[instrument(skip_all, name = "simple_data_loader_setup")]
    fn setup(&mut self, data: &mut ContainerSet) -> Result<(), StageError> {
        for name in self.output_names() {
            let container = self.make_container(&name)?;
            debug!(container = %name, events = container.size(), "Created container");
            data.add_container(container);
        }
        if data.is_empty() {
            return Err(StageError::InvalidConfig(
                "no containers created during data loading".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, data: &mut ContainerSet) -> Result<(), StageError> {
        for container in data.iter_mut() {
            let initial = container.get("initial_weights")?.data.clone();
            container.get_mut("weights")?.data = initial;
            container.mark_changed("weights");
        }
        Ok(())
    }
}
