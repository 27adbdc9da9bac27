use super::error::WorkflowError;
use crate::core::container::ContainerSet;
use crate::core::progress::ProgressReporter;
use crate::stages::aeff::hnl::HnlWeight;
use crate::stages::config::{ConfigError, LoaderConfig, MceqBarrConfig};
use crate::stages::data::loader::{GROUP_COLUMN, SimpleDataLoader};
use crate::stages::flux::mceq_barr::MceqBarr;
use crate::stages::{ParamSet, Stage};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Stages of an event-weighting run, in execution order: the loader, then
/// the optional MCEq flux, then the optional HNL reweighting.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub loader: LoaderConfig,
    pub mceq_barr: Option<(MceqBarrConfig, ParamSet)>,
    pub hnl: Option<ParamSet>,
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    loader: Option<LoaderConfig>,
    mceq_barr: Option<(MceqBarrConfig, ParamSet)>,
    hnl: Option<ParamSet>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loader(mut self, config: LoaderConfig) -> Self {
        self.loader = Some(config);
        self
    }
    pub fn mceq_barr(mut self, config: MceqBarrConfig, params: ParamSet) -> Self {
        self.mceq_barr = Some((config, params));
        self
    }
    pub fn hnl(mut self, params: ParamSet) -> Self {
        self.hnl = Some(params);
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        Ok(PipelineConfig {
            loader: self.loader.ok_or(ConfigError::MissingParameter("loader"))?,
            mceq_barr: self.mceq_barr,
            hnl: self.hnl,
        })
    }
}

fn build_stages(config: &PipelineConfig) -> Result<Vec<Box<dyn Stage>>, WorkflowError> {
    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(SimpleDataLoader::new(config.loader.clone())?)];
    if let Some((mceq_config, params)) = &config.mceq_barr {
        stages.push(Box::new(MceqBarr::new(mceq_config.clone(), params.clone())?));
    }
    if let Some(params) = &config.hnl {
        stages.push(Box::new(HnlWeight::new(params.clone())?));
    }
    Ok(stages)
}

/// Runs the configured stages over freshly loaded events and returns the
/// resulting containers.
///
/// Every stage is set up before any stage computes; `compute` and `apply`
/// then run stage by stage in order.
#[instrument(skip_all, name = "event_weights_workflow")]
pub fn run(config: &PipelineConfig, reporter: &ProgressReporter) -> Result<ContainerSet, WorkflowError> {
    // === Phase 1: Stage construction and setup ===
    reporter.phase_start("Setting up stages");
    let mut stages = build_stages(config)?;
    let mut data = ContainerSet::new("events");
    for stage in stages.iter_mut() {
        debug!(stage = stage.name(), "Setting up stage");
        stage.setup(&mut data)?;
    }
    info!(
        stages = stages.len(),
        containers = data.len(),
        "Pipeline set up"
    );
    reporter.phase_finish();

    // === Phase 2: Compute and apply ===
    reporter.phase_start("Computing weights");
    reporter.task_start(stages.len() as u64);
    for stage in stages.iter_mut() {
        debug!(stage = stage.name(), "Running stage");
        stage.compute(&mut data)?;
        stage.apply(&mut data)?;
        reporter.task_increment();
    }
    reporter.task_finish();
    reporter.phase_finish();

    Ok(data)
}

/// Writes every event as one CSV row: the container name in the `group`
/// column followed by each field. Fields wider than one value are spread over
/// `name[i]` columns.
pub fn write_containers_csv(data: &ContainerSet, path: &Path) -> Result<(), WorkflowError> {
    let csv_err = |source| WorkflowError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut layout: Option<Vec<(String, usize)>> = None;
    for container in data.iter() {
        let this = container
            .keys()
            .map(|k| -> Result<(String, usize), WorkflowError> {
                Ok((k.to_string(), container.get(k)?.width))
            })
            .collect::<Result<Vec<_>, _>>()?;
        match &layout {
            Some(first) if *first != this => {
                return Err(WorkflowError::PhaseFailed {
                    phase: "Writing events",
                    reason: format!(
                        "container '{}' has fields {:?}, expected {:?}",
                        container.name, this, first
                    ),
                });
            }
            Some(_) => {}
            None => layout = Some(this),
        }
    }
    let layout = layout.unwrap_or_default();

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    let mut header = vec![GROUP_COLUMN.to_string()];
    for (name, width) in &layout {
        if *width == 1 {
            header.push(name.clone());
        } else {
            header.extend((0..*width).map(|i| format!("{name}[{i}]")));
        }
    }
    writer.write_record(&header).map_err(csv_err)?;

    for container in data.iter() {
        let fields = layout
            .iter()
            .map(|(name, _)| container.get(name))
            .collect::<Result<Vec<_>, _>>()?;
        for event in 0..container.size() {
            let mut record = Vec::with_capacity(header.len());
            record.push(container.name.clone());
            for field in &fields {
                record.extend(field.row(event).iter().map(|v| v.to_string()));
            }
            writer.write_record(&record).map_err(csv_err)?;
        }
    }
    writer.flush().map_err(|source| WorkflowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), containers = data.len(), "Wrote event table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{Container, Field};
    use crate::core::units::Quantity;
    use crate::stages::aeff::hnl::re_weight_hnl;
    use crate::stages::config::LoaderConfigBuilder;
    use std::fs;
    use tempfile::TempDir;

    const HNL_EVENTS: &str = "\
group,mHNL,hnl_true_energy,hnl_proper_lifetime,hnl_distance_min,hnl_distance_max,hnl_decay_width,initial_weights
nutau_cc,0.6,10.0,2.0,1.0,1000.0,1e-12,2.0
nutau_cc,1.0,20.0,5.0,1.0,1000.0,3e-12,1.0
nutaubar_cc,0.3,5.0,1.0,1.0,1000.0,5e-13,1.0
";

    fn loader_config(dir: &TempDir, content: &str) -> LoaderConfig {
        let path = dir.path().join("events.csv");
        fs::write(&path, content).unwrap();
        LoaderConfigBuilder::new().events_file(path).build().unwrap()
    }

    fn hnl_params(value: f64) -> ParamSet {
        ParamSet::new().with("U_tau4_sq", Quantity::dimensionless(value))
    }

    #[test]
    fn builder_requires_loader() {
        assert_eq!(
            PipelineConfigBuilder::new().hnl(hnl_params(1e-3)).build().unwrap_err(),
            ConfigError::MissingParameter("loader")
        );
    }

    #[test]
    fn loader_only_pipeline_yields_initial_weights() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfigBuilder::new()
            .loader(loader_config(&dir, HNL_EVENTS))
            .build()
            .unwrap();
        let data = run(&config, &ProgressReporter::new()).unwrap();
        assert_eq!(data.names(), vec!["nutau_cc", "nutaubar_cc"]);
        assert_eq!(data.get("nutau_cc").unwrap().column("weights").unwrap(), &[2.0, 1.0]);
    }

    #[test]
    fn hnl_stage_multiplies_reset_weights() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfigBuilder::new()
            .loader(loader_config(&dir, HNL_EVENTS))
            .hnl(hnl_params(1e-3))
            .build()
            .unwrap();
        let data = run(&config, &ProgressReporter::new()).unwrap();
        let weights = data.get("nutau_cc").unwrap().column("weights").unwrap();
        let expected = 2.0 * re_weight_hnl(1e-3, 0.6, 10.0, 2.0, 1.0, 1000.0, 1e-12);
        assert!((weights[0] - expected).abs() <= 1e-12 * expected.abs());
    }

    #[test]
    fn stage_errors_abort_the_run() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfigBuilder::new()
            .loader(loader_config(&dir, "group,x\nnue_cc,1.0\n"))
            .hnl(hnl_params(1e-3))
            .build()
            .unwrap();
        assert!(matches!(
            run(&config, &ProgressReporter::new()),
            Err(WorkflowError::Stage { .. })
        ));

        let config = PipelineConfigBuilder::new()
            .loader(loader_config(&dir, "group,x\nnue_cc,1.0\n"))
            .mceq_barr(MceqBarrConfig::new(dir.path().join("missing.json")), ParamSet::new())
            .build()
            .unwrap();
        assert!(matches!(
            run(&config, &ProgressReporter::new()),
            Err(WorkflowError::Stage { .. })
        ));
    }

    #[test]
    fn containers_are_written_as_one_table() {
        let dir = TempDir::new().unwrap();
        let mut data = ContainerSet::new("events");
        let mut a = Container::new("numu_cc", 2);
        a.insert("x", Field::column(vec![1.0, 2.0])).unwrap();
        a.insert(
            "flux",
            Field {
                width: 2,
                data: vec![0.1, 0.2, 0.3, 0.4],
            },
        )
        .unwrap();
        let mut b = Container::new("nue_cc", 1);
        b.insert("x", Field::column(vec![3.0])).unwrap();
        b.insert(
            "flux",
            Field {
                width: 2,
                data: vec![0.5, 0.6],
            },
        )
        .unwrap();
        data.add_container(a);
        data.add_container(b);

        let path = dir.path().join("out.csv");
        write_containers_csv(&data, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "group,flux[0],flux[1],x");
        assert_eq!(lines[1], "numu_cc,0.1,0.2,1");
        assert_eq!(lines[3], "nue_cc,0.5,0.6,3");
    }

    #[test]
    fn containers_with_different_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut data = ContainerSet::new("events");
        let mut a = Container::new("numu_cc", 1);
        a.insert("x", Field::column(vec![1.0])).unwrap();
        let mut b = Container::new("nue_cc", 1);
        b.insert("y", Field::column(vec![1.0])).unwrap();
        data.add_container(a);
        data.add_container(b);
        assert!(matches!(
            write_containers_csv(&data, &dir.path().join("out.csv")),
            Err(WorkflowError::PhaseFailed { .. })
        ));
    }
}
