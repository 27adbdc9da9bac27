use super::error::AnalysisError;
use super::labels::Labels;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, instrument};

pub const DATA_SETS_FILE: &str = "data_sets.json";
pub const ALL_PARAMS_FILE: &str = "all_params.json";
pub const LABELS_FILE: &str = "labels.json";
pub const MINIMISER_INFO_FILE: &str = "minimiser_info.json";
const CACHE_FILES: [&str; 4] = [DATA_SETS_FILE, ALL_PARAMS_FILE, LABELS_FILE, MINIMISER_INFO_FILE];
const CONFIG_SUMMARY_FILE: &str = "config_summary.json";

static PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^(.*)=(.*); prior=(.*), range=(.*), is_fixed=(.*), is_discrete=(.*); help="(.*)""#,
    )
    .expect("parameter pattern is a valid regex")
});

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("environment variable pattern is a valid regex")
});

/// Fit of a hypothesis to the (toy) dataset itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFit {
    pub metric_val: f64,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Fit of a hypothesis to a fiducial (Asimov or pseudo-data) distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FidFit {
    #[serde(default)]
    pub metric: Value,
    pub metric_val: f64,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimiserRecord {
    #[serde(default)]
    pub minimizer_metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub minimizer_time: Value,
}

/// All fits read from one data sub-directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetFits {
    pub h0_fit_to_data: Option<DataFit>,
    pub h1_fit_to_data: Option<DataFit>,
    /// `h{x}_fit_to_h{y}_fid` to fiducial label to fit.
    #[serde(default)]
    pub fid_fits: BTreeMap<String, BTreeMap<String, FidFit>>,
}

impl DatasetFits {
    pub fn fit_to_data(&self, hypo: &str) -> Option<&DataFit> {
        match hypo {
            "h0" => self.h0_fit_to_data.as_ref(),
            "h1" => self.h1_fit_to_data.as_ref(),
            _ => None,
        }
    }
}

/// A free parameter of a hypothesis as recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeParam {
    pub value: String,
    pub prior: String,
    pub range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypoParams {
    pub h0_params: BTreeMap<String, FreeParam>,
    pub h1_params: BTreeMap<String, FreeParam>,
}

/// Injection key to dataset label to fits.
pub type DataSets = BTreeMap<String, BTreeMap<String, DatasetFits>>;
/// Injection key to dataset label to fit key to fiducial label to record.
pub type MinimiserSets =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, MinimiserRecord>>>>;

/// Aggregated results of an injected-parameter scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trials {
    pub truth_name: String,
    pub scan_variable: String,
    pub data_sets: DataSets,
    pub params: BTreeMap<String, HypoParams>,
    pub labels: BTreeMap<String, Labels>,
    pub minimiser_info: MinimiserSets,
}

#[derive(Debug, Deserialize)]
struct ConfigSummary {
    data_is_data: bool,
    h0_name: String,
    h1_name: String,
    data_name: String,
    #[serde(default)]
    h0_params: Vec<String>,
    #[serde(default)]
    h1_params: Vec<String>,
}

/// Expands `$VAR`, `${VAR}` and a leading `~`; unset variables are kept verbatim.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = ENV_VAR_RE.replace_all(path, |caps: &regex::Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });
    match expanded.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(format!("{home}{rest}")),
            Err(_) => PathBuf::from(expanded.as_ref() as &str),
        },
        _ => PathBuf::from(expanded.as_ref() as &str),
    }
}

/// Orders strings treating runs of digits as numbers, e.g. `run_2 < run_10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let da = a.find(|c: char| !c.is_ascii_digit()).unwrap_or(a.len());
                let db = b.find(|c: char| !c.is_ascii_digit()).unwrap_or(b.len());
                let (na, nb) = (a[..da].trim_start_matches('0'), b[..db].trim_start_matches('0'));
                let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = &a[da..];
                b = &b[db..];
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                a = &a[ca.len_utf8()..];
                b = &b[cb.len_utf8()..];
            }
        }
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<String>, AnalysisError> {
    let io_err = |source| AnalysisError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        names.push(entry.map_err(io_err)?.file_name().to_string_lossy().into_owned());
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AnalysisError> {
    let content = fs::read_to_string(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| AnalysisError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AnalysisError> {
    let content = serde_json::to_string_pretty(value).map_err(|source| AnalysisError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a fit-result JSON object, keeping only `keys` when given.
pub fn extract_fit(path: &Path, keys: Option<&[&str]>) -> Result<Map<String, Value>, AnalysisError> {
    let fit_err = |message: String| AnalysisError::FitFile {
        path: path.to_path_buf(),
        message,
    };
    let content = fs::read_to_string(path).map_err(|e| fit_err(e.to_string()))?;
    let value: Value = serde_json::from_str(&content).map_err(|e| fit_err(e.to_string()))?;
    let Value::Object(mut info) = value else {
        return Err(fit_err("expected a JSON object".to_string()));
    };
    if let Some(keys) = keys {
        info.retain(|k, _| keys.contains(&k.as_str()));
    }
    Ok(info)
}

fn extract_typed<T: DeserializeOwned>(path: &Path, keys: &[&str]) -> Result<T, AnalysisError> {
    let info = extract_fit(path, Some(keys))?;
    serde_json::from_value(Value::Object(info)).map_err(|e| AnalysisError::FitFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Parses `NAME=VALUE; prior=..., range=..., is_fixed=..., is_discrete=...; help="..."`.
///
/// Returns `None` for fixed parameters.
pub fn parse_param_string(s: &str) -> Result<Option<(String, FreeParam)>, AnalysisError> {
    let caps = PARAM_RE
        .captures(s)
        .ok_or_else(|| AnalysisError::ParamString(s.to_string()))?;
    if !caps[5].trim().eq_ignore_ascii_case("false") {
        return Ok(None);
    }
    Ok(Some((
        caps[1].to_string(),
        FreeParam {
            value: caps[2].to_string(),
            prior: caps[3].to_string(),
            range: caps[4].to_string(),
        },
    )))
}

fn free_params(strings: &[String]) -> Result<BTreeMap<String, FreeParam>, AnalysisError> {
    let mut params = BTreeMap::new();
    for s in strings {
        if let Some((name, param)) = parse_param_string(s)? {
            params.insert(name, param);
        }
    }
    Ok(params)
}

/// Injection key from the data name: its last two `_`-separated parts.
pub fn injection_key(data_name: &str) -> Result<String, AnalysisError> {
    let parts: Vec<&str> = data_name.split('_').collect();
    match parts.as_slice() {
        [.., name, value] => Ok(format!("{name}_{value}")),
        _ => Err(AnalysisError::InjectionKey(data_name.to_string())),
    }
}

fn toy_name_and_variable(entry: &str) -> Option<(String, String)> {
    let after = entry.split("toy").nth(1)?;
    let mut parts = after.split('_');
    let truth = parts.nth(1)?;
    let variable = parts.next()?;
    Some((truth.to_string(), variable.to_string()))
}

fn require_single(what: &'static str, values: &[String]) -> Result<String, AnalysisError> {
    let mut unique: Vec<String> = values.to_vec();
    unique.sort();
    unique.dedup();
    match unique.len() {
        1 => Ok(unique.remove(0)),
        _ => Err(AnalysisError::Inconsistent {
            what,
            found: unique,
        }),
    }
}

fn load_cache(logdir: &Path, entries: &[String], trials: &mut Trials) -> Result<(), AnalysisError> {
    info!(
        "Found cached aggregates from a previous run; delete {:?} from {} if this is incorrect",
        CACHE_FILES,
        logdir.display()
    );
    for required in [ALL_PARAMS_FILE, LABELS_FILE, MINIMISER_INFO_FILE] {
        if !entries.iter().any(|e| e == required) {
            return Err(AnalysisError::IncompleteCache(required));
        }
    }
    trials.data_sets = read_json(&logdir.join(DATA_SETS_FILE))?;
    trials.params = read_json(&logdir.join(ALL_PARAMS_FILE))?;
    trials.labels = read_json(&logdir.join(LABELS_FILE))?;
    trials.minimiser_info = read_json(&logdir.join(MINIMISER_INFO_FILE))?;
    Ok(())
}

fn save_cache(logdir: &Path, trials: &Trials) -> Result<(), AnalysisError> {
    write_json(&logdir.join(DATA_SETS_FILE), &trials.data_sets)?;
    write_json(&logdir.join(ALL_PARAMS_FILE), &trials.params)?;
    write_json(&logdir.join(LABELS_FILE), &trials.labels)?;
    write_json(&logdir.join(MINIMISER_INFO_FILE), &trials.minimiser_info)
}

type MinimiserByFit = BTreeMap<String, BTreeMap<String, MinimiserRecord>>;

fn read_dataset_dir(
    subdir: &Path,
    dataset_dir: &str,
    labels: &Labels,
) -> Result<(DatasetFits, MinimiserByFit), AnalysisError> {
    let mut fits = DatasetFits::default();
    let mut minim = MinimiserByFit::new();
    let mut fid_patterns = Vec::with_capacity(4);
    for (x, y) in [(0u8, 0u8), (0, 1), (1, 0), (1, 1)] {
        fid_patterns.push((format!("h{x}_fit_to_h{y}_fid"), labels.fid_fit_regex(x, y)?));
    }

    for fname in sorted_entries(subdir)? {
        let fpath = subdir.join(&fname);
        if fname == labels.fit_to_data_file(0, dataset_dir) {
            fits.h0_fit_to_data = Some(extract_typed(&fpath, &["metric_val", "params"])?);
            continue;
        }
        if fname == labels.fit_to_data_file(1, dataset_dir) {
            fits.h1_fit_to_data = Some(extract_typed(&fpath, &["metric_val", "params"])?);
            continue;
        }
        let Some((key, caps)) = fid_patterns
            .iter()
            .find_map(|(key, re)| re.captures(&fname).map(|caps| (key, caps)))
        else {
            continue;
        };
        let fid_label = if labels.fluctuate_fid {
            caps.name("fid_ind")
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| AnalysisError::FitFile {
                    path: fpath.clone(),
                    message: "fluctuated fiducial fit without an index".to_string(),
                })?
        } else {
            labels.fid().to_string()
        };
        let fit: FidFit = extract_typed(&fpath, &["metric", "metric_val", "params"])?;
        let record: MinimiserRecord =
            extract_typed(&fpath, &["minimizer_metadata", "minimizer_time"])?;
        fits.fid_fits
            .entry(key.clone())
            .or_default()
            .insert(fid_label.clone(), fit);
        minim.entry(key.clone()).or_default().insert(fid_label, record);
    }
    Ok((fits, minim))
}

fn parse_output_dir(
    outputdir: &Path,
    fluctuate_fid: bool,
    fluctuate_data: bool,
    trials: &mut Trials,
) -> Result<(), AnalysisError> {
    let summary_path = outputdir.join(CONFIG_SUMMARY_FILE);
    let cfg: ConfigSummary = read_json(&summary_path)?;
    if cfg.data_is_data {
        return Err(AnalysisError::RealData(summary_path));
    }
    let labels = Labels::new(
        &cfg.h0_name,
        &cfg.h1_name,
        &cfg.data_name,
        cfg.data_is_data,
        fluctuate_data,
        fluctuate_fid,
    );
    let injparam = injection_key(&labels.data_name)?;
    debug!(dir = %outputdir.display(), injection = %injparam, "Parsing output directory");

    let params = HypoParams {
        h0_params: free_params(&cfg.h0_params)?,
        h1_params: free_params(&cfg.h1_params)?,
    };

    let subdir_re = labels.subdir_regex()?;
    let mut data = BTreeMap::new();
    let mut minim_info = BTreeMap::new();
    for basename in sorted_entries(outputdir)? {
        let Some(caps) = subdir_re.captures(&basename) else {
            continue;
        };
        let dset_label = match caps.name("data_ind") {
            Some(index) if fluctuate_data => index.as_str().to_string(),
            _ => labels.dataset(),
        };
        let (fits, minim) = read_dataset_dir(&outputdir.join(&basename), &basename, &labels)?;
        data.insert(dset_label.clone(), fits);
        minim_info.insert(dset_label, minim);
    }

    trials.labels.insert(injparam.clone(), labels);
    trials.params.insert(injparam.clone(), params);
    trials.data_sets.insert(injparam.clone(), data);
    trials.minimiser_info.insert(injparam, minim_info);
    Ok(())
}

/// Aggregates all fits of an injected-parameter scan below `logdir`.
///
/// Results are cached as JSON in `logdir` and reused on later calls.
#[instrument(skip_all, name = "extract_trials")]
pub fn extract_trials(
    logdir: &str,
    fluctuate_fid: bool,
    fluctuate_data: bool,
) -> Result<Trials, AnalysisError> {
    let logdir = expand_path(logdir);
    let entries = sorted_entries(&logdir)?;

    let mut truths = Vec::new();
    let mut variables = Vec::new();
    for entry in &entries {
        if CACHE_FILES.contains(&entry.as_str()) || entry.contains("Plots") {
            continue;
        }
        let (truth, variable) = toy_name_and_variable(entry)
            .ok_or_else(|| AnalysisError::UnexpectedEntry(entry.clone()))?;
        truths.push(truth);
        variables.push(variable);
    }
    if truths.is_empty() {
        return Err(AnalysisError::NoTrials(logdir));
    }

    let mut trials = Trials {
        truth_name: require_single("injected truth hypothesis", &truths)?,
        scan_variable: require_single("scanned parameter", &variables)?,
        ..Default::default()
    };

    if entries.iter().any(|e| e == DATA_SETS_FILE) {
        load_cache(&logdir, &entries, &mut trials)?;
        return Ok(trials);
    }

    for entry in &entries {
        let outputdir = logdir.join(entry);
        if outputdir.join(CONFIG_SUMMARY_FILE).is_file() {
            parse_output_dir(&outputdir, fluctuate_fid, fluctuate_data, &mut trials)?;
        }
    }
    if trials.data_sets.is_empty() {
        return Err(AnalysisError::NoTrials(logdir));
    }
    info!(
        points = trials.data_sets.len(),
        truth = %trials.truth_name,
        variable = %trials.scan_variable,
        "Extracted trials"
    );

    save_cache(&logdir, &trials)?;
    Ok(trials)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn natural_order_compares_numbers() {
        let mut names = vec!["run_10", "run_2", "run_1", "a", "run_02b"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["a", "run_1", "run_2", "run_02b", "run_10"]);
    }

    #[test]
    fn expand_path_substitutes_home_and_variables() {
        let Ok(home) = std::env::var("HOME") else {
            return;
        };
        assert_eq!(expand_path("~/logs"), PathBuf::from(format!("{home}/logs")));
        assert_eq!(expand_path("$HOME/x"), PathBuf::from(format!("{home}/x")));
        assert_eq!(expand_path("${HOME}"), PathBuf::from(&home));
        assert_eq!(
            expand_path("$ATMOFLUX_SURELY_UNSET_VAR/x"),
            PathBuf::from("$ATMOFLUX_SURELY_UNSET_VAR/x")
        );
    }

    #[test]
    fn param_strings_keep_free_parameters() {
        let (name, param) = parse_param_string(&param_string("theta23", "45.0 degree", false))
            .unwrap()
            .unwrap();
        assert_eq!(name, "theta23");
        assert_eq!(param.value, "45.0 degree");
        assert_eq!(param.prior, "uniform");
        assert_eq!(param.range, "[0, 1]");
        assert!(
            parse_param_string(&param_string("deltam31", "1", true))
                .unwrap()
                .is_none()
        );
        assert!(parse_param_string("garbage").is_err());
    }

    #[test]
    fn injection_key_uses_last_two_parts() {
        assert_eq!(
            injection_key("no_sin2theta23_0.4500").unwrap(),
            "sin2theta23_0.4500"
        );
        assert!(injection_key("single").is_err());
    }

    #[test]
    fn extract_fit_filters_keys_and_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fit.json");
        fs::write(&path, r#"{"metric_val": 1.5, "params": {}, "junk": 3}"#).unwrap();
        let info = extract_fit(&path, Some(&["metric_val"])).unwrap();
        assert_eq!(info.keys().collect::<Vec<_>>(), vec!["metric_val"]);
        assert_eq!(extract_fit(&path, None).unwrap().len(), 3);

        let missing = dir.path().join("missing.json");
        match extract_fit(&missing, None) {
            Err(AnalysisError::FitFile { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn extract_trials_aggregates_and_caches() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), 0.45, 0.0, 3.0, 4.0, 5.0);
        write_point(dir.path(), 0.55, 0.0, 2.0, 3.0, 3.5);
        fs::create_dir(dir.path().join("Plots")).unwrap();

        let logdir = dir.path().to_str().unwrap();
        let trials = extract_trials(logdir, false, false).unwrap();
        assert_eq!(trials.truth_name, "no");
        assert_eq!(trials.scan_variable, "sin2theta23");
        assert_eq!(trials.data_sets.len(), 2);

        let point = &trials.data_sets["sin2theta23_0.4500"]["toy_no_sin2theta23_0.4500_asimov"];
        assert_eq!(point.h1_fit_to_data.as_ref().unwrap().metric_val, 3.0);
        let wo = &point.fid_fits["h1_fit_to_h0_fid"]["fid_asimov"];
        assert_eq!(wo.metric_val, 4.0);
        assert_eq!(wo.metric, Value::String("chi2".to_string()));

        let params = &trials.params["sin2theta23_0.4500"];
        assert_eq!(params.h0_params.keys().collect::<Vec<_>>(), vec!["theta23"]);
        let minim = &trials.minimiser_info["sin2theta23_0.4500"]["toy_no_sin2theta23_0.4500_asimov"]
            ["h0_fit_to_h1_fid"]["fid_asimov"];
        assert_eq!(minim.minimizer_time, Value::String("1.5 second".to_string()));

        for file in CACHE_FILES {
            assert!(dir.path().join(file).is_file(), "{file} not cached");
        }
        let cached = extract_trials(logdir, false, false).unwrap();
        assert_eq!(cached, trials);
    }

    #[test]
    fn incomplete_cache_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), 0.45, 0.0, 3.0, 4.0, 5.0);
        fs::write(dir.path().join(DATA_SETS_FILE), "{}").unwrap();
        assert!(matches!(
            extract_trials(dir.path().to_str().unwrap(), false, false),
            Err(AnalysisError::IncompleteCache(ALL_PARAMS_FILE))
        ));
    }

    #[test]
    fn mixed_truths_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("hypo_no_hypo_io_toy_no_sin2theta23_0.4500")).unwrap();
        fs::create_dir(dir.path().join("hypo_no_hypo_io_toy_io_sin2theta23_0.4500")).unwrap();
        assert!(matches!(
            extract_trials(dir.path().to_str().unwrap(), false, false),
            Err(AnalysisError::Inconsistent { .. })
        ));
    }

    #[test]
    fn unexpected_entries_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert!(matches!(
            extract_trials(dir.path().to_str().unwrap(), false, false),
            Err(AnalysisError::UnexpectedEntry(_))
        ));
    }

    #[test]
    fn real_data_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outdir = dir.path().join("hypo_no_hypo_io_toy_no_x_1");
        fs::create_dir(&outdir).unwrap();
        fs::write(
            outdir.join(CONFIG_SUMMARY_FILE),
            r#"{"data_is_data": true, "h0_name": "no", "h1_name": "io", "data_name": "no_x_1"}"#,
        )
        .unwrap();
        assert!(matches!(
            extract_trials(dir.path().to_str().unwrap(), false, false),
            Err(AnalysisError::RealData(_))
        ));
    }
}
