use super::error::AnalysisError;
use super::trials::{DataSets, DatasetFits, FidFit, MinimiserRecord, Trials};
use crate::core::units::{ParsedQuantity, UnitError, parse_quantity_string};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Fiducial label of the Asimov fiducial fits.
pub const ASIMOV_FID: &str = "fid_asimov";

/// Scanned parameter name and its injected values in ascending order, each
/// with the key of its injection point.
pub fn injection_points(data_sets: &DataSets) -> Result<(String, Vec<(f64, &str)>), AnalysisError> {
    let mut name: Option<&str> = None;
    let mut points = Vec::with_capacity(data_sets.len());
    for key in data_sets.keys() {
        let (this_name, value) = key
            .rsplit_once('_')
            .ok_or_else(|| AnalysisError::InjectionKey(key.clone()))?;
        let value: f64 = value
            .parse()
            .map_err(|_| AnalysisError::InjectionKey(key.clone()))?;
        match name {
            Some(n) if n != this_name => {
                return Err(AnalysisError::Inconsistent {
                    what: "injected parameter",
                    found: vec![n.to_string(), this_name.to_string()],
                });
            }
            _ => name = Some(this_name),
        }
        points.push((value, key.as_str()));
    }
    let name = name.ok_or_else(|| AnalysisError::InvalidRequest("no injection points".to_string()))?;
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok((name.to_string(), points))
}

/// Metrics and fitted parameters of the Asimov analysis, ordered by
/// injected value.
#[derive(Debug, Clone, PartialEq)]
pub struct AsimovData {
    pub inj_param_name: String,
    pub inj_param_vals: Vec<f64>,
    /// Wrong-ordering hypothesis fitted to the true-ordering fiducial.
    pub wo_to_to_metrics: Vec<f64>,
    /// True-ordering hypothesis fitted to the wrong-ordering fiducial.
    pub to_to_wo_metrics: Vec<f64>,
    pub wo_to_to_params: BTreeMap<String, Vec<String>>,
    pub to_to_wo_params: BTreeMap<String, Vec<String>>,
    pub bestfit: String,
    pub altfit: String,
}

impl AsimovData {
    pub fn has_fitted_params(&self) -> bool {
        !self.wo_to_to_params.is_empty()
    }
}

fn best_and_alt(
    point: &str,
    dataset: &str,
    fits: &DatasetFits,
) -> Result<(&'static str, &'static str), AnalysisError> {
    let metric = |hypo: &'static str| {
        fits.fit_to_data(hypo)
            .map(|f| f.metric_val)
            .ok_or_else(|| AnalysisError::MissingFit {
                point: point.to_string(),
                fit: format!("{hypo}_fit_to_{dataset}"),
            })
    };
    let (h0, h1) = (metric("h0")?, metric("h1")?);
    Ok(if h1 > h0 { ("h0", "h1") } else { ("h1", "h0") })
}

fn fid_fit<'a>(point: &str, fits: &'a DatasetFits, key: &str) -> Result<&'a FidFit, AnalysisError> {
    fits.fid_fits
        .get(key)
        .and_then(|by_fid| by_fid.get(ASIMOV_FID))
        .ok_or_else(|| AnalysisError::MissingFit {
            point: point.to_string(),
            fit: format!("{key}[{ASIMOV_FID}]"),
        })
}

struct Selection<'a> {
    point: &'a str,
    dataset: &'a str,
    value: f64,
    best: &'static str,
    alt: &'static str,
}

fn selections(trials: &Trials) -> Result<(String, Vec<Selection<'_>>), AnalysisError> {
    let (name, points) = injection_points(&trials.data_sets)?;
    let mut out = Vec::new();
    let mut previous: Option<&'static str> = None;
    for (value, point) in points {
        for (dataset, fits) in &trials.data_sets[point] {
            let (best, alt) = best_and_alt(point, dataset, fits)?;
            if previous.is_some_and(|p| p != best) {
                warn!(point, best, "Best-fit hypothesis changes across injection points");
            }
            previous = Some(best);
            out.push(Selection {
                point,
                dataset,
                value,
                best,
                alt,
            });
        }
    }
    Ok((name, out))
}

fn push_params(target: &mut BTreeMap<String, Vec<String>>, fit: &FidFit) {
    for (name, value) in &fit.params {
        target.entry(name.clone()).or_default().push(value.clone());
    }
}

/// Collects the wrong-to-true and true-to-wrong fiducial fits of every
/// injection point.
pub fn extract_asimov_data(trials: &Trials) -> Result<AsimovData, AnalysisError> {
    let (inj_param_name, selected) = selections(trials)?;
    let mut data = AsimovData {
        inj_param_name,
        inj_param_vals: Vec::with_capacity(selected.len()),
        wo_to_to_metrics: Vec::with_capacity(selected.len()),
        to_to_wo_metrics: Vec::with_capacity(selected.len()),
        wo_to_to_params: BTreeMap::new(),
        to_to_wo_params: BTreeMap::new(),
        bestfit: String::new(),
        altfit: String::new(),
    };
    for s in &selected {
        let fits = &trials.data_sets[s.point][s.dataset];
        let wo_to_to = fid_fit(s.point, fits, &format!("{}_fit_to_{}_fid", s.alt, s.best))?;
        let to_to_wo = fid_fit(s.point, fits, &format!("{}_fit_to_{}_fid", s.best, s.alt))?;
        data.inj_param_vals.push(s.value);
        data.wo_to_to_metrics.push(wo_to_to.metric_val);
        data.to_to_wo_metrics.push(to_to_wo.metric_val);
        push_params(&mut data.wo_to_to_params, wo_to_to);
        push_params(&mut data.to_to_wo_params, to_to_wo);
        data.bestfit = s.best.to_string();
        data.altfit = s.alt.to_string();
    }
    Ok(data)
}

/// Minimiser diagnostics of one fit direction, ordered by injected value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimiserSeries {
    pub time: Vec<f64>,
    pub time_units: String,
    pub iterations: Vec<f64>,
    pub funcevals: Vec<f64>,
    pub status: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinimiserData {
    pub wo_to_to: MinimiserSeries,
    pub to_to_wo: MinimiserSeries,
}

/// Magnitude and units of a number or quantity string.
pub fn value_as_quantity(value: &Value) -> Result<ParsedQuantity, UnitError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|value| ParsedQuantity {
                value,
                units: "dimensionless".to_string(),
            })
            .ok_or_else(|| UnitError::InvalidQuantity(n.to_string())),
        Value::String(s) => parse_quantity_string(s),
        other => Err(UnitError::InvalidQuantity(other.to_string())),
    }
}

fn push_minimiser(
    series: &mut MinimiserSeries,
    point: &str,
    fit: &str,
    record: &MinimiserRecord,
) -> Result<(), AnalysisError> {
    let metadata = |key: &str| -> Result<f64, AnalysisError> {
        let value = record
            .minimizer_metadata
            .get(key)
            .ok_or_else(|| AnalysisError::MissingFit {
                point: point.to_string(),
                fit: format!("{fit}.minimizer_metadata.{key}"),
            })?;
        Ok(value_as_quantity(value)?.value)
    };
    let time = value_as_quantity(&record.minimizer_time)?;
    series.time.push(time.value);
    series.time_units = time.units;
    series.iterations.push(metadata("nit")?);
    series.funcevals.push(metadata("nfev")?);
    series.status.push(metadata("status")?);
    Ok(())
}

/// Collects minimiser time, iterations, function evaluations and status for
/// the same fits [`extract_asimov_data`] selects.
pub fn extract_minim_data(trials: &Trials) -> Result<MinimiserData, AnalysisError> {
    let (_, selected) = selections(trials)?;
    let mut data = MinimiserData::default();
    for s in &selected {
        let records = trials
            .minimiser_info
            .get(s.point)
            .and_then(|by_dataset| by_dataset.get(s.dataset));
        let record = |key: &str| {
            records
                .and_then(|by_fit| by_fit.get(key))
                .and_then(|by_fid| by_fid.get(ASIMOV_FID))
                .ok_or_else(|| AnalysisError::MissingFit {
                    point: s.point.to_string(),
                    fit: format!("{key}[{ASIMOV_FID}]"),
                })
        };
        let wo_key = format!("{}_fit_to_{}_fid", s.alt, s.best);
        let to_key = format!("{}_fit_to_{}_fid", s.best, s.alt);
        push_minimiser(&mut data.wo_to_to, s.point, &wo_key, record(&wo_key)?)?;
        push_minimiser(&mut data.to_to_wo, s.point, &to_key, record(&to_key)?)?;
    }
    Ok(data)
}

/// Asimov significance `(WO + TO) / (2 sqrt(WO))` per injection point.
pub fn calculate_deltachi2_significances(
    wo_to_to_metrics: &[f64],
    to_to_wo_metrics: &[f64],
) -> Result<Vec<f64>, AnalysisError> {
    if wo_to_to_metrics.len() != to_to_wo_metrics.len() {
        return Err(AnalysisError::LengthMismatch {
            wo: wo_to_to_metrics.len(),
            to: to_to_wo_metrics.len(),
        });
    }
    Ok(wo_to_to_metrics
        .iter()
        .zip(to_to_wo_metrics)
        .map(|(wo, to)| (wo + to) / (2.0 * wo.sqrt()))
        .collect())
}

/// Units of the injected parameter, from well-known names or from the first
/// fitted value of the same parameter.
pub fn get_inj_param_units(
    inj_param_name: &str,
    fit_params: &BTreeMap<String, Vec<String>>,
) -> Result<String, AnalysisError> {
    let units = match inj_param_name {
        "sin2theta23" => "dimensionless".to_string(),
        "deltam3l" => "electron_volt ** 2".to_string(),
        _ => {
            let first = fit_params
                .get(inj_param_name)
                .and_then(|values| values.first())
                .ok_or_else(|| AnalysisError::UnknownInjectedUnits {
                    name: inj_param_name.to_string(),
                    available: fit_params.keys().cloned().collect(),
                })?;
            parse_quantity_string(first)?.units
        }
    };
    info!(units = %units, "Units of the injected parameter");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::trials::extract_trials;
    use crate::analysis::trials::fixtures::write_point;
    use tempfile::TempDir;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn scan() -> (TempDir, Trials) {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), 0.55, 0.0, 2.0, 3.0, 3.5);
        write_point(dir.path(), 0.45, 0.0, 3.0, 4.0, 5.0);
        let trials = extract_trials(dir.path().to_str().unwrap(), false, false).unwrap();
        (dir, trials)
    }

    #[test]
    fn injection_points_sort_numerically() {
        let mut sets = DataSets::new();
        for key in ["deltam3l_10.0000", "deltam3l_9.0000", "deltam3l_-1.0000"] {
            sets.insert(key.to_string(), BTreeMap::new());
        }
        let (name, points) = injection_points(&sets).unwrap();
        assert_eq!(name, "deltam3l");
        let values: Vec<f64> = points.iter().map(|p| p.0).collect();
        assert_eq!(values, vec![-1.0, 9.0, 10.0]);
    }

    #[test]
    fn asimov_data_selects_fiducial_fits() {
        let (_dir, trials) = scan();
        let data = extract_asimov_data(&trials).unwrap();
        assert_eq!(data.inj_param_name, "sin2theta23");
        assert_eq!(data.inj_param_vals, vec![0.45, 0.55]);
        assert_eq!(data.wo_to_to_metrics, vec![4.0, 3.0]);
        assert_eq!(data.to_to_wo_metrics, vec![5.0, 3.5]);
        assert_eq!(data.bestfit, "h0");
        assert_eq!(data.altfit, "h1");
        assert_eq!(
            data.wo_to_to_params["theta23"],
            vec!["44.45 degree".to_string(), "44.55 degree".to_string()]
        );
        assert!(data.has_fitted_params());
    }

    #[test]
    fn best_fit_follows_dataset_metrics() {
        let dir = TempDir::new().unwrap();
        write_point(dir.path(), 0.45, 3.0, 1.0, 4.0, 5.0);
        let trials = extract_trials(dir.path().to_str().unwrap(), false, false).unwrap();
        let data = extract_asimov_data(&trials).unwrap();
        assert_eq!(data.bestfit, "h1");
        assert_eq!(data.wo_to_to_metrics, vec![4.0]);
    }

    #[test]
    fn minimiser_data_parses_quantities() {
        let (_dir, trials) = scan();
        let minim = extract_minim_data(&trials).unwrap();
        assert_eq!(minim.wo_to_to.time, vec![2.5, 2.5]);
        assert_eq!(minim.wo_to_to.time_units, "second");
        assert_eq!(minim.to_to_wo.time, vec![1.5, 1.5]);
        assert_eq!(minim.to_to_wo.iterations, vec![12.0, 12.0]);
        assert_eq!(minim.to_to_wo.funcevals, vec![40.0, 40.0]);
        assert_eq!(minim.to_to_wo.status, vec![0.0, 0.0]);
    }

    #[test]
    fn significances_follow_asimov_formula() {
        let sig = calculate_deltachi2_significances(&[4.0, 3.0], &[5.0, 3.5]).unwrap();
        assert!(f64_approx_equal(sig[0], 9.0 / 4.0));
        assert!(f64_approx_equal(sig[1], 6.5 / (2.0 * 3f64.sqrt())));
        assert!(matches!(
            calculate_deltachi2_significances(&[1.0], &[]),
            Err(AnalysisError::LengthMismatch { wo: 1, to: 0 })
        ));
    }

    #[test]
    fn injected_units() {
        let mut params = BTreeMap::new();
        params.insert("theta23".to_string(), vec!["45.0 degree".to_string()]);
        assert_eq!(get_inj_param_units("sin2theta23", &params).unwrap(), "dimensionless");
        assert_eq!(
            get_inj_param_units("deltam3l", &params).unwrap(),
            "electron_volt ** 2"
        );
        assert_eq!(get_inj_param_units("theta23", &params).unwrap(), "degree");
        assert!(matches!(
            get_inj_param_units("theta13", &params),
            Err(AnalysisError::UnknownInjectedUnits { .. })
        ));
    }

    #[test]
    fn values_as_quantities() {
        assert_eq!(value_as_quantity(&Value::from(3)).unwrap().value, 3.0);
        let q = value_as_quantity(&Value::from("2.5e-3 electron_volt ** 2")).unwrap();
        assert_eq!(q.units, "electron_volt ** 2");
        assert!(value_as_quantity(&Value::Null).is_err());
    }
}
