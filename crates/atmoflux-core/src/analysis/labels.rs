use regex::Regex;
use serde::{Deserialize, Serialize};

/// File- and directory-naming conventions of one hypothesis-testing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    pub h0_name: String,
    pub h1_name: String,
    pub data_name: String,
    pub data_is_data: bool,
    pub fluctuate_data: bool,
    pub fluctuate_fid: bool,
}

impl Labels {
    pub fn new(
        h0_name: &str,
        h1_name: &str,
        data_name: &str,
        data_is_data: bool,
        fluctuate_data: bool,
        fluctuate_fid: bool,
    ) -> Self {
        Self {
            h0_name: h0_name.to_string(),
            h1_name: h1_name.to_string(),
            data_name: data_name.to_string(),
            data_is_data,
            fluctuate_data,
            fluctuate_fid,
        }
    }

    pub fn h0(&self) -> String {
        format!("hypo_{}", self.h0_name)
    }

    pub fn h1(&self) -> String {
        format!("hypo_{}", self.h1_name)
    }

    /// Hypothesis name for index 0 or 1.
    pub fn hypo_name(&self, index: u8) -> &str {
        if index == 0 {
            &self.h0_name
        } else {
            &self.h1_name
        }
    }

    pub fn data_prefix(&self) -> &'static str {
        if self.data_is_data { "data" } else { "toy" }
    }

    pub fn data_suffix(&self) -> &'static str {
        if self.data_is_data {
            ""
        } else if self.fluctuate_data {
            "pseudodata"
        } else {
            "asimov"
        }
    }

    pub fn dataset(&self) -> String {
        let mut label = self.data_prefix().to_string();
        for part in [self.data_name.as_str(), self.data_suffix()] {
            if !part.is_empty() {
                label.push('_');
                label.push_str(part);
            }
        }
        label
    }

    pub fn fid(&self) -> &'static str {
        if self.fluctuate_fid {
            "fid_pseudodata"
        } else {
            "fid_asimov"
        }
    }

    /// First token of the data name, e.g. `no` for `no_sin2theta23_0.4500`.
    pub fn truth(&self) -> &str {
        self.data_name.split('_').next().unwrap_or_default()
    }

    /// Matches data sub-directories; fluctuated data captures `data_ind`.
    pub fn subdir_regex(&self) -> Result<Regex, regex::Error> {
        let pattern = if self.fluctuate_data {
            format!(
                r"^{}_{}_pseudodata_(?P<data_ind>\d+)$",
                self.data_prefix(),
                regex::escape(&self.data_name)
            )
        } else {
            format!("^{}$", regex::escape(&self.dataset()))
        };
        Regex::new(&pattern)
    }

    pub fn fit_to_data_file(&self, index: u8, dataset: &str) -> String {
        format!("hypo_{}_fit_to_{}.json", self.hypo_name(index), dataset)
    }

    /// Matches fits of hypothesis `hx` to the fiducial of `hy`; a fluctuated
    /// fiducial captures `fid_ind`.
    pub fn fid_fit_regex(&self, hx: u8, hy: u8) -> Result<Regex, regex::Error> {
        let pattern = format!(
            r"^hypo_{}_fit_to_hypo_{}_fid(_(?P<fid_ind>\d+))?\.json$",
            regex::escape(self.hypo_name(hx)),
            regex::escape(self.hypo_name(hy)),
        );
        Regex::new(&pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asimov() -> Labels {
        Labels::new("no", "io", "no_sin2theta23_0.4500", false, false, false)
    }

    #[test]
    fn derived_names() {
        let labels = asimov();
        assert_eq!(labels.h0(), "hypo_no");
        assert_eq!(labels.h1(), "hypo_io");
        assert_eq!(labels.dataset(), "toy_no_sin2theta23_0.4500_asimov");
        assert_eq!(labels.fid(), "fid_asimov");
        assert_eq!(labels.truth(), "no");
        assert_eq!(
            labels.fit_to_data_file(1, &labels.dataset()),
            "hypo_io_fit_to_toy_no_sin2theta23_0.4500_asimov.json"
        );
    }

    #[test]
    fn data_labels_have_no_suffix() {
        let labels = Labels::new("no", "io", "icecube", true, false, true);
        assert_eq!(labels.dataset(), "data_icecube");
        assert_eq!(labels.fid(), "fid_pseudodata");
    }

    #[test]
    fn subdir_regex_matches_dataset_only() {
        let re = asimov().subdir_regex().unwrap();
        assert!(re.is_match("toy_no_sin2theta23_0.4500_asimov"));
        assert!(!re.is_match("toy_no_sin2theta23_0x4500_asimov"));
        assert!(!re.is_match("toy_no_sin2theta23_0.4500_asimov_old"));

        let fluct = Labels::new("no", "io", "no_x", false, true, false).subdir_regex().unwrap();
        let caps = fluct.captures("toy_no_x_pseudodata_12").unwrap();
        assert_eq!(&caps["data_ind"], "12");
    }

    #[test]
    fn fid_fit_regex_captures_index() {
        let re = asimov().fid_fit_regex(0, 1).unwrap();
        assert!(re.is_match("hypo_no_fit_to_hypo_io_fid.json"));
        let caps = re.captures("hypo_no_fit_to_hypo_io_fid_3.json").unwrap();
        assert_eq!(&caps["fid_ind"], "3");
        assert!(!re.is_match("hypo_io_fit_to_hypo_no_fid.json"));
    }
}
