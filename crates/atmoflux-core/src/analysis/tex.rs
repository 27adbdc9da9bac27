use phf::{Map, phf_map};

#[rustfmt::skip]
static TEX_LABELS: Map<&'static str, &'static str> = phf_map! {
    // --- Oscillation parameters ---
    "theta12" => r"$\theta_{12}$",
    "theta13" => r"$\theta_{13}$",
    "theta23" => r"$\theta_{23}$",
    "sin2theta23" => r"$\sin^2\theta_{23}$",
    "deltacp" => r"$\delta_{\mathrm{CP}}$",
    "deltam21" => r"$\Delta m^2_{21}$",
    "deltam31" => r"$\Delta m^2_{31}$",
    "deltam3l" => r"$\Delta m^2_{3l}$",

    // --- Mass ordering hypotheses ---
    "no" => "Normal Ordering", "nh" => "Normal Ordering",
    "io" => "Inverted Ordering", "ih" => "Inverted Ordering",

    // --- Flux and detector systematics ---
    "nue_numu_ratio" => r"$\nu_e/\nu_{\mu}$ Ratio",
    "nu_nubar_ratio" => r"$\nu/\bar{\nu}$ Ratio",
    "delta_index" => r"Atmospheric Index Change",
    "barr_uphor_ratio" => r"Barr Up/Horizontal $\nu$ Ratio",
    "barr_nu_nubar_ratio" => r"Barr $\nu/\bar{\nu}$ Ratio",
    "aeff_scale" => r"$A_{\mathrm{eff}}$ Scale",
    "energy_scale" => r"Energy Scale",
    "atm_muon_scale" => r"Muon Background Scale",
    "nutau_norm" => r"$\nu_{\tau}$ Normalisation",
    "nu_nc_norm" => r"$\nu$ NC Scale",
    "dom_eff" => r"DOM Efficiency",
    "hole_ice" => r"Hole Ice",
    "hole_ice_fwd" => r"Hole Ice Forward",
    "u_tau4_sq" => r"$|U_{\tau 4}|^2$",

    // --- Units ---
    "dimensionless" => "",
    "electron_volt ** 2" => r"$\mathrm{eV}^2$",
    "electron_volt" => r"$\mathrm{eV}$",
    "gigaelectron_volt" => r"$\mathrm{GeV}$",
    "degree" => r"$^\circ$",
    "radian" => r"rad",
    "second" => r"s",
    "nanosecond" => r"ns",
};

/// TeX-formatted axis label for a parameter, hypothesis or unit name.
///
/// Unknown names are returned unchanged.
pub fn tex_axis_label(label: &str) -> String {
    TEX_LABELS
        .get(label)
        .or_else(|| TEX_LABELS.get(label.to_lowercase().as_str()))
        .map_or_else(|| label.to_string(), |tex| (*tex).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_labels_are_translated() {
        assert_eq!(tex_axis_label("theta23"), r"$\theta_{23}$");
        assert_eq!(tex_axis_label("electron_volt ** 2"), r"$\mathrm{eV}^2$");
        assert_eq!(tex_axis_label("NO"), "Normal Ordering");
    }

    #[test]
    fn unknown_labels_pass_through() {
        assert_eq!(tex_axis_label("my_param"), "my_param");
    }
}
