use crate::core::container::ContainerSet;
use crate::core::units::{REDUCED_PLANCK_GEV_S, SPEED_OF_LIGHT_M_PER_S};
use crate::stages::{ParamSet, Stage, StageError};
use tracing::instrument;

pub const EXPECTED_PARAMS: [&str; 1] = ["U_tau4_sq"];

/// Lifetime weight moving HNL events sampled with a 1/L decay length
/// distribution onto the exponential decay law.
///
/// Inputs: squared mixing, mass and kinetic energy in GeV, proper lifetime in
/// ns, sampling distances in m and total decay width in GeV.
pub fn re_weight_hnl(
    u_tau4_sq: f64,
    mass: f64,
    energy: f64,
    tau_ns: f64,
    distance_min: f64,
    distance_max: f64,
    hnl_decay_width: f64,
) -> f64 {
    let gamma = (energy + mass) / mass;
    let speed = SPEED_OF_LIGHT_M_PER_S * (1.0 - (1.0 / gamma).powi(2)).sqrt();

    let tau_min = distance_min / (gamma * speed);
    let tau_max = distance_max / (gamma * speed);
    let tau_s = tau_ns * 1e-9;
    let tau_proper = REDUCED_PLANCK_GEV_S / (hnl_decay_width * u_tau4_sq);

    let pdf_inverse = (1.0 / (tau_max.ln() - tau_min.ln())) * (1.0 / tau_s);
    let pdf_exp = (-tau_s / tau_proper).exp() / tau_proper;

    u_tau4_sq * pdf_exp / pdf_inverse
}

/// Multiplies container weights by [`re_weight_hnl`].
pub struct HnlWeight {
    params: ParamSet,
}

impl HnlWeight {
    pub fn new(params: ParamSet) -> Result<Self, StageError> {
        params.require_exactly("weight_hnl", &EXPECTED_PARAMS)?;
        Ok(Self { params })
    }
}

impl Stage for HnlWeight {
    fn name(&self) -> &str {
        "weight_hnl"
    }

    #[instrument(skip_all, name = "weight_hnl_apply")]
    fn apply(&mut self, data: &mut ContainerSet) -> Result<(), StageError> {
        let u_tau4_sq = self.params.dimensionless("U_tau4_sq")?;
        for container in data.iter_mut() {
            let mass = container.column("mHNL")?;
            let energy = container.column("hnl_true_energy")?;
            let lifetime = container.column("hnl_proper_lifetime")?;
            let d_min = container.column("hnl_distance_min")?;
            let d_max = container.column("hnl_distance_max")?;
            let width = container.column("hnl_decay_width")?;
            let factors: Vec<f64> = (0..container.size())
                .map(|i| {
                    re_weight_hnl(
                        u_tau4_sq,
                        mass[i],
                        energy[i],
                        lifetime[i],
                        d_min[i],
                        d_max[i],
                        width[i],
                    )
                })
                .collect();

            let weights = container.get_mut("weights")?;
            for (w, f) in weights.data.iter_mut().zip(factors) {
                *w *= f;
            }
            container.mark_changed("weights");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{Container, Field};
    use crate::core::units::Quantity;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
    }

    #[test]
    fn weight_matches_closed_form() {
        let (u2, m, e, tau_ns, dmin, dmax, width) = (1e-3, 0.5, 1.5, 10.0, 1.0, 1000.0, 1e-16);
        let gamma: f64 = 4.0;
        let v = SPEED_OF_LIGHT_M_PER_S * (1.0 - 1.0 / 16.0f64).sqrt();
        let ln_ratio = (dmax / (gamma * v)).ln() - (dmin / (gamma * v)).ln();
        assert!(f64_approx_equal(ln_ratio, 1000f64.ln()));

        let tau_proper = REDUCED_PLANCK_GEV_S / (width * u2);
        let tau = tau_ns * 1e-9;
        let expected = u2 * ((-tau / tau_proper).exp() / tau_proper) * ln_ratio * tau;
        let weight = re_weight_hnl(u2, m, e, tau_ns, dmin, dmax, width);
        assert!(f64_approx_equal(weight, expected));
    }

    #[test]
    fn weight_depends_on_sampled_lifetime() {
        let short = re_weight_hnl(1e-3, 0.5, 1.5, 1.0, 1.0, 1000.0, 1e-16);
        let long = re_weight_hnl(1e-3, 0.5, 1.5, 100.0, 1.0, 1000.0, 1e-16);
        assert!(short > 0.0 && long > 0.0);
        assert_ne!(short, long);
    }

    #[test]
    fn apply_multiplies_existing_weights() {
        let mut c = Container::new("nutau_cc", 2);
        for (key, value) in [
            ("mHNL", 0.5),
            ("hnl_true_energy", 1.5),
            ("hnl_proper_lifetime", 10.0),
            ("hnl_distance_min", 1.0),
            ("hnl_distance_max", 1000.0),
            ("hnl_decay_width", 1e-16),
        ] {
            c.insert(key, Field::column(vec![value; 2])).unwrap();
        }
        c.insert("weights", Field::column(vec![2.0, 3.0])).unwrap();
        let mut data = ContainerSet::new("events");
        data.add_container(c);

        let params = ParamSet::new().with("U_tau4_sq", Quantity::dimensionless(1e-3));
        let mut stage = HnlWeight::new(params).unwrap();
        stage.apply(&mut data).unwrap();

        let single = re_weight_hnl(1e-3, 0.5, 1.5, 10.0, 1.0, 1000.0, 1e-16);
        let weights = data.get("nutau_cc").unwrap().column("weights").unwrap();
        assert!(f64_approx_equal(weights[0], 2.0 * single));
        assert!(f64_approx_equal(weights[1], 3.0 * single));
    }

    #[test]
    fn missing_field_is_reported() {
        let mut c = Container::new("nutau_cc", 1);
        c.insert("weights", Field::column(vec![1.0])).unwrap();
        let mut data = ContainerSet::new("events");
        data.add_container(c);
        let params = ParamSet::new().with("U_tau4_sq", Quantity::dimensionless(1e-3));
        assert!(matches!(
            HnlWeight::new(params).unwrap().apply(&mut data),
            Err(StageError::Container(_))
        ));
    }
}
