//! Potter's Pi: chance-corrected nominal agreement against a uniform-chance
//! baseline.
//!
//! With `C` coders choosing among `K` values uniformly at random, all of them
//! agree on a unit with probability `P_e = (1/K)^(C−1)`. Pi rescales observed
//! agreement against that baseline:
//!
//! `π = (P_o − P_e) / (1 − P_e)`
//!
//! Unlike alpha, the baseline does not depend on the observed marginals, so
//! Pi stays defined when every coder used one value for every unit.

use super::fields::FieldValue;

/// Pi from an observed agreement proportion. `None` when `value_count < 2`,
/// `coder_count < 2`, or `observed_agreement` is outside [0, 1].
pub fn potters_pi(observed_agreement: f64, coder_count: usize, value_count: usize) -> Option<f64> {
    if value_count < 2 || coder_count < 2 || !(0.0..=1.0).contains(&observed_agreement) {
        return None;
    }
    let exponent = i32::try_from(coder_count - 1).ok()?;
    let expected = (1.0 / value_count as f64).powi(exponent);
    Some((observed_agreement - expected) / (1.0 - expected))
}

/// Pi over units coded by any number of coders. A unit agrees when every
/// coder recorded the same value; units with fewer than two values are
/// skipped. Coder count is taken from the widest unit.
pub fn potters_pi_for_units(units: &[Vec<FieldValue>], value_count: usize) -> Option<f64> {
    let scored: Vec<&Vec<FieldValue>> = units.iter().filter(|unit| unit.len() >= 2).collect();
    if scored.is_empty() {
        return None;
    }
    let coder_count = scored.iter().map(|unit| unit.len()).max()?;
    let agreeing = scored
        .iter()
        .filter(|unit| unit.iter().all(|value| *value == unit[0]))
        .count();
    potters_pi(agreeing as f64 / scored.len() as f64, coder_count, value_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12
    }

    #[test]
    fn two_coders_binary_field() {
        assert!(approx_eq(potters_pi(0.75, 2, 2).unwrap(), 0.5));
        assert!(approx_eq(potters_pi(1.0, 2, 2).unwrap(), 1.0));
        assert!(approx_eq(potters_pi(0.5, 2, 2).unwrap(), 0.0));
    }

    #[test]
    fn more_coders_lower_the_chance_baseline() {
        let two = potters_pi(0.6, 2, 3).unwrap();
        let three = potters_pi(0.6, 3, 3).unwrap();
        assert!(three > two);
    }

    #[test]
    fn degenerate_inputs_are_undefined() {
        assert_eq!(potters_pi(0.9, 2, 1), None);
        assert_eq!(potters_pi(0.9, 1, 4), None);
        assert_eq!(potters_pi(1.5, 2, 4), None);
    }

    #[test]
    fn defined_when_every_unit_uses_one_value() {
        let units = vec![vec![FieldValue::Number(0), FieldValue::Number(0)]; 5];
        assert!(approx_eq(potters_pi_for_units(&units, 2).unwrap(), 1.0));
    }

    #[test]
    fn unit_form_matches_proportion_form() {
        let units = vec![
            vec![FieldValue::Number(1), FieldValue::Number(1)],
            vec![FieldValue::Number(1), FieldValue::Number(0)],
            vec![FieldValue::Number(0), FieldValue::Number(0)],
            vec![FieldValue::Number(1), FieldValue::Number(1)],
            vec![FieldValue::Number(1)],
        ];
        assert!(approx_eq(potters_pi_for_units(&units, 2).unwrap(), 0.5));
    }
}
