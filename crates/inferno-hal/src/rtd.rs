//! RTD conversion math.
//!
//! Each probe sits in a voltage divider against a 1 kΩ reference resistor
//! fed from the 3.3 V rail.  A raw ADC code is first turned into the probe's
//! resistance, then a calibration model maps resistance to temperature.
//!
//! # Example
//!
//! ```rust
//! use inferno_hal::rtd::{resistance_from_code, RtdModel};
//!
//! let ohms = resistance_from_code(512).unwrap();
//! assert!((ohms - 998.0).abs() < 1.0);
//!
//! let model = RtdModel::default();
//! let f = model.fahrenheit(1008.0).unwrap();
//! assert!((f - 32.0).abs() < 2.0);
//! ```

use crate::adc::ADC_MAX_CODE;

/// Divider supply voltage.
pub const VREF: f64 = 3.3;

/// Fixed divider resistor in ohms.
pub const REFERENCE_OHMS: f64 = 1000.0;

/// Raw code produced by an open (unplugged) probe: no voltage across the
/// divider, i.e. infinite resistance.
pub const UNPLUGGED_CODE: u16 = 0;

/// Convert a raw ADC code to the probe resistance in ohms.
///
/// `Vsample = (code / 1023) · Vref`, `R = (Vref·1000 − Vsample·1000) / Vsample`.
///
/// Returns `None` for codes the converter cannot produce, and for codes that
/// map to a non-physical (non-positive or infinite) resistance.
pub fn resistance_from_code(code: u16) -> Option<f64> {
    if code > ADC_MAX_CODE {
        return None;
    }
    let v_sample = (f64::from(code) / f64::from(ADC_MAX_CODE)) * VREF;
    let ohms = (VREF * REFERENCE_OHMS - v_sample * REFERENCE_OHMS) / v_sample;
    (ohms.is_finite() && ohms > 0.0).then_some(ohms)
}

/// Inverse of [`resistance_from_code`], rounded to the nearest code.
pub fn code_from_resistance(ohms: f64) -> u16 {
    let code = f64::from(ADC_MAX_CODE) * REFERENCE_OHMS / (ohms + REFERENCE_OHMS);
    code.round().clamp(0.0, f64::from(ADC_MAX_CODE)) as u16
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Steinhart–Hart coefficients: `1/T = A + B·ln(R) + C·ln(R)³` (T in kelvin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteinhartHart {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl SteinhartHart {
    /// Coefficients fitted to the smoker probes at three measured points:
    /// 1008 Ω / 0 °C, 1208 Ω / 53.4 °C, 1373 Ω / 97.2 °C.
    pub const SMOKER_PROBE: SteinhartHart = SteinhartHart {
        a: 70.274_534_60e-3,
        b: -127.039_353_8e-4,
        c: 641.944_169_1e-7,
    };

    /// Temperature in °C for `ohms`, or `None` outside the log domain.
    pub fn celsius(&self, ohms: f64) -> Option<f64> {
        if !(ohms.is_finite() && ohms > 0.0) {
            return None;
        }
        let ln_r = ohms.ln();
        let kelvin = 1.0 / (self.a + self.b * ln_r + self.c * ln_r.powi(3));
        let celsius = kelvin - 273.15;
        celsius.is_finite().then_some(celsius)
    }
}

/// Resistance-to-temperature calibration model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtdModel {
    /// Empirical cubic-in-log fit; the default for the smoker probes.
    SteinhartHart(SteinhartHart),
    /// Platinum RTD quadratic (IEC 60751 above 0 °C) with nominal resistance `r0`.
    CallendarVanDusen { a: f64, b: f64, r0: f64 },
}

impl RtdModel {
    /// PT1000 Callendar–Van Dusen coefficients.
    pub const PT1000: RtdModel = RtdModel::CallendarVanDusen {
        a: 3.908_30e-3,
        b: -5.775e-7,
        r0: 1000.0,
    };

    /// Temperature in °C for `ohms`, or `None` when the model is undefined there.
    pub fn celsius(&self, ohms: f64) -> Option<f64> {
        match *self {
            RtdModel::SteinhartHart(coeffs) => coeffs.celsius(ohms),
            RtdModel::CallendarVanDusen { a, b, r0 } => {
                if !(ohms.is_finite() && ohms > 0.0) {
                    return None;
                }
                let discriminant = a * a - 4.0 * b * (1.0 - ohms / r0);
                if discriminant < 0.0 {
                    return None;
                }
                Some((-a + discriminant.sqrt()) / (2.0 * b))
            }
        }
    }

    pub fn fahrenheit(&self, ohms: f64) -> Option<f64> {
        self.celsius(ohms).map(celsius_to_fahrenheit)
    }
}

impl Default for RtdModel {
    fn default() -> Self {
        RtdModel::SteinhartHart(SteinhartHart::SMOKER_PROBE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steinhart_hart_reproduces_calibration_points() {
        let model = SteinhartHart::SMOKER_PROBE;
        for (ohms, expected_c) in [(1008.0, 0.0), (1208.0, 53.4), (1373.0, 97.2)] {
            let c = model.celsius(ohms).unwrap();
            assert!(
                (c - expected_c).abs() <= 1.0,
                "{ohms} Ω should map to {expected_c} °C, got {c}"
            );
        }
    }

    #[test]
    fn mid_scale_code_is_about_one_kilohm() {
        let ohms = resistance_from_code(512).unwrap();
        assert!((ohms - 998.05).abs() < 0.1, "got {ohms}");
    }

    #[test]
    fn full_scale_and_zero_codes_are_non_physical() {
        assert_eq!(resistance_from_code(ADC_MAX_CODE), None);
        assert_eq!(resistance_from_code(UNPLUGGED_CODE), None);
        assert_eq!(resistance_from_code(4095), None);
    }

    #[test]
    fn code_round_trips_through_resistance() {
        let code = code_from_resistance(1208.0);
        let ohms = resistance_from_code(code).unwrap();
        assert!((ohms - 1208.0).abs() < 5.0, "got {ohms}");
    }

    #[test]
    fn log_domain_errors_are_none() {
        let model = RtdModel::default();
        assert!(model.celsius(0.0).is_none());
        assert!(model.celsius(-12.0).is_none());
        assert!(model.celsius(f64::INFINITY).is_none());
        assert!(model.celsius(f64::NAN).is_none());
    }

    #[test]
    fn pt1000_is_zero_at_nominal_resistance() {
        let c = RtdModel::PT1000.celsius(1000.0).unwrap();
        assert!(c.abs() < 1e-9);
        let hot = RtdModel::PT1000.celsius(1385.0).unwrap();
        assert!((hot - 100.0).abs() < 1.0, "got {hot}");
    }

    #[test]
    fn fahrenheit_conversion() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }
}
