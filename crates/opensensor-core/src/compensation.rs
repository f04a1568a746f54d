//! Temperature and humidity compensation for board self-heating.
//!
//! The weather sensor sits close to the CPU, so its temperature reads high.
//! The correction pulls the raw value away from a rolling average of the
//! heat-source temperature; humidity is then re-derived through the dewpoint
//! so that it matches the corrected temperature.

use std::collections::VecDeque;

/// Number of heat-source samples in the rolling average.
pub const AUX_WINDOW: usize = 5;

/// Default compensation factor.
pub const DEFAULT_FACTOR: f64 = 2.25;

/// Heat-source temperature assumed while no sample has been seen.
pub const DEFAULT_FALLBACK_CELSIUS: f64 = 40.0;

/// Bounded ring of the most recent heat-source temperatures. Oldest is overwritten.
#[derive(Debug, Clone, Default)]
pub struct AuxWindow {
    samples: VecDeque<f64>,
}

impl AuxWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(AUX_WINDOW),
        }
    }

    pub fn push(&mut self, celsius: f64) {
        if !celsius.is_finite() {
            return;
        }
        if self.samples.len() == AUX_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(celsius);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean over however many samples are present; `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// `raw - (aux_avg - raw) / factor`
pub fn compensate_temperature(raw_temperature: f64, aux_average: f64, factor: f64) -> f64 {
    raw_temperature - ((aux_average - raw_temperature) / factor)
}

/// Dewpoint approximation from the raw (uncorrected) pair.
pub fn dewpoint(raw_temperature: f64, raw_humidity: f64) -> f64 {
    raw_temperature - ((100.0 - raw_humidity) / 5.0)
}

/// Humidity re-derived at the compensated temperature, clamped to `[0, 100]`.
pub fn compensate_humidity(raw_humidity: f64, raw_temperature: f64, compensated_temperature: f64) -> f64 {
    let dp = dewpoint(raw_temperature, raw_humidity);
    (100.0 - (5.0 * (compensated_temperature - dp))).clamp(0.0, 100.0)
}

/// Derived values for one reading. All `None` when an operand was missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Compensated {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub dewpoint: Option<f64>,
}

/// Stateful compensation: configuration plus the heat-source history.
#[derive(Debug, Clone)]
pub struct CompensationModel {
    enabled: bool,
    factor: f64,
    fallback: f64,
    aux: AuxWindow,
}

impl Default for CompensationModel {
    fn default() -> Self {
        Self::new(true, DEFAULT_FACTOR)
    }
}

impl CompensationModel {
    pub fn new(enabled: bool, factor: f64) -> Self {
        Self {
            enabled,
            factor,
            fallback: DEFAULT_FALLBACK_CELSIUS,
            aux: AuxWindow::new(),
        }
    }

    /// Heat-source temperature to use when the window is empty, e.g. on a
    /// board without a readable thermal zone.
    pub fn with_fallback(mut self, celsius: f64) -> Self {
        self.fallback = celsius;
        self
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Record one heat-source sample.
    pub fn push_aux(&mut self, celsius: f64) {
        self.aux.push(celsius);
    }

    pub fn aux_window(&self) -> &AuxWindow {
        &self.aux
    }

    /// Derive compensated values from a raw pair.
    ///
    /// Returns all-`None` if either raw value is missing. With no heat-source
    /// sample yet, the fallback temperature stands in for the average.
    pub fn apply(&self, raw_temperature: Option<f64>, raw_humidity: Option<f64>) -> Compensated {
        let (Some(t), Some(h)) = (raw_temperature, raw_humidity) else {
            return Compensated::default();
        };

        let temperature = if self.enabled {
            let avg = self.aux.average().unwrap_or(self.fallback);
            compensate_temperature(t, avg, self.factor)
        } else {
            t
        };

        Compensated {
            temperature: Some(temperature),
            humidity: Some(compensate_humidity(h, t, temperature)),
            dewpoint: Some(dewpoint(t, h)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn model_with_aux(enabled: bool, aux: &[f64]) -> CompensationModel {
        let mut m = CompensationModel::new(enabled, DEFAULT_FACTOR);
        for &a in aux {
            m.push_aux(a);
        }
        m
    }

    // -----------------------------------------------------------------------
    // Rolling window
    // -----------------------------------------------------------------------

    #[test]
    fn test_aux_window_overwrites_oldest() {
        let mut w = AuxWindow::new();
        for t in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            w.push(t);
        }
        assert_eq!(w.len(), AUX_WINDOW);
        // 10.0 dropped
        assert!((w.average().unwrap() - 40.0).abs() < EPS);
    }

    #[test]
    fn test_aux_window_partial_average() {
        let mut w = AuxWindow::new();
        w.push(30.0);
        w.push(40.0);
        assert!((w.average().unwrap() - 35.0).abs() < EPS);
    }

    #[test]
    fn test_aux_window_ignores_nan() {
        let mut w = AuxWindow::new();
        w.push(f64::NAN);
        assert!(w.is_empty());
        assert_eq!(w.average(), None);
    }

    // -----------------------------------------------------------------------
    // Temperature
    // -----------------------------------------------------------------------

    #[test]
    fn test_disabled_leaves_temperature_raw() {
        let m = model_with_aux(false, &[30.0; 5]);
        let c = m.apply(Some(25.0), Some(50.0));
        assert_eq!(c.temperature, Some(25.0));
    }

    #[test]
    fn test_enabled_pulls_temperature_down() {
        let m = model_with_aux(true, &[30.0; 5]);
        let c = m.apply(Some(25.0), Some(50.0));
        let expected = 25.0 - ((30.0 - 25.0) / 2.25);
        assert!((c.temperature.unwrap() - expected).abs() < EPS);
        assert!((c.temperature.unwrap() - 22.78).abs() < 0.01);
    }

    #[test]
    fn test_enabled_without_aux_uses_fallback() {
        let m = model_with_aux(true, &[]);
        let c = m.apply(Some(25.0), Some(50.0));
        // 25 - (40 - 25) / 2.25
        assert!((c.temperature.unwrap() - 18.333_333).abs() < 1e-5);
        assert!(c.humidity.is_some());
        assert!((c.dewpoint.unwrap() - 15.0).abs() < EPS);
    }

    #[test]
    fn test_custom_fallback() {
        let m = CompensationModel::new(true, DEFAULT_FACTOR).with_fallback(25.0);
        let c = m.apply(Some(25.0), Some(50.0));
        assert_eq!(c.temperature, Some(25.0));
        assert!((c.humidity.unwrap() - 50.0).abs() < EPS);
    }

    #[test]
    fn test_samples_override_fallback() {
        let m = model_with_aux(true, &[30.0]).with_fallback(90.0);
        let c = m.apply(Some(25.0), Some(50.0));
        let expected = 25.0 - ((30.0 - 25.0) / 2.25);
        assert!((c.temperature.unwrap() - expected).abs() < EPS);
    }

    #[test]
    fn test_missing_operand_faults_everything() {
        let m = model_with_aux(true, &[30.0; 5]);
        assert_eq!(m.apply(None, Some(50.0)), Compensated::default());
        assert_eq!(m.apply(Some(25.0), None), Compensated::default());
    }

    // -----------------------------------------------------------------------
    // Humidity
    // -----------------------------------------------------------------------

    #[test]
    fn test_dewpoint_formula() {
        assert!((dewpoint(25.0, 60.0) - 17.0).abs() < EPS);
    }

    #[test]
    fn test_humidity_unchanged_when_temperature_unchanged() {
        let h = compensate_humidity(47.5, 21.0, 21.0);
        assert!((h - 47.5).abs() < EPS);
    }

    #[test]
    fn test_humidity_consistent_with_dewpoint() {
        let (raw_t, raw_h) = (25.0, 60.0);
        let comp_t = compensate_temperature(raw_t, 30.0, 2.25);
        let dp = dewpoint(raw_t, raw_h);
        let h = compensate_humidity(raw_h, raw_t, comp_t);
        // Re-deriving the dewpoint at the compensated temperature recovers the same dewpoint.
        assert!((dewpoint(comp_t, h) - dp).abs() < EPS);
    }

    #[test]
    fn test_humidity_clamped() {
        assert_eq!(compensate_humidity(99.0, 25.0, 10.0), 100.0);
        assert_eq!(compensate_humidity(5.0, 25.0, 40.0), 0.0);
    }

    #[test]
    fn test_apply_returns_both_humidities_independently() {
        let m = model_with_aux(true, &[30.0; 5]);
        let c = m.apply(Some(25.0), Some(60.0));
        let h = c.humidity.unwrap();
        assert!(h > 60.0, "cooler corrected temperature raises humidity, got {h}");
        assert!((c.dewpoint.unwrap() - 17.0).abs() < EPS);
    }
}
