use serde::{Deserialize, Serialize};

use crate::tube::{FIRST_NOSE_SECTION, PHARYNX_MOUTH_RANGE};

use super::{TRANSFER_FUNCTION_SECTION, TlModel};

const COARSE_STEP_HZ: f64 = 20.0;
const FINE_STEP_HZ: f64 = 1.0;
const BANDWIDTH_STEP_HZ: f64 = 2.0;
const MAX_FREQUENCY_HZ: f64 = 6000.0;
const MAX_HALF_BANDWIDTH_HZ: f64 = 500.0;

/// Areas at or below this close the tract (cm^2)
const CLOSURE_AREA_CM2: f64 = 1.0e-3;
/// Constrictions below this are expected to produce frication (cm^2)
const FRICATION_AREA_CM2: f64 = 0.2;
/// Velopharyngeal port opening that makes a sound nasal (cm^2)
const NASAL_PORT_AREA_CM2: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Formant {
    /// Center frequency (Hz)
    pub freq: f64,
    /// -3 dB bandwidth (Hz)
    pub bw: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormantResult {
    pub formants: Vec<Formant>,
    pub frication_noise: bool,
    pub is_closure: bool,
    pub is_nasal: bool,
}

impl FormantResult {
    pub fn frequencies(&self) -> Vec<f64> {
        self.formants.iter().map(|f| f.freq).collect()
    }
}

impl TlModel {
    fn level_db(&self, frequency_hz: f64) -> f64 {
        let m = self.flow_source_tf(TRANSFER_FUNCTION_SECTION, frequency_hz).norm();
        20.0 * m.max(1.0e-300).log10()
    }

    /// Peaks of the volume velocity transfer function from the glottis to the
    /// mouth and nostrils, lowest first, at most `max` of them.
    pub fn formants(&self, max: usize) -> FormantResult {
        let tube = self.tube();
        let min_area = tube
            .min_area(PHARYNX_MOUTH_RANGE)
            .map_or(0.0, |(_, area)| area);
        let is_closure = min_area <= CLOSURE_AREA_CM2;
        let mut result = FormantResult {
            formants: Vec::with_capacity(max),
            frication_noise: !is_closure && min_area < FRICATION_AREA_CM2,
            is_closure,
            is_nasal: tube.section(FIRST_NOSE_SECTION).area_cm2 >= NASAL_PORT_AREA_CM2,
        };
        if max == 0 {
            return result;
        }

        let mut prev = self.level_db(COARSE_STEP_HZ);
        let mut current = self.level_db(2.0 * COARSE_STEP_HZ);
        let mut f = 2.0 * COARSE_STEP_HZ;
        while f + COARSE_STEP_HZ <= MAX_FREQUENCY_HZ && result.formants.len() < max {
            let next = self.level_db(f + COARSE_STEP_HZ);
            if current > prev && current >= next {
                result.formants.push(self.refine_peak(f));
            }
            prev = current;
            current = next;
            f += COARSE_STEP_HZ;
        }
        result
    }

    fn refine_peak(&self, coarse_hz: f64) -> Formant {
        // Fine grid around the coarse maximum, then a parabola through the top three points
        let n = (COARSE_STEP_HZ / FINE_STEP_HZ) as i32;
        let levels: Vec<(f64, f64)> = (-n..=n)
            .map(|k| {
                let f = coarse_hz + k as f64 * FINE_STEP_HZ;
                (f, self.level_db(f))
            })
            .collect();
        let (best, _) = levels
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, &(_, l))| if l > acc.1 { (i, l) } else { acc });

        let (mut freq, mut peak) = levels[best];
        if best > 0 && best + 1 < levels.len() {
            let (l0, l1, l2) = (levels[best - 1].1, levels[best].1, levels[best + 1].1);
            let denom = l0 - 2.0 * l1 + l2;
            if denom < 0.0 {
                let shift = 0.5 * (l0 - l2) / denom;
                freq += shift * FINE_STEP_HZ;
                peak = l1 - 0.25 * (l0 - l2) * shift;
            }
        }

        let lower = self.half_power_distance(freq, peak, -1.0);
        let upper = self.half_power_distance(freq, peak, 1.0);
        let bw = match (lower, upper) {
            (Some(l), Some(u)) => l + u,
            (Some(h), None) | (None, Some(h)) => 2.0 * h,
            (None, None) => 2.0 * MAX_HALF_BANDWIDTH_HZ,
        };
        Formant { freq, bw }
    }

    /// Distance from the peak to the -3 dB point in `direction`, linearly interpolated.
    fn half_power_distance(&self, freq: f64, peak_db: f64, direction: f64) -> Option<f64> {
        let target = peak_db - 3.0;
        let mut prev = (0.0, peak_db);
        let mut d = BANDWIDTH_STEP_HZ;
        while d <= MAX_HALF_BANDWIDTH_HZ {
            let f = freq + direction * d;
            if f <= 0.0 {
                return None;
            }
            let level = self.level_db(f);
            if level <= target {
                let t = (prev.1 - target) / (prev.1 - level);
                return Some(prev.0 + t * (d - prev.0));
            }
            if level > peak_db {
                // Rising again towards a neighboring peak
                return None;
            }
            prev = (d, level);
            d += BANDWIDTH_STEP_HZ;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tube::Tube;

    #[test]
    fn closed_tract_is_flagged() {
        let mut tube = Tube::new();
        let mid = PHARYNX_MOUTH_RANGE.start + 35;
        tube.set_section_geometry(mid, 0.4, 0.0);
        tube.calc_positions();
        let mut tl = TlModel::new();
        tl.set_tube(&tube);
        let r = tl.formants(0);
        assert!(r.is_closure);
        assert!(!r.frication_noise);
        assert!(r.formants.is_empty());
    }

    #[test]
    fn narrow_constriction_fricates() {
        let mut tube = Tube::new();
        tube.set_section_geometry(PHARYNX_MOUTH_RANGE.start + 36, 0.4, 0.1);
        let mut tl = TlModel::new();
        tl.set_tube(&tube);
        let r = tl.formants(2);
        assert!(r.frication_noise && !r.is_closure);
        assert_eq!(r.formants.len(), 2);
        assert!(r.formants[0].freq < r.formants[1].freq);
        assert_eq!(r.frequencies().len(), 2);
    }
}
