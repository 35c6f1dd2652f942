use serde::{Deserialize, Serialize};

use crate::tube::{LAST_MOUTH_SECTION, Section};

/// Sections narrower than this can form a constriction (cm^2)
pub const CONSTRICTION_AREA_CM2: f64 = 0.8;
/// A constriction extends over neighbors within this margin of its minimum (cm^2)
const CONSTRICTION_MARGIN_CM2: f64 = 0.1;
/// Strouhal number linking jet velocity and width to the noise cutoff
const STROUHAL_NUMBER: f64 = 0.2;

/// Transient description of a local area minimum, rebuilt on every geometry update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constriction {
    pub first_section: usize,
    pub last_section: usize,
    pub area_cm2: f64,
    /// Particle velocity in the narrowest section (cm/s)
    pub velocity_cm_s: f64,
    /// Cutoff of the turbulence noise generated downstream (Hz)
    pub cutoff_hz: f64,
}

impl Constriction {
    pub fn contains(&self, section: usize) -> bool {
        (self.first_section..=self.last_section).contains(&section)
    }
}

/// Local area minima of `sections[range]` below [`CONSTRICTION_AREA_CM2`].
///
/// `flow_of` gives the volume flow through each section for the velocity estimate.
pub fn find_constrictions(
    sections: &[Section],
    range: std::ops::Range<usize>,
    flow_of: impl Fn(usize) -> f64,
    out: &mut Vec<Constriction>,
) {
    out.clear();
    let area = |i: usize| sections[i].area_cm2;
    let mut i = range.start;
    while i < range.end {
        let a = area(i);
        let left_ok = i == range.start || area(i - 1) >= a;
        let right_ok = i + 1 == range.end || area(i + 1) >= a;
        if a >= CONSTRICTION_AREA_CM2 || !(left_ok && right_ok) {
            i += 1;
            continue;
        }

        let limit = a + CONSTRICTION_MARGIN_CM2;
        let mut first = i;
        while first > range.start && area(first - 1) < limit {
            first -= 1;
        }
        let mut last = i;
        while last + 1 < range.end && area(last + 1) < limit {
            last += 1;
        }

        let safe = sections[i].safe_area();
        let velocity = flow_of(i).abs() / safe;
        let width = 2.0 * (safe / std::f64::consts::PI).sqrt();
        out.push(Constriction {
            first_section: first,
            last_section: last,
            area_cm2: a,
            velocity_cm_s: velocity,
            cutoff_hz: STROUHAL_NUMBER * velocity / width,
        });
        i = last + 1;
    }
}

/// Section whose inlet receives the noise of `c`: right after its exit,
/// or at the lips when the constriction reaches the end of the tract.
pub fn noise_section(c: &Constriction) -> usize {
    (c.last_section + 1).min(LAST_MOUTH_SECTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tube::{FIRST_PHARYNX_SECTION, PHARYNX_MOUTH_RANGE, Tube};

    #[test]
    fn finds_single_constriction() {
        let mut tube = Tube::new();
        for (k, a) in [(10, 0.5), (11, 0.2), (12, 0.25), (13, 0.6)] {
            tube.section_mut(FIRST_PHARYNX_SECTION + k).area_cm2 = a;
        }
        let mut found = Vec::new();
        find_constrictions(tube.sections(), PHARYNX_MOUTH_RANGE, |_| 100.0, &mut found);
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.first_section, FIRST_PHARYNX_SECTION + 11);
        assert_eq!(c.last_section, FIRST_PHARYNX_SECTION + 12);
        assert!((c.velocity_cm_s - 500.0).abs() < 1.0e-9);
        assert!(c.contains(FIRST_PHARYNX_SECTION + 12));
        assert_eq!(noise_section(c), FIRST_PHARYNX_SECTION + 13);
    }

    #[test]
    fn open_tract_has_none() {
        let tube = Tube::new();
        let mut found = vec![];
        find_constrictions(tube.sections(), PHARYNX_MOUTH_RANGE, |_| 0.0, &mut found);
        assert!(found.is_empty());
    }
}
