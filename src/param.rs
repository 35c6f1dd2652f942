use serde::{Deserialize, Serialize};

/// One named, bounded model parameter.
///
/// Glottis models and vocal tract models describe all of their settings with
/// this type, so that shapes, speaker files and the optimizer treat them alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Human readable name
    pub name: String,
    /// Short identifier used in files and shape tables
    pub abbr: String,
    /// Unit of the value
    pub unit: String,
    pub min: f64,
    pub max: f64,
    /// Default value
    pub neutral: f64,
    /// Current value
    pub x: f64,
}

impl Param {
    pub fn new(name: &str, abbr: &str, unit: &str, min: f64, max: f64, neutral: f64) -> Self {
        Self {
            name: name.to_string(),
            abbr: abbr.to_string(),
            unit: unit.to_string(),
            min,
            max,
            neutral,
            x: neutral,
        }
    }

    /// Set the current value, clamped to the parameter range.
    pub fn set(&mut self, x: f64) {
        self.x = x;
        self.limit();
    }

    pub fn limit(&mut self) {
        if self.x.is_nan() {
            self.x = self.neutral;
        }
        self.x = self.x.clamp(self.min, self.max);
    }
}

/// Index of the parameter with the given abbreviation.
pub fn find_param(params: &[Param], abbr: &str) -> Option<usize> {
    params.iter().position(|p| p.abbr == abbr)
}

/// Current values of a parameter list.
pub fn values(params: &[Param]) -> Vec<f64> {
    params.iter().map(|p| p.x).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps() {
        let mut p = Param::new("Frequency", "f0", "Hz", 40.0, 600.0, 120.0);
        p.set(1000.0);
        assert_eq!(p.x, 600.0);
        p.set(f64::NAN);
        assert_eq!(p.x, 120.0);
    }

    #[test]
    fn lookup() {
        let params = vec![
            Param::new("A", "a", "", 0.0, 1.0, 0.5),
            Param::new("B", "b", "", 0.0, 1.0, 0.25),
        ];
        assert_eq!(find_param(&params, "b"), Some(1));
        assert_eq!(find_param(&params, "c"), None);
        assert_eq!(values(&params), vec![0.5, 0.25]);
    }
}
