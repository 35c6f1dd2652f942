//! Greedy coordinate descent on articulatory parameters towards target formants.
//!
//! Every run tries each free parameter one step up and one step down and
//! commits the single best improving candidate. Candidates whose area
//! function gets too narrow are skipped, never repaired on the fly.

use tracing::{debug, info};

use crate::constants::MIN_ADVISED_VOWEL_AREA_CM2;
use crate::synthesis::CancelToken;
use crate::tl::TlModel;
use crate::tract::VocalTractModel;
use crate::tube::{PHARYNX_MOUTH_RANGE, Tube};

const MAX_RUNS: usize = 100;
const STEP_CM: f64 = 0.05;
const MAX_STEPS_VOWEL: usize = 20;
const MAX_STEPS_CONSONANT: usize = 10;

const REPAIR_MAX_RUNS: usize = 30;
const REPAIR_STEP_CM: f64 = 0.025;

const RELEASE_MAX_RUNS: usize = 40;
pub const AREA_TOLERANCE_CM2: f64 = 0.001;
const RELEASE_SEARCH_MARGIN_CM: f64 = 2.0;
const RELEASE_AREA_EPSILON_CM2: f64 = 0.01;

const CONSONANT_CONSTRICTION_MARGIN_CM: f64 = 1.5;
const CONSONANT_DELTA_AREA_CM2: f64 = 0.1;

/// Targets below this are "don't care" (Hz)
const MIN_TARGET_HZ: f64 = 1.0;

/// Relative RMS deviation of the formants from their targets, in percent.
///
/// Targets below 1 Hz are ignored; with no valid target the error is 0.
pub fn formant_error(current: &[f64; 3], target: &[f64; 3]) -> f64 {
    let (sum, n) = current
        .iter()
        .zip(target)
        .filter(|(_, t)| **t >= MIN_TARGET_HZ)
        .fold((0.0, 0usize), |(sum, n), (c, t)| {
            let d = 1.0 - c / t;
            (sum + d * d, n + 1)
        });
    if n == 0 { 0.0 } else { (sum / n as f64).sqrt() * 100.0 }
}

/// Smallest area of the pharynx/mouth branch.
pub fn min_area(tube: &Tube) -> f64 {
    tube.min_area(PHARYNX_MOUTH_RANGE).map_or(0.0, |(_, a)| a)
}

/// Smallest area of the pharynx/mouth branch outside `[start_cm, end_cm]`
/// (by section centers). Infinite if every section is excluded.
pub fn min_area_outside_constriction(tube: &Tube, extent: Option<(f64, f64)>) -> f64 {
    tube.sections()[PHARYNX_MOUTH_RANGE]
        .iter()
        .filter(|s| {
            let center = s.pos_cm + 0.5 * s.length_cm;
            extent.is_none_or(|(start, end)| center < start || center > end)
        })
        .map(|s| s.area_cm2)
        .fold(f64::INFINITY, f64::min)
}

/// Extent (cm) of the narrowest region of the main branch: the sections within
/// `delta_area` of the minimum around it, widened by `margin` on both sides.
pub fn constriction_extent(tube: &Tube, delta_area: f64, margin: f64) -> Option<(f64, f64)> {
    let (index, area) = tube.min_area(PHARYNX_MOUTH_RANGE)?;
    let limit = area + delta_area;
    let mut first = index;
    while first > PHARYNX_MOUTH_RANGE.start && tube.section(first - 1).area_cm2 <= limit {
        first -= 1;
    }
    let mut last = index;
    while last + 1 < PHARYNX_MOUTH_RANGE.end && tube.section(last + 1).area_cm2 <= limit {
        last += 1;
    }
    let end = tube.section(last);
    Some((tube.section(first).pos_cm - margin, end.pos_cm + end.length_cm + margin))
}

/// Step size of a parameter for a nominal step in cm.
fn param_step(abbr: &str, step: f64) -> f64 {
    match abbr {
        "HX" => step / 1.5,
        "JA" | "LP" | "TS1" | "TS2" | "TS3" => 0.05,
        "VS" => step / 0.5,
        _ => step,
    }
}

fn max_steps(max_param_change_cm: f64, cap: usize) -> i32 {
    let steps = (max_param_change_cm.max(0.0) / STEP_CM).round();
    steps.min(cap as f64) as i32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormantMeasurement {
    pub formants: [f64; 3],
    pub min_area_cm2: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationReport {
    pub initial_error: f64,
    pub final_error: f64,
    /// Number of committed steps
    pub runs: usize,
    pub cancelled: bool,
    /// Signed number of steps taken per parameter
    pub steps_taken: Vec<i32>,
    /// Error before the first and after every committed step
    pub error_history: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairReport {
    pub runs: usize,
    pub min_area_cm2: f64,
}

/// Constraint a candidate shape has to satisfy.
#[derive(Debug, Clone, Copy)]
enum AreaConstraint {
    /// Minimum area anywhere on the main branch
    Vowel(f64),
    /// Minimum area outside a constriction region fixed before the search
    Consonant { min_cm2: f64, extent: Option<(f64, f64)> },
}

type Progress<'a> = Box<dyn FnMut(usize, f64) + 'a>;

pub struct FormantOptimizer<'a> {
    tl: &'a mut TlModel,
    cancel: CancelToken,
    progress: Option<Progress<'a>>,
}

impl<'a> FormantOptimizer<'a> {
    /// The tube of `tl` is the template for everything the tract does not set.
    pub fn new(tl: &'a mut TlModel) -> Self {
        Self {
            tl,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called with the run index and current error after each committed step.
    pub fn with_progress(mut self, progress: impl FnMut(usize, f64) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn tube_of<T: VocalTractModel + ?Sized>(&self, tract: &T) -> Option<Tube> {
        let mut tube = self.tl.tube().clone();
        tract.get_tube(&mut tube).ok()?;
        Some(tube)
    }

    /// First three formants of the current tract shape. Fails for nasal
    /// shapes and when fewer than three formants are found.
    pub fn vowel_formants<T: VocalTractModel + ?Sized>(&mut self, tract: &T) -> Option<FormantMeasurement> {
        let tube = self.tube_of(tract)?;
        self.tl.set_tube(&tube);
        let result = self.tl.formants(3);
        if result.is_nasal || result.formants.len() < 3 {
            return None;
        }
        Some(FormantMeasurement {
            formants: [result.formants[0].freq, result.formants[1].freq, result.formants[2].freq],
            min_area_cm2: min_area(&tube),
        })
    }

    /// Formants at the release of `consonant` towards `vowel`. Leaves the
    /// tract at the release shape on success.
    pub fn consonant_formants<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        consonant: &[f64],
        vowel: &[f64],
        release_area_cm2: f64,
    ) -> Option<FormantMeasurement> {
        self.release_shape(tract, consonant, vowel, release_area_cm2)?;
        self.vowel_formants(tract)
    }

    /// Find the fraction on the linear path from `consonant` to `vowel` at which
    /// the minimum area around the consonant's constriction equals `release_area_cm2`.
    ///
    /// On success the tract holds the release shape. Without a bracketing pair
    /// the previous parameters are restored and `None` is returned.
    pub fn release_shape<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        consonant: &[f64],
        vowel: &[f64],
        release_area_cm2: f64,
    ) -> Option<f64> {
        let saved = tract.param_values();
        let result = self.find_release(tract, consonant, vowel, release_area_cm2);
        if result.is_none() {
            tract.set_param_values(&saved);
        }
        result
    }

    fn find_release<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        consonant: &[f64],
        vowel: &[f64],
        release: f64,
    ) -> Option<f64> {
        tract.set_param_values(consonant);
        let consonant_tube = self.tube_of(tract)?;
        let extent = constriction_extent(&consonant_tube, RELEASE_AREA_EPSILON_CM2, RELEASE_SEARCH_MARGIN_CM)?;
        let area_in_region = |tube: &Tube| {
            tube.sections()[PHARYNX_MOUTH_RANGE]
                .iter()
                .filter(|s| {
                    let center = s.pos_cm + 0.5 * s.length_cm;
                    center >= extent.0 && center <= extent.1
                })
                .map(|s| s.area_cm2)
                .fold(f64::INFINITY, f64::min)
        };

        let consonant_min = area_in_region(&consonant_tube);
        tract.set_param_values(vowel);
        let vowel_min = area_in_region(&self.tube_of(tract)?);
        if consonant_min >= release || vowel_min <= release {
            debug!(consonant_min, vowel_min, release, "release area is not bracketed");
            return None;
        }

        let mut begin = 0.0;
        let mut end = 1.0;
        let mut mid = 0.5;
        let mut values = vec![0.0; consonant.len().min(vowel.len())];
        for _ in 0..RELEASE_MAX_RUNS {
            mid = 0.5 * (begin + end);
            for (v, (c, w)) in values.iter_mut().zip(consonant.iter().zip(vowel)) {
                *v = c + mid * (w - c);
            }
            tract.set_param_values(&values);
            let area = area_in_region(&self.tube_of(tract)?);
            if (area - release).abs() <= AREA_TOLERANCE_CM2 {
                break;
            }
            if area < release {
                begin = mid;
            } else {
                end = mid;
            }
        }
        Some(mid)
    }

    /// Widen the narrowest part of the main branch outside `extent` until it
    /// reaches `target_cm2`, one parameter step per run.
    pub fn create_min_vocal_tract_area<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        extent: Option<(f64, f64)>,
        target_cm2: f64,
        fixed: &[bool],
    ) -> RepairReport {
        let vo = tract.param_index("VO");
        let mut current = self
            .tube_of(tract)
            .map_or(0.0, |t| min_area_outside_constriction(&t, extent));
        let mut runs = 0;
        while runs < REPAIR_MAX_RUNS && current < target_cm2 && !self.cancel.is_cancelled() {
            let mut best: Option<(usize, f64, f64)> = None;
            for j in 0..tract.params().len() {
                if fixed.get(j).copied().unwrap_or(false) || Some(j) == vo {
                    continue;
                }
                let original = tract.params()[j].x;
                let step = param_step(&tract.params()[j].abbr, REPAIR_STEP_CM);
                for candidate in [original + step, original - step] {
                    tract.params_mut()[j].set(candidate);
                    if tract.params()[j].x == original {
                        continue;
                    }
                    tract.calculate_all();
                    if let Some(tube) = self.tube_of(tract) {
                        let area = min_area_outside_constriction(&tube, extent);
                        if area - current > best.map_or(0.0, |b| b.2 - current) {
                            best = Some((j, tract.params()[j].x, area));
                        }
                    }
                }
                tract.params_mut()[j].set(original);
                tract.calculate_all();
            }
            let Some((j, x, area)) = best else {
                break;
            };
            tract.params_mut()[j].set(x);
            tract.calculate_all();
            current = area;
            runs += 1;
            debug!(run = runs, param = %tract.params()[j].abbr, min_area = current, "widened vocal tract");
        }
        RepairReport {
            runs,
            min_area_cm2: current,
        }
    }

    /// Fit the current vowel shape of `tract` to `targets` (Hz, 0 = ignore).
    pub fn optimize_formants_vowel<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        targets: [f64; 3],
        max_param_change_cm: f64,
        min_area_cm2: f64,
        fixed: &[bool],
    ) -> OptimizationReport {
        if let Some(tube) = self.tube_of(tract) {
            if min_area(&tube) < MIN_ADVISED_VOWEL_AREA_CM2 {
                self.create_min_vocal_tract_area(tract, None, MIN_ADVISED_VOWEL_AREA_CM2, fixed);
            }
        }
        let mut report = self.descend(
            tract,
            targets,
            max_steps(max_param_change_cm, MAX_STEPS_VOWEL),
            AreaConstraint::Vowel(min_area_cm2),
            fixed,
            |opt, tract| opt.vowel_formants(tract).map(|m| m.formants),
        );

        // The velopharyngeal port must end up closed.
        if let Some(vo) = tract.param_index("VO") {
            if tract.params()[vo].x > 0.0 {
                tract.params_mut()[vo].set(0.0);
                tract.calculate_all();
                if let Some(m) = self.vowel_formants(tract) {
                    report.final_error = formant_error(&m.formants, &targets);
                }
            }
        }
        report
    }

    /// Fit the consonant shape so that the formants at its release towards
    /// `vowel` match `targets`. The tract ends at the optimized consonant.
    #[allow(clippy::too_many_arguments)]
    pub fn optimize_formants_consonant<T: VocalTractModel + ?Sized>(
        &mut self,
        tract: &mut T,
        consonant: &[f64],
        vowel: &[f64],
        targets: [f64; 3],
        max_param_change_cm: f64,
        release_area_cm2: f64,
        min_area_cm2: f64,
        fixed: &[bool],
    ) -> OptimizationReport {
        tract.set_param_values(consonant);

        // Areas may only fall below `min_area_cm2` around the consonant's own
        // constriction, located once on the initial shape.
        let extent = self
            .tube_of(tract)
            .and_then(|t| constriction_extent(&t, CONSONANT_DELTA_AREA_CM2, CONSONANT_CONSTRICTION_MARGIN_CM));
        let outside = self
            .tube_of(tract)
            .map_or(f64::INFINITY, |t| min_area_outside_constriction(&t, extent));
        if outside < min_area_cm2 {
            self.create_min_vocal_tract_area(tract, extent, min_area_cm2, fixed);
        }

        if let Some(vo) = tract.param_index("VO") {
            let closed = tract.params()[vo].x.min(0.0);
            tract.params_mut()[vo].set(closed);
            tract.calculate_all();
        }
        let vowel = vowel.to_vec();
        self.descend(
            tract,
            targets,
            max_steps(max_param_change_cm, MAX_STEPS_CONSONANT),
            AreaConstraint::Consonant {
                min_cm2: min_area_cm2,
                extent,
            },
            fixed,
            move |opt, tract| {
                let shape = tract.param_values();
                let result = opt
                    .consonant_formants(tract, &shape, &vowel, release_area_cm2)
                    .map(|m| m.formants);
                tract.set_param_values(&shape);
                result
            },
        )
    }

    fn satisfies(&self, tube: &Tube, constraint: AreaConstraint) -> bool {
        match constraint {
            AreaConstraint::Vowel(min) => min_area(tube) >= min,
            AreaConstraint::Consonant { min_cm2, extent } => min_area_outside_constriction(tube, extent) >= min_cm2,
        }
    }

    fn descend<T, F>(
        &mut self,
        tract: &mut T,
        targets: [f64; 3],
        max_steps: i32,
        constraint: AreaConstraint,
        fixed: &[bool],
        mut measure: F,
    ) -> OptimizationReport
    where
        T: VocalTractModel + ?Sized,
        F: FnMut(&mut Self, &mut T) -> Option<[f64; 3]>,
    {
        let num_params = tract.params().len();
        let vo = tract.param_index("VO");
        let mut error = measure(self, tract).map_or(f64::INFINITY, |f| formant_error(&f, &targets));
        let mut report = OptimizationReport {
            initial_error: error,
            final_error: error,
            steps_taken: vec![0; num_params],
            error_history: vec![error],
            ..Default::default()
        };

        for run in 0..MAX_RUNS {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let mut best: Option<(usize, i32, f64, f64)> = None;
            for j in 0..num_params {
                if fixed.get(j).copied().unwrap_or(false) || Some(j) == vo {
                    continue;
                }
                let original = tract.params()[j].x;
                let step = param_step(&tract.params()[j].abbr, STEP_CM);
                for direction in [1, -1] {
                    if (report.steps_taken[j] + direction).abs() > max_steps {
                        continue;
                    }
                    tract.params_mut()[j].set(original + direction as f64 * step);
                    if tract.params()[j].x == original {
                        continue;
                    }
                    tract.calculate_all();
                    let admissible = self.tube_of(tract).is_some_and(|t| self.satisfies(&t, constraint));
                    if admissible {
                        if let Some(f) = measure(self, tract) {
                            let e = formant_error(&f, &targets);
                            if e < best.map_or(error, |b| b.3) {
                                best = Some((j, direction, tract.params()[j].x, e));
                            }
                        }
                    }
                }
                tract.params_mut()[j].set(original);
                tract.calculate_all();
            }

            let Some((j, direction, x, e)) = best else {
                break;
            };
            tract.params_mut()[j].set(x);
            tract.calculate_all();
            report.steps_taken[j] += direction;
            report.runs += 1;
            report.error_history.push(e);
            error = e;
            debug!(run, param = %tract.params()[j].abbr, error, "committed step");
            if let Some(progress) = self.progress.as_mut() {
                progress(run, error);
            }
        }
        report.final_error = error;
        info!(
            initial = report.initial_error,
            last = report.final_error,
            runs = report.runs,
            cancelled = report.cancelled,
            "formant optimization finished"
        );
        report
    }
}
