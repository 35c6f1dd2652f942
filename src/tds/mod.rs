//! Time-domain simulation of the duct network, one audio sample per step.
//!
//! Each section is a node carrying a pressure; each junction between sections
//! (and the lung inlet) is a branch carrying a volume flow. Integrating with
//! the trapezoidal rule and eliminating flows, wall velocities and radiation
//! currents leaves a symmetric positive definite system in the node
//! pressures, solved every step by [`solver::TreeMatrix`].

use serde::{Deserialize, Serialize};

use crate::constants::{
    ADIABATIC_CONSTANT, AIR_VISCOSITY, AMBIENT_DENSITY, HEAT_CONDUCTION, RHO_C2, SAMPLING_RATE,
    SOUND_VELOCITY, SPECIFIC_HEAT, TWO_PI, WALL_MASS_CGS, WALL_RESISTANCE_CGS, WALL_STIFFNESS_CGS,
    time_step,
};
use crate::tl::TlOptions;
use crate::tube::{
    FIRST_FOSSA_SECTION, FIRST_NOSE_SECTION, FIRST_PHARYNX_SECTION, FIRST_SINUS_SECTION,
    FOSSA_COUPLING_SECTION, LAST_FOSSA_SECTION, LAST_MOUTH_SECTION, LAST_NOSE_SECTION,
    LAST_TRACHEA_SECTION, LOWER_GLOTTIS_SECTION, NOSE_COUPLING_SECTION, NUM_SECTIONS,
    PHARYNX_MOUTH_RANGE, SINUSES, Section, SectionType, Tube, UPPER_GLOTTIS_SECTION,
};

pub mod constriction;
pub mod noise;
pub mod solver;

use self::constriction::{Constriction, find_constrictions, noise_section};
use self::noise::{NoiseSource, noise_amplitude, reynolds_number};
use self::solver::{SolverType, TreeMatrix};

/// Pressure loss coefficient for flow entering the glottis
const GLOTTIS_ENTRANCE_LOSS: f64 = 1.37;
/// Slit length assumed for the viscous resistance of the glottis (cm)
const GLOTTIS_SLIT_LENGTH_CM: f64 = 1.4;
/// Frequency at which boundary layer and heat losses are evaluated (Hz)
const LOSS_REFERENCE_FREQUENCY_HZ: f64 = 500.0;
/// Area of the glottis above which aspiration noise is generated (cm^2)
const ASPIRATION_MIN_AREA_CM2: f64 = 1.0e-3;
/// Number of supraglottal noise sources driven simultaneously
const MAX_SUPRAGLOTTAL_NOISE_SOURCES: usize = 4;

// Velum tissue per unit area, for transvelar coupling
const VELUM_AREA_CM2: f64 = 2.0;
const VELUM_MASS_CGS: f64 = 2.0;
const VELUM_RESISTANCE_CGS: f64 = 2000.0;
const VELUM_STIFFNESS_CGS: f64 = 1.0e5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdsOptions {
    pub solver: SolverType,
    /// Kinetic pressure drops at contractions outside of the glottis
    pub turbulence_losses: bool,
    pub soft_walls: bool,
    pub generate_noise_sources: bool,
    /// Add the volume velocity of the vibrating walls to the radiated flow
    pub radiation_from_skin: bool,
    pub piriform_fossa: bool,
    pub inner_length_corrections: bool,
    /// Sound transmission through the closed velum
    pub transvelar_coupling: bool,
    pub sor_relaxation: f64,
    pub sor_tolerance: f64,
    pub sor_max_iterations: usize,
    /// Cutoff of the low pass that smooths area changes (Hz)
    pub area_smoothing_hz: f64,
}

impl Default for TdsOptions {
    fn default() -> Self {
        Self {
            solver: SolverType::Cholesky,
            turbulence_losses: true,
            soft_walls: true,
            generate_noise_sources: true,
            radiation_from_skin: true,
            piriform_fossa: false,
            inner_length_corrections: false,
            transvelar_coupling: false,
            sor_relaxation: 1.6,
            sor_tolerance: 1.0e-9,
            sor_max_iterations: 200,
            area_smoothing_hz: 150.0,
        }
    }
}

/// Volume flows leaving the system in one step (cm^3/s).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeStepFlow {
    pub total: f64,
    pub mouth: f64,
    pub nostril: f64,
    pub skin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    Lung,
    Junction,
    VelumPort,
    Transvelar,
    FossaPort,
    SinusNeck(usize),
}

#[derive(Debug, Clone)]
struct Branch {
    /// `None` is the ambient side of the lungs
    from: Option<usize>,
    to: usize,
    kind: BranchKind,
    flow: f64,
    /// Pressure stored in the series elastance
    elastance_pressure: f64,
    alpha: f64,
    beta: f64,
    elastance: f64,
    /// Pressure source in series, set for the current step only
    source: f64,
}

impl Branch {
    fn new(from: Option<usize>, to: usize, kind: BranchKind) -> Self {
        Self {
            from,
            to,
            kind,
            flow: 0.0,
            elastance_pressure: 0.0,
            alpha: 0.0,
            beta: 0.0,
            elastance: 0.0,
            source: 0.0,
        }
    }
}

/// Parallel R-L radiation load at an outlet.
#[derive(Debug, Clone, Copy, Default)]
struct Radiation {
    section: usize,
    conductance: f64,
    inductance: f64,
    inductor_flow: f64,
    flow: f64,
}

impl Radiation {
    fn update_geometry(&mut self, area: f64) {
        let resistance = 128.0 * AMBIENT_DENSITY * SOUND_VELOCITY / (9.0 * std::f64::consts::PI.powi(2) * area);
        self.conductance = 1.0 / resistance;
        self.inductance = 8.0 * AMBIENT_DENSITY / (3.0 * std::f64::consts::PI * (std::f64::consts::PI * area).sqrt());
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Wall {
    displacement: f64,
    velocity: f64,
    gamma: f64,
    delta: f64,
    surface: f64,
}

#[derive(Debug, Clone)]
pub struct TdsModel {
    pub options: TdsOptions,
    /// Smoothed geometry used by the simulation
    tube: Tube,
    initialized: bool,

    branches: Vec<Branch>,
    /// Branch flowing into each section, where the pressure source of that section sits
    inlet_branch: Vec<Option<usize>>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    matrix: TreeMatrix,

    pressure: Vec<f64>,
    volume: Vec<f64>,
    walls: Vec<Wall>,
    radiation: [Radiation; 2],

    flow_source: Option<(f64, usize)>,
    pressure_source: Option<(f64, usize)>,

    constrictions: Vec<Constriction>,
    monitor_section: usize,
    noise: Vec<NoiseSource>,
    aspiration_noise: NoiseSource,

    rhs: Vec<f64>,
    solution: Vec<f64>,
    sor_fallback_reported: bool,
    time_step_count: u64,
}

impl Default for TdsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TdsModel {
    pub fn new() -> Self {
        let mut branches = vec![Branch::new(None, 0, BranchKind::Lung)];
        for i in 0..LAST_MOUTH_SECTION {
            branches.push(Branch::new(Some(i), i + 1, BranchKind::Junction));
        }
        branches.push(Branch::new(Some(NOSE_COUPLING_SECTION), FIRST_NOSE_SECTION, BranchKind::VelumPort));
        branches.push(Branch::new(Some(NOSE_COUPLING_SECTION), FIRST_NOSE_SECTION, BranchKind::Transvelar));
        for i in FIRST_NOSE_SECTION..LAST_NOSE_SECTION {
            branches.push(Branch::new(Some(i), i + 1, BranchKind::Junction));
        }
        branches.push(Branch::new(Some(FOSSA_COUPLING_SECTION), FIRST_FOSSA_SECTION, BranchKind::FossaPort));
        for i in FIRST_FOSSA_SECTION..LAST_FOSSA_SECTION {
            branches.push(Branch::new(Some(i), i + 1, BranchKind::Junction));
        }
        for (k, sinus) in SINUSES.iter().enumerate() {
            branches.push(Branch::new(
                Some(sinus.coupling_section),
                FIRST_SINUS_SECTION + k,
                BranchKind::SinusNeck(k),
            ));
        }

        let mut inlet_branch = vec![None; NUM_SECTIONS];
        let mut incoming = vec![Vec::new(); NUM_SECTIONS];
        let mut outgoing = vec![Vec::new(); NUM_SECTIONS];
        let mut edges = Vec::new();
        for (b, branch) in branches.iter().enumerate() {
            if branch.kind != BranchKind::Transvelar && inlet_branch[branch.to].is_none() {
                inlet_branch[branch.to] = Some(b);
            }
            incoming[branch.to].push(b);
            if let Some(from) = branch.from {
                outgoing[from].push(b);
                edges.push((from, branch.to));
            }
        }

        let mut model = Self {
            options: TdsOptions::default(),
            tube: Tube::new(),
            initialized: false,
            branches,
            inlet_branch,
            incoming,
            outgoing,
            matrix: TreeMatrix::new(NUM_SECTIONS, &edges),
            pressure: vec![0.0; NUM_SECTIONS],
            volume: vec![0.0; NUM_SECTIONS],
            walls: vec![Wall::default(); NUM_SECTIONS],
            radiation: [
                Radiation {
                    section: LAST_MOUTH_SECTION,
                    ..Default::default()
                },
                Radiation {
                    section: LAST_NOSE_SECTION,
                    ..Default::default()
                },
            ],
            flow_source: None,
            pressure_source: None,
            constrictions: Vec::new(),
            monitor_section: FIRST_PHARYNX_SECTION + 30,
            noise: (0..MAX_SUPRAGLOTTAL_NOISE_SOURCES as u64).map(|k| NoiseSource::new(100 + k)).collect(),
            aspiration_noise: NoiseSource::new(1),
            rhs: vec![0.0; NUM_SECTIONS],
            solution: vec![0.0; NUM_SECTIONS],
            sor_fallback_reported: false,
            time_step_count: 0,
        };
        model.reset_motion();
        model
    }

    /// Bring all acoustic and mechanical state to rest.
    pub fn reset_motion(&mut self) {
        for b in &mut self.branches {
            b.flow = 0.0;
            b.elastance_pressure = 0.0;
            b.source = 0.0;
        }
        self.pressure.iter_mut().for_each(|p| *p = 0.0);
        self.walls.iter_mut().for_each(|w| *w = Wall::default());
        for r in &mut self.radiation {
            r.inductor_flow = 0.0;
            r.flow = 0.0;
        }
        self.noise.iter_mut().for_each(NoiseSource::reset);
        self.aspiration_noise.reset();
        self.flow_source = None;
        self.pressure_source = None;
        self.constrictions.clear();
        self.initialized = false;
        self.sor_fallback_reported = false;
        self.time_step_count = 0;
    }

    /// Adopt the loss and branch options shared with the frequency-domain model.
    pub fn adapt_options_from(&mut self, tl: &TlOptions) {
        self.options.turbulence_losses = tl.static_pressure_drops;
        self.options.soft_walls = tl.soft_walls;
        self.options.piriform_fossa = tl.piriform_fossa;
        self.options.inner_length_corrections = tl.inner_length_corrections;
    }

    /// Take a new geometry. With `filtering`, areas and lengths outside of the
    /// glottis approach the new values through a one-pole low pass.
    pub fn set_tube(&mut self, tube: &Tube, filtering: bool) {
        if !filtering || !self.initialized {
            self.tube = tube.clone();
        } else {
            let a = (-TWO_PI * self.options.area_smoothing_hz * time_step()).exp();
            for i in 0..NUM_SECTIONS {
                let target = tube.section(i);
                let (length, area) = if i == LOWER_GLOTTIS_SECTION || i == UPPER_GLOTTIS_SECTION {
                    (target.length_cm, target.area_cm2)
                } else {
                    let current = self.tube.section(i);
                    (
                        a * current.length_cm + (1.0 - a) * target.length_cm,
                        a * current.area_cm2 + (1.0 - a) * target.area_cm2,
                    )
                };
                self.tube.set_section_geometry(i, length, area);
                let s = self.tube.section_mut(i);
                s.articulator = target.articulator;
                s.soft_wall = target.soft_wall;
            }
            self.tube.teeth_position_cm = tube.teeth_position_cm;
            self.tube.tongue_tip_side_elevation = tube.tongue_tip_side_elevation;
            self.tube.velum_opening_cm2 = tube.velum_opening_cm2;
            self.tube.aspiration_strength_db = tube.aspiration_strength_db;
            self.tube.calc_positions();
        }

        if !self.initialized {
            for (v, s) in self.volume.iter_mut().zip(self.tube.sections()) {
                *v = Self::node_volume(s);
            }
            self.initialized = true;
        }

        let tube = &self.tube;
        let mut found = std::mem::take(&mut self.constrictions);
        find_constrictions(tube.sections(), PHARYNX_MOUTH_RANGE, |i| self.inflow(i), &mut found);
        self.constrictions = found;
    }

    /// Inject a volume flow (cm^3/s) into `section` for the coming steps.
    pub fn set_flow_source(&mut self, flow: f64, section: Option<usize>) {
        self.flow_source = section.filter(|s| *s < NUM_SECTIONS).map(|s| (flow, s));
    }

    /// Put a pressure source (dPa) in the inlet of `section` for the coming steps.
    pub fn set_pressure_source(&mut self, pressure: f64, section: Option<usize>) {
        self.pressure_source = section.filter(|s| *s < NUM_SECTIONS).map(|s| (pressure, s));
    }

    pub fn tube(&self) -> &Tube {
        &self.tube
    }

    pub fn section(&self, index: usize) -> &Section {
        self.tube.section(index)
    }

    pub fn section_pressure(&self, index: usize) -> f64 {
        self.pressure[index]
    }

    fn inflow(&self, index: usize) -> f64 {
        self.incoming[index].iter().map(|&b| self.branches[b].flow).sum()
    }

    /// Flow entering and leaving a section (cm^3/s).
    pub fn section_flow(&self, index: usize) -> (f64, f64) {
        let mut outflow: f64 = self.outgoing[index].iter().map(|&b| self.branches[b].flow).sum();
        for r in &self.radiation {
            if r.section == index {
                outflow += r.flow;
            }
        }
        (self.inflow(index), outflow)
    }

    pub fn constrictions(&self) -> &[Constriction] {
        &self.constrictions
    }

    pub fn set_monitor_section(&mut self, section: usize) {
        self.monitor_section = section;
    }

    /// The constriction covering the monitored section, if any.
    pub fn monitored_constriction(&self) -> Option<&Constriction> {
        self.constrictions.iter().find(|c| c.contains(self.monitor_section))
    }

    pub fn time_step_count(&self) -> u64 {
        self.time_step_count
    }

    fn node_volume(s: &Section) -> f64 {
        s.safe_area() * s.length_cm
    }

    fn is_glottis(index: usize) -> bool {
        index == LOWER_GLOTTIS_SECTION || index == UPPER_GLOTTIS_SECTION
    }

    /// Inertance of half a section (g/cm^4)
    fn half_inertance(s: &Section) -> f64 {
        AMBIENT_DENSITY * 0.5 * s.length_cm / s.safe_area()
    }

    /// Viscous resistance of half a section (dyn*s/cm^5)
    fn half_resistance(s: &Section, index: usize) -> f64 {
        let length = 0.5 * s.length_cm;
        let area = s.safe_area();
        if Self::is_glottis(index) {
            let w = GLOTTIS_SLIT_LENGTH_CM;
            12.0 * AIR_VISCOSITY * length * w * w / (area * area * area)
        } else {
            let poiseuille = 8.0 * std::f64::consts::PI * AIR_VISCOSITY * length / (area * area);
            let circumference = 2.0 * (std::f64::consts::PI * area).sqrt();
            let omega = TWO_PI * LOSS_REFERENCE_FREQUENCY_HZ;
            let boundary_layer = length * circumference / (area * area) * (omega * AMBIENT_DENSITY * AIR_VISCOSITY / 2.0).sqrt();
            poiseuille + boundary_layer
        }
    }

    /// Heat conduction conductance per unit wall surface
    fn heat_conductance_per_surface() -> f64 {
        let omega = TWO_PI * LOSS_REFERENCE_FREQUENCY_HZ;
        let diffusivity = HEAT_CONDUCTION / (SPECIFIC_HEAT * AMBIENT_DENSITY);
        (ADIABATIC_CONSTANT - 1.0) / RHO_C2 * (diffusivity * omega / 2.0).sqrt()
    }

    fn branch_enabled(&self, kind: BranchKind) -> bool {
        match kind {
            BranchKind::FossaPort => self.options.piriform_fossa,
            BranchKind::Transvelar => self.options.transvelar_coupling,
            _ => true,
        }
    }

    fn junction_enabled(&self, from: usize, to: usize) -> bool {
        let fossa = FIRST_FOSSA_SECTION..=LAST_FOSSA_SECTION;
        !(fossa.contains(&from) && fossa.contains(&to)) || self.options.piriform_fossa
    }

    /// Inertance, resistance and elastance of a branch for the coming step.
    fn branch_elements(&self, branch: &Branch) -> (f64, f64, f64) {
        let sections = self.tube.sections();
        let to = &sections[branch.to];
        match branch.kind {
            BranchKind::Lung => (Self::half_inertance(to), Self::half_resistance(to, branch.to), 0.0),
            BranchKind::Junction | BranchKind::VelumPort | BranchKind::FossaPort => {
                let Some(from_index) = branch.from else {
                    return (Self::half_inertance(to), 0.0, 0.0);
                };
                let from = &sections[from_index];
                // Side branches leave through the wall; only the branch half counts
                let (mut inertance, mut resistance) = if branch.kind == BranchKind::Junction {
                    (
                        Self::half_inertance(from) + Self::half_inertance(to),
                        Self::half_resistance(from, from_index) + Self::half_resistance(to, branch.to),
                    )
                } else {
                    (Self::half_inertance(to), Self::half_resistance(to, branch.to))
                };

                let (a_in, a_out) = if branch.flow >= 0.0 {
                    (from.safe_area(), to.safe_area())
                } else {
                    (to.safe_area(), from.safe_area())
                };
                let at_glottis = (LAST_TRACHEA_SECTION..=UPPER_GLOTTIS_SECTION).contains(&from_index);
                if a_out < a_in && (at_glottis || self.options.turbulence_losses) {
                    let k = if from_index == LAST_TRACHEA_SECTION && branch.flow >= 0.0 {
                        GLOTTIS_ENTRANCE_LOSS
                    } else {
                        1.0
                    };
                    resistance += k * 0.5 * AMBIENT_DENSITY * branch.flow.abs() * (1.0 / (a_out * a_out) - 1.0 / (a_in * a_in));
                }

                if self.options.inner_length_corrections && branch.kind == BranchKind::Junction {
                    let small = from.safe_area().min(to.safe_area());
                    let large = from.safe_area().max(to.safe_area());
                    let radius = (small / std::f64::consts::PI).sqrt();
                    inertance += AMBIENT_DENSITY * 0.8 * radius * (1.0 - (small / large).sqrt()) / small;
                }
                (inertance, resistance, 0.0)
            }
            BranchKind::Transvelar => (
                VELUM_MASS_CGS / VELUM_AREA_CM2,
                VELUM_RESISTANCE_CGS / VELUM_AREA_CM2,
                VELUM_STIFFNESS_CGS / VELUM_AREA_CM2,
            ),
            BranchKind::SinusNeck(k) => {
                let sinus = &SINUSES[k];
                let area = sinus.neck_area_cm2;
                (
                    AMBIENT_DENSITY * sinus.neck_length_cm / area,
                    8.0 * std::f64::consts::PI * AIR_VISCOSITY * sinus.neck_length_cm / (area * area),
                    0.0,
                )
            }
        }
    }

    /// Place turbulence noise for this step into the branch sources.
    fn add_noise_sources(&mut self) {
        if !self.options.generate_noise_sources {
            return;
        }

        // Aspiration at the glottis exit
        let glottis_area = self.tube.section(UPPER_GLOTTIS_SECTION).area_cm2;
        if glottis_area > ASPIRATION_MIN_AREA_CM2 {
            let flow = self.inflow(FIRST_PHARYNX_SECTION);
            let gain = 10f64.powf(self.tube.aspiration_strength_db / 20.0);
            let amplitude = noise_amplitude(reynolds_number(flow, glottis_area)) * gain;
            if amplitude > 0.0 {
                let velocity = flow.abs() / glottis_area;
                let width = 2.0 * (glottis_area / std::f64::consts::PI).sqrt();
                self.aspiration_noise.set_cutoff(0.2 * velocity / width, SAMPLING_RATE);
                let sample = self.aspiration_noise.next_sample(amplitude);
                if let Some(b) = self.inlet_branch[FIRST_PHARYNX_SECTION] {
                    self.branches[b].source += sample;
                }
            }
        }

        for (slot, c) in self.constrictions.iter().take(MAX_SUPRAGLOTTAL_NOISE_SOURCES).enumerate() {
            let flow = c.velocity_cm_s * c.area_cm2.max(crate::constants::MIN_AREA_CM2);
            let amplitude = noise_amplitude(reynolds_number(flow, c.area_cm2));
            if amplitude <= 0.0 {
                continue;
            }
            let source = &mut self.noise[slot];
            source.set_cutoff(c.cutoff_hz, SAMPLING_RATE);
            let sample = source.next_sample(amplitude);
            if let Some(b) = self.inlet_branch[noise_section(c)] {
                self.branches[b].source += sample;
            }
        }
    }

    /// Advance the acoustic state by one sample period.
    pub fn proceed_time_step(&mut self) -> TimeStepFlow {
        let h = time_step();
        if !self.initialized {
            let tube = self.tube.clone();
            self.set_tube(&tube, false);
        }

        // Series sources
        for b in &mut self.branches {
            b.source = 0.0;
        }
        if let Some((pressure, section)) = self.pressure_source {
            if let Some(b) = self.inlet_branch[section] {
                self.branches[b].source += pressure;
            }
        }
        self.add_noise_sources();

        // Branch coefficients
        for b in 0..self.branches.len() {
            let branch = &self.branches[b];
            let enabled = self.branch_enabled(branch.kind)
                && branch.from.is_none_or(|from| self.junction_enabled(from, branch.to));
            if !enabled {
                let branch = &mut self.branches[b];
                branch.alpha = 0.0;
                branch.beta = 0.0;
                branch.flow = 0.0;
                branch.elastance_pressure = 0.0;
                continue;
            }
            let (inertance, resistance, elastance) = self.branch_elements(branch);
            let p_from = branch.from.map_or(0.0, |i| self.pressure[i]);
            let dp = p_from - self.pressure[branch.to];
            let branch = &mut self.branches[b];
            let k = inertance / h;
            branch.elastance = elastance;
            branch.alpha = 1.0 / (k + 0.5 * resistance + 0.25 * h * elastance);
            branch.beta = branch.flow * (k - 0.5 * resistance - 0.25 * h * elastance) + 0.5 * dp
                - branch.elastance_pressure
                + branch.source;
        }

        // Assemble the pressure system
        self.matrix.clear();
        let heat = Self::heat_conductance_per_surface();
        let sections = self.tube.sections();
        for i in 0..NUM_SECTIONS {
            let s = &sections[i];
            let volume = Self::node_volume(s);
            let compliance = volume / RHO_C2;
            let circumference = 2.0 * (std::f64::consts::PI * s.safe_area()).sqrt();
            let surface = circumference * s.length_cm;
            let conductance = heat * surface;

            self.matrix.diag[i] += compliance / h + 0.5 * conductance;
            let mut rhs = (compliance / h - 0.5 * conductance) * self.pressure[i];
            rhs -= (volume - self.volume[i]) / h;
            self.volume[i] = volume;

            let wall = &mut self.walls[i];
            if self.options.soft_walls && s.soft_wall && s.section_type != SectionType::Sinus {
                let m = WALL_MASS_CGS;
                let r = WALL_RESISTANCE_CGS;
                let k = WALL_STIFFNESS_CGS;
                wall.surface = surface;
                wall.gamma = 1.0 / (m / h + 0.5 * r + 0.25 * k * h);
                wall.delta = wall.velocity * (m / h - 0.5 * r - 0.25 * k * h) - k * wall.displacement
                    + 0.5 * self.pressure[i];
                self.matrix.diag[i] += 0.25 * surface * wall.gamma;
                rhs -= 0.5 * surface * wall.gamma * wall.delta + 0.5 * surface * wall.velocity;
            } else {
                *wall = Wall::default();
            }

            if let Some((flow, section)) = self.flow_source {
                if section == i {
                    rhs += flow;
                }
            }
            self.rhs[i] = rhs;
        }

        for r in &mut self.radiation {
            r.update_geometry(sections[r.section].safe_area());
            let y = r.conductance + h / (2.0 * r.inductance);
            self.matrix.diag[r.section] += 0.5 * y;
            self.rhs[r.section] -=
                0.5 * (r.inductor_flow + h / (2.0 * r.inductance) * self.pressure[r.section]) + 0.5 * r.flow;
        }

        for branch in &self.branches {
            if branch.alpha == 0.0 {
                continue;
            }
            let w = 0.25 * branch.alpha;
            let carried = 0.5 * branch.alpha * branch.beta + 0.5 * branch.flow;
            match branch.from {
                Some(from) => {
                    self.matrix.add_edge_weight(from, branch.to, w);
                    self.rhs[from] -= carried;
                }
                None => self.matrix.diag[branch.to] += w,
            }
            self.rhs[branch.to] += carried;
        }

        if !self.solve() {
            tracing::error!(step = self.time_step_count, "pressure solution diverged, resetting the acoustic state");
            self.reset_motion();
            return TimeStepFlow::default();
        }

        // Update flows and states from the new pressures
        let new_pressure = &self.solution;
        for branch in &mut self.branches {
            if branch.alpha == 0.0 {
                continue;
            }
            let p_from = branch.from.map_or(0.0, |i| new_pressure[i]);
            let dp = p_from - new_pressure[branch.to];
            let flow = branch.alpha * (0.5 * dp + branch.beta);
            branch.elastance_pressure += 0.5 * h * branch.elastance * (flow + branch.flow);
            branch.flow = flow;
        }

        let mut skin = 0.0;
        for (i, wall) in self.walls.iter_mut().enumerate() {
            if wall.gamma == 0.0 {
                continue;
            }
            let velocity = wall.gamma * (0.5 * new_pressure[i] + wall.delta);
            wall.displacement += 0.5 * h * (velocity + wall.velocity);
            wall.velocity = velocity;
            skin += wall.surface * velocity;
        }

        let mut outlet = [0.0; 2];
        for (k, r) in self.radiation.iter_mut().enumerate() {
            let p_new = new_pressure[r.section];
            r.inductor_flow += h / (2.0 * r.inductance) * (p_new + self.pressure[r.section]);
            r.flow = r.conductance * p_new + r.inductor_flow;
            outlet[k] = r.flow;
        }

        self.pressure.copy_from_slice(&self.solution);
        self.time_step_count += 1;

        let skin = if self.options.radiation_from_skin { skin } else { 0.0 };
        TimeStepFlow {
            total: outlet[0] + outlet[1] + skin,
            mouth: outlet[0],
            nostril: outlet[1],
            skin,
        }
    }

    /// Solve the assembled system into `self.solution`. False if no finite solution was found.
    fn solve(&mut self) -> bool {
        if self.options.solver == SolverType::Sor {
            self.solution.copy_from_slice(&self.pressure);
            match self.matrix.solve_sor(
                &self.rhs,
                &mut self.solution,
                self.options.sor_relaxation,
                self.options.sor_tolerance,
                self.options.sor_max_iterations,
            ) {
                Ok(_) => return true,
                Err(failure) => {
                    if !self.sor_fallback_reported {
                        tracing::warn!(?failure, step = self.time_step_count, "SOR failed, using the direct solver");
                        self.sor_fallback_reported = true;
                    }
                }
            }
        }
        self.matrix.solve_direct(&self.rhs, &mut self.solution);
        self.solution.iter().all(|p| p.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tube::{LAST_TRACHEA_SECTION, NUM_PHARYNX_MOUTH_SECTIONS};

    fn open_tube(glottis_area: f64) -> Tube {
        let mut tube = Tube::new();
        tube.set_glottis_geometry([0.15, 0.15], [glottis_area, glottis_area]);
        tube
    }

    #[test]
    fn stays_finite_with_static_excitation() {
        for solver in [SolverType::Cholesky, SolverType::Sor] {
            let mut tds = TdsModel::new();
            tds.options.solver = solver;
            let tube = open_tube(0.1);
            for i in 0..4000 {
                tds.set_tube(&tube, i > 0);
                tds.set_pressure_source(8000.0, Some(0));
                let flow = tds.proceed_time_step();
                assert!(flow.total.is_finite() && flow.mouth.is_finite(), "{solver:?} step {i}");
                for s in 0..NUM_SECTIONS {
                    assert!(tds.section_pressure(s).is_finite());
                }
            }
            // DC flow through the glottis settles to a plausible value
            let (glottal, _) = tds.section_flow(FIRST_PHARYNX_SECTION);
            assert!(glottal > 50.0 && glottal < 2000.0, "{solver:?}: {glottal}");
        }
    }

    #[test]
    fn solvers_agree() {
        let tube = open_tube(0.2);
        let mut direct = TdsModel::new();
        let mut sor = TdsModel::new();
        sor.options.solver = SolverType::Sor;
        sor.options.sor_tolerance = 1.0e-12;
        sor.options.sor_max_iterations = 5000;
        for model in [&mut direct, &mut sor] {
            model.options.generate_noise_sources = false;
        }
        for i in 0..300 {
            for model in [&mut direct, &mut sor] {
                model.set_tube(&tube, i > 0);
                model.set_pressure_source(8000.0, Some(0));
                model.proceed_time_step();
            }
        }
        for s in 0..NUM_SECTIONS {
            let a = direct.section_pressure(s);
            let b = sor.section_pressure(s);
            assert!((a - b).abs() <= 1.0e-3 * (1.0 + a.abs()), "section {s}: {a} vs {b}");
        }
    }

    #[test]
    fn closed_glottis_blocks_flow() {
        let mut tds = TdsModel::new();
        let tube = open_tube(0.0);
        for i in 0..2000 {
            tds.set_tube(&tube, i > 0);
            tds.set_pressure_source(8000.0, Some(0));
            tds.proceed_time_step();
        }
        let (through, _) = tds.section_flow(FIRST_PHARYNX_SECTION);
        assert!(through.abs() < 1.0, "{through}");
        assert!(tds.section_pressure(LAST_TRACHEA_SECTION) > 1000.0);
    }

    #[test]
    fn flow_impulse_radiates() {
        let mut tds = TdsModel::new();
        let tube = Tube::new();
        let mut peak: f64 = 0.0;
        for i in 0..2000 {
            tds.set_tube(&tube, i > 0);
            tds.set_flow_source(if i == 0 { 1000.0 } else { 0.0 }, Some(FIRST_PHARYNX_SECTION));
            let flow = tds.proceed_time_step();
            peak = peak.max(flow.mouth.abs());
            assert!(flow.total.is_finite());
        }
        assert!(peak > 1.0, "{peak}");
        assert_eq!(tds.time_step_count(), 2000);
    }

    #[test]
    fn constriction_is_monitored() {
        let mut tds = TdsModel::new();
        let mut tube = open_tube(0.1);
        let areas: Vec<f64> = (0..NUM_PHARYNX_MOUTH_SECTIONS)
            .map(|k| if k == 30 { 0.1 } else { 3.0 })
            .collect();
        let lengths = vec![17.0 / 40.0; NUM_PHARYNX_MOUTH_SECTIONS];
        tube.set_pharynx_mouth_geometry(&lengths, &areas, &[Default::default(); 40], 15.5, 0.0)
            .unwrap();
        tds.set_monitor_section(FIRST_PHARYNX_SECTION + 30);
        for i in 0..500 {
            tds.set_tube(&tube, i > 0);
            tds.set_pressure_source(8000.0, Some(0));
            assert!(tds.proceed_time_step().total.is_finite());
        }
        let c = tds.monitored_constriction().cloned();
        assert!(c.is_some());
        assert_eq!(tds.constrictions().len(), 1);
    }

    #[test]
    fn options_follow_tl_model() {
        let mut tds = TdsModel::new();
        let tl = TlOptions {
            static_pressure_drops: false,
            piriform_fossa: true,
            ..Default::default()
        };
        tds.adapt_options_from(&tl);
        assert!(!tds.options.turbulence_losses);
        assert!(tds.options.piriform_fossa);
    }
}
