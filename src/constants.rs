use std::f64::consts::PI;

/// Audio sampling rate of every time-domain signal
pub const SAMPLING_RATE: usize = 44100;
/// Upper band edge of the synthesized speech signal
pub const SYNTHETIC_SPEECH_BANDWIDTH_HZ: f64 = 12000.0;

/// Air density (g/cm^3)
pub const AMBIENT_DENSITY: f64 = 0.001_14;
/// Speed of sound (cm/s)
pub const SOUND_VELOCITY: f64 = 35000.0;
/// Air viscosity (dyn*s/cm^2)
pub const AIR_VISCOSITY: f64 = 1.86e-4;
/// Adiabatic constant of air
pub const ADIABATIC_CONSTANT: f64 = 1.4;
/// Specific heat at constant pressure (cal/(g*K))
pub const SPECIFIC_HEAT: f64 = 0.24;
/// Heat conduction coefficient (cal/(cm*s*K))
pub const HEAT_CONDUCTION: f64 = 5.5e-5;

/// rho*c^2, converts volume changes into pressure changes
pub const RHO_C2: f64 = AMBIENT_DENSITY * SOUND_VELOCITY * SOUND_VELOCITY;

pub const MIN_AREA_CM2: f64 = 1.0e-4;
pub const MIN_LENGTH_CM: f64 = 0.01;
/// Minimum area of a vowel outside of the glottis
pub const MIN_ADVISED_VOWEL_AREA_CM2: f64 = 0.25;

/// log2 of the capacity of the synthesis ring buffers
pub const TDS_BUFFER_EXPONENT: u32 = 15;
pub const TDS_BUFFER_LENGTH: usize = 1 << TDS_BUFFER_EXPONENT;

/// Wall mass per unit area (g/cm^2)
pub const WALL_MASS_CGS: f64 = 1.5;
/// Wall resistance per unit area (dyn*s/cm^3)
pub const WALL_RESISTANCE_CGS: f64 = 1600.0;
/// Wall stiffness per unit area (dyn/cm^3)
pub const WALL_STIFFNESS_CGS: f64 = 3.0e5;

/// Radius used for the pressure radiated to a listener (cm)
pub const RADIATION_DISTANCE_CM: f64 = 30.0;

/// 2*pi
pub const TWO_PI: f64 = 2.0 * PI;

/// Time step of the simulation
#[inline(always)]
pub fn time_step() -> f64 {
    1.0 / SAMPLING_RATE as f64
}
