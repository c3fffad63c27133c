//! Car battery simulation.
//!
//! A plugged-in car decides how much of the offered current it actually
//! draws: the onboard charger and cable rating cap it, the battery tapers
//! acceptance as it approaches full, and a per-car margin plus sampling
//! jitter keep the numbers off the ideal values the way real meters are.

use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shape of the acceptance-current rolloff between `taper_start_soc` and
/// `taper_end_soc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaperCurve {
    Linear,
    Exponential,
}

/// Static parameters of a simulated EV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarProfile {
    pub id: String,
    pub name: String,
    #[serde(rename = "batteryCapacityKwh")]
    pub battery_capacity_kwh: f64,
    /// Per-phase AC current limit of the car's inlet and cable.
    #[serde(rename = "maxAcCurrentA")]
    pub max_ac_current_a: f64,
    #[serde(rename = "onboardChargerKw")]
    pub onboard_charger_kw: f64,
    /// Phases the onboard charger uses, 1..=3.
    pub phases: u8,
    #[serde(rename = "taperStartSoc")]
    pub taper_start_soc: f64,
    #[serde(rename = "taperEndSoc")]
    pub taper_end_soc: f64,
    #[serde(rename = "taperCurve")]
    pub taper_curve: TaperCurve,
}

impl CarProfile {
    /// The built-in catalogue, addressable by id through the admin surface.
    pub fn builtin() -> Vec<CarProfile> {
        vec![
            CarProfile {
                id: "generic-small".to_string(),
                name: "Generic city EV".to_string(),
                battery_capacity_kwh: 30.0,
                max_ac_current_a: 16.0,
                onboard_charger_kw: 3.7,
                phases: 1,
                taper_start_soc: 0.80,
                taper_end_soc: 1.0,
                taper_curve: TaperCurve::Linear,
            },
            CarProfile {
                id: "generic-medium".to_string(),
                name: "Generic mid-size EV".to_string(),
                battery_capacity_kwh: 60.0,
                max_ac_current_a: 32.0,
                onboard_charger_kw: 11.0,
                phases: 3,
                taper_start_soc: 0.80,
                taper_end_soc: 1.0,
                taper_curve: TaperCurve::Linear,
            },
            CarProfile {
                id: "generic-large".to_string(),
                name: "Generic long-range EV".to_string(),
                battery_capacity_kwh: 90.0,
                max_ac_current_a: 32.0,
                onboard_charger_kw: 22.0,
                phases: 3,
                taper_start_soc: 0.85,
                taper_end_soc: 1.0,
                taper_curve: TaperCurve::Exponential,
            },
            CarProfile {
                id: "1p-32a".to_string(),
                name: "Single-phase 32 A EV".to_string(),
                battery_capacity_kwh: 40.0,
                max_ac_current_a: 32.0,
                onboard_charger_kw: 7.4,
                phases: 1,
                taper_start_soc: 0.85,
                taper_end_soc: 1.0,
                taper_curve: TaperCurve::Linear,
            },
            CarProfile {
                id: "3p-16a".to_string(),
                name: "Three-phase 16 A EV".to_string(),
                battery_capacity_kwh: 50.0,
                max_ac_current_a: 16.0,
                onboard_charger_kw: 11.0,
                phases: 3,
                taper_start_soc: 0.90,
                taper_end_soc: 1.0,
                taper_curve: TaperCurve::Linear,
            },
        ]
    }

    pub fn find(id: &str) -> Option<CarProfile> {
        Self::builtin().into_iter().find(|p| p.id == id)
    }

    /// Per-phase current the car itself can take, before tapering: the
    /// lesser of the cable rating and what the onboard charger can convert.
    pub fn acceptance_current_a(&self) -> f64 {
        self.max_ac_current_a
            .min(self.onboard_charger_kw * 1000.0 / (230.0 * self.phases as f64))
    }

    fn taper_factor(&self, soc: f64) -> f64 {
        if soc < self.taper_start_soc {
            return 1.0;
        }
        let span = self.taper_end_soc - self.taper_start_soc;
        let p = ((soc - self.taper_start_soc) / span).clamp(0.0, 1.0);
        let t = match self.taper_curve {
            TaperCurve::Linear => 1.0 - p,
            TaperCurve::Exponential => (-3.0 * p).exp(),
        };
        // Keep the current strictly positive until the battery is actually
        // full, otherwise the last percent never completes.
        t.max(0.05)
    }
}

/// What one simulation tick produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarTick {
    /// Per-phase current drawn over the tick, A.
    pub current_a: f64,
    /// Power over the tick, W (phase voltage x per-phase current x phases).
    pub power_w: f64,
    /// Energy delivered this tick, Wh.
    pub energy_wh: f64,
    /// State of charge after the tick, [0, 1].
    pub soc: f64,
}

impl CarTick {
    fn idle(soc: f64) -> Self {
        CarTick {
            current_a: 0.0,
            power_w: 0.0,
            energy_wh: 0.0,
            soc,
        }
    }
}

/// Live battery simulation for one plugged-in car.
#[derive(Debug, Clone)]
pub struct CarSimulator {
    profile: CarProfile,
    effective_phases: u8,
    soc: f64,
    offered_current_a: f64,
    actual_current_a: f64,
    energy_delivered_wh: f64,
    /// Amps the car stays below the offered current, sampled once per
    /// plug-in from U[0.5, 1.5).
    margin: f64,
}

impl CarSimulator {
    pub fn new(profile: CarProfile, charger_phases: u8, initial_soc: f64) -> Self {
        let margin = thread_rng().gen_range(0.5..1.5);
        let effective_phases = profile.phases.min(charger_phases);
        debug!(
            profile = %profile.id,
            effective_phases,
            margin,
            "car simulator attached"
        );
        CarSimulator {
            profile,
            effective_phases,
            soc: initial_soc.clamp(0.0, 1.0),
            offered_current_a: 0.0,
            actual_current_a: 0.0,
            energy_delivered_wh: 0.0,
            margin,
        }
    }

    pub fn profile(&self) -> &CarProfile {
        &self.profile
    }

    pub fn effective_phases(&self) -> u8 {
        self.effective_phases
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn actual_current_a(&self) -> f64 {
        self.actual_current_a
    }

    pub fn energy_delivered_wh(&self) -> f64 {
        self.energy_delivered_wh
    }

    pub fn set_offered_current(&mut self, amps: f64) {
        self.offered_current_a = amps.max(0.0);
    }

    /// Advance the battery by `interval_seconds` at the current offer.
    pub fn tick(&mut self, interval_seconds: f64) -> CarTick {
        if self.soc >= 1.0 {
            self.actual_current_a = 0.0;
            return CarTick::idle(self.soc);
        }

        let tapered = self.profile.acceptance_current_a() * self.profile.taper_factor(self.soc);
        let offered = (self.offered_current_a - self.margin).max(0.0);
        let mut draw = tapered.min(offered);
        draw = (draw + thread_rng().gen_range(-0.2..0.2)).max(0.0);
        draw = (draw * 10.0).round() / 10.0;

        let power_w = 230.0 * draw * self.effective_phases as f64;
        let energy_wh = power_w * interval_seconds / 3600.0;

        self.energy_delivered_wh += energy_wh;
        self.soc += energy_wh / (self.profile.battery_capacity_kwh * 1000.0);
        if self.soc >= 1.0 {
            self.soc = 1.0;
            self.actual_current_a = 0.0;
        } else {
            self.actual_current_a = draw;
        }

        CarTick {
            current_a: draw,
            power_w,
            energy_wh,
            soc: self.soc,
        }
    }
}
