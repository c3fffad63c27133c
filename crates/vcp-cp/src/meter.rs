//! Meter-value generation.
//!
//! Every meter tick runs the per-phase electrical model for one charging
//! connector and assembles the OCPP sampled values: cumulative energy,
//! offered current, temperatures, per-phase voltage and current, total
//! power, and state of charge when a car is plugged in.
//!
//! Voltage sags under load: `V = 232 - 0.15 * I` per phase, plus measurement
//! noise. Power is summed per phase from the sagged voltages, so it lands a
//! little under the nominal `230 * I * phases`.

use crate::connector::ConnectorState;
use chrono::{DateTime, Utc};
use rand::{thread_rng, Rng};
use vcp_types::v16::{Location, Measurand, MeterValue, Phase, SampledValue, UnitOfMeasure};

/// Fleet meter loop period, also the energy integration window.
pub const METER_INTERVAL_SECS: f64 = 15.0;

/// Electrical state of one connector over one tick.
#[derive(Debug, Clone)]
pub struct MeterTick {
    pub per_phase_current_a: f64,
    pub effective_phases: u8,
    /// Phase voltages for L1..L3; only the first `effective_phases` entries
    /// are meaningful.
    pub voltage_v: [f64; 3],
    pub power_w: f64,
    pub energy_increment_wh: f64,
    pub body_temp_c: f64,
    pub cable_temp_c: f64,
    pub soc: Option<f64>,
    /// The plugged car stopped drawing because its battery is full.
    pub car_reached_full: bool,
}

/// Run one tick of the electrical model, updating the connector's energy
/// register, reported power, and (if plugged) the car battery.
pub fn electrical_tick(
    connector: &mut ConnectorState,
    charger_phases: u8,
    interval_seconds: f64,
) -> MeterTick {
    let offered = connector.offered_current_a;

    let (per_phase_current, effective_phases, soc, car_reached_full) =
        match connector.car.as_mut() {
            Some(car) => {
                car.set_offered_current(offered);
                let tick = car.tick(interval_seconds);
                let full = tick.current_a == 0.0 && tick.soc >= 1.0;
                (tick.current_a, car.effective_phases(), Some(tick.soc), full)
            }
            None => (offered, charger_phases, None, false),
        };

    let mut rng = thread_rng();
    let mut voltage_v = [0.0; 3];
    let mut power_w = 0.0;
    for (k, v) in voltage_v.iter_mut().enumerate() {
        let current = if (k as u8) < effective_phases {
            per_phase_current
        } else {
            0.0
        };
        *v = 232.0 - 0.15 * current + rng.gen_range(-0.5..0.5);
        if (k as u8) < effective_phases {
            power_w += *v * current;
        }
    }

    let energy_increment_wh = power_w * interval_seconds / 3600.0;
    connector.add_energy(energy_increment_wh);
    connector.reported_power_w = power_w;

    MeterTick {
        per_phase_current_a: per_phase_current,
        effective_phases,
        voltage_v,
        power_w,
        energy_increment_wh,
        body_temp_c: 20.0 + rng.gen_range(-1.0..1.0),
        cable_temp_c: 19.0 + rng.gen_range(-1.0..1.0),
        soc,
        car_reached_full,
    }
}

/// Assemble the OCPP MeterValue for one tick.
pub fn build_meter_value(
    timestamp: DateTime<Utc>,
    tick: &MeterTick,
    connector: &ConnectorState,
) -> MeterValue {
    let mut samples = Vec::with_capacity(6 + 2 * tick.effective_phases as usize);

    samples.push(
        SampledValue::periodic(
            format!("{:.3}", connector.energy_imported_wh() / 1000.0),
            Measurand::EnergyActiveImportRegister,
            UnitOfMeasure::KWh,
        )
        .at(Location::Outlet),
    );
    samples.push(
        SampledValue::periodic(
            format!("{:.1}", connector.offered_current_a),
            Measurand::CurrentOffered,
            UnitOfMeasure::A,
        )
        .at(Location::Outlet),
    );
    samples.push(
        SampledValue::periodic(
            format!("{:.1}", tick.body_temp_c),
            Measurand::Temperature,
            UnitOfMeasure::Celsius,
        )
        .at(Location::Body),
    );
    samples.push(
        SampledValue::periodic(
            format!("{:.1}", tick.cable_temp_c),
            Measurand::Temperature,
            UnitOfMeasure::Celsius,
        )
        .at(Location::Cable),
    );

    for k in 1..=tick.effective_phases.min(3) {
        let Some(phase) = Phase::line(k) else {
            continue;
        };
        samples.push(
            SampledValue::periodic(
                format!("{:.1}", tick.voltage_v[(k - 1) as usize]),
                Measurand::Voltage,
                UnitOfMeasure::V,
            )
            .at(Location::Outlet)
            .on_phase(phase),
        );
        samples.push(
            SampledValue::periodic(
                format!("{:.1}", tick.per_phase_current_a),
                Measurand::CurrentImport,
                UnitOfMeasure::A,
            )
            .at(Location::Outlet)
            .on_phase(phase),
        );
    }

    samples.push(
        SampledValue::periodic(
            format!("{:.1}", tick.power_w),
            Measurand::PowerActiveImport,
            UnitOfMeasure::W,
        )
        .at(Location::Outlet),
    );

    if let Some(soc) = tick.soc {
        samples.push(
            SampledValue::periodic(
                format!("{:.1}", soc * 100.0),
                Measurand::SoC,
                UnitOfMeasure::Percent,
            )
            .at(Location::EV),
        );
    }

    MeterValue {
        timestamp,
        sampled_value: samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::{CarProfile, CarSimulator};

    fn charging_connector(offered: f64) -> ConnectorState {
        let mut c = ConnectorState::new(1);
        c.status = vcp_types::v16::ChargePointStatus::Charging;
        c.offered_current_a = offered;
        c
    }

    #[test]
    fn test_tick_without_car_uses_offered_current() {
        let mut c = charging_connector(16.0);
        let tick = electrical_tick(&mut c, 1, 15.0);

        assert_eq!(tick.per_phase_current_a, 16.0);
        assert_eq!(tick.effective_phases, 1);
        assert!(tick.soc.is_none());
        assert!(!tick.car_reached_full);

        // 232 - 0.15*16 = 229.6 nominal, +-0.5 noise.
        assert!((tick.voltage_v[0] - 229.6).abs() < 0.6);
        // Single phase power near V * I.
        assert!((tick.power_w - 229.6 * 16.0).abs() < 16.0);
        assert!(tick.energy_increment_wh > 0.0);
        assert!((c.energy_imported_wh() - tick.energy_increment_wh).abs() < 1e-9);
    }

    #[test]
    fn test_three_phase_power_sums_phases() {
        let mut c = charging_connector(16.0);
        let tick = electrical_tick(&mut c, 3, 15.0);
        assert_eq!(tick.effective_phases, 3);
        let nominal = 3.0 * (232.0 - 0.15 * 16.0) * 16.0;
        assert!((tick.power_w - nominal).abs() < 50.0);
    }

    #[test]
    fn test_energy_register_accumulates_across_ticks() {
        let mut c = charging_connector(16.0);
        let mut last = 0.0;
        for _ in 0..4 {
            electrical_tick(&mut c, 1, 15.0);
            assert!(c.energy_imported_wh() >= last);
            last = c.energy_imported_wh();
        }
        // ~229 V * 16 A * (60/3600) h is about 61 Wh.
        assert!(last > 50.0 && last < 70.0, "energy was {last}");
    }

    #[test]
    fn test_car_limits_per_phase_current() {
        let mut c = charging_connector(32.0);
        // 11 kW 3-phase car on a 3-phase charger accepts under 16 A.
        c.car = Some(CarSimulator::new(
            CarProfile::find("generic-medium").unwrap(),
            3,
            0.3,
        ));
        let tick = electrical_tick(&mut c, 3, 15.0);
        assert!(tick.per_phase_current_a < 16.5);
        assert_eq!(tick.effective_phases, 3);
        assert!(tick.soc.is_some());
    }

    #[test]
    fn test_full_car_flags_suspension() {
        let mut c = charging_connector(32.0);
        c.car = Some(CarSimulator::new(
            CarProfile::find("1p-32a").unwrap(),
            1,
            1.0,
        ));
        let tick = electrical_tick(&mut c, 1, 15.0);
        assert!(tick.car_reached_full);
        assert_eq!(tick.per_phase_current_a, 0.0);
    }

    #[test]
    fn test_meter_value_phase_determinism() {
        let mut c = charging_connector(16.0);
        let tick = electrical_tick(&mut c, 1, 15.0);
        let mv = build_meter_value(Utc::now(), &tick, &c);

        let phases: Vec<_> = mv
            .sampled_value
            .iter()
            .filter_map(|s| s.phase)
            .collect();
        assert!(phases.iter().all(|p| *p == Phase::L1));
        // One voltage + one current on L1.
        assert_eq!(phases.len(), 2);
    }

    #[test]
    fn test_meter_value_contents() {
        let mut c = charging_connector(16.0);
        c.car = Some(CarSimulator::new(
            CarProfile::find("generic-medium").unwrap(),
            3,
            0.5,
        ));
        let tick = electrical_tick(&mut c, 3, 15.0);
        let mv = build_meter_value(Utc::now(), &tick, &c);

        let measurands: Vec<_> = mv
            .sampled_value
            .iter()
            .filter_map(|s| s.measurand)
            .collect();
        assert!(measurands.contains(&Measurand::EnergyActiveImportRegister));
        assert!(measurands.contains(&Measurand::CurrentOffered));
        assert!(measurands.contains(&Measurand::PowerActiveImport));
        assert!(measurands.contains(&Measurand::SoC));
        assert!(measurands.contains(&Measurand::Voltage));
        assert!(measurands.contains(&Measurand::Temperature));

        // Three phases of voltage and current each.
        let voltages = mv
            .sampled_value
            .iter()
            .filter(|s| s.measurand == Some(Measurand::Voltage))
            .count();
        assert_eq!(voltages, 3);

        for s in &mv.sampled_value {
            assert_eq!(
                s.context,
                Some(vcp_types::v16::ReadingContext::SamplePeriodic)
            );
        }
    }
}
