// src/report.rs

use std::fmt::Write;
use surface_ec_lib::BatterySummary;
use uom::si::electric_potential::{millivolt, volt};
use uom::si::f64::ElectricPotential;

const UNAVAILABLE: &str = "<unavailable>";

pub fn power_online(online: u64) -> String {
    format!("POWER_SUPPLY_ONLINE={}\n", online)
}

pub fn power_supply_name(name: &str) -> String {
    format!("POWER_SUPPLY_NAME={}\n", name.to_uppercase())
}

/// uevent-style properties of a battery, as `/sys/class/power_supply/*/uevent` lists them.
pub fn battery_uevent(summary: &BatterySummary) -> String {
    let properties: [(&str, &dyn std::fmt::Display); 15] = [
        ("STATUS", &summary.state),
        ("PRESENT", &summary.present),
        ("TECHNOLOGY", &summary.technology),
        ("CYCLE_COUNT", &summary.cycle_count),
        ("VOLTAGE_MIN_DESIGN", &summary.design_voltage_mv),
        ("VOLTAGE_NOW", &summary.voltage_mv),
        ("POWER_NOW", &summary.present_rate),
        ("ENERGY_FULL_DESIGN", &summary.design_capacity),
        ("ENERGY_FULL", &summary.last_full_capacity),
        ("ENERGY_NOW", &summary.remaining_capacity),
        ("ENERGY_LOW", &summary.low_capacity),
        ("CAPACITY", &summary.percentage),
        ("MODEL_NAME", &summary.model),
        ("MANUFACTURER", &summary.manufacturer),
        ("SERIAL_NUMBER", &summary.serial),
    ];

    let mut out = String::new();
    for (key, value) in properties {
        let _ = writeln!(out, "POWER_SUPPLY_{}={}", key, value);
    }
    out
}

/// Short human-readable battery report.
pub fn battery_pretty(summary: &BatterySummary) -> String {
    let voltage = ElectricPotential::new::<millivolt>(summary.voltage_mv as f64);
    let percentage = if summary.last_full_capacity == 0 {
        UNAVAILABLE.to_string()
    } else {
        format!("{}%", summary.percentage)
    };
    let remaining = match summary.remaining_hours() {
        Some(hours) => format!("{:.2}h", hours),
        None => UNAVAILABLE.to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "State: {}", summary.state);
    // Debug keeps the fractional part on whole volts, e.g. 8.0
    let _ = writeln!(out, "Voltage: {:?}V", voltage.get::<volt>());
    let _ = writeln!(out, "Percentage: {}", percentage);
    let _ = writeln!(out, "Remaining: {}", remaining);
    out
}
