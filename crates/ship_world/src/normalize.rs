//! Loose scenario JSON -> the shapes `ship_core` deserializes.
//!
//! Authors write numbers as strings, statuses in any case and leave out
//! names. Everything is fixed up on the raw `Value` so the typed
//! deserialization afterwards can stay strict.

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use ship_core::{clamp_percent, value_as_f64, SystemStatus};

type Object = Map<String, Value>;

fn objects_mut(value: Option<&mut Value>) -> impl Iterator<Item = &mut Object> {
    value
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

fn child_mut<'a>(object: &'a mut Object, key: &str) -> Option<&'a mut Object> {
    object.get_mut(key).and_then(Value::as_object_mut)
}

/// Numeric strings become numbers. Anything unparseable is left for serde
/// to reject with a proper message.
fn coerce_floats(object: &mut Object, fields: &[&str]) {
    for field in fields {
        if let Some(slot) = object.get_mut(*field) {
            if let Some(number) = value_as_f64(slot) {
                *slot = json!(number);
            }
        }
    }
}

/// Like [`coerce_floats`] but rounds to a non-negative integer, for counters
/// and tick counts.
fn coerce_counts(object: &mut Object, fields: &[&str]) {
    for field in fields {
        if let Some(slot) = object.get_mut(*field) {
            if let Some(number) = value_as_f64(slot) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let count = number.round().max(0.0) as u64;
                *slot = json!(count);
            }
        }
    }
}

fn clamp_percent_fields(object: &mut Object, fields: &[&str]) {
    for field in fields {
        if let Some(slot) = object.get_mut(*field) {
            if let Some(number) = slot.as_f64() {
                *slot = json!(clamp_percent(number));
            }
        }
    }
}

/// Ids may be written as numbers; the engines only know strings.
fn stringify_id(object: &mut Object) {
    if let Some(slot @ Value::Number(_)) = object.get_mut("id") {
        *slot = Value::String(slot.to_string());
    }
}

/// Fills `field` with the id when it is missing or blank.
fn name_from_id(object: &mut Object, field: &str) {
    let blank = object
        .get(field)
        .and_then(Value::as_str)
        .map_or(true, |name| name.trim().is_empty());
    if !blank {
        return;
    }
    if let Some(id) = object.get("id").and_then(Value::as_str).map(str::to_string) {
        object.insert(field.to_string(), Value::String(id));
    }
}

fn normalize_system(system: &mut Object) {
    stringify_id(system);
    name_from_id(system, "name");
    coerce_floats(system, &["power", "integrity", "load"]);
    clamp_percent_fields(system, &["power", "integrity", "load"]);
    if let Some(slot) = system.get_mut("status") {
        let status = slot.as_str().and_then(SystemStatus::parse);
        if status.is_none() {
            tracing::warn!(status = %slot, "unknown system status, using online");
        }
        *slot = json!(status.unwrap_or_default());
    }
}

fn normalize_life_support(life_support: &mut Object) {
    for cycle in objects_mut(life_support.get_mut("cycles")) {
        stringify_id(cycle);
        for metric in objects_mut(cycle.get_mut("metrics")) {
            coerce_floats(metric, &["value", "min", "max"]);
        }
    }
    for section in objects_mut(life_support.get_mut("sections")) {
        stringify_id(section);
        name_from_id(section, "name");
        coerce_floats(section, &["pressure", "temperature", "humidity"]);
    }
    for leak in objects_mut(life_support.get_mut("leaks")) {
        stringify_id(leak);
        coerce_floats(leak, &["progress"]);
        clamp_percent_fields(leak, &["progress"]);
    }
    if let Some(filters) = child_mut(life_support, "filters") {
        coerce_floats(
            filters,
            &["reserveAirMinutes", "scrubberMarginMinutes", "emergencyBufferMinutes"],
        );
        for bank in objects_mut(filters.get_mut("banks")) {
            stringify_id(bank);
            coerce_floats(bank, &["saturation", "bufferMinutes"]);
            clamp_percent_fields(bank, &["saturation"]);
        }
    }
}

fn normalize_power(power: &mut Object) {
    if let Some(distribution) = child_mut(power, "distribution") {
        coerce_counts(distribution, &["engines", "shields", "weapons", "aux"]);
    }
    if let Some(profiles) = child_mut(power, "profiles") {
        for profile in profiles.values_mut().filter_map(Value::as_object_mut) {
            coerce_counts(profile, &["priority"]);
            coerce_floats(profile, &["min", "boost"]);
        }
    }
}

fn normalize_panels(scenario: &mut Object) {
    if let Some(navigation) = child_mut(scenario, "navigation") {
        coerce_floats(navigation, &["distance", "totalDistance", "speed"]);
        if !navigation.contains_key("totalDistance") {
            if let Some(distance) = navigation.get("distance").cloned() {
                navigation.insert("totalDistance".to_string(), distance);
            }
        }
    }
    if let Some(tactical) = child_mut(scenario, "tactical") {
        for weapon in objects_mut(tactical.get_mut("weapons")) {
            stringify_id(weapon);
            coerce_counts(weapon, &["cooldownTicks", "remaining"]);
        }
    }
    if let Some(encounter) = child_mut(scenario, "encounter") {
        coerce_floats(encounter, &["weaponsRange"]);
        for contact in objects_mut(encounter.get_mut("contacts")) {
            stringify_id(contact);
            coerce_floats(contact, &["distance", "closingSpeed"]);
        }
    }
    if let Some(clock) = child_mut(scenario, "clock") {
        coerce_floats(clock, &["epoch", "startSeconds"]);
    }
    if let Some(telemetry) = child_mut(scenario, "telemetry") {
        coerce_counts(telemetry, &["interval", "capacity"]);
    }
}

/// Normalizes a raw scenario document in place.
pub fn normalize_scenario(raw: &mut Value) -> Result<()> {
    let Some(scenario) = raw.as_object_mut() else {
        bail!("scenario must be a JSON object");
    };
    stringify_id(scenario);
    name_from_id(scenario, "name");
    if let Some(alert) = scenario.get_mut("alert") {
        if let Some(level) = alert.as_str() {
            *alert = Value::String(level.trim().to_ascii_lowercase());
        }
    }

    for system in objects_mut(scenario.get_mut("systems")) {
        normalize_system(system);
    }
    if !scenario.get("lifeSupport").is_some_and(Value::is_object) {
        scenario.insert("lifeSupport".to_string(), json!({}));
    }
    if let Some(life_support) = child_mut(scenario, "lifeSupport") {
        normalize_life_support(life_support);
    }
    if let Some(power) = child_mut(scenario, "power") {
        normalize_power(power);
    }
    normalize_panels(scenario);
    Ok(())
}
