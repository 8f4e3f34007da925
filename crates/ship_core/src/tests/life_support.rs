use super::*;
use crate::life_support::{
    drift_value, DriftSpec, FilterBank, Filters, Leak, LifeSupportModule, LifeSupportSim,
    LifeSupportState, LifeSupportTuning, Section, Unit, FILTER_ACTIVE, FILTER_MONITORING,
    FILTER_REGENERATING, SECTION_ADJUSTING, SECTION_STABLE, SECTION_WARNING,
};
use crate::test_fixtures::{bridge_state, state_from};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

fn bridge_life_support() -> LifeSupportState {
    serde_json::from_value(bridge_state()["lifeSupport"].clone()).unwrap()
}

fn cycles_only(co2: bool) -> LifeSupportState {
    let mut cycles = bridge_life_support().cycles;
    cycles.retain(|c| c.is_co2() == co2);
    LifeSupportState {
        cycles,
        ..LifeSupportState::default()
    }
}

fn quiet_tuning() -> LifeSupportTuning {
    LifeSupportTuning {
        jitter: 0.0,
        ..LifeSupportTuning::default()
    }
}

/// Runs `ticks` steps, feeding each output back in, and returns every
/// notice message.
fn run(sim: &mut LifeSupportSim, state: &mut LifeSupportState, ticks: usize, rng: &mut ChaCha8Rng) -> Vec<String> {
    let mut messages = Vec::new();
    for _ in 0..ticks {
        let (next, notices) = sim.step(state, rng);
        messages.extend(notices.into_iter().map(|n| n.message));
        *state = next;
    }
    messages
}

fn count(messages: &[String], needle: &str) -> usize {
    messages.iter().filter(|m| m.contains(needle)).count()
}

#[test]
fn readings_stay_inside_their_bounds() {
    let baseline = bridge_life_support();
    let mut sim = LifeSupportSim::new(baseline.clone(), LifeSupportTuning::default());
    let mut state = baseline.clone();
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let base_section = &baseline.sections[0];

    for _ in 0..2_000 {
        let (next, _) = sim.step(&state, &mut rng);
        for metric in next.cycles.iter().flat_map(|c| &c.metrics) {
            assert!((0.0..=100.0).contains(&metric.value), "{} = {}", metric.id, metric.value);
        }
        let section = &next.sections[0];
        assert!((section.pressure - base_section.pressure).abs() <= 1.0 + 1e-9);
        assert!((section.temperature - base_section.temperature).abs() <= 1.2 + 1e-9);
        assert!((25.0..=60.0).contains(&section.humidity));
        for bank in &next.filters.banks {
            assert!((0.0..=100.0).contains(&bank.saturation));
            assert!(bank.buffer_minutes.is_some_and(|m| (0.0..=720.0).contains(&m)));
        }
        for (_, value) in next.filters.buffers() {
            assert!(value.is_some_and(|v| v >= 0.0));
        }
        state = next;
    }
}

#[test]
fn unbiased_walk_reverts_to_baseline() {
    let spec = DriftSpec::new(Unit::Percent, 0.0, 100.0);
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let mut value = 20.0;
    for _ in 0..500 {
        value = drift_value(value, 60.0, &spec, &mut rng);
    }
    let mut sum = 0.0;
    for _ in 0..1_000 {
        value = drift_value(value, 60.0, &spec, &mut rng);
        sum += value;
    }
    let mean = sum / 1_000.0;
    assert!((mean - 60.0).abs() < 1.0, "mean {mean}");
}

#[test]
fn one_leak_at_a_time_and_sealed_stays_sealed() {
    let tuning = LifeSupportTuning {
        leak_progress_min: 30.0,
        leak_progress_max: 40.0,
        leak_cooldown_min: 0,
        leak_cooldown_max: 2,
        ..LifeSupportTuning::default()
    };
    let baseline = LifeSupportState {
        leaks: vec![
            Leak {
                id: "leak-a".to_string(),
                location: "Frachtraum".to_string(),
                ..Leak::default()
            },
            Leak {
                id: "leak-b".to_string(),
                location: "Deck 4".to_string(),
                ..Leak::default()
            },
        ],
        ..LifeSupportState::default()
    };
    let mut sim = LifeSupportSim::new(baseline.clone(), tuning);
    let mut state = baseline;
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut messages = Vec::new();
    let mut sealed_seen: Vec<String> = Vec::new();

    for _ in 0..60 {
        let (next, notices) = sim.step(&state, &mut rng);
        messages.extend(notices.into_iter().map(|n| n.message));
        let open: Vec<&Leak> = next.leaks.iter().filter(|l| !l.sealed && l.progress > 0.0).collect();
        assert!(open.len() <= 1);
        assert_eq!(next.active_leak_id.as_deref(), open.first().map(|l| l.id.as_str()));
        for id in &sealed_seen {
            let leak = next.leaks.iter().find(|l| &l.id == id).unwrap();
            assert!(leak.sealed);
            assert!((leak.progress - 100.0).abs() < f64::EPSILON);
        }
        sealed_seen = next.leaks.iter().filter(|l| l.sealed).map(|l| l.id.clone()).collect();
        state = next;
    }

    assert_eq!(count(&messages, "Leck entdeckt"), 2);
    assert_eq!(count(&messages, "Leck abgedichtet"), 2);
    assert_eq!(messages[0], "Leck entdeckt: Frachtraum");
    assert!(sim.active_leak().is_none());
}

#[test]
fn reserve_air_threshold_is_reported_per_crossing() {
    let tuning = LifeSupportTuning {
        buffer_bias: -12.0,
        ..quiet_tuning()
    };
    let baseline = LifeSupportState {
        filters: Filters {
            reserve_air_minutes: Some(600.0),
            ..Filters::default()
        },
        ..LifeSupportState::default()
    };
    let mut sim = LifeSupportSim::new(baseline.clone(), tuning);
    let mut state = baseline;
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    // the bias pulls the reserve toward 400 minutes
    let messages = run(&mut sim, &mut state, 200, &mut rng);
    assert_eq!(count(&messages, "Luftreserve unter 480 min"), 1);
    assert!(state.filters.reserve_air_minutes.is_some_and(|m| m < 480.0));

    let mut raised = sim.baseline().clone();
    raised.filters.reserve_air_minutes = Some(900.0);
    sim.set_baseline(raised);
    let messages = run(&mut sim, &mut state, 200, &mut rng);
    assert_eq!(count(&messages, "Luftreserve wieder über 480 min"), 1);
    assert_eq!(count(&messages, "Luftreserve unter"), 0);
}

#[test]
fn scrubber_regeneration_is_announced_once() {
    let mut baseline = cycles_only(true);
    baseline.cycles[0].metrics[0].value = 60.0;
    let mut state = baseline.clone();
    state.cycles[0].metrics[0].value = 95.0;

    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let (next, notices) = sim.step(&state, &mut rng);
    assert!(sim.is_regenerating("co2-scrubber"));
    // knocked down to max(60 + 8, 93.2 - 18)
    assert!((next.cycles[0].metrics[0].value - 75.2).abs() < 1e-9);
    assert_eq!(
        notices.iter().filter(|n| n.message.contains("automatische Regeneration")).count(),
        1
    );

    state = next;
    let messages = run(&mut sim, &mut state, 300, &mut rng);
    assert_eq!(count(&messages, "automatische Regeneration"), 0);
    assert_eq!(count(&messages, "Regeneration abgeschlossen"), 1);
    assert!(!sim.is_regenerating("co2-scrubber"));
}

#[test]
fn cycle_severity_changes_are_logged_once() {
    let mut baseline = cycles_only(false);
    baseline.cycles[0].metrics[0].value = 97.0;
    let mut state = baseline.clone();
    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(4);

    let messages = run(&mut sim, &mut state, 20, &mut rng);
    assert_eq!(messages, vec!["O₂-Erzeugung: Werte im Warnbereich"]);
    assert_eq!(state.cycles[0].status, "Warnung");
}

fn deck(status: &str, humidity: f64) -> Section {
    Section {
        id: "deck-2".to_string(),
        name: "Deck 2".to_string(),
        pressure: 101.3,
        temperature: 21.0,
        humidity,
        status: status.to_string(),
    }
}

fn bank(id: &str, label: &str, saturation: f64, status: &str) -> FilterBank {
    FilterBank {
        id: id.to_string(),
        label: label.to_string(),
        saturation,
        status: status.to_string(),
        buffer_minutes: None,
    }
}

#[test]
fn section_warning_recovery_and_stable_are_logged_once() {
    let baseline = LifeSupportState {
        sections: vec![deck(SECTION_STABLE, 40.0)],
        ..LifeSupportState::default()
    };
    let mut state = baseline.clone();
    state.sections[0].humidity = 55.0;
    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(6);

    // 55 drifts to 54.1, still 14.1 off the 40% baseline
    let (next, notices) = sim.step(&state, &mut rng);
    assert_eq!(next.sections[0].status, SECTION_WARNING);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, LogKind::Warning);
    state = next;

    let mut statuses = Vec::new();
    let mut messages = Vec::new();
    for _ in 0..40 {
        let (next, notices) = sim.step(&state, &mut rng);
        messages.extend(notices.into_iter().map(|n| n.message));
        if statuses.last() != Some(&next.sections[0].status) {
            statuses.push(next.sections[0].status.clone());
        }
        state = next;
    }
    assert_eq!(statuses, vec![SECTION_WARNING, SECTION_ADJUSTING, SECTION_STABLE]);
    assert_eq!(
        messages,
        vec![
            "Sektion Deck 2: Klimawerte erholen sich",
            "Sektion Deck 2: Klima wieder stabil",
        ]
    );
}

#[test]
fn scripted_section_status_survives_ticks() {
    let baseline = LifeSupportState {
        sections: vec![deck("Wartung", 40.0)],
        ..LifeSupportState::default()
    };
    let mut state = baseline.clone();
    state.sections[0].humidity = 60.0;
    state.sections[0].status = SECTION_STABLE.to_string();
    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let (next, notices) = sim.step(&state, &mut rng);
    assert!(notices.is_empty());
    assert_eq!(next.sections[0].status, "Wartung");
    assert!((next.sections[0].humidity - 58.8).abs() < 1e-9);

    state = next;
    let messages = run(&mut sim, &mut state, 20, &mut rng);
    assert!(messages.is_empty(), "{messages:?}");
    assert_eq!(state.sections[0].status, "Wartung");
}

#[test]
fn filter_bank_status_follows_saturation_bands() {
    let baseline = LifeSupportState {
        filters: Filters {
            banks: vec![bank("bank-a", "", 40.0, ""), bank("bank-b", "", 40.0, "Bereit")],
            ..Filters::default()
        },
        ..LifeSupportState::default()
    };
    let mut state = baseline.clone();
    state.filters.banks[0].saturation = 80.0;
    state.filters.banks[1].saturation = 97.0;
    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(8);

    // both drift toward 40 + 4: 80 -> 77.8 and 97 -> 93.8
    let (next, notices) = sim.step(&state, &mut rng);
    let kinds: Vec<LogKind> = notices.iter().map(|n| n.kind).collect();
    let messages: Vec<String> = notices.into_iter().map(|n| n.message).collect();
    assert_eq!(
        messages,
        vec![
            "Filter bank-a: Sättigung erhöht (77.8%)",
            "Filter bank-b: Sättigung 93.8%, Regeneration gestartet",
        ]
    );
    assert_eq!(kinds, vec![LogKind::Warning, LogKind::Critical]);
    assert_eq!(next.filters.banks[0].status, FILTER_MONITORING);
    assert_eq!(next.filters.banks[1].status, FILTER_REGENERATING);
    // knocked down to max(40 + 8, 93.8 - 18)
    assert!((next.filters.banks[1].saturation - 75.8).abs() < 1e-9);

    state = next;
    let messages = run(&mut sim, &mut state, 30, &mut rng);
    assert_eq!(
        messages,
        vec![
            "Filter bank-b: wieder im Normalbetrieb",
            "Filter bank-a: wieder im Normalbetrieb",
        ]
    );
    assert_eq!(state.filters.banks[0].status, FILTER_ACTIVE);
    assert_eq!(state.filters.banks[1].status, "Bereit");
}

#[test]
fn filter_regeneration_stops_at_the_floor() {
    let baseline = LifeSupportState {
        filters: Filters {
            banks: vec![bank("bank-c", "Filterbank C", 80.0, "")],
            ..Filters::default()
        },
        ..LifeSupportState::default()
    };
    let mut state = baseline.clone();
    state.filters.banks[0].saturation = 99.0;
    let mut sim = LifeSupportSim::new(baseline, quiet_tuning());
    let mut rng = ChaCha8Rng::seed_from_u64(10);

    // 99 -> 98.1, knocked down to max(80 + 8, 98.1 - 18)
    let (next, notices) = sim.step(&state, &mut rng);
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].message,
        "Filter Filterbank C: Sättigung 98.1%, Regeneration gestartet"
    );
    assert!((next.filters.banks[0].saturation - 88.0).abs() < 1e-9);

    state = next;
    let messages = run(&mut sim, &mut state, 60, &mut rng);
    assert_eq!(messages, vec!["Filter Filterbank C: Sättigung erhöht (87.8%)"]);
    assert_eq!(state.filters.banks[0].status, FILTER_MONITORING);
}

// --- module -------------------------------------------------------------

fn life_support_kernel(state: StateTree, tuning: LifeSupportTuning) -> (Kernel, Captured) {
    let (mut kernel, captured) = make_kernel(state);
    kernel.boot();
    kernel
        .register_module("life-support", LifeSupportModule::new(tuning))
        .unwrap();
    assert!(kernel.start_module("life-support").unwrap());
    (kernel, captured)
}

fn changed_keys(kernel: &mut Kernel) -> Rc<RefCell<Vec<String>>> {
    let changed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changed);
    kernel.on(events::STATE_CHANGED, move |event| {
        if let Some(key) = event.str_field("key") {
            sink.borrow_mut().push(key.to_string());
        }
        Ok(())
    });
    changed
}

#[test]
fn module_publishes_every_tick() {
    let (mut kernel, _captured) = life_support_kernel(bridge_state(), LifeSupportTuning::default());
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reasons);
    kernel.on(events::LIFE_SUPPORT_UPDATED, move |event| {
        sink.borrow_mut().push(event.str_field("reason").unwrap_or_default().to_string());
        Ok(())
    });
    for _ in 0..3 {
        kernel.tick();
    }
    assert_eq!(*reasons.borrow(), vec!["tick", "tick", "tick"]);

    let systems: Vec<SystemEntity> = kernel.state_as(keys::SYSTEMS).unwrap().unwrap();
    let card = systems.iter().find(|s| s.id.as_str() == "life-support").unwrap();
    assert!(card.details.sensors.iter().any(|line| line.starts_with("Luftreserve ")));
}

#[test]
fn sensor_feed_is_written_only_when_it_changes() {
    let state = state_from(json!({
        "systems": [{"id": "life-support", "name": "Lebenserhaltung", "power": 40}],
        "lifeSupport": {
            "sections": [{"id": "deck-1", "name": "Deck 1", "pressure": 101.3, "temperature": 21.0, "humidity": 40.0}]
        }
    }));
    let (mut kernel, _captured) = life_support_kernel(state, quiet_tuning());
    let changed = changed_keys(&mut kernel);
    for _ in 0..5 {
        kernel.tick();
    }
    let changed = changed.borrow();
    assert_eq!(changed.iter().filter(|k| *k == keys::SYSTEMS).count(), 1);
    assert_eq!(changed.iter().filter(|k| *k == keys::LIFE_SUPPORT).count(), 5);
    assert_eq!(
        kernel.get_state(keys::SYSTEMS).unwrap()[0]["details"]["sensors"],
        json!(["1/1 Sektionen stabil"])
    );
}

#[test]
fn paused_simulation_leaves_life_support_alone() {
    let mut state = bridge_state();
    state.insert(keys::SIMULATION_PAUSED.to_string(), Value::Bool(true));
    let before = state[keys::LIFE_SUPPORT].clone();
    let (mut kernel, captured) = life_support_kernel(state, LifeSupportTuning::default());
    let changed = changed_keys(&mut kernel);
    for _ in 0..3 {
        kernel.tick();
    }
    assert!(changed.borrow().is_empty());
    assert_eq!(kernel.get_state(keys::LIFE_SUPPORT), Some(&before));
    assert_eq!(captured.count_containing("Leck"), 0);
}

#[test]
fn reinitialize_publishes_the_new_baseline() {
    let (mut kernel, _captured) = life_support_kernel(bridge_state(), LifeSupportTuning::default());
    kernel.tick();
    let payloads = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&payloads);
    kernel.on(events::LIFE_SUPPORT_UPDATED, move |event| {
        sink.borrow_mut().push(event.payload.clone());
        Ok(())
    });

    let mut fresh = bridge_life_support();
    fresh.filters.reserve_air_minutes = Some(720.0);
    kernel.set_state_typed(keys::LIFE_SUPPORT, &fresh).unwrap();
    kernel.emit(events::SYSTEMS_REINITIALIZED, json!({"scenario": "fresh"}), None);

    let payloads = payloads.borrow();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["reason"], "reinitialized");
    assert_eq!(payloads[0]["lifeSupport"]["filters"]["reserveAirMinutes"], json!(720.0));
}

#[test]
fn reinitialize_keeps_status_history() {
    let mut life_support = cycles_only(false);
    life_support.cycles[0].metrics[0].value = 97.0;
    let state = state_from(json!({ "lifeSupport": life_support }));
    let (mut kernel, captured) = life_support_kernel(state, quiet_tuning());
    for _ in 0..3 {
        kernel.tick();
    }
    assert_eq!(captured.count_containing("Werte im Warnbereich"), 1);

    kernel.set_state_typed(keys::LIFE_SUPPORT, &life_support).unwrap();
    kernel.emit(events::SYSTEMS_REINITIALIZED, json!({"scenario": "same"}), None);
    for _ in 0..3 {
        kernel.tick();
    }
    assert_eq!(captured.count_containing("Werte im Warnbereich"), 1);
    assert_eq!(captured.count_containing("Normalbereich"), 0);
}

#[test]
fn rebaselined_sim_seeds_new_sections_and_leak() {
    let mut sim = LifeSupportSim::new(LifeSupportState::default(), quiet_tuning());
    let next = LifeSupportState {
        sections: vec![deck("Wartung", 40.0)],
        leaks: vec![Leak {
            id: "leak-a".to_string(),
            progress: 12.0,
            ..Leak::default()
        }],
        active_leak_id: Some("leak-a".to_string()),
        ..LifeSupportState::default()
    };
    sim.set_baseline(next.clone());
    assert_eq!(sim.active_leak(), Some("leak-a"));

    let mut state = next;
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let messages = run(&mut sim, &mut state, 3, &mut rng);
    assert_eq!(count(&messages, "Sektion"), 0, "{messages:?}");
    assert_eq!(count(&messages, "Leck entdeckt"), 0);
    assert!(state.leaks[0].progress > 12.0);
}
