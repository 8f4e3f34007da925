use super::*;
use crate::power::{
    allocate_group, available_power, normalize_distribution, priority_order, GroupMember,
    PowerDistribution, PowerEngine, PowerProfile, PowerState, PowerTuning,
};
use crate::test_fixtures::{bridge_state, engines_only_state, state_from};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};

fn collect(kernel: &mut Kernel, kind: &str) -> Rc<RefCell<Vec<Value>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    kernel.on(kind, move |event| {
        sink.borrow_mut().push(event.payload.clone());
        Ok(())
    });
    seen
}

fn power_kernel(state: StateTree) -> (Kernel, Captured) {
    let (mut kernel, captured) = make_kernel(state);
    kernel.boot();
    kernel
        .register_module("power", PowerEngine::new(PowerTuning::default()))
        .unwrap();
    assert!(kernel.start_module("power").unwrap());
    (kernel, captured)
}

fn adjust(kernel: &mut Kernel, distribution: Value) {
    kernel.emit(
        events::UI_POWER_ADJUSTED,
        json!({ "distribution": distribution, "source": "test" }),
        None,
    );
}

fn system(kernel: &Kernel, id: &str) -> SystemEntity {
    kernel
        .state_as::<Vec<SystemEntity>>(keys::SYSTEMS)
        .unwrap()
        .unwrap()
        .into_iter()
        .find(|s| s.id.as_str() == id)
        .unwrap()
}

#[test]
fn engines_only_example() {
    let (mut kernel, captured) = power_kernel(engines_only_state());
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.recommended.unwrap().to_array(), [100, 0, 0, 0]);

    adjust(&mut kernel, json!({"engines": 50, "shields": 0, "weapons": 0, "aux": 50}));
    let engines = system(&kernel, "engines");
    assert!((engines.power - 40.0).abs() < f64::EPSILON);
    assert_eq!(engines.status, SystemStatus::Warning);
    assert_eq!(captured.count_containing("Brownout: Antrieb"), 1);

    // same request again: nothing to do, nothing logged
    adjust(&mut kernel, json!({"engines": 50, "shields": 0, "weapons": 0, "aux": 50}));
    assert_eq!(captured.count_containing("Brownout: Antrieb"), 1);

    adjust(&mut kernel, json!({"engines": 100, "shields": 0, "weapons": 0, "aux": 0}));
    assert_eq!(system(&kernel, "engines").status, SystemStatus::Online);
    assert_eq!(captured.count_containing("Brownout behoben: Antrieb"), 1);
}

#[test]
fn brownout_log_is_per_transition_not_per_apply() {
    let (mut kernel, captured) = power_kernel(engines_only_state());
    adjust(&mut kernel, json!({"engines": 50, "aux": 50}));
    adjust(&mut kernel, json!({"engines": 45, "aux": 55}));
    adjust(&mut kernel, json!({"engines": 60, "aux": 40}));
    assert_eq!(captured.count_containing("Brownout: Antrieb"), 1);
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.brownouts, vec![SystemId::from("engines")]);
}

#[test]
fn overload_is_logged_once_and_boost_is_capped() {
    let (mut kernel, captured) = power_kernel(bridge_state());
    let updates = collect(&mut kernel, events::SYSTEMS_POWER_UPDATED);
    adjust(&mut kernel, json!({"engines": 60, "shields": 20, "weapons": 10, "aux": 10}));

    let engines = system(&kernel, "engines");
    // recommended engines share is 30, so 120 is available but the cap is 1.4 * 60
    assert!((engines.power - 84.0).abs() < f64::EPSILON);
    assert_eq!(engines.status, SystemStatus::Online);
    assert_eq!(captured.count_containing("Überlast: Antrieb"), 1);

    let updates = updates.borrow();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["overloads"], json!(["engines"]));
    assert_eq!(updates[0]["source"], "test");
}

#[test]
fn boosted_power_is_clamped_but_overload_uses_the_allocation() {
    let state = state_from(json!({
        "systems": [
            {"id": "engines", "name": "Antrieb", "status": "online", "power": 80},
            {"id": "shields", "name": "Schilde", "status": "online", "power": 80}
        ]
    }));
    let (mut kernel, captured) = power_kernel(state);
    let updates = collect(&mut kernel, events::SYSTEMS_POWER_UPDATED);

    // 80 * 100 / 50 = 160 available, capped at 1.4 * 80 = 112
    adjust(&mut kernel, json!({"engines": 100, "shields": 0, "weapons": 0, "aux": 0}));
    let engines = system(&kernel, "engines");
    assert!((engines.power - 100.0).abs() < f64::EPSILON);
    assert_eq!(engines.status, SystemStatus::Online);
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.overloads, vec![SystemId::from("engines")]);
    assert_eq!(captured.count_containing("Überlast: Antrieb"), 1);
    assert_eq!(updates.borrow().len(), 1);

    // weapons has no systems; engines still gets 112 and publishes 100
    adjust(&mut kernel, json!({"engines": 75, "shields": 0, "weapons": 25, "aux": 0}));
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.distribution.unwrap().to_array(), [75, 0, 25, 0]);
    assert_eq!(power.overloads, vec![SystemId::from("engines")]);
    assert!((system(&kernel, "engines").power - 100.0).abs() < f64::EPSILON);
    assert_eq!(updates.borrow().len(), 1);
    assert_eq!(captured.count_containing("Überlast"), 1);
}

#[test]
fn unchanged_systems_emit_no_power_update() {
    let (mut kernel, _captured) = power_kernel(bridge_state());
    let applied = collect(&mut kernel, events::POWER_DISTRIBUTION_APPLIED);
    let updates = collect(&mut kernel, events::SYSTEMS_POWER_UPDATED);
    let recommended = kernel.state_as::<PowerState>(keys::POWER).unwrap().unwrap().recommended.unwrap();

    // same systems, same split: every system keeps its baseline
    kernel.emit(events::SYSTEMS_REINITIALIZED, json!({"scenario": "same"}), None);
    assert_eq!(applied.borrow().len(), 1);
    assert_eq!(applied.borrow()[0]["distribution"], serde_json::to_value(recommended).unwrap());
    assert!(updates.borrow().is_empty());
}

#[test]
fn auto_balance_weights_degraded_groups() {
    let (mut kernel, _captured) = power_kernel(bridge_state());
    let applied = collect(&mut kernel, events::POWER_DISTRIBUTION_APPLIED);
    kernel.update_state(keys::SYSTEMS, |systems| {
        let mut systems = systems.clone();
        if let Some(list) = systems.as_array_mut() {
            for system in list {
                if system["id"] == "shields" {
                    system["status"] = json!("critical");
                }
            }
        }
        systems
    });
    kernel.emit(events::POWER_REQUEST_BALANCE, json!({"source": "auto"}), None);

    let applied = applied.borrow();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0]["source"], "auto");
    let distribution: PowerDistribution = serde_json::from_value(applied[0]["distribution"].clone()).unwrap();
    // recommended 30/25/15/30 plus 6 for shields, rescaled to 100
    assert_eq!(distribution.to_array(), [28, 29, 14, 29]);
}

#[test]
fn empty_systems_is_a_no_op() {
    let (mut kernel, captured) = power_kernel(state_from(json!({"systems": []})));
    let applied = collect(&mut kernel, events::POWER_DISTRIBUTION_APPLIED);
    adjust(&mut kernel, json!({"engines": 70, "shields": 10, "weapons": 10, "aux": 10}));
    assert!(applied.borrow().is_empty());
    assert!(captured.errors.borrow().is_empty());
    assert_eq!(kernel.module_status("power"), Some(ModuleStatus::Running));
}

#[test]
fn zero_baseline_group_gets_zero() {
    let state = state_from(json!({
        "systems": [
            {"id": "engines", "name": "Antrieb", "power": 0},
            {"id": "shields", "name": "Schilde", "power": 50}
        ]
    }));
    let (mut kernel, captured) = power_kernel(state);
    adjust(&mut kernel, json!({"engines": 70, "shields": 30}));
    assert!(system(&kernel, "engines").power.abs() < f64::EPSILON);
    assert!(captured.errors.borrow().is_empty());
}

#[test]
fn invalid_request_falls_back_to_last_good() {
    let (mut kernel, _captured) = power_kernel(engines_only_state());
    adjust(&mut kernel, json!({"engines": 50, "aux": 50}));
    adjust(&mut kernel, json!({"engines": 0, "shields": 0, "weapons": 0, "aux": 0}));
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.distribution.unwrap().to_array(), [50, 0, 0, 50]);
}

#[test]
fn reinitialize_recaptures_baselines() {
    let (mut kernel, _captured) = power_kernel(engines_only_state());
    adjust(&mut kernel, json!({"engines": 50, "aux": 50}));
    kernel.set_state(
        keys::SYSTEMS,
        json!([{"id": "engines", "name": "Antrieb", "power": 60}, {"id": "galley", "name": "Kombüse", "power": 20}]),
    );
    // a fresh scenario carries no distribution of its own
    kernel.set_state(keys::POWER, json!({}));
    kernel.emit(events::SYSTEMS_REINITIALIZED, json!({"scenario": "next"}), None);
    let power: PowerState = kernel.state_as(keys::POWER).unwrap().unwrap();
    assert_eq!(power.recommended.unwrap().to_array(), [75, 0, 0, 25]);
    assert!(power.brownouts.is_empty());
    assert!((system(&kernel, "engines").power - 60.0).abs() < f64::EPSILON);
}

#[test]
fn normalized_distributions_always_sum_to_hundred() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let fallback = PowerDistribution::default();
    for _ in 0..2_000 {
        let request = [(); 4].map(|()| rng.gen_range(-20.0..140.0));
        assert_eq!(normalize_distribution(request, fallback).total(), 100, "{request:?}");
    }
}

fn random_group(rng: &mut ChaCha8Rng) -> Vec<GroupMember> {
    let ids = ["life-support", "medical", "sensors", "galley", "lab", "cargo"];
    let count = rng.gen_range(1..=ids.len());
    let mut members: Vec<GroupMember> = ids[..count]
        .iter()
        .map(|id| GroupMember {
            id: SystemId::from(*id),
            baseline: f64::from(rng.gen_range(0_u32..=60)),
            profile: PowerProfile::default_for(id),
        })
        .collect();
    priority_order(&mut members);
    members
}

#[test]
fn group_allocations_sum_to_rounded_available() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..1_000 {
        let members = random_group(&mut rng);
        let capacity: f64 = members.iter().map(|m| m.baseline * m.profile.boost).sum();
        let total: f64 = members.iter().map(|m| m.baseline).sum();
        let available = available_power(total, rng.gen_range(0..=100), rng.gen_range(1..=100));
        let allocations = allocate_group(&members, available);
        let sum: u32 = allocations.iter().map(|(_, v)| v).sum();
        // consumed power is min(available, capacity)
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let expected = available.min(capacity).round() as u32;
        assert!(sum.abs_diff(expected) <= 1, "sum {sum} expected {expected}");
        if available + 1e-6 < capacity && (available - available.trunc() - 0.5).abs() > 1e-6 {
            assert_eq!(sum, expected);
        }
    }
}

#[test]
fn top_tier_never_drops_below_its_floor() {
    let mut rng = ChaCha8Rng::seed_from_u64(13);
    for _ in 0..1_000 {
        let members = random_group(&mut rng);
        let floors: f64 = members.iter().map(|m| m.baseline * m.profile.min).sum();
        let available = floors + rng.gen_range(0.0..50.0);
        let allocations = allocate_group(&members, available);
        let top = &members[0];
        assert_eq!(top.profile.priority, 5);
        let granted = f64::from(allocations[0].1);
        assert!(
            granted + 1.0 >= top.baseline * top.profile.min,
            "{} got {granted} of floor {}",
            top.id,
            top.baseline * top.profile.min
        );
    }
}
