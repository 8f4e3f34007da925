//! Power distribution engine.
//!
//! Translates the four group percentages (engines, shields, weapons, aux)
//! into per-system power and status. A slider value scales its group's own
//! baseline draw; inside a group the budget is handed out by priority tier
//! through a reserve / restore / boost waterfall. Brownout and overload
//! transitions are logged once per change, never per tick.

mod allocation;

pub use allocation::{
    allocate_group, available_power, derive_status, is_brownout, is_critical_brownout,
    is_overload, normalize_distribution, power_ratio, priority_order, recommended_distribution,
    round_with_remainder, GroupMember, PowerDistribution, PowerGroup, PowerProfile, PowerTuning,
    ProfileOverride,
};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::events::{self, Event};
use crate::kernel::{HookResult, Module, ModuleContext};
use crate::{clamp_percent, keys, value_as_f64, LogKind, SystemEntity, SystemId, SystemStatus};

/// Shape of `state.power`. Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<PowerDistribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended: Option<PowerDistribution>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileOverride>,
    #[serde(default)]
    pub brownouts: Vec<SystemId>,
    #[serde(default)]
    pub critical_brownouts: Vec<SystemId>,
    #[serde(default)]
    pub overloads: Vec<SystemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Baselines captured from the scenario; immutable until the next
/// `systems:reinitialized`.
#[derive(Debug, Clone, Default)]
struct PowerLayout {
    groups: [Vec<GroupMember>; 4],
    totals: [f64; 4],
    recommended: PowerDistribution,
    baseline_power: HashMap<SystemId, f64>,
    baseline_status: HashMap<SystemId, SystemStatus>,
}

impl PowerLayout {
    fn capture(systems: &[SystemEntity], overrides: &BTreeMap<String, ProfileOverride>) -> Self {
        let mut layout = Self::default();
        for system in systems {
            let id = system.id.as_str();
            let mut profile = PowerProfile::default_for(id);
            if let Some(patch) = overrides.get(id) {
                profile = profile.with_override(patch);
            }
            let group = PowerGroup::for_system(id).index();
            layout.totals[group] += system.power;
            layout.groups[group].push(GroupMember {
                id: system.id.clone(),
                baseline: system.power,
                profile,
            });
            layout.baseline_power.insert(system.id.clone(), system.power);
            layout.baseline_status.insert(system.id.clone(), system.status);
        }
        for members in &mut layout.groups {
            priority_order(members);
        }
        layout.recommended = recommended_distribution(layout.totals);
        layout
    }

    fn allocate(&self, distribution: PowerDistribution) -> HashMap<SystemId, u32> {
        let mut out = HashMap::new();
        for group in PowerGroup::ALL {
            let i = group.index();
            let available = available_power(
                self.totals[i],
                distribution.get(group),
                self.recommended.get(group),
            );
            out.extend(allocate_group(&self.groups[i], available));
        }
        out
    }
}

/// Result of one allocation pass over `state.systems`.
struct Applied {
    systems: Vec<SystemEntity>,
    changed: bool,
    brownouts: BTreeSet<SystemId>,
    critical: BTreeSet<SystemId>,
    overloads: BTreeSet<SystemId>,
}

/// Runs the waterfall and writes the result into `systems`.
///
/// A boosted allocation may exceed 100 (160 available to an 80-draw engine
/// lands at 112). Published `power` is clamped to `[0, 100]`, while the
/// brownout and overload ratios use the unclamped allocation, so that
/// engine still reads as a 1.4 overload.
fn apply_allocations(
    layout: &PowerLayout,
    tuning: &PowerTuning,
    mut systems: Vec<SystemEntity>,
    distribution: PowerDistribution,
) -> Applied {
    let allocations = layout.allocate(distribution);
    let mut applied = Applied {
        systems: Vec::new(),
        changed: false,
        brownouts: BTreeSet::new(),
        critical: BTreeSet::new(),
        overloads: BTreeSet::new(),
    };
    for system in &mut systems {
        let (Some(&power), Some(&baseline)) = (
            allocations.get(&system.id),
            layout.baseline_power.get(&system.id),
        ) else {
            continue;
        };
        let baseline_status = layout
            .baseline_status
            .get(&system.id)
            .copied()
            .unwrap_or_default();
        let power = f64::from(power);
        let ratio = power_ratio(power, baseline);
        let status = derive_status(ratio, baseline_status, tuning);

        if is_brownout(ratio, tuning) {
            applied.brownouts.insert(system.id.clone());
        }
        if is_critical_brownout(ratio, tuning) {
            applied.critical.insert(system.id.clone());
        }
        if is_overload(ratio, tuning) {
            applied.overloads.insert(system.id.clone());
        }
        let published = clamp_percent(power);
        if (system.power - published).abs() > f64::EPSILON || system.status != status {
            system.set_power(published);
            system.status = status;
            applied.changed = true;
        }
    }
    applied.systems = systems;
    applied
}

fn join_names(ids: &BTreeSet<&SystemId>, names: &HashMap<&SystemId, &str>) -> String {
    ids.iter()
        .map(|id| names.get(id).copied().unwrap_or(id.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads a `{engines, shields, weapons, aux}` object; missing groups keep
/// their current value.
pub fn parse_distribution(value: Option<&Value>, current: PowerDistribution) -> [f64; 4] {
    let Some(object) = value.and_then(Value::as_object) else {
        return [0.0; 4];
    };
    PowerGroup::ALL.map(|group| {
        object
            .get(group.as_str())
            .and_then(value_as_f64)
            .unwrap_or_else(|| f64::from(current.get(group)))
    })
}

#[derive(Debug, Default)]
pub struct PowerEngine {
    tuning: PowerTuning,
    layout: Option<PowerLayout>,
    applied: Option<PowerDistribution>,
    last_good: PowerDistribution,
    brownouts: BTreeSet<SystemId>,
    overloads: BTreeSet<SystemId>,
}

impl PowerEngine {
    pub fn new(tuning: PowerTuning) -> Self {
        Self {
            tuning,
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Option<PowerDistribution> {
        self.applied
    }

    pub fn recommended(&self) -> Option<PowerDistribution> {
        self.layout.as_ref().map(|layout| layout.recommended)
    }

    fn setup(&mut self, ctx: &ModuleContext<'_>) -> anyhow::Result<()> {
        let systems: Vec<SystemEntity> = ctx.state_as(keys::SYSTEMS)?.unwrap_or_default();
        let power: PowerState = ctx.state_as(keys::POWER)?.unwrap_or_default();
        let layout = PowerLayout::capture(&systems, &power.profiles);
        self.last_good = power.distribution.unwrap_or(layout.recommended);
        self.layout = Some(layout);
        self.applied = None;
        self.brownouts.clear();
        self.overloads.clear();
        Ok(())
    }

    /// Normalizes `requested` and pushes the result through the waterfall.
    /// Returns whether a distribution was applied.
    pub fn apply_distribution(
        &mut self,
        ctx: &mut ModuleContext<'_>,
        requested: [f64; 4],
        source: &str,
        force: bool,
    ) -> anyhow::Result<bool> {
        let systems: Vec<SystemEntity> = ctx.state_as(keys::SYSTEMS)?.unwrap_or_default();
        if systems.is_empty() {
            return Ok(false);
        }
        if self.layout.is_none() {
            self.setup(ctx)?;
        }
        let Some(layout) = self.layout.as_ref() else {
            return Ok(false);
        };
        let distribution = normalize_distribution(requested, self.last_good);
        if !force && self.applied == Some(distribution) {
            return Ok(false);
        }

        let recommended = layout.recommended;
        let applied = apply_allocations(layout, &self.tuning, systems, distribution);
        self.log_transitions(ctx, &applied);
        self.applied = Some(distribution);
        self.last_good = distribution;
        self.brownouts.clone_from(&applied.brownouts);
        self.overloads.clone_from(&applied.overloads);

        if applied.changed {
            ctx.set_state_typed(keys::SYSTEMS, &applied.systems)?;
        }
        ctx.update_state_typed(keys::POWER, |power: &mut PowerState| {
            power.distribution = Some(distribution);
            power.recommended = Some(recommended);
            power.brownouts = applied.brownouts.iter().cloned().collect();
            power.critical_brownouts = applied.critical.iter().cloned().collect();
            power.overloads = applied.overloads.iter().cloned().collect();
            power.source = Some(source.to_string());
        })?;

        ctx.emit(
            events::POWER_DISTRIBUTION_APPLIED,
            json!({ "source": source, "distribution": distribution }),
        );
        if applied.changed {
            ctx.emit(
                events::SYSTEMS_POWER_UPDATED,
                json!({
                    "distribution": distribution,
                    "brownouts": applied.brownouts,
                    "overloads": applied.overloads,
                    "source": source,
                }),
            );
        }
        Ok(true)
    }

    fn log_transitions(&self, ctx: &mut ModuleContext<'_>, applied: &Applied) {
        let names: HashMap<&SystemId, &str> = applied
            .systems
            .iter()
            .map(|s| (&s.id, s.display_name()))
            .collect();

        let entered: BTreeSet<&SystemId> = applied.brownouts.difference(&self.brownouts).collect();
        if !entered.is_empty() {
            let kind = if entered.iter().any(|id| applied.critical.contains(*id)) {
                LogKind::Critical
            } else {
                LogKind::Warning
            };
            ctx.log(kind, format!("Brownout: {} unter Sollleistung", join_names(&entered, &names)));
        }
        let exited: BTreeSet<&SystemId> = self.brownouts.difference(&applied.brownouts).collect();
        if !exited.is_empty() {
            ctx.log(LogKind::Info, format!("Brownout behoben: {}", join_names(&exited, &names)));
        }

        let entered: BTreeSet<&SystemId> = applied.overloads.difference(&self.overloads).collect();
        if !entered.is_empty() {
            ctx.log(LogKind::Warning, format!("Überlast: {} über Nennleistung", join_names(&entered, &names)));
        }
        let exited: BTreeSet<&SystemId> = self.overloads.difference(&applied.overloads).collect();
        if !exited.is_empty() {
            ctx.log(LogKind::Info, format!("Überlast beendet: {}", join_names(&exited, &names)));
        }
    }

    /// Recommended split weighted toward groups holding degraded systems.
    fn balanced_request(&self, systems: &[SystemEntity]) -> [f64; 4] {
        let Some(layout) = self.layout.as_ref() else {
            return [0.0; 4];
        };
        let mut request = layout.recommended.as_f64();
        for group in PowerGroup::ALL {
            let statuses = || {
                systems
                    .iter()
                    .filter(|s| PowerGroup::for_system(s.id.as_str()) == group)
                    .map(|s| s.status)
            };
            if statuses().any(|s| s == SystemStatus::Critical) {
                request[group.index()] += self.tuning.critical_weight;
            } else if statuses().any(|s| s == SystemStatus::Warning) {
                request[group.index()] += self.tuning.warning_weight;
            }
        }
        request
    }

    fn auto_balance(&mut self, ctx: &mut ModuleContext<'_>, source: &str) -> anyhow::Result<bool> {
        if self.layout.is_none() {
            self.setup(ctx)?;
        }
        let systems: Vec<SystemEntity> = ctx.state_as(keys::SYSTEMS)?.unwrap_or_default();
        let request = self.balanced_request(&systems);
        self.apply_distribution(ctx, request, source, false)
    }

    fn reinitialize(&mut self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<bool> {
        self.setup(ctx)?;
        let request = self.last_good.as_f64();
        self.apply_distribution(ctx, request, "scenario", true)
    }
}

impl Module for PowerEngine {
    fn on_start(&mut self, ctx: &mut ModuleContext<'_>) -> HookResult {
        ctx.on(events::UI_POWER_ADJUSTED);
        ctx.on(events::POWER_REQUEST_BALANCE);
        ctx.on(events::SYSTEMS_REINITIALIZED);
        if self.layout.is_none() {
            self.setup(ctx)?;
        }
        let request = self.applied.unwrap_or(self.last_good).as_f64();
        self.apply_distribution(ctx, request, "init", true)?;
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut ModuleContext<'_>, event: &Event) -> HookResult {
        let source = event.str_field("source").unwrap_or("ui").to_string();
        match event.kind.as_str() {
            events::UI_POWER_ADJUSTED => {
                let current = self.applied.unwrap_or(self.last_good);
                let request = parse_distribution(event.field("distribution"), current);
                self.apply_distribution(ctx, request, &source, false)?;
            }
            events::POWER_REQUEST_BALANCE => {
                self.auto_balance(ctx, &source)?;
            }
            events::SYSTEMS_REINITIALIZED => {
                self.reinitialize(ctx)?;
            }
            _ => {}
        }
        Ok(())
    }
}
