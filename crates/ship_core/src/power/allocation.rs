//! Pure allocation math for the power engine.
//!
//! Nothing here touches the kernel: the engine module feeds baselines and
//! profiles in and publishes whatever comes out.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{SystemId, SystemStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerGroup {
    Engines,
    Shields,
    Weapons,
    Aux,
}

impl PowerGroup {
    pub const ALL: [PowerGroup; 4] = [Self::Engines, Self::Shields, Self::Weapons, Self::Aux];

    pub fn index(self) -> usize {
        match self {
            Self::Engines => 0,
            Self::Shields => 1,
            Self::Weapons => 2,
            Self::Aux => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Engines => "engines",
            Self::Shields => "shields",
            Self::Weapons => "weapons",
            Self::Aux => "aux",
        }
    }

    /// Fixed id template; anything not named here is auxiliary.
    pub fn for_system(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "engines" | "propulsion" | "thrusters" | "ftl" => Self::Engines,
            "shields" | "deflector" => Self::Shields,
            "weapons" | "tactical" | "phasers" | "torpedoes" => Self::Weapons,
            _ => Self::Aux,
        }
    }
}

impl fmt::Display for PowerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group percentages. A normalized distribution always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDistribution {
    pub engines: u32,
    pub shields: u32,
    pub weapons: u32,
    pub aux: u32,
}

impl Default for PowerDistribution {
    fn default() -> Self {
        Self::from_array([25, 25, 25, 25])
    }
}

impl PowerDistribution {
    pub fn from_array(values: [u32; 4]) -> Self {
        let [engines, shields, weapons, aux] = values;
        Self {
            engines,
            shields,
            weapons,
            aux,
        }
    }

    pub fn to_array(self) -> [u32; 4] {
        [self.engines, self.shields, self.weapons, self.aux]
    }

    pub fn get(self, group: PowerGroup) -> u32 {
        self.to_array()[group.index()]
    }

    pub fn total(self) -> u32 {
        self.to_array().iter().sum()
    }

    pub fn as_f64(self) -> [f64; 4] {
        self.to_array().map(f64::from)
    }
}

/// Per-system priority profile used by the waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerProfile {
    /// Higher tiers are served first.
    pub priority: u8,
    /// Reserve fraction of baseline handed out in the first pass.
    pub min: f64,
    /// Boost cap as a multiple of baseline.
    pub boost: f64,
}

impl PowerProfile {
    pub const fn new(priority: u8, min: f64, boost: f64) -> Self {
        Self {
            priority,
            min,
            boost,
        }
    }

    pub fn default_for(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "life-support" | "medical" => Self::new(5, 0.75, 1.1),
            "sensors" => Self::new(3, 0.35, 1.2),
            other => match PowerGroup::for_system(other) {
                PowerGroup::Shields => Self::new(4, 0.5, 1.3),
                PowerGroup::Engines => Self::new(3, 0.4, 1.4),
                PowerGroup::Weapons => Self::new(2, 0.3, 1.35),
                PowerGroup::Aux => Self::new(1, 0.2, 1.15),
            },
        }
    }

    /// Applies a partial scenario override on top of this profile.
    pub fn with_override(mut self, patch: &ProfileOverride) -> Self {
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(min) = patch.min {
            self.min = min.clamp(0.0, 1.0);
        }
        if let Some(boost) = patch.boost {
            self.boost = boost.max(1.0);
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub boost: Option<f64>,
}

/// Ratio thresholds and auto-balance weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PowerTuning {
    pub brownout_ratio: f64,
    pub critical_ratio: f64,
    pub overload_ratio: f64,
    /// Ratio at which idle systems stay idle and offline ones wake up.
    pub restore_ratio: f64,
    pub critical_weight: f64,
    pub warning_weight: f64,
}

impl Default for PowerTuning {
    fn default() -> Self {
        Self {
            brownout_ratio: 0.7,
            critical_ratio: 0.4,
            overload_ratio: 1.2,
            restore_ratio: 0.75,
            critical_weight: 6.0,
            warning_weight: 3.0,
        }
    }
}

/// Rounds `values` to integers whose sum is exactly `target`. The last
/// entry absorbs the remainder; if that would go negative the deficit is
/// taken from the entries before it, back to front.
pub fn round_with_remainder(values: &[f64], target: i64) -> Vec<i64> {
    let Some((_, head)) = values.split_last() else {
        return Vec::new();
    };
    #[allow(clippy::cast_possible_truncation)]
    let mut out: Vec<i64> = head.iter().map(|v| v.round().max(0.0) as i64).collect();
    let assigned: i64 = out.iter().sum();
    out.push(target - assigned);

    let mut deficit = -out.last().copied().unwrap_or(0).min(0);
    if deficit > 0 {
        if let Some(last) = out.last_mut() {
            *last = 0;
        }
        for slot in out.iter_mut().rev().skip(1) {
            let take = deficit.min(*slot);
            *slot -= take;
            deficit -= take;
            if deficit == 0 {
                break;
            }
        }
    }
    out
}

fn to_distribution(values: &[i64]) -> PowerDistribution {
    let mut array = [0_u32; 4];
    for (slot, value) in array.iter_mut().zip(values) {
        *slot = u32::try_from(*value).unwrap_or(0);
    }
    PowerDistribution::from_array(array)
}

/// Clamps each group to `[0, 100]` and rescales the result to sum to
/// exactly 100. A zero or non-finite request yields `fallback`.
pub fn normalize_distribution(requested: [f64; 4], fallback: PowerDistribution) -> PowerDistribution {
    let clamped = requested.map(|v| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 });
    let total: f64 = clamped.iter().sum();
    if total <= 0.0 {
        return fallback;
    }
    let scaled: Vec<f64> = clamped.iter().map(|v| v * 100.0 / total).collect();
    to_distribution(&round_with_remainder(&scaled, 100))
}

/// Split proportional to group baseline totals; all-zero totals give an
/// even split.
pub fn recommended_distribution(totals: [f64; 4]) -> PowerDistribution {
    let totals = totals.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let sum: f64 = totals.iter().sum();
    if sum <= 0.0 {
        return PowerDistribution::default();
    }
    let scaled: Vec<f64> = totals.iter().map(|v| v * 100.0 / sum).collect();
    to_distribution(&round_with_remainder(&scaled, 100))
}

/// Group budget: the slider scales the group's own baseline draw.
pub fn available_power(group_total: f64, requested: u32, recommended: u32) -> f64 {
    if recommended == 0 {
        return if requested == 0 { 0.0 } else { group_total };
    }
    group_total * f64::from(requested) / f64::from(recommended)
}

/// One system as seen by the waterfall.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub id: SystemId,
    pub baseline: f64,
    pub profile: PowerProfile,
}

/// Descending priority tier, then descending baseline draw. Stable, so
/// declaration order breaks the remaining ties.
pub fn priority_order(members: &mut [GroupMember]) {
    members.sort_by(|a, b| {
        b.profile
            .priority
            .cmp(&a.profile.priority)
            .then_with(|| b.baseline.partial_cmp(&a.baseline).unwrap_or(Ordering::Equal))
    });
}

/// Three-pass waterfall (reserve, restore, boost) over members already in
/// priority order, then integer rounding with the remainder absorbed by the
/// last member. Unconsumed power is left unused.
pub fn allocate_group(members: &[GroupMember], available: f64) -> Vec<(SystemId, u32)> {
    let mut remaining = available.max(0.0);
    let mut allocated = vec![0.0_f64; members.len()];
    let passes: [fn(&GroupMember) -> f64; 3] = [
        |m| m.baseline * m.profile.min,
        |m| m.baseline,
        |m| m.baseline * m.profile.boost,
    ];

    for ceiling in passes {
        for (member, slot) in members.iter().zip(allocated.iter_mut()) {
            let want = (ceiling(member) - *slot).max(0.0);
            let grant = want.min(remaining);
            *slot += grant;
            remaining -= grant;
        }
    }

    let consumed: f64 = allocated.iter().sum();
    #[allow(clippy::cast_possible_truncation)]
    let target = consumed.round() as i64;
    round_with_remainder(&allocated, target)
        .into_iter()
        .zip(members)
        .map(|(value, member)| (member.id.clone(), u32::try_from(value).unwrap_or(0)))
        .collect()
}

/// Allocation relative to baseline; a zero baseline reads as 2 when it
/// receives power and 1 otherwise.
pub fn power_ratio(allocated: f64, baseline: f64) -> f64 {
    if baseline <= 0.0 {
        if allocated > 0.0 {
            2.0
        } else {
            1.0
        }
    } else {
        allocated / baseline
    }
}

/// Status after allocation. Anything not covered keeps the baseline
/// status.
pub fn derive_status(ratio: f64, baseline: SystemStatus, tuning: &PowerTuning) -> SystemStatus {
    if ratio <= tuning.critical_ratio {
        SystemStatus::Critical
    } else if ratio < tuning.brownout_ratio {
        SystemStatus::Warning
    } else if baseline == SystemStatus::Offline {
        if ratio >= tuning.restore_ratio {
            SystemStatus::Warning
        } else {
            SystemStatus::Offline
        }
    } else if baseline == SystemStatus::Idle && ratio >= tuning.restore_ratio {
        SystemStatus::Idle
    } else if ratio > tuning.overload_ratio {
        SystemStatus::Online
    } else {
        baseline
    }
}

pub fn is_brownout(ratio: f64, tuning: &PowerTuning) -> bool {
    ratio < tuning.brownout_ratio
}

pub fn is_critical_brownout(ratio: f64, tuning: &PowerTuning) -> bool {
    ratio < tuning.critical_ratio
}

pub fn is_overload(ratio: f64, tuning: &PowerTuning) -> bool {
    ratio > tuning.overload_ratio
}
