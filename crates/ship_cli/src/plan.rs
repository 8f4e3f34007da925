//! Host inputs scheduled from the command line.
//!
//! `--distribution 30,30,10,30@20` moves the power sliders before tick 21
//! runs; `--switch path.json@50` swaps the scenario at the same point.
//! Tick 0 means right after boot.

use anyhow::{bail, ensure, Context, Result};
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub at: u64,
    pub distribution: [f64; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub at: u64,
    pub path: PathBuf,
}

fn split_at_tick(raw: &str) -> Result<(&str, u64)> {
    let Some((value, tick)) = raw.rsplit_once('@') else {
        bail!("expected <value>@<tick>, got '{raw}'");
    };
    let tick = tick
        .trim()
        .parse()
        .with_context(|| format!("'{tick}' is not a tick number"))?;
    Ok((value.trim(), tick))
}

/// Parses `engines,shields,weapons,aux@tick`.
pub fn parse_adjustment(raw: &str) -> Result<Adjustment> {
    let (value, at) = split_at_tick(raw)?;
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("'{part}' is not a number"))
        })
        .collect::<Result<_>>()?;
    let Ok(distribution) = <[f64; 4]>::try_from(parts) else {
        bail!("expected four comma separated groups in '{value}'");
    };
    ensure!(
        distribution.iter().all(|v| v.is_finite()),
        "distribution values must be finite"
    );
    Ok(Adjustment { at, distribution })
}

/// Parses `path@tick`.
pub fn parse_switch(raw: &str) -> Result<Switch> {
    let (path, at) = split_at_tick(raw)?;
    ensure!(!path.is_empty(), "scenario path is empty in '{raw}'");
    Ok(Switch {
        at,
        path: PathBuf::from(path),
    })
}

/// Scheduled inputs, drained in tick order.
#[derive(Debug, Default)]
pub struct Plan {
    adjustments: VecDeque<Adjustment>,
    switches: VecDeque<Switch>,
    pub balance_every: Option<u64>,
}

impl Plan {
    pub fn new(
        mut adjustments: Vec<Adjustment>,
        mut switches: Vec<Switch>,
        balance_every: Option<u64>,
    ) -> Self {
        adjustments.sort_by_key(|a| a.at);
        switches.sort_by_key(|s| s.at);
        Self {
            adjustments: adjustments.into(),
            switches: switches.into(),
            balance_every: balance_every.filter(|n| *n > 0),
        }
    }

    pub fn due_adjustments(&mut self, tick: u64) -> Vec<Adjustment> {
        let mut due = Vec::new();
        while self.adjustments.front().is_some_and(|a| a.at <= tick) {
            due.extend(self.adjustments.pop_front());
        }
        due
    }

    pub fn due_switches(&mut self, tick: u64) -> Vec<Switch> {
        let mut due = Vec::new();
        while self.switches.front().is_some_and(|s| s.at <= tick) {
            due.extend(self.switches.pop_front());
        }
        due
    }

    /// Whether an auto-balance request goes out after `tick`.
    pub fn balance_due(&self, tick: u64) -> bool {
        self.balance_every
            .is_some_and(|every| tick > 0 && tick.is_multiple_of(every))
    }
}
