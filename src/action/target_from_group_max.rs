//! `target_from_group_max`: per-group max value mapped
//! through a piecewise table to a speed, with asymmetric hysteresis
//! applied before the table lookup takes effect.

use serde::Deserialize;

use crate::error::Result;

use super::{Action, ActionContext};

#[derive(Clone, Deserialize)]
pub struct SpeedPoint {
    pub value: f64,
    pub speed: u64,
}

pub struct TargetFromGroupMax {
    ident: String,
    group: String,
    table: Vec<SpeedPoint>,
    pos_hysteresis: f64,
    neg_hysteresis: f64,
    last_value: Option<f64>,
}

impl TargetFromGroupMax {
    pub fn new(ident: impl Into<String>, group: impl Into<String>, table: Vec<SpeedPoint>) -> Self {
        Self { ident: ident.into(), group: group.into(), table, pos_hysteresis: 0.0, neg_hysteresis: 0.0, last_value: None }
    }

    pub fn with_hysteresis(mut self, pos: f64, neg: f64) -> Self {
        self.pos_hysteresis = pos;
        self.neg_hysteresis = neg;
        self
    }

    /// Apply asymmetric hysteresis: a rise smaller than `pos_hysteresis`
    /// or a fall smaller than `neg_hysteresis` is suppressed, holding the
    /// previous effective value instead of tracking `raw`.
    fn apply_hysteresis(last: Option<f64>, raw: f64, pos_hysteresis: f64, neg_hysteresis: f64) -> f64 {
        match last {
            Some(prev) if raw > prev => {
                if raw - prev < pos_hysteresis { prev } else { raw }
            }
            Some(prev) if raw < prev => {
                if prev - raw < neg_hysteresis { prev } else { raw }
            }
            _ => raw,
        }
    }

    fn lookup(&self, value: f64) -> Option<u64> {
        self.table
            .iter()
            .filter(|p| value >= p.value)
            .max_by(|a, b| a.value.partial_cmp(&b.value).unwrap())
            .map(|p| p.speed)
            .or_else(|| self.table.first().map(|p| p.speed))
    }
}

impl Action for TargetFromGroupMax {
    fn identity(&self) -> &str {
        &self.ident
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(group) = ctx.group(&self.group).cloned() else { return Ok(()) };
        let max = group
            .members
            .iter()
            .filter_map(|path| ctx.cache.get_value(path, &group.interface, &group.property))
            .filter_map(|v| v.as_f64())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        let Some(raw) = max else { return Ok(()) };

        let effective = Self::apply_hysteresis(self.last_value, raw, self.pos_hysteresis, self.neg_hysteresis);
        self.last_value = Some(effective);

        if let Some(speed) = self.lookup(effective) {
            let current = ctx.zone.target();
            ctx.zone.set_target(speed.max(current), ctx.fans);
        }
        Ok(())
    }
}
