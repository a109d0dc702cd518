//! Event profile resolution: the strongest decayed event per series as of a day.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::Level;
use crate::events::Event;

const TIE_EPS: f64 = 1e-9;

/// Chain boost for a decayed strength: `1 + ln(1+s)/2`, never below 1.
pub fn event_boost(decayed_strength: f64) -> f64 {
    if decayed_strength > 0.0 && decayed_strength.is_finite() {
        1.0 + decayed_strength.ln_1p() / 2.0
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventProfile {
    pub event_date: Option<NaiveDate>,
    pub event_type: String,
    pub strength: f64,
    pub decayed_strength: f64,
    pub boost: f64,
    pub level: Level,
}

impl Default for EventProfile {
    fn default() -> Self {
        Self {
            event_date: None,
            event_type: String::new(),
            strength: 0.0,
            decayed_strength: 0.0,
            boost: 1.0,
            level: Level::L1,
        }
    }
}

impl EventProfile {
    /// Pick the event with the largest `strength * exp(-ln2/half_life * age)`.
    /// Future events are ignored; near-ties go to the higher level.
    pub fn resolve(events: &[Event], asof: NaiveDate, half_life_days: f64) -> Self {
        let lambda = std::f64::consts::LN_2 / half_life_days.max(0.001);
        let mut best: Option<&Event> = None;
        let mut best_val = 0.0;
        for event in events {
            let age = (asof - event.date).num_days();
            if age < 0 {
                continue;
            }
            let decayed = event.strength * (-lambda * age as f64).exp();
            let better = match best {
                None => decayed > 0.0,
                Some(current) => {
                    decayed > best_val + TIE_EPS
                        || ((decayed - best_val).abs() <= TIE_EPS && event.level > current.level)
                }
            };
            if better {
                best_val = decayed;
                best = Some(event);
            }
        }
        match best {
            None => Self::default(),
            Some(event) => Self {
                event_date: Some(event.date),
                event_type: event.event_type.clone(),
                strength: event.strength,
                decayed_strength: best_val,
                boost: event_boost(best_val),
                level: event.level,
            },
        }
    }
}

/// Events grouped by series.
#[derive(Debug, Default, Clone)]
pub struct EventIndex {
    by_series: BTreeMap<String, Vec<Event>>,
}

impl EventIndex {
    pub fn new(events: Vec<Event>) -> Self {
        let mut by_series: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        for event in events {
            by_series.entry(event.series.clone()).or_default().push(event);
        }
        for list in by_series.values_mut() {
            list.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.domain.cmp(&b.domain)));
        }
        Self { by_series }
    }

    pub fn len(&self) -> usize {
        self.by_series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_series.is_empty()
    }

    pub fn profile(&self, series: &str, asof: NaiveDate, half_life_days: f64) -> EventProfile {
        self.by_series
            .get(series)
            .map(|events| EventProfile::resolve(events, asof, half_life_days))
            .unwrap_or_default()
    }
}
