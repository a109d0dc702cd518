//! Event kernel: which entities are driving each tag right now.
//!
//! Explanatory only. Nothing here feeds back into scores or the gate.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::analysis::stats::{sign_eps, TimeSeries};
use crate::config::PersistenceConfig;
use crate::detect::AnomalyRecord;
use crate::persistence::direction;

pub const KERNEL_VERSION: &str = "event_kernel_v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelEntry {
    pub tag: String,
    pub domain: String,
    /// Latest EWMA of the entity's `W` differences.
    pub kernel: f64,
    pub dir: String,
    pub streak: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagKernel {
    pub tag: String,
    pub top_domains: Vec<KernelEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventKernel {
    pub version: String,
    pub window: usize,
    pub latest_ts: String,
    pub tags: Vec<TagKernel>,
    /// Every tag's top entries, flattened in tag order.
    pub top_domains: Vec<KernelEntry>,
}

fn entry(tag: &str, domain: &str, w: &[f64], cfg: &PersistenceConfig) -> KernelEntry {
    let diffs = TimeSeries::new(w).diffs();
    let kernel = TimeSeries::new(&diffs).ewma(cfg.alpha).last().copied().unwrap_or(0.0);
    let sign = sign_eps(kernel, cfg.eps);
    let streak = if sign == 0 {
        0
    } else {
        diffs
            .iter()
            .rev()
            .take_while(|&&d| sign_eps(d, cfg.eps) == sign)
            .count()
    };
    KernelEntry {
        tag: tag.to_string(),
        domain: domain.to_string(),
        kernel,
        dir: direction(sign).to_string(),
        streak,
    }
}

/// Rank each tag's entities by `|kernel|` and keep the configured top K.
///
/// Only entities present at `latest_ts` are ranked, unless none are.
pub fn compute_event_kernel(records: &[AnomalyRecord], latest_ts: &str, cfg: &PersistenceConfig) -> EventKernel {
    let mut by_key: BTreeMap<(&str, &str), Vec<(&str, f64)>> = BTreeMap::new();
    let mut active: BTreeSet<(&str, &str)> = BTreeSet::new();
    for rec in records {
        let key = (rec.series.as_str(), rec.domain.as_str());
        by_key.entry(key).or_default().push((rec.ts.as_str(), rec.w));
        if rec.ts == latest_ts {
            active.insert(key);
        }
    }

    let mut per_tag: BTreeMap<&str, Vec<KernelEntry>> = BTreeMap::new();
    for (key, points) in by_key.iter_mut() {
        if !active.is_empty() && !active.contains(key) {
            continue;
        }
        points.sort_by(|a, b| a.0.cmp(b.0));
        let w: Vec<f64> = points.iter().map(|(_, w)| *w).collect();
        per_tag
            .entry(key.0)
            .or_default()
            .push(entry(key.0, key.1, &w, cfg));
    }

    let top_k = cfg.kernel.top_k_domains;
    let mut tags = Vec::new();
    let mut flat = Vec::new();
    for (tag, mut entries) in per_tag {
        entries.sort_by(|a, b| {
            b.kernel
                .abs()
                .total_cmp(&a.kernel.abs())
                .then_with(|| a.domain.cmp(&b.domain))
        });
        entries.truncate(top_k);
        flat.extend(entries.iter().cloned());
        tags.push(TagKernel {
            tag: tag.to_string(),
            top_domains: entries,
        });
    }

    EventKernel {
        version: KERNEL_VERSION.to_string(),
        window: cfg.window,
        latest_ts: latest_ts.to_string(),
        tags,
        top_domains: flat,
    }
}
