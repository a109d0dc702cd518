//! Geo amplification: a capped, sample-gated country compatibility factor.

use std::collections::BTreeMap;

use serde_json::json;

use crate::chain::SeriesProjection;
use crate::config::GeoProfile;
use crate::ingest::Snapshot;

/// Unmatched countries listed in the explain document.
const UNMATCHED_SHOWN: usize = 8;

/// Summed `top_countries` per `(ts, series)`.
#[derive(Debug, Default, Clone)]
pub struct CountryTotals {
    totals: BTreeMap<(String, String), BTreeMap<String, f64>>,
}

impl CountryTotals {
    pub fn from_snapshots(snapshots: &[Snapshot]) -> Self {
        let mut totals: BTreeMap<(String, String), BTreeMap<String, f64>> = BTreeMap::new();
        for snap in snapshots {
            let entry = totals
                .entry((snap.ts.clone(), snap.series.clone()))
                .or_default();
            for (country, count) in &snap.top_countries {
                *entry.entry(country.to_uppercase()).or_insert(0.0) += count.max(0.0);
            }
        }
        Self { totals }
    }

    pub fn get(&self, ts: &str, series: &str) -> Option<&BTreeMap<String, f64>> {
        self.totals.get(&(ts.to_string(), series.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoFactor {
    pub factor: f64,
    pub explain: serde_json::Value,
}

/// `raw / (raw + alpha)` with `raw = sum(min(share, cap) * weight)`, or zero
/// when the profile is disabled or the sample is too small.
pub fn geo_factor(counts: &BTreeMap<String, f64>, profile_name: &str, profile: &GeoProfile) -> GeoFactor {
    let total_counts: f64 = counts.values().sum();
    let total = total_counts.max(1.0);

    let mut ranked: Vec<(&String, f64)> = counts.iter().map(|(c, n)| (c, *n)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut raw = 0.0;
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for (country, count) in ranked {
        let share = count / total;
        match profile.weights.get(country) {
            Some(&weight) => {
                let capped = share.min(profile.cap_share);
                let contribution = capped * weight;
                raw += contribution;
                matched.push(json!({
                    "country": country,
                    "count": count,
                    "share": share,
                    "share_capped": capped,
                    "weight": weight,
                    "contribution": contribution,
                }));
            }
            None => unmatched.push(json!({ "country": country, "count": count, "share": share })),
        }
    }
    unmatched.truncate(UNMATCHED_SHOWN);

    let (factor, passed, reason) = if !profile.enabled {
        (0.0, false, "profile_disabled")
    } else if total_counts < profile.min_total {
        (0.0, false, "insufficient_samples")
    } else {
        (raw / (raw + profile.alpha), true, "ok")
    };

    GeoFactor {
        factor,
        explain: json!({
            "version": "geo_explain_v1",
            "profile": profile_name,
            "total": total_counts,
            "min_total": profile.min_total,
            "cap_share": profile.cap_share,
            "alpha": profile.alpha,
            "raw": raw,
            "geo_factor": factor,
            "gate": { "passed": passed, "reason": reason },
            "matched": matched,
            "unmatched_top": unmatched,
        }),
    }
}

/// `boosted * (1 + geo_factor)`.
pub fn tw_rank(boosted: f64, geo_factor: f64) -> f64 {
    boosted * (1.0 + geo_factor)
}

/// Fill the geo fields of every projection from the country totals at its
/// `(ts, series)`. Series without country data get a zero factor.
pub fn apply(
    projections: &mut [SeriesProjection],
    totals: &CountryTotals,
    profile_name: &str,
    profile: &GeoProfile,
) {
    let empty = BTreeMap::new();
    for p in projections.iter_mut() {
        let counts = totals.get(&p.ts, &p.series).unwrap_or(&empty);
        let geo = geo_factor(counts, profile_name, profile);
        p.geo_factor = geo.factor;
        p.tw_rank_score = tw_rank(p.boosted_push, geo.factor);
        p.geo_explain = geo.explain;
    }
}
