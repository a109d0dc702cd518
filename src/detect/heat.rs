//! Heat: log-compressed volume plus hint and signal bonuses.

use crate::config::{Level, SignalDictionary, SignalRule};
use crate::ingest::Snapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct HeatScore {
    pub heat: f64,
    /// Highest matched level, L1 when nothing matched.
    pub level: Level,
    pub matched: Vec<String>,
}

/// Rules whose tokens occur (case-insensitively) in `text`, or whose patterns
/// match it, in dictionary order. Patterns need `SignalDictionary::compile`.
pub fn match_signals<'a>(dict: &'a SignalDictionary, text: &str) -> Vec<&'a SignalRule> {
    if text.is_empty() {
        return Vec::new();
    }
    let lowered = text.to_lowercase();
    dict.signals
        .iter()
        .filter(|rule| rule.matches(text, &lowered))
        .collect()
}

/// `heat = log10(1+requests) + hint_bonus + sum(weights) * level_weight(max level)`.
pub fn score_heat(snapshot: &Snapshot, dict: &SignalDictionary) -> HeatScore {
    let matched = match_signals(dict, &snapshot.notes);
    let level = matched.iter().map(|r| r.level).max().unwrap_or_default();
    let signal_sum: f64 = matched.iter().map(|r| r.weight).sum();

    let heat = (1.0 + snapshot.requests as f64).log10()
        + dict.hint_bonus(&snapshot.signal_hint)
        + signal_sum * dict.levels.weight(level);

    HeatScore {
        heat,
        level,
        matched: matched.iter().map(|r| r.id.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeriesRegistry;
    use crate::ingest::normalize_row;

    fn dict() -> SignalDictionary {
        serde_json::from_str(
            r#"{
              "version": "signals_v1",
              "levels": { "L1": {"weight": 1.0}, "L2": {"weight": 1.5}, "L3": {"weight": 2.0} },
              "signals": [
                { "id": "wp_login", "level": "L2", "weight": 0.4, "match_any": ["/WP-LOGIN"] },
                { "id": "env_leak", "level": "L3", "weight": 0.6, "match_any": ["/.env"] }
              ],
              "hint_weights": { "spike": 0.3, "other": 0.0 }
            }"#,
        )
        .unwrap()
    }

    fn snap(req: u64, hint: &str, notes: &str) -> Snapshot {
        let row = serde_json::json!({
            "ts": "2025-01-01T00:00:00Z", "domain": "a.ai", "series": "s",
            "request_count": req, "signal_hint": hint, "notes": notes
        });
        normalize_row(row.as_object().unwrap(), &SeriesRegistry::default())
    }

    #[test]
    fn test_volume_only() {
        let h = score_heat(&snap(99, "flat", ""), &dict());
        assert!((h.heat - 2.0).abs() < 1e-12);
        assert_eq!(h.level, Level::L1);
        assert!(h.matched.is_empty());
    }

    #[test]
    fn test_signals_weighted_by_highest_level() {
        let h = score_heat(&snap(9, "spike", "GET /wp-login.php then /.env"), &dict());
        // 1 + 0.3 + (0.4 + 0.6) * 2.0
        assert!((h.heat - 3.3).abs() < 1e-12);
        assert_eq!(h.level, Level::L3);
        assert_eq!(h.matched, vec!["wp_login", "env_leak"]);
    }

    fn regex_dict() -> SignalDictionary {
        let mut dict: SignalDictionary = serde_json::from_str(
            r#"{
              "version": "signals_v1",
              "levels": { "L1": {"weight": 1.0}, "L2": {"weight": 1.5}, "L3": {"weight": 2.0} },
              "signals": [
                { "id": "cgi_shell", "level": "L3", "weight": 0.5, "match_regex": ["cgi-bin/[a-z]+\\.sh"] },
                { "id": "scan", "level": "L2", "weight": 0.2, "match_any": ["scan"] }
              ]
            }"#,
        )
        .unwrap();
        dict.compile().unwrap();
        dict
    }

    #[test]
    fn test_regex_rule_matches() {
        let h = score_heat(&snap(9, "other", "POST /cgi-bin/run.sh"), &regex_dict());
        assert_eq!(h.matched, vec!["cgi_shell"]);
        assert_eq!(h.level, Level::L3);
        // 1 + 0.5 * 2.0
        assert!((h.heat - 2.0).abs() < 1e-12);
        assert!(match_signals(&regex_dict(), "POST /cgi-bin/.sh").is_empty());
    }

    #[test]
    fn test_regex_rule_ignores_case() {
        let dict = regex_dict();
        let matched = match_signals(&dict, "SCAN then /CGI-BIN/Run.SH");
        let ids: Vec<&str> = matched.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["cgi_shell", "scan"]);
    }
}
