//! Plan and Cost Resolution
//!
//! Pure functions mapping requests onto plan economics: endpoint cost
//! multipliers, unlimited-plan checks, and plan lookup.

use crate::model::{EndpointCost, Plan};

/// Resolve the cost multiplier for a request.
///
/// Rules are evaluated in the order given and the first match wins: a
/// general pattern listed before a specific one shadows it, so operators
/// must order specific rules first. No match resolves to 1.0.
pub fn cost_multiplier(rules: &[EndpointCost], method: &str, path: &str) -> f64 {
    for rule in rules {
        if !rule.method.is_empty() && rule.method != method {
            continue;
        }
        if path_matches(&rule.path, path) {
            return rule.cost_multiplier;
        }
    }
    1.0
}

/// Whether a rule path matches a request path: exact equality, or a
/// `/prefix/*` rule matching `prefix` itself and anything under it.
fn path_matches(rule_path: &str, path: &str) -> bool {
    if rule_path == path {
        return true;
    }
    if let Some(prefix) = rule_path.strip_suffix("/*") {
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }
    false
}

/// Whether a plan has no monthly request cap
pub fn is_unlimited(plan: &Plan) -> bool {
    plan.requests_per_month < 0
}

/// Linear scan for a plan by id
pub fn find_plan<'a>(plans: &'a [Plan], id: &str) -> Option<&'a Plan> {
    plans.iter().find(|plan| plan.id == id)
}

// ============================================================================
// Presets
// ============================================================================

/// Common plan presets
pub struct PlanPresets;

impl PlanPresets {
    /// Free tier: 10 req/min, 1000 req/month
    pub fn free() -> Plan {
        Plan {
            id: "free".to_string(),
            name: "Free".to_string(),
            rate_limit_per_minute: 10,
            requests_per_month: 1_000,
            price_monthly: 0,
            overage_price: 0.0,
            endpoints: Vec::new(),
        }
    }

    /// Pro tier: 120 req/min, 100k req/month
    pub fn pro() -> Plan {
        Plan {
            id: "pro".to_string(),
            name: "Pro".to_string(),
            rate_limit_per_minute: 120,
            requests_per_month: 100_000,
            price_monthly: 4_900,
            overage_price: 0.002,
            endpoints: Vec::new(),
        }
    }

    /// Enterprise tier: 1000 req/min, unlimited requests
    pub fn enterprise() -> Plan {
        Plan {
            id: "enterprise".to_string(),
            name: "Enterprise".to_string(),
            rate_limit_per_minute: 1_000,
            requests_per_month: -1,
            price_monthly: 49_900,
            overage_price: 0.0,
            endpoints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(path: &str, method: &str, multiplier: f64) -> EndpointCost {
        EndpointCost {
            path: path.into(),
            method: method.into(),
            cost_multiplier: multiplier,
        }
    }

    #[test]
    fn test_exact_match() {
        let rules = vec![rule("/api/v1/heavy", "", 10.0)];
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1/heavy"), 10.0);
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1/light"), 1.0);
    }

    #[test]
    fn test_prefix_match() {
        let rules = vec![rule("/api/v1/*", "", 2.0)];
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1"), 2.0);
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1/users"), 2.0);
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v2/users"), 1.0);
    }

    #[test]
    fn test_method_filter_is_case_sensitive() {
        let rules = vec![rule("/api/v1/export", "POST", 5.0)];
        assert_eq!(cost_multiplier(&rules, "POST", "/api/v1/export"), 5.0);
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1/export"), 1.0);
        assert_eq!(cost_multiplier(&rules, "post", "/api/v1/export"), 1.0);
    }

    #[test]
    fn test_first_match_wins_shadows_specific_rules() {
        // The general pattern listed first shadows the specific override:
        // operators must order specific rules first.
        let rules = vec![
            rule("/api/v1/*", "", 2.0),
            rule("/api/v1/heavy", "", 10.0),
        ];
        assert_eq!(cost_multiplier(&rules, "GET", "/api/v1/heavy"), 2.0);

        let reordered = vec![
            rule("/api/v1/heavy", "", 10.0),
            rule("/api/v1/*", "", 2.0),
        ];
        assert_eq!(cost_multiplier(&reordered, "GET", "/api/v1/heavy"), 10.0);
    }

    #[test]
    fn test_no_rules_resolves_to_one() {
        assert_eq!(cost_multiplier(&[], "GET", "/anything"), 1.0);
    }

    #[test]
    fn test_is_unlimited() {
        assert!(is_unlimited(&PlanPresets::enterprise()));
        assert!(!is_unlimited(&PlanPresets::free()));
    }

    #[test]
    fn test_find_plan() {
        let plans = vec![PlanPresets::free(), PlanPresets::pro()];
        assert_eq!(find_plan(&plans, "pro").map(|p| p.name.as_str()), Some("Pro"));
        assert!(find_plan(&plans, "enterprise").is_none());
    }
}
