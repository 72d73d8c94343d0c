//! Budget policy and token revocation maps.
//!
//! Both tables are configuration data edited in source: operators change a
//! user's daily spend window by editing [`BudgetPolicy::builtin`], and revoke
//! outstanding tokens for a user by changing their entry in [`salt_map`].

use std::collections::HashMap;

use serde::Serialize;

/// Spending allowance for one principal: `limit_usd` dollars over a rolling
/// window of `days` UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetRule {
    pub limit_usd: f64,
    pub days: u32,
}

/// Ordered budget lookup: exact email, then `@domain`, then `*`.
///
/// An email matching none of the entries gets the implicit
/// `{limit: 0, days: 1}` rule, which blocks every metered request.
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    rules: HashMap<String, BudgetRule>,
}

impl BudgetPolicy {
    /// The deployed policy table. Edit entries here.
    pub fn builtin() -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            "*".to_string(),
            BudgetRule {
                limit_usd: 0.10,
                days: 7,
            },
        );
        rules.insert(
            "@example.com".to_string(),
            BudgetRule {
                limit_usd: 1.00,
                days: 7,
            },
        );
        Self { rules }
    }

    /// Build a policy from an explicit rule table.
    pub fn with_rules(rules: HashMap<String, BudgetRule>) -> Self {
        Self { rules }
    }

    /// Resolve the rule for an email: exact match, `@domain`, `*`, then the
    /// implicit zero rule.
    pub fn lookup(&self, email: &str) -> BudgetRule {
        if let Some(rule) = self.rules.get(email) {
            return *rule;
        }
        if let Some(at) = email.find('@') {
            if let Some(rule) = self.rules.get(&email[at..]) {
                return *rule;
            }
        }
        if let Some(rule) = self.rules.get("*") {
            return *rule;
        }
        BudgetRule {
            limit_usd: 0.0,
            days: 1,
        }
    }
}

/// Per-email token salts. An entry here invalidates every token minted
/// without (or with a different) salt for that email; rotating the value
/// revokes again. Edit entries here.
pub fn salt_map() -> HashMap<String, String> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BudgetPolicy {
        let mut rules = HashMap::new();
        rules.insert(
            "alice@example.com".to_string(),
            BudgetRule {
                limit_usd: 5.0,
                days: 30,
            },
        );
        rules.insert(
            "@example.com".to_string(),
            BudgetRule {
                limit_usd: 1.0,
                days: 7,
            },
        );
        rules.insert(
            "*".to_string(),
            BudgetRule {
                limit_usd: 0.1,
                days: 1,
            },
        );
        BudgetPolicy::with_rules(rules)
    }

    #[test]
    fn test_exact_match_wins() {
        let rule = policy().lookup("alice@example.com");
        assert_eq!(rule.limit_usd, 5.0);
        assert_eq!(rule.days, 30);
    }

    #[test]
    fn test_domain_fallback() {
        let rule = policy().lookup("bob@example.com");
        assert_eq!(rule.limit_usd, 1.0);
        assert_eq!(rule.days, 7);
    }

    #[test]
    fn test_wildcard_fallback() {
        let rule = policy().lookup("eve@other.org");
        assert_eq!(rule.limit_usd, 0.1);
        assert_eq!(rule.days, 1);
    }

    #[test]
    fn test_implicit_zero_rule() {
        let policy = BudgetPolicy::with_rules(HashMap::new());
        let rule = policy.lookup("anyone@anywhere.net");
        assert_eq!(rule.limit_usd, 0.0);
        assert_eq!(rule.days, 1);
    }
}
