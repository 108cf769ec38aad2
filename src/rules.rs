use crate::config::{DetectorConfig, HeuristicTables};
use crate::dns::TxtOutcome;
use crate::domain_utils::DomainUtils;
use crate::email::Email;
use anyhow::bail;
use std::collections::HashSet;

/// Everything a structural rule may look at.
pub struct RuleInput<'a> {
    pub email: &'a Email,
    pub heuristics: &'a HeuristicTables,
    /// TXT lookup of the From domain; `None` when no lookup was made.
    pub from_txt: Option<&'a TxtOutcome>,
}

impl<'a> RuleInput<'a> {
    pub fn from_domain(&self) -> Option<&'a str> {
        DomainUtils::domain_of(self.email.from.as_deref())
    }
}

/// Returns the reason when the rule triggers.
pub type RuleCheck = fn(&RuleInput<'_>) -> Option<String>;

#[derive(Clone)]
pub struct Rule {
    pub name: &'static str,
    pub description: &'static str,
    pub weight: i32,
    pub check: RuleCheck,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish()
    }
}

impl Rule {
    pub fn evaluate(&self, input: &RuleInput<'_>) -> Option<String> {
        (self.check)(input)
    }
}

/// Ordered, validated collection of structural rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Rejects duplicate names and non-positive weights.
    pub fn from_rules(rules: Vec<Rule>) -> anyhow::Result<Self> {
        let mut names = HashSet::new();
        for rule in &rules {
            if rule.weight <= 0 {
                bail!("rule {} has non-positive weight {}", rule.name, rule.weight);
            }
            if !names.insert(rule.name) {
                bail!("rule {} registered twice", rule.name);
            }
        }
        Ok(Self { rules })
    }

    /// The six built-in rules in registration order, weighted from `config`.
    pub fn builtin(config: &DetectorConfig) -> anyhow::Result<Self> {
        Self::from_rules(builtin_rules(config))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleSet {
    /// Built-in rules with the default weights, which are all positive.
    fn default() -> Self {
        Self {
            rules: builtin_rules(&DetectorConfig::default()),
        }
    }
}

fn builtin_rules(config: &DetectorConfig) -> Vec<Rule> {
    let w = &config.weights;
    vec![
        Rule {
            name: "inconsistent_from_reply_to",
            description: "From and Reply-To domains don't match",
            weight: w.from_reply_to_mismatch,
            check: check_from_reply_to_mismatch,
        },
        Rule {
            name: "inconsistent_from_return_path",
            description: "From and Return-Path domains don't match",
            weight: w.from_return_path_mismatch,
            check: check_from_return_path_mismatch,
        },
        Rule {
            name: "missing_spf",
            description: "Domain doesn't have SPF record",
            weight: w.missing_spf,
            check: check_missing_spf,
        },
        Rule {
            name: "suspicious_from_domain",
            description: "From domain is suspicious (lookalike domain)",
            weight: w.suspicious_from_domain,
            check: check_suspicious_from_domain,
        },
        Rule {
            name: "multiple_from_headers",
            description: "Email contains multiple From headers",
            weight: w.multiple_from_headers,
            check: check_multiple_from_headers,
        },
        Rule {
            name: "suspicious_received_chain",
            description: "Suspicious Received headers chain",
            weight: w.suspicious_received_chain,
            check: check_suspicious_received_chain,
        },
    ]
}

fn check_from_reply_to_mismatch(input: &RuleInput<'_>) -> Option<String> {
    let from_domain = input.from_domain()?;
    let reply_to_domain = DomainUtils::domain_of(input.email.reply_to.as_deref())?;

    (from_domain != reply_to_domain).then(|| {
        format!("From domain ({from_domain}) doesn't match Reply-To domain ({reply_to_domain})")
    })
}

fn check_from_return_path_mismatch(input: &RuleInput<'_>) -> Option<String> {
    let from_domain = input.from_domain()?;
    let return_path = input.email.return_path.as_deref()?;

    let parts: Vec<&str> = return_path.split('@').collect();
    if parts.len() != 2 {
        return None;
    }
    let return_path_domain = parts[1];

    (!return_path_domain.is_empty() && from_domain != return_path_domain).then(|| {
        format!(
            "From domain ({from_domain}) doesn't match Return-Path domain ({return_path_domain})"
        )
    })
}

/// Fail-open: an unanswered lookup never triggers this rule.
fn check_missing_spf(input: &RuleInput<'_>) -> Option<String> {
    let from_domain = input.from_domain()?;
    let records = match input.from_txt? {
        Ok(records) => records,
        Err(e) => {
            log::debug!("missing_spf skipped for {from_domain}: {e}");
            return None;
        }
    };

    if crate::authenticity::find_spf_record(records).is_some() {
        return None;
    }
    Some(format!("Domain {from_domain} doesn't have an SPF record"))
}

fn check_suspicious_from_domain(input: &RuleInput<'_>) -> Option<String> {
    let from_domain = input.from_domain()?;
    let patterns = &input.heuristics.lookalike;

    input
        .heuristics
        .reference_domains
        .iter()
        .find(|reference| DomainUtils::is_lookalike_with(from_domain, reference, patterns))
        .map(|reference| format!("From domain ({from_domain}) looks similar to {reference}"))
}

fn check_multiple_from_headers(input: &RuleInput<'_>) -> Option<String> {
    (input.email.header_values("From").len() > 1)
        .then(|| "Email contains multiple From headers".to_string())
}

fn check_suspicious_received_chain(input: &RuleInput<'_>) -> Option<String> {
    let received = input.email.header_values("Received");
    if received.is_empty() {
        return Some("Email doesn't have any Received headers".to_string());
    }

    for header in received {
        let header = header.to_lowercase();
        if let Some(pattern) = input
            .heuristics
            .received_patterns
            .iter()
            .find(|pattern| header.contains(pattern.as_str()))
        {
            return Some(format!(
                "Suspicious pattern found in Received headers: {pattern}"
            ));
        }
    }
    None
}
