use crate::authenticity::{AuthenticityChecker, DnsEvidence};
use crate::config::DetectorConfig;
use crate::dns::{SystemResolver, TxtResolver};
use crate::domain_utils::DomainUtils;
use crate::email::{AnalysisResult, Email};
use crate::rules::{RuleInput, RuleSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis cancelled before DNS lookups completed")]
    Cancelled,
}

/// Scores a message for sender spoofing.
///
/// Immutable after construction, so one detector can serve concurrent
/// analyses without locking.
pub struct SpoofDetector {
    config: DetectorConfig,
    rules: RuleSet,
    checker: AuthenticityChecker,
}

impl SpoofDetector {
    /// Default policy against the system resolver.
    pub fn new() -> Self {
        let config = DetectorConfig::default();
        let rules = RuleSet::default();
        let checker = AuthenticityChecker::new(Arc::new(SystemResolver::new()), &config);
        Self {
            config,
            rules,
            checker,
        }
    }

    pub fn with_config(
        config: DetectorConfig,
        resolver: Arc<dyn TxtResolver>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let rules = RuleSet::builtin(&config)?;
        Self::with_rules(config, rules, resolver)
    }

    /// Use a custom rule set in place of the built-in rules.
    pub fn with_rules(
        config: DetectorConfig,
        rules: RuleSet,
        resolver: Arc<dyn TxtResolver>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let checker = AuthenticityChecker::new(resolver, &config);
        Ok(Self {
            config,
            rules,
            checker,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Always returns a verdict; DNS failures become findings.
    pub async fn analyze(&self, email: &Email) -> AnalysisResult {
        let domain = DomainUtils::domain_of(email.from.as_deref());
        let evidence = match domain {
            Some(domain) => Some(self.checker.gather(domain).await),
            None => None,
        };
        self.score(email, domain, evidence.as_ref())
    }

    /// Like [`analyze`](Self::analyze) but gives up once `token` is
    /// cancelled while lookups are still in flight.
    pub async fn analyze_with_cancel(
        &self,
        email: &Email,
        token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        if token.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        tokio::select! {
            result = self.analyze(email) => Ok(result),
            _ = token.cancelled() => {
                log::warn!("Analysis of message {:?} cancelled", email.message_id);
                Err(AnalysisError::Cancelled)
            }
        }
    }

    fn score(
        &self,
        email: &Email,
        domain: Option<&str>,
        evidence: Option<&DnsEvidence>,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::default();

        let input = RuleInput {
            email,
            heuristics: &self.config.heuristics,
            from_txt: evidence.map(|e| &e.domain_txt),
        };
        for rule in self.rules.iter() {
            if let Some(reason) = rule.evaluate(&input) {
                log::debug!("Rule {} triggered (+{}): {reason}", rule.name, rule.weight);
                result.record(rule.name, rule.weight, reason);
            }
        }

        if let (Some(domain), Some(evidence)) = (domain, evidence) {
            for finding in self.checker.evaluate(email, domain, evidence) {
                log::debug!(
                    "{:?} finding (+{}): {}",
                    finding.protocol,
                    finding.weight,
                    finding.reason
                );
                result.record(finding.protocol.signal_name(), finding.weight, finding.reason);
            }
        }

        result.is_spoofed = result.score >= self.config.threshold;
        log::info!(
            "Message {:?}: score {} (threshold {}), spoofed: {}",
            email.message_id,
            result.score,
            self.config.threshold,
            result.is_spoofed
        );
        result
    }
}

impl Default for SpoofDetector {
    fn default() -> Self {
        Self::new()
    }
}
