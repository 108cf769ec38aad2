//! SPF, DKIM and DMARC authenticity checks
//!
//! These checks inspect what a domain publishes rather than verifying a
//! delivery: SPF looks at the strictness of the published `all` qualifier,
//! DKIM only checks that a signature header exists and names the sender
//! domain, and DMARC looks at the requested policy mode. A check either
//! raises a [`Finding`] or stays silent.

use crate::config::{DetectorConfig, DnsConfig};
use crate::dns::{lookup_txt_with_policy, TxtOutcome, TxtResolver};
use crate::email::Email;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SPF_PREFIX: &str = "v=spf1";
const DMARC_PREFIX: &str = "v=DMARC1";
const DKIM_HEADER: &str = "DKIM-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Spf,
    Dkim,
    Dmarc,
}

impl Protocol {
    pub fn signal_name(self) -> &'static str {
        match self {
            Protocol::Spf => "spf_check",
            Protocol::Dkim => "dkim_check",
            Protocol::Dmarc => "dmarc_check",
        }
    }
}

/// A concern raised by one authenticity check. The weight is fixed per
/// protocol and does not depend on the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub protocol: Protocol,
    pub reason: String,
    pub weight: i32,
}

/// Strictness of the `all` mechanism in an SPF record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpfPolicy {
    HardFail,   // -all
    SoftFail,   // ~all
    Neutral,    // ?all
    Permissive, // +all or no all qualifier
}

impl SpfPolicy {
    /// First qualifier in `-all`, `~all`, `?all` order wins.
    pub fn classify(record: &str) -> Self {
        if record.contains("-all") {
            SpfPolicy::HardFail
        } else if record.contains("~all") {
            SpfPolicy::SoftFail
        } else if record.contains("?all") {
            SpfPolicy::Neutral
        } else {
            SpfPolicy::Permissive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmarcPolicy {
    Reject,
    Quarantine,
    Monitor,
    Unknown,
}

impl DmarcPolicy {
    pub fn classify(record: &str) -> Self {
        if record.contains("p=reject") {
            DmarcPolicy::Reject
        } else if record.contains("p=quarantine") {
            DmarcPolicy::Quarantine
        } else if record.contains("p=none") {
            DmarcPolicy::Monitor
        } else {
            DmarcPolicy::Unknown
        }
    }
}

/// First record carrying the given version prefix.
pub fn find_record<'a>(records: &'a [String], prefix: &str) -> Option<&'a str> {
    records
        .iter()
        .find(|record| record.starts_with(prefix))
        .map(String::as_str)
}

pub fn find_spf_record(records: &[String]) -> Option<&str> {
    find_record(records, SPF_PREFIX)
}

pub fn dmarc_name(domain: &str) -> String {
    format!("_dmarc.{domain}")
}

/// TXT answers the detector needs for one sender domain.
#[derive(Debug, Clone)]
pub struct DnsEvidence {
    pub domain_txt: TxtOutcome,
    pub dmarc_txt: TxtOutcome,
}

pub struct AuthenticityChecker {
    resolver: Arc<dyn TxtResolver>,
    dns: DnsConfig,
    spf_weight: i32,
    dkim_weight: i32,
    dmarc_weight: i32,
}

impl AuthenticityChecker {
    pub fn new(resolver: Arc<dyn TxtResolver>, config: &DetectorConfig) -> Self {
        Self {
            resolver,
            dns: config.dns.clone(),
            spf_weight: config.weights.spf_finding,
            dkim_weight: config.weights.dkim_finding,
            dmarc_weight: config.weights.dmarc_finding,
        }
    }

    /// Fetch the domain's TXT records and its `_dmarc` records concurrently.
    pub async fn gather(&self, domain: &str) -> DnsEvidence {
        let dmarc = dmarc_name(domain);
        let (domain_txt, dmarc_txt) = tokio::join!(
            lookup_txt_with_policy(self.resolver.as_ref(), domain, &self.dns),
            lookup_txt_with_policy(self.resolver.as_ref(), &dmarc, &self.dns),
        );
        DnsEvidence {
            domain_txt,
            dmarc_txt,
        }
    }

    pub async fn check_spf(&self, domain: &str) -> Option<Finding> {
        let outcome = lookup_txt_with_policy(self.resolver.as_ref(), domain, &self.dns).await;
        self.spf_finding(domain, &outcome)
    }

    pub async fn check_dmarc(&self, domain: &str) -> Option<Finding> {
        let outcome =
            lookup_txt_with_policy(self.resolver.as_ref(), &dmarc_name(domain), &self.dns).await;
        self.dmarc_finding(domain, &outcome)
    }

    /// Lookup failure is itself suspicious here, unlike in the `missing_spf`
    /// rule.
    pub fn spf_finding(&self, domain: &str, outcome: &TxtOutcome) -> Option<Finding> {
        let records = match outcome {
            Ok(records) => records,
            Err(e) => {
                log::debug!("SPF check for {domain}: {e}");
                return Some(self.finding(
                    Protocol::Spf,
                    format!("SPF lookup failed for domain {domain}"),
                ));
            }
        };

        let Some(record) = find_spf_record(records) else {
            return Some(self.finding(
                Protocol::Spf,
                format!("Domain {domain} doesn't have an SPF record"),
            ));
        };

        match SpfPolicy::classify(record) {
            SpfPolicy::HardFail | SpfPolicy::SoftFail => None,
            SpfPolicy::Neutral => Some(self.finding(
                Protocol::Spf,
                format!("Domain {domain} has a neutral SPF policy"),
            )),
            SpfPolicy::Permissive => Some(self.finding(
                Protocol::Spf,
                format!("Domain {domain} has a permissive SPF policy"),
            )),
        }
    }

    /// Presence and domain-binding only. The signature itself is never
    /// verified; containing the domain anywhere in the header counts as bound.
    pub fn check_dkim(&self, email: &Email, domain: &str) -> Option<Finding> {
        let Some(signature) = email.header_value(DKIM_HEADER) else {
            return Some(self.finding(
                Protocol::Dkim,
                "Email doesn't have a DKIM signature".to_string(),
            ));
        };

        if signature.contains(domain) {
            None
        } else {
            Some(self.finding(
                Protocol::Dkim,
                "DKIM signature domain doesn't match From domain".to_string(),
            ))
        }
    }

    pub fn dmarc_finding(&self, domain: &str, outcome: &TxtOutcome) -> Option<Finding> {
        let records = match outcome {
            Ok(records) => records,
            Err(e) => {
                log::debug!("DMARC check for {domain}: {e}");
                return Some(self.finding(
                    Protocol::Dmarc,
                    format!("DMARC lookup failed for domain {domain}"),
                ));
            }
        };

        let Some(record) = find_record(records, DMARC_PREFIX) else {
            return Some(self.finding(
                Protocol::Dmarc,
                format!("Domain {domain} doesn't have a DMARC record"),
            ));
        };

        match DmarcPolicy::classify(record) {
            DmarcPolicy::Reject | DmarcPolicy::Quarantine => None,
            DmarcPolicy::Monitor => Some(self.finding(
                Protocol::Dmarc,
                format!("Domain {domain} has a monitoring-only DMARC policy"),
            )),
            DmarcPolicy::Unknown => Some(self.finding(
                Protocol::Dmarc,
                format!("Domain {domain} has an unknown DMARC policy"),
            )),
        }
    }

    /// SPF, DKIM and DMARC findings, in that order, from pre-fetched DNS.
    pub fn evaluate(&self, email: &Email, domain: &str, evidence: &DnsEvidence) -> Vec<Finding> {
        [
            self.spf_finding(domain, &evidence.domain_txt),
            self.check_dkim(email, domain),
            self.dmarc_finding(domain, &evidence.dmarc_txt),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn finding(&self, protocol: Protocol, reason: String) -> Finding {
        let weight = match protocol {
            Protocol::Spf => self.spf_weight,
            Protocol::Dkim => self.dkim_weight,
            Protocol::Dmarc => self.dmarc_weight,
        };
        Finding {
            protocol,
            reason,
            weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{LookupError, StaticResolver};

    fn checker(resolver: StaticResolver) -> AuthenticityChecker {
        AuthenticityChecker::new(Arc::new(resolver), &DetectorConfig::default())
    }

    fn records(values: &[&str]) -> TxtOutcome {
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    fn failed() -> TxtOutcome {
        Err(LookupError::Failed {
            name: "example.com".to_string(),
            message: "SERVFAIL".to_string(),
        })
    }

    #[test]
    fn test_spf_qualifier_precedence() {
        assert_eq!(SpfPolicy::classify("v=spf1 ~all -all"), SpfPolicy::HardFail);
        assert_eq!(SpfPolicy::classify("v=spf1 mx ~all"), SpfPolicy::SoftFail);
        assert_eq!(SpfPolicy::classify("v=spf1 ?all"), SpfPolicy::Neutral);
        assert_eq!(SpfPolicy::classify("v=spf1 +all"), SpfPolicy::Permissive);
    }

    #[test]
    fn test_spf_findings() {
        let c = checker(StaticResolver::new());

        assert_eq!(c.spf_finding("example.com", &records(&["v=spf1 ~all -all"])), None);
        assert_eq!(c.spf_finding("example.com", &records(&["v=spf1 include:x ~all"])), None);

        let neutral = c.spf_finding("example.com", &records(&["v=spf1 ?all"])).unwrap();
        assert_eq!(neutral.reason, "Domain example.com has a neutral SPF policy");
        assert_eq!(neutral.weight, 3);

        let permissive = c.spf_finding("example.com", &records(&["v=spf1 +all"])).unwrap();
        assert_eq!(permissive.reason, "Domain example.com has a permissive SPF policy");

        let missing = c
            .spf_finding("example.com", &records(&["google-site-verification=abc"]))
            .unwrap();
        assert_eq!(missing.reason, "Domain example.com doesn't have an SPF record");
    }

    #[test]
    fn test_spf_record_must_start_with_version() {
        let c = checker(StaticResolver::new());
        let finding = c
            .spf_finding("example.com", &records(&["note: v=spf1 -all"]))
            .unwrap();
        assert!(finding.reason.contains("doesn't have an SPF record"));
    }

    #[test]
    fn test_spf_lookup_failure_is_a_single_finding() {
        let c = checker(StaticResolver::new());
        let finding = c.spf_finding("example.com", &failed()).unwrap();

        assert_eq!(finding.protocol, Protocol::Spf);
        assert_eq!(finding.reason, "SPF lookup failed for domain example.com");
        assert_eq!(finding.weight, 3);
    }

    #[test]
    fn test_dkim_presence_and_binding() {
        let c = checker(StaticResolver::new());

        let unsigned = Email::new();
        assert_eq!(
            c.check_dkim(&unsigned, "example.com").unwrap().reason,
            "Email doesn't have a DKIM signature"
        );

        let foreign = Email::new().with_header("DKIM-Signature", "v=1; d=other.net; s=sel");
        assert_eq!(
            c.check_dkim(&foreign, "example.com").unwrap().reason,
            "DKIM signature domain doesn't match From domain"
        );

        let bound = Email::new().with_header("DKIM-Signature", "v=1; d=example.com; s=sel");
        assert_eq!(c.check_dkim(&bound, "example.com"), None);
    }

    #[test]
    fn test_dmarc_findings() {
        let c = checker(StaticResolver::new());

        assert_eq!(c.dmarc_finding("example.com", &records(&["v=DMARC1; p=reject"])), None);
        assert_eq!(c.dmarc_finding("example.com", &records(&["v=DMARC1; p=quarantine"])), None);

        let monitor = c
            .dmarc_finding("example.com", &records(&["v=DMARC1; p=none"]))
            .unwrap();
        assert_eq!(monitor.reason, "Domain example.com has a monitoring-only DMARC policy");
        assert_eq!(monitor.weight, 2);

        let unknown = c
            .dmarc_finding("example.com", &records(&["v=DMARC1; rua=mailto:x@example.com"]))
            .unwrap();
        assert_eq!(unknown.reason, "Domain example.com has an unknown DMARC policy");

        let missing = c.dmarc_finding("example.com", &records(&[])).unwrap();
        assert_eq!(missing.reason, "Domain example.com doesn't have a DMARC record");

        let failed = c.dmarc_finding("example.com", &failed()).unwrap();
        assert_eq!(failed.reason, "DMARC lookup failed for domain example.com");
        assert_eq!(failed.weight, 2);
    }

    #[tokio::test]
    async fn test_standalone_checks_query_expected_names() {
        let c = checker(
            StaticResolver::new()
                .with_records("example.com", &["v=spf1 -all"])
                .with_records("_dmarc.example.com", &["v=DMARC1; p=none"]),
        );

        assert_eq!(c.check_spf("example.com").await, None);
        let dmarc = c.check_dmarc("example.com").await.unwrap();
        assert_eq!(dmarc.protocol, Protocol::Dmarc);
    }

    #[tokio::test]
    async fn test_gather_and_evaluate_order() {
        let c = checker(StaticResolver::new().with_error("_dmarc.example.com", "SERVFAIL"));
        let email = Email::new();

        let evidence = c.gather("example.com").await;
        let findings = c.evaluate(&email, "example.com", &evidence);

        let protocols: Vec<Protocol> = findings.iter().map(|f| f.protocol).collect();
        assert_eq!(protocols, vec![Protocol::Spf, Protocol::Dkim, Protocol::Dmarc]);
        assert_eq!(findings.iter().map(|f| f.weight).sum::<i32>(), 8);
    }
}
