use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Upper bound on `dns.retries`.
pub const MAX_DNS_RETRIES: u32 = 10;

/// Detector policy: weights, verdict threshold, heuristic tables and DNS
/// behaviour. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub threshold: i32,
    pub weights: WeightConfig,
    pub heuristics: HeuristicTables,
    pub dns: DnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub from_reply_to_mismatch: i32,
    pub from_return_path_mismatch: i32,
    pub missing_spf: i32,
    pub suspicious_from_domain: i32,
    pub multiple_from_headers: i32,
    pub suspicious_received_chain: i32,
    pub spf_finding: i32,
    pub dkim_finding: i32,
    pub dmarc_finding: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicTables {
    /// Domains commonly impersonated by lookalikes, checked in order.
    pub reference_domains: Vec<String>,
    /// Lower-case substrings that make a Received header suspicious.
    pub received_patterns: Vec<String>,
    pub lookalike: LookalikePatterns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookalikePatterns {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    pub substitutions: Vec<Substitution>,
}

/// Replace the first occurrence of `from` with `to` (e.g. "m" -> "rn").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            weights: WeightConfig::default(),
            heuristics: HeuristicTables::default(),
            dns: DnsConfig::default(),
        }
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            from_reply_to_mismatch: 3,
            from_return_path_mismatch: 3,
            missing_spf: 2,
            suspicious_from_domain: 4,
            multiple_from_headers: 5,
            suspicious_received_chain: 2,
            spf_finding: 3,
            dkim_finding: 3,
            dmarc_finding: 2,
        }
    }
}

impl Default for HeuristicTables {
    fn default() -> Self {
        Self {
            reference_domains: [
                "gmail.com",
                "yahoo.com",
                "outlook.com",
                "hotmail.com",
                "microsoft.com",
                "apple.com",
                "amazon.com",
                "facebook.com",
                "paypal.com",
                "wellsfargo.com",
                "bankofamerica.com",
                "chase.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            received_patterns: [
                "unknown",
                "localhost",
                "127.0.0.1",
                "192.168.",
                "10.0.",
                "172.16.",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            lookalike: LookalikePatterns::default(),
        }
    }
}

impl Default for LookalikePatterns {
    fn default() -> Self {
        Self {
            prefixes: vec!["mail-".to_string()],
            suffixes: vec!["-secure".to_string()],
            substitutions: vec![Substitution {
                from: "m".to_string(),
                to: "rn".to_string(),
            }],
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            retries: 2,
        }
    }
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts per lookup, including the first.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl WeightConfig {
    fn named(&self) -> [(&'static str, i32); 9] {
        [
            ("from_reply_to_mismatch", self.from_reply_to_mismatch),
            ("from_return_path_mismatch", self.from_return_path_mismatch),
            ("missing_spf", self.missing_spf),
            ("suspicious_from_domain", self.suspicious_from_domain),
            ("multiple_from_headers", self.multiple_from_headers),
            ("suspicious_received_chain", self.suspicious_received_chain),
            ("spf_finding", self.spf_finding),
            ("dkim_finding", self.dkim_finding),
            ("dmarc_finding", self.dmarc_finding),
        ]
    }
}

impl DetectorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("cannot read config {}: {}", path.display(), e))?;
        let config: DetectorConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded detector config from {}", path.display());
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject policies the detector cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.threshold <= 0 {
            bail!("threshold must be positive, got {}", self.threshold);
        }
        for (name, weight) in self.weights.named() {
            if weight <= 0 {
                bail!("weight {name} must be positive, got {weight}");
            }
        }
        if self.dns.timeout_ms == 0 {
            bail!("dns.timeout_ms must be positive");
        }
        if self.dns.retries > MAX_DNS_RETRIES {
            bail!(
                "dns.retries must be at most {MAX_DNS_RETRIES}, got {}",
                self.dns.retries
            );
        }

        let mut seen = HashSet::new();
        for domain in &self.heuristics.reference_domains {
            if domain.is_empty() {
                bail!("reference domain list contains an empty entry");
            }
            if !seen.insert(domain.as_str()) {
                bail!("reference domain {domain} listed twice");
            }
        }
        for pattern in &self.heuristics.received_patterns {
            if pattern.is_empty() {
                bail!("received pattern list contains an empty entry");
            }
            if pattern.chars().any(char::is_uppercase) {
                bail!("received pattern {pattern} must be lower-case");
            }
        }
        if self
            .heuristics
            .lookalike
            .substitutions
            .iter()
            .any(|s| s.from.is_empty())
        {
            bail!("lookalike substitution with empty source pattern");
        }
        Ok(())
    }
}
