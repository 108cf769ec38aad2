//! DNS TXT resolution used by the authenticity checks.
//!
//! The detector only ever needs TXT records, so resolution sits behind the
//! small [`TxtResolver`] trait. [`SystemResolver`] talks to the network
//! through hickory; [`StaticResolver`] answers from an in-memory table for
//! tests and offline runs. [`lookup_txt_with_policy`] wraps any resolver with
//! a per-attempt timeout and a bounded number of retries.

use crate::config::DnsConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Source of TXT records for a DNS name.
///
/// An existing name without TXT records answers `Ok` with an empty list;
/// `Err` covers names that do not exist and failures where the answer is
/// unknown.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> anyhow::Result<Vec<String>>;
}

/// Lookup failure after the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("TXT lookup for {name} timed out after {attempts} attempt(s)")]
    TimedOut { name: String, attempts: u32 },
    #[error("TXT lookup for {name} failed: {message}")]
    Failed { name: String, message: String },
}

/// Result of one policy-wrapped TXT lookup.
pub type TxtOutcome = Result<Vec<String>, LookupError>;

/// Run `resolver.lookup_txt(name)` with a timeout per attempt, retrying up to
/// `config.retries` more times. A timeout counts as a failed attempt.
pub async fn lookup_txt_with_policy(
    resolver: &dyn TxtResolver,
    name: &str,
    config: &DnsConfig,
) -> TxtOutcome {
    let attempts = config.attempts();
    let timeout = config.timeout();
    let mut last_error: Option<String> = None;

    for attempt in 1..=attempts {
        match tokio::time::timeout(timeout, resolver.lookup_txt(name)).await {
            Ok(Ok(records)) => {
                log::debug!(
                    "TXT lookup for {name} returned {} record(s) on attempt {attempt}",
                    records.len()
                );
                return Ok(records);
            }
            Ok(Err(e)) => {
                log::debug!("TXT lookup for {name} failed on attempt {attempt}/{attempts}: {e}");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                log::debug!(
                    "TXT lookup for {name} timed out after {}ms on attempt {attempt}/{attempts}",
                    timeout.as_millis()
                );
                last_error = None;
            }
        }
    }

    let error = match last_error {
        Some(message) => LookupError::Failed {
            name: name.to_string(),
            message,
        },
        None => LookupError::TimedOut {
            name: name.to_string(),
            attempts,
        },
    };
    log::warn!("{error}");
    Err(error)
}

/// Resolver backed by the host's DNS configuration.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from the system configuration, falling back to hickory's
    /// defaults when it cannot be read.
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                log::warn!("Failed to read system DNS configuration, using defaults: {e}");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtResolver for SystemResolver {
    async fn lookup_txt(&self, name: &str) -> anyhow::Result<Vec<String>> {
        match self.resolver.txt_lookup(name).await {
            Ok(response) => Ok(response
                .iter()
                .map(|txt| {
                    // A TXT record may be split into several character-strings.
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => answer_from_error(name, &e),
        }
    }
}

/// NODATA is an empty answer; NXDOMAIN and everything else is a failure.
fn answer_from_error(name: &str, error: &ResolveError) -> anyhow::Result<Vec<String>> {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound {
            response_code: ResponseCode::NXDomain,
            ..
        } => Err(anyhow!("{name} does not exist (NXDOMAIN)")),
        ResolveErrorKind::NoRecordsFound { .. } => {
            log::debug!("No TXT records for {name}");
            Ok(Vec::new())
        }
        _ => Err(anyhow!("{error}")),
    }
}

/// One canned answer for [`StaticResolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureAnswer {
    Records(Vec<String>),
    Error { error: String },
}

/// In-memory TXT table. Names missing from the table answer with no records.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    answers: HashMap<String, FixtureAnswer>,
    delay: Option<Duration>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, name: &str, records: &[&str]) -> Self {
        self.answers.insert(
            name.to_string(),
            FixtureAnswer::Records(records.iter().map(|r| r.to_string()).collect()),
        );
        self
    }

    pub fn with_error(mut self, name: &str, error: &str) -> Self {
        self.answers.insert(
            name.to_string(),
            FixtureAnswer::Error {
                error: error.to_string(),
            },
        );
        self
    }

    /// Delay every answer, to exercise timeouts and cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Load a YAML map of DNS name to either a list of TXT strings or
    /// `{ error: "..." }`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let answers: HashMap<String, FixtureAnswer> = serde_yaml::from_str(&content)?;
        log::debug!(
            "Loaded {} DNS fixture entries from {}",
            answers.len(),
            path.as_ref().display()
        );
        Ok(Self {
            answers,
            delay: None,
        })
    }
}

#[async_trait]
impl TxtResolver for StaticResolver {
    async fn lookup_txt(&self, name: &str) -> anyhow::Result<Vec<String>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.answers.get(name) {
            Some(FixtureAnswer::Records(records)) => Ok(records.clone()),
            Some(FixtureAnswer::Error { error }) => Err(anyhow!("{error}")),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyResolver {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TxtResolver for FlakyResolver {
        async fn lookup_txt(&self, _name: &str) -> anyhow::Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(anyhow!("SERVFAIL"))
            } else {
                Ok(vec!["v=spf1 -all".to_string()])
            }
        }
    }

    fn fast_config(retries: u32) -> DnsConfig {
        DnsConfig {
            timeout_ms: 50,
            retries,
        }
    }

    #[tokio::test]
    async fn test_static_resolver_answers() {
        let resolver = StaticResolver::new()
            .with_records("example.com", &["v=spf1 -all"])
            .with_error("broken.com", "SERVFAIL");

        assert_eq!(
            resolver.lookup_txt("example.com").await.unwrap(),
            vec!["v=spf1 -all"]
        );
        assert!(resolver.lookup_txt("broken.com").await.is_err());
        assert!(resolver.lookup_txt("missing.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let resolver = FlakyResolver {
            calls: AtomicU32::new(0),
            fail_first: 2,
        };

        let outcome = lookup_txt_with_policy(&resolver, "example.com", &fast_config(2)).await;
        assert_eq!(outcome.unwrap(), vec!["v=spf1 -all"]);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let resolver = FlakyResolver {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        };

        let outcome = lookup_txt_with_policy(&resolver, "example.com", &fast_config(1)).await;
        assert!(matches!(outcome, Err(LookupError::Failed { .. })));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_failure() {
        let resolver = StaticResolver::new()
            .with_records("slow.com", &["v=spf1 -all"])
            .with_delay(Duration::from_millis(500));

        let outcome = lookup_txt_with_policy(&resolver, "slow.com", &fast_config(1)).await;
        assert_eq!(
            outcome,
            Err(LookupError::TimedOut {
                name: "slow.com".to_string(),
                attempts: 2
            })
        );
    }

    fn no_records(response_code: ResponseCode) -> ResolveError {
        use hickory_resolver::proto::op::Query;
        use hickory_resolver::proto::rr::RecordType;
        use hickory_resolver::Name;

        ResolveErrorKind::NoRecordsFound {
            query: Box::new(Query::query(
                Name::from_ascii("example.com.").unwrap(),
                RecordType::TXT,
            )),
            soa: None,
            negative_ttl: None,
            response_code,
            trusted: true,
        }
        .into()
    }

    #[test]
    fn test_nodata_is_empty_but_nxdomain_fails() {
        let nodata = answer_from_error("example.com", &no_records(ResponseCode::NoError));
        assert!(nodata.unwrap().is_empty());

        let nxdomain = answer_from_error("example.com", &no_records(ResponseCode::NXDomain));
        assert!(nxdomain.unwrap_err().to_string().contains("NXDOMAIN"));
    }

    #[test]
    fn test_fixture_yaml_shapes() {
        let yaml = "example.com:\n  - v=spf1 -all\nbroken.com:\n  error: SERVFAIL\n";
        let answers: HashMap<String, FixtureAnswer> = serde_yaml::from_str(yaml).unwrap();

        assert!(matches!(answers.get("example.com"), Some(FixtureAnswer::Records(r)) if r.len() == 1));
        assert!(matches!(answers.get("broken.com"), Some(FixtureAnswer::Error { .. })));
    }
}
