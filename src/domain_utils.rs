use crate::config::LookalikePatterns;
use lazy_static::lazy_static;

lazy_static! {
    static ref DEFAULT_LOOKALIKE: LookalikePatterns = LookalikePatterns::default();
}

/// Minimal domain helpers shared by rules and authenticity checks
pub struct DomainUtils;

impl DomainUtils {
    /// Domain part of an address split on its single `@`.
    ///
    /// Returns `None` for an absent address, zero or several `@`, or an empty
    /// domain part. Callers treat `None` as "no domain" and skip
    /// domain-dependent checks.
    pub fn domain_of(address: Option<&str>) -> Option<&str> {
        let address = address?;
        let mut parts = address.split('@');
        let _local = parts.next()?;
        let domain = parts.next()?;
        if parts.next().is_some() || domain.is_empty() {
            return None;
        }
        Some(domain)
    }

    /// Lookalike check against the built-in typosquatting patterns.
    pub fn is_lookalike_domain(candidate: &str, reference: &str) -> bool {
        Self::is_lookalike_with(candidate, reference, &DEFAULT_LOOKALIKE)
    }

    /// True when `candidate` differs from `reference` but either embeds the
    /// reference with its first dot dropped, or equals one of the
    /// typosquatting variants generated from `patterns`.
    ///
    /// This is a narrow pattern library, not an edit-distance model: digit
    /// swaps such as `gmai1.com` are not caught.
    pub fn is_lookalike_with(candidate: &str, reference: &str, patterns: &LookalikePatterns) -> bool {
        if candidate == reference || reference.is_empty() {
            return false;
        }

        let undotted = reference.replacen('.', "", 1);
        if !undotted.is_empty() && candidate.contains(&undotted) {
            return true;
        }

        Self::typo_variants(reference, patterns)
            .iter()
            .any(|variant| variant == candidate)
    }

    /// Typosquatting variants of `reference`, in a stable order.
    pub fn typo_variants(reference: &str, patterns: &LookalikePatterns) -> Vec<String> {
        let mut variants = vec![
            reference.replacen('.', "-", 1),
            reference.replacen('.', "", 1),
        ];

        for prefix in &patterns.prefixes {
            variants.push(format!("{prefix}{reference}"));
        }

        for suffix in &patterns.suffixes {
            variants.push(format!("{reference}{suffix}"));
            // paypal.com -> paypal-secure.com
            if let Some((label, rest)) = reference.split_once('.') {
                variants.push(format!("{label}{suffix}.{rest}"));
            }
        }

        for sub in &patterns.substitutions {
            if !sub.from.is_empty() && reference.contains(&sub.from) {
                variants.push(reference.replacen(&sub.from, &sub.to, 1));
            }
        }

        variants
    }
}
