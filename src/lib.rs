pub mod authenticity;
pub mod config;
pub mod detector;
pub mod dns;
pub mod domain_utils;
pub mod email;
pub mod parser;
pub mod rules;


pub use authenticity::{AuthenticityChecker, DmarcPolicy, Finding, Protocol, SpfPolicy};
pub use config::DetectorConfig;
pub use detector::{AnalysisError, SpoofDetector};
pub use dns::{StaticResolver, SystemResolver, TxtResolver};
pub use domain_utils::DomainUtils;
pub use email::{AnalysisResult, Email, Signal};
pub use parser::parse_email;
pub use rules::{Rule, RuleSet};
