//! # Hostname Whitelist
//!
//! Maps each SCEP challenge password to the hostnames a device presenting it
//! may obtain certificates for. The table is built once at startup from a YAML
//! document and is read-only afterwards.
//!
//! ```yaml
//! password1: example.com
//! password2:
//!   - subdomain1.example.com
//!   - subdomain2.example.com
//! ```

mod verifier;

pub use verifier::CsrPasswordVerifier;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;

use crate::csr::CertificateRequest;

/// Errors raised while building the whitelist
#[derive(Debug, Error)]
pub enum WhitelistError {
    /// The whitelist file could not be read
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not a YAML mapping
    #[error("parsing whitelist: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The top-level document is not a mapping of secrets
    #[error("whitelist must be a mapping of challenge passwords to hostnames")]
    NotAMapping,

    /// A key of the mapping is not a string
    #[error("whitelist keys must be strings, found {found}")]
    NonStringSecret { found: String },

    /// The value for a secret is neither a hostname nor a non-empty list of hostnames
    #[error("unknown item for secret '{secret}': expected a hostname or a list of hostnames")]
    UnsupportedValue { secret: String },
}

/// A predicate over candidate hostnames. Only exact matching exists today;
/// further kinds slot in as new variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostnameRule {
    Exact(String),
}

impl HostnameRule {
    pub fn matches(&self, hostname: &str) -> bool {
        match self {
            HostnameRule::Exact(allowed) => allowed == hostname,
        }
    }
}

/// Outcome of checking a set of names against one secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// The first name that no rule covers
    Rejected { name: String },
    /// The request carried no names at all
    NoNames,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Secret → hostname rules
#[derive(Debug, Clone, Default)]
pub struct AuthorizationTable {
    rules: HashMap<String, Vec<HostnameRule>>,
}

impl AuthorizationTable {
    /// Read and build the table from a YAML file.
    pub fn load(path: &Path) -> Result<Self, WhitelistError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| WhitelistError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, WhitelistError> {
        let document: Value = serde_yaml::from_str(contents)?;
        Self::from_value(document)
    }

    /// Build from an already-parsed YAML value. Every secret yields at least
    /// one rule; any other shape is an error naming the secret.
    pub fn from_value(document: Value) -> Result<Self, WhitelistError> {
        let mapping = match document {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::default()),
            _ => return Err(WhitelistError::NotAMapping),
        };

        let mut rules: HashMap<String, Vec<HostnameRule>> = HashMap::new();
        for (key, value) in mapping {
            let secret = match key {
                Value::String(secret) => secret,
                other => {
                    return Err(WhitelistError::NonStringSecret { found: describe(&other) })
                }
            };

            let parsed = parse_rules(&value)
                .ok_or_else(|| WhitelistError::UnsupportedValue { secret: secret.clone() })?;
            rules.entry(secret).or_default().extend(parsed);
        }

        Ok(Self { rules })
    }

    /// Number of secrets in the table
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules registered for `secret`; empty for unknown secrets.
    pub fn rules_for(&self, secret: &str) -> &[HostnameRule] {
        self.rules.get(secret).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Is `hostname` permitted under `secret`?
    pub fn permits(&self, secret: &str, hostname: &str) -> bool {
        self.rules_for(secret).iter().any(|rule| rule.matches(hostname))
    }

    /// Conjunctive check: every name must be covered by some rule for the
    /// secret, and there must be at least one name.
    pub fn check<'a, I>(&self, secret: &str, names: I) -> Decision
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen_any = false;
        for name in names {
            seen_any = true;
            if !self.permits(secret, name) {
                return Decision::Rejected { name: name.to_string() };
            }
        }

        if seen_any {
            Decision::Allowed
        } else {
            Decision::NoNames
        }
    }

    /// Check a parsed request's CN and SANs against `secret`.
    pub fn authorize(&self, secret: &str, request: &CertificateRequest) -> Decision {
        self.check(secret, request.names())
    }
}

fn parse_rules(value: &Value) -> Option<Vec<HostnameRule>> {
    match value {
        Value::String(hostname) => Some(vec![HostnameRule::Exact(hostname.clone())]),
        Value::Sequence(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::String(hostname) => Some(HostnameRule::Exact(hostname.clone())),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Sequence(_) => "a sequence".to_string(),
        Value::Mapping(_) => "a mapping".to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => format!("tagged value {}", tagged.tag),
    }
}
