//! Cache keys and invalidation patterns
//!
//! Lookups always use a fully specified [`CacheKey`]. Invalidation events
//! arrive as [`ObjectKey`]s: a table name plus named field values, where any
//! field may be the wildcard `*`. An [`ObjectKey`] is resolved against a key
//! type into a [`KeyPattern`] before it touches a store.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::OnceLock;

/// Wildcard token in flat invalidation keys
pub const WILDCARD: &str = "*";

/// Composite business key of a cache entry.
///
/// Equality and hashing are structural. Field names are the upper-case
/// labels used by the change-notification feed (`VENDOR`, `CARRIER`, ...).
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Field labels in key order
    fn field_names() -> Vec<&'static str>;

    /// Rendered value of one field, `None` for unknown labels
    fn field(&self, name: &str) -> Option<String>;

    /// Build a key from an object key whose fields are all exact values
    fn from_fields(key: &ObjectKey) -> Option<Self>;

    /// Parse `value` as field `name` and render it the way [`CacheKey::field`]
    /// does; `None` when the value is not valid for that field
    fn normalize_field(name: &str, value: &str) -> Option<String>;
}

/// Declare a key struct and its [`CacheKey`] implementation.
///
/// ```
/// farecache_core::cache_key! {
///     pub struct TaxRulesKey {
///         pub nation: String => "NATION",
///         pub tax_point_tag: String => "TAXPOINTTAG",
///     }
/// }
/// ```
#[macro_export]
macro_rules! cache_key {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field_vis:vis $field:ident : $ty:ty => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name {
            $($field_vis $field: $ty),+
        }

        impl $crate::key::CacheKey for $name {
            fn field_names() -> ::std::vec::Vec<&'static str> {
                ::std::vec![$($label),+]
            }

            fn field(&self, name: &str) -> ::std::option::Option<::std::string::String> {
                match name {
                    $($label => ::std::option::Option::Some(::std::string::ToString::to_string(&self.$field)),)+
                    _ => ::std::option::Option::None,
                }
            }

            fn from_fields(key: &$crate::key::ObjectKey) -> ::std::option::Option<Self> {
                ::std::option::Option::Some(Self {
                    $($field: key.value($label)?.parse().ok()?),+
                })
            }

            fn normalize_field(
                name: &str,
                value: &str,
            ) -> ::std::option::Option<::std::string::String> {
                match name {
                    $($label => value
                        .parse::<$ty>()
                        .ok()
                        .map(|v| ::std::string::ToString::to_string(&v)),)+
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}

/// One field of an [`ObjectKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldMatch {
    Exact(String),
    Any,
}

impl FieldMatch {
    fn from_value(value: &str) -> Self {
        if value == WILDCARD {
            FieldMatch::Any
        } else {
            FieldMatch::Exact(value.to_string())
        }
    }
}

/// Table name plus named field values, as delivered by the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKey {
    table: String,
    fields: BTreeMap<String, FieldMatch>,
}

fn flat_key_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^([A-Za-z][A-Za-z0-9_]*):(.+)$").expect("static regex is valid")
    })
}

fn field_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^([A-Z][A-Z0-9_]*)=([^|=]*)$").expect("static regex is valid")
    })
}

impl ObjectKey {
    /// Create an object key for a table with no fields set
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field; the value `*` makes it a wildcard
    pub fn with(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.set(name, value);
        self
    }

    /// Mark a field as a wildcard
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), FieldMatch::Any);
        self
    }

    /// Set a field in place
    pub fn set(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.fields
            .insert(name.into(), FieldMatch::from_value(value.as_ref()));
    }

    /// Parse the flat form `Table:FIELD=value|FIELD=*`
    pub fn parse(flat: &str) -> CacheResult<Self> {
        let captures = flat_key_regex()
            .captures(flat.trim())
            .ok_or_else(|| CacheError::InvalidPattern(format!("malformed key '{}'", flat)))?;

        let mut key = ObjectKey::new(&captures[1]);
        for part in captures[2].split('|') {
            let field = field_regex().captures(part).ok_or_else(|| {
                CacheError::InvalidPattern(format!("malformed field '{}' in '{}'", part, flat))
            })?;
            if key.fields.contains_key(&field[1]) {
                return Err(CacheError::InvalidPattern(format!(
                    "field {} given twice in '{}'",
                    &field[1], flat
                )));
            }
            key.set(&field[1], &field[2]);
        }

        Ok(key)
    }

    /// Table (cache) name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Field match by label
    pub fn get(&self, name: &str) -> Option<&FieldMatch> {
        self.fields.get(name)
    }

    /// Exact value of a field; `None` for absent or wildcard fields
    pub fn value(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldMatch::Exact(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Whether any field is a wildcard
    pub fn is_wildcarded(&self) -> bool {
        self.fields.values().any(|f| *f == FieldMatch::Any)
    }

    /// Field labels present in this key
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.table)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            match value {
                FieldMatch::Exact(v) => write!(f, "{}={}", name, v)?,
                FieldMatch::Any => write!(f, "{}={}", name, WILDCARD)?,
            }
        }
        Ok(())
    }
}

/// An [`ObjectKey`] resolved against a concrete key type
#[derive(Debug, Clone)]
pub enum KeyPattern<K> {
    /// Every field exact: a single key
    Exact(K),
    /// At least one wildcard: the exact constraints to match while scanning
    Scan(Vec<(&'static str, String)>),
}

impl<K: CacheKey> KeyPattern<K> {
    /// Resolve an object key.
    ///
    /// The key must name every field of `K` and nothing else; a missing
    /// field is ambiguous and is rejected rather than read as a wildcard.
    pub fn resolve(key: &ObjectKey) -> CacheResult<Self> {
        let names = K::field_names();

        if let Some(unknown) = key.field_names().find(|f| !names.contains(f)) {
            return Err(CacheError::InvalidPattern(format!(
                "unknown field {} in {}",
                unknown, key
            )));
        }

        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| key.get(n).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(CacheError::InvalidPattern(format!(
                "fields {} not given in {}",
                missing.join(","),
                key
            )));
        }

        if !key.is_wildcarded() {
            return K::from_fields(key).map(KeyPattern::Exact).ok_or_else(|| {
                CacheError::InvalidPattern(format!("field values do not form a key: {}", key))
            });
        }

        // Exact values are compared against rendered key fields, so they
        // are parsed and re-rendered first
        let mut constraints = Vec::new();
        for name in names {
            let Some(value) = key.value(name) else {
                continue;
            };
            let normalized = K::normalize_field(name, value).ok_or_else(|| {
                CacheError::InvalidPattern(format!(
                    "value '{}' is not valid for field {} in {}",
                    value, name, key
                ))
            })?;
            constraints.push((name, normalized));
        }
        Ok(KeyPattern::Scan(constraints))
    }

    /// Whether a resident key falls under this pattern
    pub fn matches(&self, key: &K) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::Scan(constraints) => constraints
                .iter()
                .all(|(name, value)| key.field(name).as_deref() == Some(value.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::cache_key! {
        struct RuleKey {
            vendor: String => "VENDOR",
            carrier: String => "CARRIER",
            rule: u32 => "RULE",
        }
    }

    fn rule_key(vendor: &str, carrier: &str, rule: u32) -> RuleKey {
        RuleKey {
            vendor: vendor.to_string(),
            carrier: carrier.to_string(),
            rule,
        }
    }

    #[test]
    fn test_parse_flat_key() {
        let key = ObjectKey::parse("FareRule:VENDOR=ATP|CARRIER=*|RULE=100").unwrap();
        assert_eq!(key.table(), "FareRule");
        assert_eq!(key.value("VENDOR"), Some("ATP"));
        assert_eq!(key.get("CARRIER"), Some(&FieldMatch::Any));
        assert!(key.is_wildcarded());
        assert_eq!(key.to_string(), "FareRule:CARRIER=*|RULE=100|VENDOR=ATP");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ObjectKey::parse("no-table").is_err());
        assert!(ObjectKey::parse("FareRule:vendor=ATP").is_err());
        assert!(ObjectKey::parse("FareRule:VENDOR").is_err());
        assert!(ObjectKey::parse("FareRule:VENDOR=A|VENDOR=B").is_err());
    }

    #[test]
    fn test_macro_key_fields() {
        let key = rule_key("ATP", "AA", 42);
        assert_eq!(RuleKey::field_names(), vec!["VENDOR", "CARRIER", "RULE"]);
        assert_eq!(key.field("RULE").as_deref(), Some("42"));
        assert_eq!(key.field("TARIFF"), None);

        let object = ObjectKey::new("FareRule")
            .with("VENDOR", "ATP")
            .with("CARRIER", "AA")
            .with("RULE", "42");
        assert_eq!(RuleKey::from_fields(&object), Some(key));
    }

    #[test]
    fn test_resolve_exact() {
        let object = ObjectKey::new("FareRule")
            .with("VENDOR", "ATP")
            .with("CARRIER", "AA")
            .with("RULE", "42");
        match KeyPattern::<RuleKey>::resolve(&object).unwrap() {
            KeyPattern::Exact(k) => assert_eq!(k, rule_key("ATP", "AA", 42)),
            other => panic!("expected exact pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_wildcard_matches() {
        let object = ObjectKey::new("FareRule")
            .with("VENDOR", "ATP")
            .with_any("CARRIER")
            .with("RULE", "42");
        let pattern = KeyPattern::<RuleKey>::resolve(&object).unwrap();

        assert!(pattern.matches(&rule_key("ATP", "AA", 42)));
        assert!(pattern.matches(&rule_key("ATP", "BA", 42)));
        assert!(!pattern.matches(&rule_key("SITA", "AA", 42)));
        assert!(!pattern.matches(&rule_key("ATP", "AA", 43)));
    }

    #[test]
    fn test_resolve_rejects_ambiguous() {
        // Missing field: neither narrowed nor widened
        let missing = ObjectKey::new("FareRule").with("VENDOR", "ATP").with("RULE", "1");
        assert!(matches!(
            KeyPattern::<RuleKey>::resolve(&missing),
            Err(CacheError::InvalidPattern(_))
        ));

        let unknown = ObjectKey::new("FareRule")
            .with("VENDOR", "ATP")
            .with("CARRIER", "AA")
            .with("RULE", "1")
            .with("TARIFF", "7");
        assert!(KeyPattern::<RuleKey>::resolve(&unknown).is_err());

        // RULE must parse as a number
        let unparsable = ObjectKey::new("FareRule")
            .with("VENDOR", "ATP")
            .with("CARRIER", "AA")
            .with("RULE", "abc");
        assert!(KeyPattern::<RuleKey>::resolve(&unparsable).is_err());
    }

    #[test]
    fn test_wildcard_pattern_rejects_unparsable_value() {
        let object = ObjectKey::parse("FareRule:VENDOR=*|CARRIER=AA|RULE=abc").unwrap();
        assert!(matches!(
            KeyPattern::<RuleKey>::resolve(&object),
            Err(CacheError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_wildcard_and_exact_patterns_agree() {
        let target = rule_key("ATP", "AA", 42);

        let exact = ObjectKey::parse("FareRule:VENDOR=ATP|CARRIER=AA|RULE=042").unwrap();
        assert!(KeyPattern::<RuleKey>::resolve(&exact).unwrap().matches(&target));

        let scan = ObjectKey::parse("FareRule:VENDOR=*|CARRIER=AA|RULE=042").unwrap();
        let pattern = KeyPattern::<RuleKey>::resolve(&scan).unwrap();
        match &pattern {
            KeyPattern::Scan(constraints) => {
                assert!(constraints.contains(&("RULE", "42".to_string())))
            }
            other => panic!("expected scan pattern, got {:?}", other),
        }
        assert!(pattern.matches(&target));
        assert!(!pattern.matches(&rule_key("ATP", "AA", 43)));
    }
}
