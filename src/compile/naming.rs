//! Naming Resolver
//!
//! Maps a dotted type path to an entity name through an ordered rule
//! table, first match wins. Unmatched paths get a synthesized PascalCase
//! name plus a warning, and are remembered so later lookups (forward and
//! reverse) agree.

use regex::Regex;
use std::collections::HashMap;

use crate::config::TypeMapRule;
use crate::diagnostics::Diagnostics;
use crate::error::{CompileError, Result};

/// Resolved name of a type path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub entity: String,
    /// Several type paths may share this entity
    pub merge: bool,
    /// No rule matched
    pub synthesized: bool,
}

struct NamingRule {
    pattern: Regex,
    /// Pattern without regex syntax, usable for reverse lookup
    literal: Option<String>,
    template: String,
    merge: bool,
}

/// Ordered pattern table with per-run memoization
pub struct NameResolver {
    rules: Vec<NamingRule>,
    memo: HashMap<String, ResolvedName>,
}

impl NameResolver {
    /// Compile the rule table; invalid patterns are rejected up front
    pub fn new(rules: &[TypeMapRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = anchored(&rule.pattern)?;
                let (template, plus) = match rule.entity.strip_prefix('+') {
                    Some(rest) => (rest.to_string(), true),
                    None => (rule.entity.clone(), false),
                };
                Ok(NamingRule {
                    pattern,
                    literal: literal_pattern(&rule.pattern),
                    template,
                    merge: rule.merge || plus,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            memo: HashMap::new(),
        })
    }

    /// Entity name for a type path
    pub fn resolve(&mut self, type_path: &str, diagnostics: &mut Diagnostics) -> ResolvedName {
        if let Some(hit) = self.memo.get(type_path) {
            return hit.clone();
        }

        let resolved = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(type_path))
            .map(|rule| ResolvedName {
                entity: rule
                    .pattern
                    .replace(type_path, rule.template.as_str())
                    .into_owned(),
                merge: rule.merge,
                synthesized: false,
            })
            .unwrap_or_else(|| {
                let entity = synthesize_name(type_path);
                diagnostics.auto_named(type_path, &entity);
                ResolvedName {
                    entity,
                    merge: false,
                    synthesized: true,
                }
            });

        tracing::trace!(type_path, entity = %resolved.entity, "resolved entity name");
        self.memo.insert(type_path.to_string(), resolved.clone());
        resolved
    }

    /// A representative type path for an entity name: a literal rule
    /// producing it, or a path already resolved to it
    pub fn reverse_resolve(&self, entity: &str) -> Option<String> {
        let from_rules = self.rules.iter().find_map(|rule| match &rule.literal {
            Some(literal) if rule.template == entity => Some(literal.clone()),
            _ => None,
        });
        from_rules.or_else(|| {
            let mut seen: Vec<&String> = self
                .memo
                .iter()
                .filter(|(_, name)| name.entity == entity)
                .map(|(path, _)| path)
                .collect();
            seen.sort();
            seen.first().map(|path| path.to_string())
        })
    }
}

/// Compile a pattern anchored at both ends
pub(crate) fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| CompileError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// The literal text a pattern matches, if it has no regex syntax
/// besides escaped dots
fn literal_pattern(pattern: &str) -> Option<String> {
    let unescaped = pattern.replace(r"\.", ".");
    if unescaped
        .chars()
        .any(|c| "\\()[]{}|*+?^$".contains(c))
    {
        return None;
    }
    Some(unescaped)
}

/// PascalCase name from a dotted type path: `ns:order.line_item` -> `OrderLineItem`
pub fn synthesize_name(type_path: &str) -> String {
    let local = type_path
        .split('.')
        .map(|segment| segment.rsplit(':').next().unwrap_or(segment))
        .collect::<Vec<_>>()
        .join(".");

    let mut result = String::with_capacity(local.len());
    let mut capitalize_next = true;
    for c in local.chars() {
        if c == '.' || c == '_' || c == '-' || c == ' ' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }
    result
}

/// snake_case from an entity name: `OrderLineItem` -> `order_line_item`,
/// `HTTPServer` -> `http_server`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut result = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.map(|n| n.is_ascii_lowercase()).unwrap_or(false),
                _ => false,
            };
            if boundary && !result.ends_with('_') {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else if c == '-' || c == ' ' || c == '.' {
            result.push('_');
        } else {
            result.push(c);
        }
    }

    result
}
