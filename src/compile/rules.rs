//! Field Rules
//!
//! Compiles the per-entity and global directive tables into anchored
//! regex sets. Effective rules for an (entity, type path) pair are the
//! entity's options, overlaid by every matching `if_type` block, layered
//! over `[global]`; they are memoized per pair.

use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

use super::naming::anchored;
use crate::config::{
    CompilerConfig, EntityOptions, ExtraField, FieldOverride, TargetOverride,
};
use crate::entity::ScalarKind;
use crate::error::Result;

// =============================================================================
// Pattern Sets
// =============================================================================

/// Anchored patterns; a name matches if any pattern matches all of it
#[derive(Debug, Clone, Default)]
pub struct PatternSet(Vec<Regex>);

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        Ok(Self(patterns.iter().map(|p| anchored(p)).collect::<Result<_>>()?))
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|re| re.is_match(name))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered substitutions, first match wins per pass
#[derive(Debug, Clone, Default)]
pub struct SubstitutionList(Vec<(Regex, String)>);

impl SubstitutionList {
    pub fn compile(subs: &[crate::config::Substitution]) -> Result<Self> {
        Ok(Self(
            subs.iter()
                .map(|s| Ok((anchored(&s.pattern)?, s.replace.clone())))
                .collect::<Result<_>>()?,
        ))
    }

    fn apply_once(&self, name: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(re, _)| re.is_match(name))
            .map(|(re, replace)| re.replace(name, replace.as_str()).into_owned())
    }

    /// Substitute until the name is stable. Returns None if no rule
    /// changed the name, so applying this to its own output is a no-op.
    pub fn apply(&self, name: &str) -> Option<String> {
        let mut current = name.to_string();
        for _ in 0..=self.0.len() {
            match self.apply_once(&current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        (current != name).then_some(current)
    }
}

// =============================================================================
// Field Rules
// =============================================================================

/// Effective, compiled rules for one (entity, type path)
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    pub drop: PatternSet,
    pub drop_after_processing: PatternSet,
    pub flatten: PatternSet,
    pub array: PatternSet,
    pub many_to_many: PatternSet,
    pub one_to_many: PatternSet,
    pub one_to_one: PatternSet,
    pub json: PatternSet,
    pub reference_extension: PatternSet,
    pub null: PatternSet,
    pub unique: PatternSet,
    pub index: PatternSet,
    pub ignore_merge_mismatch: PatternSet,
    pub rename: SubstitutionList,
    pub coalesce: SubstitutionList,
    pub flatten_prefixes: Vec<String>,
    pub parent_field: Option<String>,
    pub parent_type: Option<String>,
    pub include_parent_fields: bool,
    pub custom: bool,
    pub is_abstract: Option<bool>,
    pub primary_key: Option<String>,
    pub number_field: Option<String>,
    pub match_fields: Vec<String>,
    pub add_fields: Vec<ExtraField>,
    options: EntityOptions,
}

impl FieldRules {
    pub fn compile(options: EntityOptions) -> Result<Self> {
        Ok(Self {
            drop: PatternSet::compile(&options.drop_fields)?,
            drop_after_processing: PatternSet::compile(&options.drop_after_processing_fields)?,
            flatten: PatternSet::compile(&options.flatten_fields)?,
            array: PatternSet::compile(&options.array_fields)?,
            many_to_many: PatternSet::compile(&options.many_to_many_fields)?,
            one_to_many: PatternSet::compile(&options.one_to_many_fields)?,
            one_to_one: PatternSet::compile(&options.one_to_one_fields)?,
            json: PatternSet::compile(&options.json_fields)?,
            reference_extension: PatternSet::compile(&options.reference_extension_fields)?,
            null: PatternSet::compile(&options.null_fields)?,
            unique: PatternSet::compile(&options.unique_fields)?,
            index: PatternSet::compile(&options.index_fields)?,
            ignore_merge_mismatch: PatternSet::compile(&options.ignore_merge_mismatch_fields)?,
            rename: SubstitutionList::compile(&options.rename)?,
            coalesce: SubstitutionList::compile(&options.coalesce_fields)?,
            flatten_prefixes: options.flatten_prefixes.clone(),
            parent_field: options.parent_field.clone(),
            parent_type: options.parent_type.clone(),
            include_parent_fields: options.include_parent_fields.unwrap_or(false),
            custom: options.custom.unwrap_or(false),
            is_abstract: options.is_abstract,
            primary_key: options.primary_key.clone(),
            number_field: options.number_field.clone(),
            match_fields: options.match_fields.clone(),
            add_fields: options.add_fields.clone(),
            options,
        })
    }

    /// Name starts with one of the flatten prefixes
    pub fn has_flatten_prefix(&self, name: &str) -> bool {
        self.flatten_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.as_deref() == Some(name)
    }

    pub fn many_to_many_override(&self, name: &str) -> Option<&str> {
        find_target(&self.options.many_to_many_field_overrides, name)
    }

    pub fn one_to_many_override(&self, name: &str) -> Option<&str> {
        find_target(&self.options.one_to_many_field_overrides, name)
    }

    pub fn foreign_key_override(&self, name: &str) -> Option<&str> {
        find_target(&self.options.foreign_key_overrides, name)
    }

    pub fn kind_override(&self, name: &str) -> Option<&ScalarKind> {
        self.options
            .override_field_kind
            .iter()
            .find(|o| o.field == name)
            .map(|o| &o.kind)
    }

    pub fn field_option(&self, name: &str) -> Option<&FieldOverride> {
        self.options.field_options.iter().find(|o| o.field == name)
    }

    pub fn field_doc(&self, name: &str) -> Option<&str> {
        self.options
            .field_docs
            .iter()
            .find(|d| d.field == name)
            .map(|d| d.doc.as_str())
    }
}

fn find_target<'o>(overrides: &'o [TargetOverride], name: &str) -> Option<&'o str> {
    overrides
        .iter()
        .find(|o| o.field == name)
        .map(|o| o.target.as_str())
}

// =============================================================================
// Rule Book
// =============================================================================

/// All configured rules, validated, with per-(entity, type) memoization
pub struct RuleBook<'c> {
    config: &'c CompilerConfig,
    overlays: HashMap<String, Vec<Regex>>,
    memo: HashMap<(String, String), Rc<FieldRules>>,
}

impl<'c> RuleBook<'c> {
    /// Validate every pattern in the configuration
    pub fn new(config: &'c CompilerConfig) -> Result<Self> {
        FieldRules::compile(config.global.clone())?;

        let mut overlays = HashMap::new();
        for entity in &config.entities {
            FieldRules::compile(entity.options.clone())?;
            let mut patterns = Vec::with_capacity(entity.if_type.len());
            for overlay in &entity.if_type {
                FieldRules::compile(overlay.options.clone())?;
                patterns.push(anchored(&overlay.pattern)?);
            }
            overlays.insert(entity.name.clone(), patterns);
        }

        Ok(Self {
            config,
            overlays,
            memo: HashMap::new(),
        })
    }

    /// Effective rules of `entity` while walking `type_path`
    pub fn for_type(&mut self, entity: &str, type_path: &str) -> Result<Rc<FieldRules>> {
        let key = (entity.to_string(), type_path.to_string());
        if let Some(hit) = self.memo.get(&key) {
            return Ok(Rc::clone(hit));
        }

        let mut options = EntityOptions::default();
        if let Some(rules) = self.config.entity_rules(entity) {
            options = rules.options.clone();
            let patterns = self.overlays.get(entity).map(Vec::as_slice).unwrap_or(&[]);
            for (overlay, pattern) in rules.if_type.iter().zip(patterns) {
                if pattern.is_match(type_path) {
                    options = EntityOptions::layered(&overlay.options, &options);
                }
            }
        }
        let rules = Rc::new(FieldRules::compile(EntityOptions::layered(
            &options,
            &self.config.global,
        ))?);

        self.memo.insert(key, Rc::clone(&rules));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Substitution;
    use crate::error::CompileError;

    fn subs(pairs: &[(&str, &str)]) -> SubstitutionList {
        SubstitutionList::compile(
            &pairs
                .iter()
                .map(|(p, r)| Substitution {
                    pattern: p.to_string(),
                    replace: r.to_string(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_pattern_set_anchored() {
        let set = PatternSet::compile(&["item".to_string(), "meta_.*".to_string()]).unwrap();
        assert!(set.matches("item"));
        assert!(set.matches("meta_created"));
        assert!(!set.matches("items"));
        assert!(!set.matches("line_item"));
    }

    #[test]
    fn test_coalesce_is_idempotent() {
        let list = subs(&[("color(Name|Code)", "color"), ("billing_(.*)", "${1}")]);
        assert_eq!(list.apply("colorName").as_deref(), Some("color"));
        assert_eq!(list.apply("color"), None);
        assert_eq!(list.apply("billing_colorCode").as_deref(), Some("color"));
        assert_eq!(list.apply("unrelated"), None);
    }

    #[test]
    fn test_overlay_and_global() {
        let config = CompilerConfig::from_toml_str(
            r#"
            [global]
            drop_fields = ["signature"]

            [[entities]]
            name = "Shape"
            null_fields = ["radius"]

            [[entities.if_type]]
            pattern = "Square.*"
            drop_fields = ["radius"]
            "#,
        )
        .unwrap();
        let mut book = RuleBook::new(&config).unwrap();

        let circle = book.for_type("Shape", "CircleType").unwrap();
        assert!(circle.drop.matches("signature"));
        assert!(!circle.drop.matches("radius"));
        assert!(circle.null.matches("radius"));

        let square = book.for_type("Shape", "SquareType").unwrap();
        assert!(square.drop.matches("radius"));
        assert!(square.drop.matches("signature"));
    }

    #[test]
    fn test_invalid_rule_pattern_fails_up_front() {
        let config = CompilerConfig::from_toml_str(
            r#"
            [[entities]]
            name = "Order"
            json_fields = ["meta["]
            "#,
        )
        .unwrap();
        assert!(matches!(
            RuleBook::new(&config),
            Err(CompileError::InvalidPattern { .. })
        ));
    }
}
