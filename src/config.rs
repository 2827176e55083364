//! Configuration management for the entity compiler
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (entities.toml)
//! - Environment variables (SCHEMA_ENTITIES__*)
//!
//! Rule tables that are keyed by a type or field name are arrays of
//! records, so names keep their case through every layer.
//!
//! ## Example config file (entities.toml):
//! ```toml
//! [compiler]
//! roots = ["Order", "/catalog"]
//! max_length_factor = 1
//!
//! [[type_map]]
//! pattern = "Order"
//! entity = "Order"
//!
//! [[type_map]]
//! pattern = "(Circle|Square)Type"
//! entity = "Shape"
//! merge = true
//!
//! [global]
//! drop_fields = ["signature"]
//!
//! [[entities]]
//! name = "Order"
//! json_fields = ["meta"]
//! coalesce_fields = [{ pattern = "color(Name|Code)", replace = "color" }]
//! field_options = [{ field = "number", unique = true }]
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entity::ScalarKind;
use crate::error::Result;

/// Main configuration for the compiler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Compiler settings
    #[serde(default)]
    pub compiler: CompilerSettings,

    /// Ordered naming rules, first match wins
    #[serde(default)]
    pub type_map: Vec<TypeMapRule>,

    /// Fallback rules for every entity
    #[serde(default)]
    pub global: EntityOptions,

    /// Per-entity rules
    #[serde(default)]
    pub entities: Vec<EntityRules>,

    /// Simple types whose derived scalar is replaced wholesale
    #[serde(default)]
    pub type_overrides: Vec<TypeOverride>,
}

/// Compiler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Type paths to compile; `/name` selects a top-level element
    #[serde(default)]
    pub roots: Vec<String>,

    /// Safety factor applied to facet-derived max lengths
    #[serde(default = "default_max_length_factor")]
    pub max_length_factor: u32,

    /// Bounded text longer than this becomes unbounded text
    #[serde(default = "default_text_threshold")]
    pub text_threshold: u32,

    /// Storage identifier length limit
    #[serde(default = "default_identifier_limit")]
    pub identifier_limit: usize,

    /// Name of the JSON attribute bag field
    #[serde(default = "default_bag_field_name")]
    pub bag_field_name: String,
}

/// Naming rule: anchored regex over the type path, substitution template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMapRule {
    pub pattern: String,
    /// Entity name; may use `$1` captures. A leading `+` allows merging.
    pub entity: String,
    #[serde(default)]
    pub merge: bool,
}

/// Ordered name substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub pattern: String,
    pub replace: String,
}

/// Field-name keyed target override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOverride {
    pub field: String,
    /// Type path of the target
    pub target: String,
}

/// Field-name keyed kind override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindOverride {
    pub field: String,
    pub kind: ScalarKind,
}

/// Field-name keyed documentation override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDoc {
    pub field: String,
    pub doc: String,
}

/// Per-field option overrides, applied last
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub field: String,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub max_digits: Option<u32>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
    #[serde(default)]
    pub null: Option<bool>,
    #[serde(default)]
    pub blank: Option<bool>,
    #[serde(default)]
    pub unique: Option<bool>,
    #[serde(default)]
    pub db_index: Option<bool>,
    #[serde(default)]
    pub related_name: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Field declared in configuration instead of the schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraField {
    pub name: String,
    /// Target entity name of a to-one (or many-to-many) field
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub many_to_many: bool,
    /// Scalar kind when there is no target
    #[serde(default)]
    pub kind: Option<ScalarKind>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub documentation: Option<String>,
}

/// Classification directives for one entity (or all, under `[global]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityOptions {
    #[serde(default)]
    pub drop_fields: Vec<String>,
    #[serde(default)]
    pub drop_after_processing_fields: Vec<String>,
    #[serde(default)]
    pub parent_field: Option<String>,
    #[serde(default)]
    pub parent_type: Option<String>,
    #[serde(default)]
    pub include_parent_fields: Option<bool>,
    /// Declared by configuration only; the schema type is not walked
    #[serde(default)]
    pub custom: Option<bool>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: Option<bool>,
    /// Applied to element names before prefixing
    #[serde(default)]
    pub rename: Vec<Substitution>,
    /// Applied to full (prefixed) field names
    #[serde(default)]
    pub coalesce_fields: Vec<Substitution>,
    #[serde(default)]
    pub flatten_fields: Vec<String>,
    #[serde(default)]
    pub flatten_prefixes: Vec<String>,
    #[serde(default)]
    pub array_fields: Vec<String>,
    #[serde(default)]
    pub many_to_many_fields: Vec<String>,
    #[serde(default)]
    pub many_to_many_field_overrides: Vec<TargetOverride>,
    #[serde(default)]
    pub one_to_many_fields: Vec<String>,
    #[serde(default)]
    pub one_to_many_field_overrides: Vec<TargetOverride>,
    #[serde(default)]
    pub one_to_one_fields: Vec<String>,
    #[serde(default)]
    pub json_fields: Vec<String>,
    #[serde(default)]
    pub foreign_key_overrides: Vec<TargetOverride>,
    #[serde(default)]
    pub reference_extension_fields: Vec<String>,
    #[serde(default)]
    pub null_fields: Vec<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub unique_fields: Vec<String>,
    #[serde(default)]
    pub index_fields: Vec<String>,
    #[serde(default)]
    pub override_field_kind: Vec<KindOverride>,
    #[serde(default)]
    pub field_options: Vec<FieldOverride>,
    #[serde(default)]
    pub field_docs: Vec<FieldDoc>,
    #[serde(default)]
    pub add_fields: Vec<ExtraField>,
    #[serde(default)]
    pub number_field: Option<String>,
    #[serde(default)]
    pub match_fields: Vec<String>,
    #[serde(default)]
    pub ignore_merge_mismatch_fields: Vec<String>,
}

/// Conditional overlay applied when the source type path matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeOverlay {
    /// Anchored regex over the source type path
    pub pattern: String,
    #[serde(flatten)]
    pub options: EntityOptions,
}

/// Rules of one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRules {
    pub name: String,
    #[serde(flatten)]
    pub options: EntityOptions,
    #[serde(default)]
    pub if_type: Vec<TypeOverlay>,
}

/// Replacement scalar for a named simple type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeOverride {
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: ScalarKind,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub max_digits: Option<u32>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
}

// Default value functions
fn default_max_length_factor() -> u32 {
    1
}

fn default_text_threshold() -> u32 {
    500
}

fn default_identifier_limit() -> usize {
    63
}

fn default_bag_field_name() -> String {
    "attrs".to_string()
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_length_factor: default_max_length_factor(),
            text_threshold: default_text_threshold(),
            identifier_limit: default_identifier_limit(),
            bag_field_name: default_bag_field_name(),
        }
    }
}

/// Union of two lists, `primary` entries first
fn union<T: Clone + PartialEq>(primary: &[T], fallback: &[T]) -> Vec<T> {
    let mut out = primary.to_vec();
    for item in fallback {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

impl EntityOptions {
    /// Layer `primary` over `fallback`: lists are unioned with `primary`
    /// entries first, single values come from `primary` when set. Keyed
    /// records are looked up first-match, so `primary` wins there too.
    pub fn layered(primary: &Self, fallback: &Self) -> Self {
        Self {
            drop_fields: union(&primary.drop_fields, &fallback.drop_fields),
            drop_after_processing_fields: union(
                &primary.drop_after_processing_fields,
                &fallback.drop_after_processing_fields,
            ),
            parent_field: primary.parent_field.clone().or_else(|| fallback.parent_field.clone()),
            parent_type: primary.parent_type.clone().or_else(|| fallback.parent_type.clone()),
            include_parent_fields: primary.include_parent_fields.or(fallback.include_parent_fields),
            custom: primary.custom.or(fallback.custom),
            is_abstract: primary.is_abstract.or(fallback.is_abstract),
            rename: union(&primary.rename, &fallback.rename),
            coalesce_fields: union(&primary.coalesce_fields, &fallback.coalesce_fields),
            flatten_fields: union(&primary.flatten_fields, &fallback.flatten_fields),
            flatten_prefixes: union(&primary.flatten_prefixes, &fallback.flatten_prefixes),
            array_fields: union(&primary.array_fields, &fallback.array_fields),
            many_to_many_fields: union(&primary.many_to_many_fields, &fallback.many_to_many_fields),
            many_to_many_field_overrides: union(
                &primary.many_to_many_field_overrides,
                &fallback.many_to_many_field_overrides,
            ),
            one_to_many_fields: union(&primary.one_to_many_fields, &fallback.one_to_many_fields),
            one_to_many_field_overrides: union(
                &primary.one_to_many_field_overrides,
                &fallback.one_to_many_field_overrides,
            ),
            one_to_one_fields: union(&primary.one_to_one_fields, &fallback.one_to_one_fields),
            json_fields: union(&primary.json_fields, &fallback.json_fields),
            foreign_key_overrides: union(&primary.foreign_key_overrides, &fallback.foreign_key_overrides),
            reference_extension_fields: union(
                &primary.reference_extension_fields,
                &fallback.reference_extension_fields,
            ),
            null_fields: union(&primary.null_fields, &fallback.null_fields),
            primary_key: primary.primary_key.clone().or_else(|| fallback.primary_key.clone()),
            unique_fields: union(&primary.unique_fields, &fallback.unique_fields),
            index_fields: union(&primary.index_fields, &fallback.index_fields),
            override_field_kind: union(&primary.override_field_kind, &fallback.override_field_kind),
            field_options: union(&primary.field_options, &fallback.field_options),
            field_docs: union(&primary.field_docs, &fallback.field_docs),
            add_fields: union(&primary.add_fields, &fallback.add_fields),
            number_field: primary.number_field.clone().or_else(|| fallback.number_field.clone()),
            match_fields: if primary.match_fields.is_empty() {
                fallback.match_fields.clone()
            } else {
                primary.match_fields.clone()
            },
            ignore_merge_mismatch_fields: union(
                &primary.ignore_merge_mismatch_fields,
                &fallback.ignore_merge_mismatch_fields,
            ),
        }
    }
}

impl CompilerConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["entities.toml", ".entities.toml", "config/entities.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schema-entities", "schema-entities") {
            let xdg_config = config_dir.config_dir().join("entities.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Load from environment variables (SCHEMA_ENTITIES__*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_ENTITIES")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse a TOML document directly, without layering
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Rules declared for an entity, if any
    pub fn entity_rules(&self, entity: &str) -> Option<&EntityRules> {
        self.entities.iter().find(|e| e.name == entity)
    }

    /// Replacement scalar for a simple type, if any
    pub fn type_override(&self, type_name: &str) -> Option<&TypeOverride> {
        self.type_overrides.iter().find(|t| t.type_name == type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.compiler.identifier_limit, 63);
        assert_eq!(config.compiler.text_threshold, 500);
        assert_eq!(config.compiler.bag_field_name, "attrs");
    }

    #[test]
    fn test_parse_rules() {
        let config = CompilerConfig::from_toml_str(
            r#"
            [compiler]
            roots = ["Order"]

            [[type_map]]
            pattern = "(Circle|Square)Type"
            entity = "Shape"
            merge = true

            [global]
            drop_fields = ["signature"]

            [[entities]]
            name = "Order"
            json_fields = ["meta"]
            coalesce_fields = [{ pattern = "color(Name|Code)", replace = "color" }]
            field_options = [{ field = "number", unique = true }]
            override_field_kind = [{ field = "notes", kind = "text" }]

            [[entities.if_type]]
            pattern = "Legacy.*"
            drop_fields = ["legacyCode"]
            "#,
        )
        .unwrap();

        assert_eq!(config.compiler.roots, vec!["Order"]);
        assert!(config.type_map[0].merge);
        let order = config.entity_rules("Order").unwrap();
        assert_eq!(order.options.json_fields, vec!["meta"]);
        assert_eq!(order.options.coalesce_fields[0].replace, "color");
        assert_eq!(order.options.field_options[0].unique, Some(true));
        assert_eq!(order.options.override_field_kind[0].kind, ScalarKind::Text);
        assert_eq!(order.if_type[0].options.drop_fields, vec!["legacyCode"]);
    }

    #[test]
    fn test_layered_lists_and_values() {
        let entity = EntityOptions {
            drop_fields: vec!["a".into()],
            primary_key: Some("id".into()),
            ..Default::default()
        };
        let global = EntityOptions {
            drop_fields: vec!["b".into(), "a".into()],
            primary_key: Some("pk".into()),
            number_field: Some("number".into()),
            ..Default::default()
        };
        let merged = EntityOptions::layered(&entity, &global);
        assert_eq!(merged.drop_fields, vec!["a", "b"]);
        assert_eq!(merged.primary_key.as_deref(), Some("id"));
        assert_eq!(merged.number_field.as_deref(), Some("number"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[compiler]\nroots = [\"Invoice\"]\ntext_threshold = 300\n").unwrap();

        let config = CompilerConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.compiler.roots, vec!["Invoice"]);
        assert_eq!(config.compiler.text_threshold, 300);
    }
}
