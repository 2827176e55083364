//! Error types for the entity compiler
//!
//! Every variant here is fatal: compilation stops and no partial graph is
//! returned. Recoverable situations go through [`crate::diagnostics`].

use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;

/// Fatal compiler errors
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unresolved type: {name}{hint}")]
    UnresolvedType { name: String, hint: String },

    #[error("Cyclic group reference: {chain}")]
    CyclicGroupReference { chain: String },

    #[error("Entity {entity} already exists (from {existing}); type {type_path} maps to it without merge permission")]
    DuplicateEntity {
        entity: String,
        type_path: String,
        existing: String,
    },

    #[error("Field {field} declared twice in entity {entity}")]
    DuplicateField { entity: String, field: String },

    #[error(
        "Caught maxOccurs={max_occurs} in {path} (@type={type_name}). Consider adding it to \
         many_to_many_fields, one_to_many_fields, array_fields, or json_fields"
    )]
    Cardinality {
        path: String,
        max_occurs: String,
        type_name: String,
    },

    #[error("Unmergeable field {path} in entity {entity}: {first_type} and {second_type} differ\n{diff}")]
    MergeMismatch {
        entity: String,
        path: String,
        first_type: String,
        second_type: String,
        diff: String,
    },

    #[error("{entity}.{field} is a primary key but would be nullable")]
    NullablePrimaryKey { entity: String, field: String },

    #[error("Required dependency cycle between entities: {entities}")]
    DependencyCycle { entities: String },

    #[error("{name} ({path}) exceeds the {limit} character identifier limit")]
    IdentifierTooLong {
        path: String,
        name: String,
        limit: usize,
    },

    #[error("Flattening {path} (type {type_name}) produced no fields")]
    EmptyFlatten { path: String, type_name: String },

    #[error("{relation} field {path}: content is not a complex type")]
    NotComplexType { path: String, relation: &'static str },

    #[error("Array field {path}: items are not a simple type")]
    NotSimpleType { path: String },

    #[error("Different parents {parents} for types {types}")]
    DifferentParents { parents: String, types: String },

    #[error("Entity {entity} (types {types}) derives from {parent}, which is not merged yet")]
    MissingParent {
        entity: String,
        parent: String,
        types: String,
    },

    #[error("Cannot parse default value '{value}' of {path} as {base}")]
    InvalidDefault {
        path: String,
        value: String,
        base: String,
    },

    #[error("Invalid rule pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("parent_field {field} is set for {type_path} but no such element exists")]
    MissingParentField { type_path: String, field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl CompileError {
    /// Unresolved type error with a "did you mean" hint picked from `known`
    pub fn unresolved<'k>(name: &str, known: impl IntoIterator<Item = &'k str>) -> Self {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let best = known
            .into_iter()
            .filter_map(|candidate| {
                matcher
                    .fuzzy_match(candidate, name)
                    .map(|score| (score, candidate))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)));

        let hint = match best {
            Some((_, candidate)) => format!(" (did you mean {}?)", candidate),
            None => String::new(),
        };

        Self::UnresolvedType {
            name: name.to_string(),
            hint,
        }
    }
}
