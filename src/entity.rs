//! Entity Graph Model
//!
//! The compiler's output: entities with typed fields, relations and
//! dependency sets. Renderer-agnostic; everything here serializes to JSON.
//!
//! Field categories are a closed sum type ([`FieldKind`]) with
//! category-specific payloads, so a to-one field can't carry scalar facets
//! and a scalar can't carry a target.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::schema::MaxOccurs;

// =============================================================================
// Scalar Representation
// =============================================================================

/// Storage kind of a scalar value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Binary,
    Boolean,
    SmallInteger,
    Integer,
    BigInteger,
    PositiveInteger,
    Decimal,
    Float,
    Date,
    DateTime,
    /// Bounded text
    Char,
    /// Unbounded text
    Text,
    /// Caller-defined kind, passed through to the renderer
    Custom(String),
}

impl ScalarKind {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::SmallInteger | Self::Integer | Self::BigInteger | Self::PositiveInteger
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, Self::Decimal | Self::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Boolean => write!(f, "boolean"),
            Self::SmallInteger => write!(f, "small_integer"),
            Self::Integer => write!(f, "integer"),
            Self::BigInteger => write!(f, "big_integer"),
            Self::PositiveInteger => write!(f, "positive_integer"),
            Self::Decimal => write!(f, "decimal"),
            Self::Float => write!(f, "float"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "date_time"),
            Self::Char => write!(f, "char"),
            Self::Text => write!(f, "text"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A typed literal: default values and range bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    /// Kept as text to preserve precision
    Decimal(String),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Literal {
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date(_) | Self::DateTime(_))
    }
}

/// Value constraint derived from facets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    MinLength(u32),
    Regex(String),
    MinValue {
        value: Literal,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        exclusive: bool,
    },
    MaxValue {
        value: Literal,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        exclusive: bool,
    },
}

/// One member of a closed choice set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

/// Everything known about a scalar's value space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRepr {
    pub kind: ScalarKind,
    /// Named simple type this was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_digits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    /// Empty values rejected (minLength=1)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_blank: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Literal>,
}

impl ScalarRepr {
    pub fn new(kind: ScalarKind) -> Self {
        Self {
            kind,
            source_type: None,
            max_length: None,
            max_digits: None,
            decimal_places: None,
            choices: Vec::new(),
            validators: Vec::new(),
            not_blank: false,
            default: None,
        }
    }
}

// =============================================================================
// Field
// =============================================================================

/// Referential action on delete of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Shared (named) target
    Protect,
    /// Owned target
    Cascade,
}

/// Value category of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarRepr),
    /// Array of scalars
    Collection(ScalarRepr),
    ToOne {
        target: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        one_to_one: bool,
        on_delete: OnDelete,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        related_name: Option<String>,
    },
    /// Owned children; `target.reverse_field` points back here
    ReverseOneToMany { target: String, reverse_field: String },
    ReverseOneToOne { target: String, reverse_field: String },
    ManyToMany {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        related_name: Option<String>,
    },
    /// Opaque attribute bag: dotted path -> documentation
    JsonBag { entries: BTreeMap<String, String> },
    /// Matched a drop rule; never materialized
    Dropped,
    /// Element that became the inheritance link
    ParentAlias,
    /// Later occurrence of a coalesced field
    CoalescedAlias { into: String },
}

impl FieldKind {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Collection(_) => "collection",
            Self::ToOne { .. } => "to_one",
            Self::ReverseOneToMany { .. } => "reverse_one_to_many",
            Self::ReverseOneToOne { .. } => "reverse_one_to_one",
            Self::ManyToMany { .. } => "many_to_many",
            Self::JsonBag { .. } => "json_bag",
            Self::Dropped => "dropped",
            Self::ParentAlias => "parent_alias",
            Self::CoalescedAlias { .. } => "coalesced_alias",
        }
    }

    /// Target entity of a relational field
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ToOne { target, .. }
            | Self::ReverseOneToMany { target, .. }
            | Self::ReverseOneToOne { target, .. }
            | Self::ManyToMany { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Holds many values per row
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Self::Collection(_) | Self::ReverseOneToMany { .. } | Self::ManyToMany { .. }
        )
    }

    /// Produces a physical column or relation
    pub fn is_materialized(&self) -> bool {
        !matches!(
            self,
            Self::Dropped | Self::ParentAlias | Self::CoalescedAlias { .. }
        )
    }

    pub fn scalar(&self) -> Option<&ScalarRepr> {
        match self {
            Self::Scalar(repr) | Self::Collection(repr) => Some(repr),
            _ => None,
        }
    }

    pub fn scalar_mut(&mut self) -> Option<&mut ScalarRepr> {
        match self {
            Self::Scalar(repr) | Self::Collection(repr) => Some(repr),
            _ => None,
        }
    }

    /// Outgoing reference that the owner depends on for emission
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::ToOne { target, .. } | Self::ManyToMany { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Source annotation attached by merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "types", rename_all = "snake_case")]
pub enum Annotation {
    /// Missing from these (minority of) source types, hence nullable
    NullIn(Vec<String>),
    /// Present only in these source types
    OnlyIn(Vec<String>),
    /// Dropped in one source type and declared in another
    ReplacesDropped(Vec<String>),
    /// Allowed mismatch: representation in another source type
    MergeVariant(Vec<String>),
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullIn(types) => write!(f, "NULL in {}", types.join(",")),
            Self::OnlyIn(types) => write!(f, "Only in {}", types.join(",")),
            Self::ReplacesDropped(types) => {
                write!(f, "The original is dropped in {} and replaced by an added one", types.join(","))
            }
            Self::MergeVariant(variant) => write!(f, "Variant: {}", variant.join(" ")),
        }
    }
}

/// A member of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Source path relative to the owning type (`a.b`, `@attr`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dotted_path: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documentation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    /// Mutually exclusive xs:choice branch group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_group: Option<u32>,
    /// Effective multiplicity of the source particle
    #[serde(default, skip_serializing_if = "MaxOccurs::is_one")]
    pub max_occurs: MaxOccurs,
    /// Name before coalescing, for coalesced fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coalesced_from: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub db_index: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, dotted_path: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            dotted_path: dotted_path.into(),
            kind,
            nullable: false,
            documentation: Vec::new(),
            annotations: Vec::new(),
            choice_group: None,
            max_occurs: MaxOccurs::default(),
            coalesced_from: None,
            primary_key: false,
            unique: false,
            db_index: false,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.documentation.push(doc.into());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn is_materialized(&self) -> bool {
        self.kind.is_materialized()
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Import requirements of an entity's rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Imports {
    pub decimal: bool,
    pub date: bool,
}

/// A synthesized relational type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    /// Type paths this entity was built from (several when merged)
    pub source_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documentation: Vec<String>,
    /// Entities referenced by to-one/many-to-many fields or inheritance
    pub dependencies: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_fields: Vec<String>,
    pub imports: Imports,
}

impl Entity {
    pub fn new(name: impl Into<String>, type_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_types: vec![type_path.into()],
            parent: None,
            fields: Vec::new(),
            is_abstract: false,
            documentation: Vec::new(),
            dependencies: BTreeSet::new(),
            number_field: None,
            match_fields: Vec::new(),
            imports: Imports::default(),
        }
    }

    /// Materialized field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name && f.is_materialized())
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name && f.is_materialized())
    }

    /// Field by merge identity
    pub fn field_by_identity(&self, name: &str, dotted_path: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.dotted_path == dotted_path)
    }

    pub fn materialized_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_materialized())
    }

    /// Dependencies that must be emitted first: inheritance and
    /// non-nullable to-one references
    pub fn required_dependencies(&self) -> BTreeSet<&str> {
        let mut required: BTreeSet<&str> = self.parent.iter().map(String::as_str).collect();
        for field in &self.fields {
            if let FieldKind::ToOne { target, .. } = &field.kind {
                if !field.nullable {
                    required.insert(target);
                }
            }
        }
        required.remove(self.name.as_str());
        required
    }

    /// Recompute dependencies and imports from the field list
    pub fn close(&mut self) {
        for field in &self.fields {
            if let Some(target) = field.kind.dependency() {
                self.dependencies.insert(target.to_string());
            }
        }
        if let Some(parent) = &self.parent {
            self.dependencies.insert(parent.clone());
        }

        let mut imports = Imports::default();
        for repr in self.fields.iter().filter_map(|f| f.kind.scalar()) {
            imports.decimal |= repr.kind == ScalarKind::Decimal;
            imports.date |= repr.kind.is_temporal()
                || repr.default.as_ref().map(Literal::is_temporal).unwrap_or(false)
                || repr.validators.iter().any(|v| match v {
                    Validator::MinValue { value, .. } | Validator::MaxValue { value, .. } => {
                        value.is_temporal()
                    }
                    _ => false,
                });
        }
        self.imports = imports;
    }
}
