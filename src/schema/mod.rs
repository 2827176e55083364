//! Schema Type Graph
//!
//! The read-only input of the compiler: XSD components as produced by an
//! external schema parser, serialized as JSON documents. One
//! [`SchemaDocument`] per schema file; imports are inlined by the
//! [`loader`] and everything is resolved into a [`SchemaIndex`].
//!
//! Names may carry a namespace prefix (`ns:Name`). Names starting with
//! `xs:` are XSD built-ins.

pub mod index;
pub mod loader;

pub use index::SchemaIndex;
pub use loader::{load_directory, load_file};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of XSD built-in type names
pub const XS_PREFIX: &str = "xs:";

/// Is this a built-in XSD type name?
pub fn is_builtin(name: &str) -> bool {
    name.starts_with(XS_PREFIX)
}

// =============================================================================
// Document
// =============================================================================

/// A single schema file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Namespace prefix table (prefix -> URI); "" is the default namespace
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub complex_types: Vec<ComplexType>,
    #[serde(default)]
    pub simple_types: Vec<SimpleType>,
    /// Top-level element declarations
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Top-level attribute declarations
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub attribute_groups: Vec<AttributeGroup>,
    /// Named model groups (xs:group)
    #[serde(default)]
    pub groups: Vec<ModelGroup>,
}

/// xs:import with a schema location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    #[serde(default)]
    pub namespace: Option<String>,
    /// Path relative to the importing document
    pub location: String,
}

// =============================================================================
// Occurrence Bounds
// =============================================================================

/// maxOccurs of a particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawOccurs", into = "RawOccurs")]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

impl MaxOccurs {
    pub fn is_one(&self) -> bool {
        matches!(self, Self::Bounded(1))
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl Default for MaxOccurs {
    fn default() -> Self {
        Self::Bounded(1)
    }
}

impl fmt::Display for MaxOccurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{}", n),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawOccurs {
    Count(u32),
    Word(String),
}

impl TryFrom<RawOccurs> for MaxOccurs {
    type Error = String;

    fn try_from(raw: RawOccurs) -> Result<Self, Self::Error> {
        match raw {
            RawOccurs::Count(n) => Ok(Self::Bounded(n)),
            RawOccurs::Word(w) if w == "unbounded" => Ok(Self::Unbounded),
            RawOccurs::Word(w) => w
                .parse()
                .map(Self::Bounded)
                .map_err(|_| format!("invalid maxOccurs: {}", w)),
        }
    }
}

impl From<MaxOccurs> for RawOccurs {
    fn from(occurs: MaxOccurs) -> Self {
        match occurs {
            MaxOccurs::Bounded(n) => RawOccurs::Count(n),
            MaxOccurs::Unbounded => RawOccurs::Word("unbounded".to_string()),
        }
    }
}

fn default_min_occurs() -> u32 {
    1
}

// =============================================================================
// Complex Types
// =============================================================================

/// A complex type definition, named or anonymous
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplexType {
    /// None for anonymous types nested in an element
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeItem>,
    /// Sequence or choice
    #[serde(default)]
    pub content: Option<Particle>,
    /// complexContent extension
    #[serde(default)]
    pub extension: Option<Extension>,
    /// simpleContent: a scalar wrapped in a complex shell
    #[serde(default)]
    pub simple_content: Option<SimpleContent>,
    /// Element that lexically contains this type (anonymous types only)
    #[serde(skip)]
    pub container: Option<Container>,
}

impl ComplexType {
    /// Display name for messages
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Back pointer from an anonymous type to its enclosing element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub element: String,
    pub documentation: Option<String>,
}

/// complexContent/extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub base: String,
    #[serde(default)]
    pub attributes: Vec<AttributeItem>,
    #[serde(default)]
    pub content: Option<Particle>,
}

impl Extension {
    /// Extension that adds neither attributes nor content
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.content.is_none()
    }
}

/// simpleContent/extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleContent {
    pub base: String,
    #[serde(default)]
    pub attributes: Vec<AttributeItem>,
}

// =============================================================================
// Particles
// =============================================================================

/// A content model particle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Particle {
    Element(Element),
    Sequence(Compositor),
    Choice(Compositor),
    /// Reference to a named model group; expanded by the index
    Group(GroupRef),
    /// xs:any
    Any(Wildcard),
}

/// xs:sequence / xs:choice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compositor {
    #[serde(default = "default_min_occurs")]
    pub min_occurs: u32,
    #[serde(default)]
    pub max_occurs: MaxOccurs,
    #[serde(default)]
    pub particles: Vec<Particle>,
}

/// xs:group ref="..."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default = "default_min_occurs")]
    pub min_occurs: u32,
    #[serde(default)]
    pub max_occurs: MaxOccurs,
}

/// xs:any
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wildcard {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default = "default_min_occurs")]
    pub min_occurs: u32,
    #[serde(default)]
    pub max_occurs: MaxOccurs,
}

/// Element particle (local or top-level)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub name: Option<String>,
    /// ref="..." to a top-level element; resolved by the index
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub complex_type: Option<Box<ComplexType>>,
    #[serde(default)]
    pub simple_type: Option<SimpleType>,
    #[serde(default = "default_min_occurs")]
    pub min_occurs: u32,
    #[serde(default)]
    pub max_occurs: MaxOccurs,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub fixed: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
}

impl Element {
    /// Local name (or the referenced name before resolution)
    pub fn local_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.reference.as_deref())
            .unwrap_or("")
    }

    pub fn is_optional(&self) -> bool {
        self.min_occurs == 0
    }

    /// default= or fixed=
    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref().or(self.fixed.as_deref())
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Entry in an attribute list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeItem {
    Attribute(Attribute),
    /// xs:attributeGroup ref="..."
    Group(AttributeGroupRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeGroupRef {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Attribute `use`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeUse {
    #[default]
    Optional,
    Required,
    Prohibited,
}

/// Attribute declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub simple_type: Option<SimpleType>,
    #[serde(default, rename = "use")]
    pub usage: AttributeUse,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub fixed: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
}

impl Attribute {
    pub fn local_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.reference.as_deref())
            .unwrap_or("")
    }

    pub fn is_required(&self) -> bool {
        self.usage == AttributeUse::Required
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref().or(self.fixed.as_deref())
    }
}

/// xs:attributeGroup definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeGroup {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeItem>,
}

/// xs:group definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGroup {
    pub name: String,
    pub particle: Particle,
}

// =============================================================================
// Simple Types
// =============================================================================

/// A simple type: restriction of a base with facets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleType {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    pub base: String,
    #[serde(default)]
    pub facets: Facets,
}

/// Constraining facets of a restriction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub enumerations: Vec<Enumeration>,
    #[serde(default)]
    pub total_digits: Option<u32>,
    #[serde(default)]
    pub fraction_digits: Option<u32>,
    #[serde(default)]
    pub min_inclusive: Option<String>,
    #[serde(default)]
    pub max_inclusive: Option<String>,
    #[serde(default)]
    pub min_exclusive: Option<String>,
    #[serde(default)]
    pub max_exclusive: Option<String>,
}

/// xs:enumeration value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumeration {
    pub value: String,
    #[serde(default)]
    pub documentation: Option<String>,
}
