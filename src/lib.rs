//! Schema Entities
//!
//! Compiles a hierarchical XSD-style type graph into a normalized relational
//! entity graph: entities with typed fields, inheritance links and
//! relationships, ready for a persistence-layer code generator.
//!
//! ## Features
//!
//! - **Schema Index**: Imports inlined under their namespace prefix, groups expanded
//! - **Naming**: Configurable type-path to entity-name mapping with anchored patterns
//! - **Field Classification**: Scalars, references, collections and JSON attribute bags
//! - **Merging**: Entities sharing a name fold into one, with mismatch reports
//! - **Emission Order**: Dependencies before dependents, required cycles rejected
//! - **Fingerprints**: SHA256 over the emitted entity list
//!
//! ## Architecture
//!
//! ```text
//! schema/ ──> SchemaIndex ──> compile::Compiler ──> CompiledGraph
//!   loader       index          naming, rules,        entities
//!                               scalar, classify,     diagnostics
//!                               builder, merge,
//!                               order
//! ```

pub mod checksum;
pub mod compile;
pub mod config;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod schema;

pub use checksum::Checksum;
pub use compile::{compile, CompiledGraph, Compiler};
pub use config::CompilerConfig;
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use entity::{Annotation, Entity, Field, FieldKind, Literal, OnDelete, ScalarKind, ScalarRepr};
pub use error::{CompileError, Result};
pub use schema::{SchemaDocument, SchemaIndex};
