//! Entity Graph Compiler
//!
//! Walks the type graph from the configured roots, builds one entity per
//! reachable type path, merges entities that share a name and returns
//! them in emission order.
//!
//! ## Pipeline
//!
//! ```text
//! roots ──> builder ──> classify ──> (entities by type path)
//!              ^            │
//!              └────────────┘  relations build their targets
//!
//! entities ──> merge ──> order ──> CompiledGraph
//! ```

pub mod naming;
pub mod rules;
pub mod scalar;

mod builder;
mod classify;
mod merge;
mod order;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostics;
use crate::entity::Entity;
use crate::error::{CompileError, Result};
use crate::schema::SchemaIndex;

use naming::NameResolver;
use rules::RuleBook;
use scalar::ScalarDeriver;

// =============================================================================
// Compiled Graph
// =============================================================================

/// Compiler output: entities in emission order plus warnings
#[derive(Debug, Clone, Serialize)]
pub struct CompiledGraph {
    pub entities: Vec<Entity>,
    pub diagnostics: Diagnostics,
}

impl CompiledGraph {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Position of an entity in emission order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.name == name)
    }

    /// Stable fingerprint of the entity list
    pub fn fingerprint(&self) -> Result<Checksum> {
        Checksum::of_entities(&self.entities)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entities)?)
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// One compilation run. Holds the per-run memo tables; discard after use.
pub struct Compiler<'a> {
    index: &'a SchemaIndex,
    config: &'a CompilerConfig,
    naming: NameResolver,
    rules: RuleBook<'a>,
    scalars: ScalarDeriver,
    /// Entities under construction, keyed by type path
    entities: BTreeMap<String, Entity>,
    /// Type paths already walked
    built: BTreeSet<String>,
    /// Root type paths
    roots: BTreeSet<String>,
    /// Pending attribute bag entries per type path
    bags: BTreeMap<String, BTreeMap<String, String>>,
    diagnostics: Diagnostics,
    choice_groups: u32,
}

impl<'a> Compiler<'a> {
    /// Validate the configuration against a schema index
    pub fn new(index: &'a SchemaIndex, config: &'a CompilerConfig) -> Result<Self> {
        Ok(Self {
            index,
            config,
            naming: NameResolver::new(&config.type_map)?,
            rules: RuleBook::new(config)?,
            scalars: ScalarDeriver::new(),
            entities: BTreeMap::new(),
            built: BTreeSet::new(),
            roots: BTreeSet::new(),
            bags: BTreeMap::new(),
            diagnostics: Diagnostics::new(),
            choice_groups: 0,
        })
    }

    /// Compile everything reachable from `roots` (type names, or
    /// `/element` for a top-level element's anonymous type)
    pub fn compile(mut self, roots: &[String]) -> Result<CompiledGraph> {
        let index = self.index;

        let mut resolved = Vec::with_capacity(roots.len());
        for selector in roots {
            let (path, ct) = index.resolve_root(selector)?;
            self.roots.insert(path.clone());
            resolved.push((path, ct));
        }
        info!(roots = resolved.len(), "compiling entity graph");

        for (path, ct) in resolved {
            self.build_entity(&path, Some(ct), Vec::new())?;
        }
        debug!(type_paths = self.entities.len(), "walk finished");

        let Compiler {
            entities,
            mut rules,
            mut diagnostics,
            ..
        } = self;

        let merged = merge::merge_entities(entities.into_values().collect(), &mut rules)?;
        let entities = order::emission_order(merged, &mut diagnostics)?;

        info!(
            entities = entities.len(),
            warnings = diagnostics.warning_count(),
            "compilation finished"
        );
        Ok(CompiledGraph {
            entities,
            diagnostics,
        })
    }

    fn next_choice_group(&mut self) -> u32 {
        self.choice_groups += 1;
        self.choice_groups
    }

    fn entity_mut(&mut self, type_path: &str) -> Result<&mut Entity> {
        let index = self.index;
        self.entities
            .get_mut(type_path)
            .ok_or_else(|| CompileError::unresolved(type_path, index.complex_type_names()))
    }

    /// First entity built under `name`
    fn entity_named(&self, name: &str) -> Option<&Entity> {
        self.entities.values().find(|e| e.name == name)
    }
}

/// Compile the roots listed in the configuration
pub fn compile(index: &SchemaIndex, config: &CompilerConfig) -> Result<CompiledGraph> {
    Compiler::new(index, config)?.compile(&config.compiler.roots)
}
