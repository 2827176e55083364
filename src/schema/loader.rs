//! Schema Loading
//!
//! Reads schema documents from the filesystem and inlines their imports into
//! one logical document. Imported top-level names are prefixed with the
//! namespace prefix the importing document binds to the import's namespace,
//! so two files declaring `AddressType` in different namespaces coexist.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{
    is_builtin, AttributeItem, ComplexType, Element, Particle, SchemaDocument, SimpleType,
};
use crate::error::Result;

/// Load a schema document and inline everything it imports
pub fn load_file(path: &Path) -> Result<SchemaDocument> {
    let mut root = read_document(path)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut seen_locations = BTreeSet::new();
    seen_locations.insert(normalize(path));
    inline_imports(&mut root, &base_dir, &mut seen_locations)?;

    Ok(root)
}

/// Load every schema document under a directory.
///
/// Documents imported by another document in the directory are only
/// inlined through their importer; the remaining entry documents are
/// merged in path order.
pub fn load_directory(schema_dir: &Path) -> Result<SchemaDocument> {
    let mut paths: Vec<PathBuf> = WalkDir::new(schema_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    let mut imported = BTreeSet::new();
    for path in &paths {
        let doc = read_document(path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for import in &doc.imports {
            imported.insert(normalize(&dir.join(&import.location)));
        }
    }

    let mut merged = SchemaDocument::default();
    let mut seen_locations = BTreeSet::new();
    for path in paths {
        let key = normalize(&path);
        if imported.contains(&key) || !seen_locations.insert(key) {
            continue;
        }
        let mut doc = read_document(&path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        inline_imports(&mut doc, &dir, &mut seen_locations)?;
        merge_document(&mut merged, doc);
    }

    Ok(merged)
}

fn read_document(path: &Path) -> Result<SchemaDocument> {
    tracing::debug!(path = %path.display(), "reading schema document");
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Inline imports breadth-first. Nested imports are resolved relative to
/// the root document, and each namespace prefix is merged once.
pub(crate) fn inline_imports(
    root: &mut SchemaDocument,
    base_dir: &Path,
    seen_locations: &mut BTreeSet<PathBuf>,
) -> Result<()> {
    let mut seen_prefixes = BTreeSet::new();
    let mut pending: VecDeque<_> = std::mem::take(&mut root.imports).into();

    while let Some(import) = pending.pop_front() {
        let prefix = import.namespace.as_ref().and_then(|uri| {
            root.namespaces
                .iter()
                .find(|(prefix, bound)| !prefix.is_empty() && *bound == uri)
                .map(|(prefix, _)| prefix.clone())
        });

        let location = base_dir.join(&import.location);
        let first_time = match &prefix {
            Some(p) => seen_prefixes.insert(p.clone()) && seen_locations.insert(normalize(&location)),
            None => seen_locations.insert(normalize(&location)),
        };
        if !first_time {
            continue;
        }

        let mut sub = read_document(&location)?;
        pending.extend(std::mem::take(&mut sub.imports));
        if let Some(prefix) = &prefix {
            qualify_document(&mut sub, prefix);
        }
        merge_document(root, sub);
    }

    Ok(())
}

/// Append `sub`'s declarations to `root`; namespace bindings already in
/// `root` win.
pub(crate) fn merge_document(root: &mut SchemaDocument, sub: SchemaDocument) {
    for (prefix, uri) in sub.namespaces {
        root.namespaces.entry(prefix).or_insert(uri);
    }
    root.imports.extend(sub.imports);
    root.complex_types.extend(sub.complex_types);
    root.simple_types.extend(sub.simple_types);
    root.elements.extend(sub.elements);
    root.attributes.extend(sub.attributes);
    root.attribute_groups.extend(sub.attribute_groups);
    root.groups.extend(sub.groups);
}

// =============================================================================
// Qualification
// =============================================================================

fn qualify(name: &mut String, prefix: &str) {
    if !name.contains(':') && !is_builtin(name) {
        *name = format!("{}:{}", prefix, name);
    }
}

fn qualify_opt(name: &mut Option<String>, prefix: &str) {
    if let Some(name) = name {
        qualify(name, prefix);
    }
}

/// Prefix every top-level name and every unqualified reference in `doc`
pub(crate) fn qualify_document(doc: &mut SchemaDocument, prefix: &str) {
    for ct in &mut doc.complex_types {
        qualify_opt(&mut ct.name, prefix);
        qualify_complex(ct, prefix);
    }
    for st in &mut doc.simple_types {
        qualify_opt(&mut st.name, prefix);
        qualify_simple(st, prefix);
    }
    for el in &mut doc.elements {
        qualify_opt(&mut el.name, prefix);
        qualify_element(el, prefix);
    }
    for attr in &mut doc.attributes {
        qualify_opt(&mut attr.name, prefix);
        qualify_opt(&mut attr.type_name, prefix);
        qualify_opt(&mut attr.reference, prefix);
    }
    for group in &mut doc.attribute_groups {
        qualify(&mut group.name, prefix);
        qualify_attributes(&mut group.attributes, prefix);
    }
    for group in &mut doc.groups {
        qualify(&mut group.name, prefix);
        qualify_particle(&mut group.particle, prefix);
    }
}

fn qualify_complex(ct: &mut ComplexType, prefix: &str) {
    qualify_attributes(&mut ct.attributes, prefix);
    if let Some(content) = &mut ct.content {
        qualify_particle(content, prefix);
    }
    if let Some(ext) = &mut ct.extension {
        qualify(&mut ext.base, prefix);
        qualify_attributes(&mut ext.attributes, prefix);
        if let Some(content) = &mut ext.content {
            qualify_particle(content, prefix);
        }
    }
    if let Some(sc) = &mut ct.simple_content {
        qualify(&mut sc.base, prefix);
        qualify_attributes(&mut sc.attributes, prefix);
    }
}

fn qualify_simple(st: &mut SimpleType, prefix: &str) {
    qualify(&mut st.base, prefix);
}

fn qualify_element(el: &mut Element, prefix: &str) {
    qualify_opt(&mut el.type_name, prefix);
    qualify_opt(&mut el.reference, prefix);
    if let Some(ct) = &mut el.complex_type {
        qualify_complex(ct, prefix);
    }
    if let Some(st) = &mut el.simple_type {
        qualify_simple(st, prefix);
    }
}

fn qualify_attributes(items: &mut [AttributeItem], prefix: &str) {
    for item in items {
        match item {
            AttributeItem::Attribute(attr) => {
                qualify_opt(&mut attr.type_name, prefix);
                qualify_opt(&mut attr.reference, prefix);
                if let Some(st) = &mut attr.simple_type {
                    qualify_simple(st, prefix);
                }
            }
            AttributeItem::Group(group) => qualify(&mut group.reference, prefix),
        }
    }
}

fn qualify_particle(particle: &mut Particle, prefix: &str) {
    match particle {
        Particle::Element(el) => qualify_element(el, prefix),
        Particle::Sequence(c) | Particle::Choice(c) => {
            for p in &mut c.particles {
                qualify_particle(p, prefix);
            }
        }
        Particle::Group(group) => qualify(&mut group.reference, prefix),
        Particle::Any(_) => {}
    }
}
