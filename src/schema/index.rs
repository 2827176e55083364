//! Schema Index
//!
//! Resolved, read-only view of a [`SchemaDocument`]:
//! - namespace-qualified lookup with default-namespace simplification
//! - element/attribute `ref` resolution
//! - attribute-group and model-group expansion (cycles rejected)
//! - extension/restriction chain walk to the primitive base
//! - container back pointers for anonymous types
//!
//! After [`SchemaIndex::build`] no `Particle::Group`, `AttributeItem::Group`
//! or `ref` remains anywhere in the indexed types.

use std::collections::{BTreeMap, BTreeSet};

use super::{
    is_builtin, Attribute, AttributeGroup, AttributeItem, ComplexType, Compositor, Container,
    Element, ModelGroup, Particle, SchemaDocument, SimpleType,
};
use crate::error::{CompileError, Result};

/// Resolved type graph
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    namespaces: BTreeMap<String, String>,
    complex_types: BTreeMap<String, ComplexType>,
    simple_types: BTreeMap<String, SimpleType>,
    elements: BTreeMap<String, Element>,
}

impl SchemaIndex {
    /// Resolve a loaded document
    pub fn build(doc: SchemaDocument) -> Result<Self> {
        let names = Namespaces {
            table: doc.namespaces.clone(),
        };
        let normalizer = Normalizer {
            names: &names,
            attribute_groups: doc
                .attribute_groups
                .iter()
                .map(|g| (names.canonical(&g.name), g))
                .collect(),
            groups: doc.groups.iter().map(|g| (names.canonical(&g.name), g)).collect(),
            elements: doc
                .elements
                .iter()
                .filter_map(|e| e.name.as_ref().map(|n| (names.canonical(n), e)))
                .collect(),
            attributes: doc
                .attributes
                .iter()
                .filter_map(|a| a.name.as_ref().map(|n| (names.canonical(n), a)))
                .collect(),
        };

        let mut complex_types = BTreeMap::new();
        for ct in &doc.complex_types {
            let Some(name) = &ct.name else { continue };
            let mut stack = Vec::new();
            let normalized = normalizer.complex(ct, None, &mut stack)?;
            complex_types.insert(names.canonical(name), normalized);
        }

        let mut simple_types = BTreeMap::new();
        for st in &doc.simple_types {
            let Some(name) = &st.name else { continue };
            simple_types.insert(names.canonical(name), normalizer.simple(st));
        }

        let mut elements = BTreeMap::new();
        for (name, el) in &normalizer.elements {
            let mut stack = vec![format!("element {}", name)];
            elements.insert(name.clone(), normalizer.element(el, &mut stack)?);
        }

        tracing::debug!(
            complex = complex_types.len(),
            simple = simple_types.len(),
            elements = elements.len(),
            "schema index built"
        );

        Ok(Self {
            namespaces: doc.namespaces,
            complex_types,
            simple_types,
            elements,
        })
    }

    /// Parse and resolve a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Self::build(serde_json::from_str(json)?)
    }

    /// Namespace prefix table of the root document
    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Canonical form of a type name: prefixes bound to the default
    /// namespace are stripped
    pub fn canonical(&self, name: &str) -> String {
        Namespaces {
            table: self.namespaces.clone(),
        }
        .canonical(name)
    }

    /// Look up a named complex type
    pub fn complex_type(&self, name: &str) -> Result<&ComplexType> {
        self.find_complex(name).ok_or_else(|| {
            CompileError::unresolved(name, self.complex_types.keys().map(String::as_str))
        })
    }

    pub fn find_complex(&self, name: &str) -> Option<&ComplexType> {
        self.complex_types
            .get(name)
            .or_else(|| self.complex_types.get(&self.canonical(name)))
    }

    pub fn simple_type(&self, name: &str) -> Option<&SimpleType> {
        self.simple_types
            .get(name)
            .or_else(|| self.simple_types.get(&self.canonical(name)))
    }

    /// Look up a top-level element
    pub fn element(&self, name: &str) -> Result<&Element> {
        self.elements
            .get(name)
            .or_else(|| self.elements.get(&self.canonical(name)))
            .ok_or_else(|| CompileError::unresolved(name, self.elements.keys().map(String::as_str)))
    }

    /// All named complex types, sorted
    pub fn complex_type_names(&self) -> impl Iterator<Item = &str> {
        self.complex_types.keys().map(String::as_str)
    }

    /// Type name of an element. An anonymous type that is an empty
    /// extension of a named type counts as that named type.
    pub fn effective_type_name(&self, el: &Element) -> Option<String> {
        if let Some(name) = &el.type_name {
            return Some(name.clone());
        }
        let ct = el.complex_type.as_ref()?;
        let ext = ct.extension.as_ref()?;
        if ext.is_empty() && ct.attributes.is_empty() && ct.content.is_none() {
            return Some(ext.base.clone());
        }
        None
    }

    /// Complex type of an element, if its content is complex
    pub fn element_complex_type<'s>(&'s self, el: &'s Element) -> Result<Option<&'s ComplexType>> {
        match self.effective_type_name(el) {
            Some(name) if is_builtin(&name) => Ok(None),
            Some(name) => {
                if let Some(ct) = self.find_complex(&name) {
                    Ok(Some(ct))
                } else if self.simple_type(&name).is_some() {
                    Ok(None)
                } else {
                    Err(self.unresolved_any(&name))
                }
            }
            None => Ok(el.complex_type.as_deref()),
        }
    }

    /// Resolve a root selector: a type name, or `/element` for the
    /// anonymous type of a top-level element. Returns the type path the
    /// entity is built under.
    pub fn resolve_root(&self, selector: &str) -> Result<(String, &ComplexType)> {
        if let Some(element_name) = selector.strip_prefix('/') {
            let el = self.element(element_name)?;
            let ct = self.element_complex_type(el)?.ok_or(CompileError::NotComplexType {
                path: selector.to_string(),
                relation: "Root",
            })?;
            let path = match &ct.name {
                Some(name) => name.clone(),
                None => self.canonical(element_name),
            };
            return Ok((path, ct));
        }
        let name = self.canonical(selector);
        let ct = self.complex_type(&name)?;
        Ok((name, ct))
    }

    /// Walk restriction/simpleContent bases down to the built-in primitive
    pub fn primitive_base(&self, name: &str) -> Result<String> {
        let mut current = name.to_string();
        let mut seen = BTreeSet::new();
        loop {
            if is_builtin(&current) {
                return Ok(current);
            }
            if !seen.insert(current.clone()) {
                return Err(CompileError::CyclicGroupReference {
                    chain: seen.into_iter().collect::<Vec<_>>().join(" -> "),
                });
            }
            current = if let Some(st) = self.simple_type(&current) {
                st.base.clone()
            } else if let Some(sc) = self
                .find_complex(&current)
                .and_then(|ct| ct.simple_content.as_ref())
            {
                sc.base.clone()
            } else {
                return Err(self.unresolved_any(&current));
            };
        }
    }

    /// Chain of named simple types from `name` to (excluding) its built-in base
    pub fn restriction_chain(&self, name: &str) -> Vec<&SimpleType> {
        let mut chain = Vec::new();
        let mut current = self.simple_type(name);
        while let Some(st) = current {
            if chain.len() > self.simple_types.len() {
                break;
            }
            chain.push(st);
            current = self.simple_type(&st.base);
        }
        chain
    }

    /// Element enclosing an anonymous type
    pub fn container_of<'s>(&self, ct: &'s ComplexType) -> Option<&'s Container> {
        ct.container.as_ref()
    }

    fn unresolved_any(&self, name: &str) -> CompileError {
        CompileError::unresolved(
            name,
            self.complex_types
                .keys()
                .chain(self.simple_types.keys())
                .map(String::as_str),
        )
    }
}

// =============================================================================
// Namespaces
// =============================================================================

struct Namespaces {
    table: BTreeMap<String, String>,
}

impl Namespaces {
    fn canonical(&self, name: &str) -> String {
        let Some((prefix, local)) = name.split_once(':') else {
            return name.to_string();
        };
        if prefix == "xs" {
            return name.to_string();
        }
        match (self.table.get(prefix), self.table.get("")) {
            (Some(uri), Some(default)) if uri == default => local.to_string(),
            _ => name.to_string(),
        }
    }

    fn canonical_opt(&self, name: &Option<String>) -> Option<String> {
        name.as_ref().map(|n| self.canonical(n))
    }
}

// =============================================================================
// Normalization
// =============================================================================

struct Normalizer<'d> {
    names: &'d Namespaces,
    attribute_groups: BTreeMap<String, &'d AttributeGroup>,
    groups: BTreeMap<String, &'d ModelGroup>,
    elements: BTreeMap<String, &'d Element>,
    attributes: BTreeMap<String, &'d Attribute>,
}

impl<'d> Normalizer<'d> {
    fn enter(&self, stack: &mut Vec<String>, key: String) -> Result<()> {
        if stack.contains(&key) {
            let mut chain = stack.clone();
            chain.push(key);
            return Err(CompileError::CyclicGroupReference {
                chain: chain.join(" -> "),
            });
        }
        stack.push(key);
        Ok(())
    }

    fn complex(
        &self,
        ct: &ComplexType,
        container: Option<Container>,
        stack: &mut Vec<String>,
    ) -> Result<ComplexType> {
        let mut out = ComplexType {
            name: self.names.canonical_opt(&ct.name),
            is_abstract: ct.is_abstract,
            documentation: ct.documentation.clone(),
            attributes: self.attributes(&ct.attributes, stack)?,
            content: None,
            extension: None,
            simple_content: None,
            container,
        };
        if let Some(content) = &ct.content {
            out.content = Some(self.particle(content, stack)?);
        }
        if let Some(ext) = &ct.extension {
            let mut ext_out = ext.clone();
            ext_out.base = self.names.canonical(&ext.base);
            ext_out.attributes = self.attributes(&ext.attributes, stack)?;
            ext_out.content = match &ext.content {
                Some(content) => Some(self.particle(content, stack)?),
                None => None,
            };
            out.extension = Some(ext_out);
        }
        if let Some(sc) = &ct.simple_content {
            let mut sc_out = sc.clone();
            sc_out.base = self.names.canonical(&sc.base);
            sc_out.attributes = self.attributes(&sc.attributes, stack)?;
            out.simple_content = Some(sc_out);
        }
        Ok(out)
    }

    fn simple(&self, st: &SimpleType) -> SimpleType {
        let mut out = st.clone();
        out.name = self.names.canonical_opt(&st.name);
        out.base = self.names.canonical(&st.base);
        out
    }

    fn attributes(&self, items: &[AttributeItem], stack: &mut Vec<String>) -> Result<Vec<AttributeItem>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                AttributeItem::Attribute(attr) => {
                    out.push(AttributeItem::Attribute(self.attribute(attr)?));
                }
                AttributeItem::Group(group) => {
                    let name = self.names.canonical(&group.reference);
                    let def = self.attribute_groups.get(&name).ok_or_else(|| {
                        CompileError::unresolved(&name, self.attribute_groups.keys().map(String::as_str))
                    })?;
                    self.enter(stack, format!("attributeGroup {}", name))?;
                    out.extend(self.attributes(&def.attributes, stack)?);
                    stack.pop();
                }
            }
        }
        Ok(out)
    }

    fn attribute(&self, attr: &Attribute) -> Result<Attribute> {
        let mut out = match &attr.reference {
            Some(reference) => {
                let name = self.names.canonical(reference);
                let target = self.attributes.get(&name).ok_or_else(|| {
                    CompileError::unresolved(&name, self.attributes.keys().map(String::as_str))
                })?;
                let mut resolved = (*target).clone();
                resolved.name = Some(name);
                resolved.usage = attr.usage;
                if attr.default_value().is_some() {
                    resolved.default = attr.default.clone();
                    resolved.fixed = attr.fixed.clone();
                }
                if attr.documentation.is_some() {
                    resolved.documentation = attr.documentation.clone();
                }
                resolved
            }
            None => attr.clone(),
        };
        out.type_name = self.names.canonical_opt(&out.type_name);
        if let Some(st) = &out.simple_type {
            out.simple_type = Some(self.simple(st));
        }
        Ok(out)
    }

    fn element(&self, el: &Element, stack: &mut Vec<String>) -> Result<Element> {
        let mut out = match &el.reference {
            Some(reference) => {
                let name = self.names.canonical(reference);
                let target = self.elements.get(&name).ok_or_else(|| {
                    CompileError::unresolved(&name, self.elements.keys().map(String::as_str))
                })?;
                let mut resolved = (*target).clone();
                resolved.name = Some(name.clone());
                resolved.reference = None;
                resolved.min_occurs = el.min_occurs;
                resolved.max_occurs = el.max_occurs;
                if el.documentation.is_some() {
                    resolved.documentation = el.documentation.clone();
                }
                if resolved.complex_type.is_some() {
                    self.enter(stack, format!("element {}", name))?;
                    let normalized = self.element(&resolved, stack)?;
                    stack.pop();
                    return Ok(normalized);
                }
                resolved
            }
            None => el.clone(),
        };

        out.type_name = self.names.canonical_opt(&out.type_name);
        if let Some(st) = &el.simple_type {
            out.simple_type = Some(self.simple(st));
        }
        if let Some(ct) = &out.complex_type {
            let container = Container {
                element: out.local_name().to_string(),
                documentation: out.documentation.clone(),
            };
            out.complex_type = Some(Box::new(self.complex(ct, Some(container), stack)?));
        }
        Ok(out)
    }

    fn particle(&self, particle: &Particle, stack: &mut Vec<String>) -> Result<Particle> {
        Ok(match particle {
            Particle::Element(el) => Particle::Element(self.element(el, stack)?),
            Particle::Sequence(c) => Particle::Sequence(self.compositor(c, stack)?),
            Particle::Choice(c) => Particle::Choice(self.compositor(c, stack)?),
            Particle::Any(w) => Particle::Any(w.clone()),
            Particle::Group(group) => {
                let name = self.names.canonical(&group.reference);
                let def = self.groups.get(&name).ok_or_else(|| {
                    CompileError::unresolved(&name, self.groups.keys().map(String::as_str))
                })?;
                self.enter(stack, format!("group {}", name))?;
                let expanded = self.particle(&def.particle, stack)?;
                stack.pop();
                match expanded {
                    Particle::Sequence(mut c) => {
                        c.min_occurs = c.min_occurs.min(group.min_occurs);
                        c.max_occurs = group.max_occurs;
                        Particle::Sequence(c)
                    }
                    Particle::Choice(mut c) => {
                        c.min_occurs = c.min_occurs.min(group.min_occurs);
                        c.max_occurs = group.max_occurs;
                        Particle::Choice(c)
                    }
                    other => Particle::Sequence(Compositor {
                        min_occurs: group.min_occurs,
                        max_occurs: group.max_occurs,
                        particles: vec![other],
                    }),
                }
            }
        })
    }

    fn compositor(&self, c: &Compositor, stack: &mut Vec<String>) -> Result<Compositor> {
        Ok(Compositor {
            min_occurs: c.min_occurs,
            max_occurs: c.max_occurs,
            particles: c
                .particles
                .iter()
                .map(|p| self.particle(p, stack))
                .collect::<Result<_>>()?,
        })
    }
}
