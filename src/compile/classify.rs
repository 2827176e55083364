//! Field Classification
//!
//! Decides what every attribute and element reached while walking a type
//! becomes: a scalar, a collection, a relation, a bag entry, a set of
//! flattened fields, or nothing. Explicit rules win in a fixed priority
//! order (1:1, 1:N, M:N, JSON, flatten, reference extension, array,
//! foreign-key override); size inference only runs when none matched.

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use super::naming::to_snake_case;
use super::rules::FieldRules;
use super::scalar::{finalize, normalize_doc, parse_default};
use super::Compiler;
use crate::diagnostics::DiagnosticCode;
use crate::entity::{Field, FieldKind, OnDelete, ScalarRepr};
use crate::error::{CompileError, Result};
use crate::schema::{
    is_builtin, Attribute, AttributeItem, AttributeUse, ComplexType, Element, Extension,
    MaxOccurs, Particle, Wildcard,
};

// =============================================================================
// Walk State
// =============================================================================

/// Position inside the type currently being walked
#[derive(Debug, Clone)]
pub(super) struct Scope {
    /// Type path of the entity receiving fields
    pub type_path: String,
    pub entity: String,
    /// Dotted prefix of flattened ancestors, `""` or `a.b.`
    pub prefix: String,
    pub doc_prefix: String,
    /// Enclosing compositor makes everything optional
    pub nullable: bool,
    pub choice_group: Option<u32>,
}

impl Scope {
    pub fn root(type_path: &str, entity: &str) -> Self {
        Self {
            type_path: type_path.to_string(),
            entity: entity.to_string(),
            prefix: String::new(),
            doc_prefix: String::new(),
            nullable: false,
            choice_group: None,
        }
    }

    fn nested(&self, dotted: &str, doc: &str, nullable: bool) -> Self {
        Self {
            prefix: format!("{}.", dotted),
            doc_prefix: format!("{}::", doc),
            nullable,
            ..self.clone()
        }
    }

    fn field_name(&self, local: &str) -> String {
        format!("{}{}", self.prefix.replace('.', "_"), local)
    }

    fn path(&self, name: &str) -> String {
        format!("{}.{}", self.type_path, name)
    }
}

#[derive(Clone, Copy)]
enum Item<'a> {
    Element(&'a Element),
    Attribute(&'a Attribute),
}

impl<'a> Item<'a> {
    fn local_name(self) -> &'a str {
        match self {
            Self::Element(el) => el.local_name(),
            Self::Attribute(attr) => attr.local_name(),
        }
    }

    fn dotted(self, prefix: &str, local: &str) -> String {
        match self {
            Self::Element(_) => format!("{}{}", prefix, local),
            Self::Attribute(_) => format!("{}@{}", prefix, local),
        }
    }

    fn documentation(self) -> Option<&'a str> {
        match self {
            Self::Element(el) => el
                .documentation
                .as_deref()
                .or_else(|| el.complex_type.as_ref().and_then(|ct| ct.documentation.as_deref())),
            Self::Attribute(attr) => attr.documentation.as_deref(),
        }
    }

    fn default_value(self) -> Option<&'a str> {
        match self {
            Self::Element(el) => el.default_value(),
            Self::Attribute(attr) => attr.default_value(),
        }
    }

    fn element(self) -> Option<&'a Element> {
        match self {
            Self::Element(el) => Some(el),
            Self::Attribute(_) => None,
        }
    }
}

/// A field about to be declared
struct Site {
    name: String,
    dotted: String,
    doc: Option<String>,
    nullable: bool,
    coalesced_from: Option<String>,
}

impl Site {
    fn into_field(self, scope: &Scope, kind: FieldKind) -> Field {
        let mut field = Field::new(self.name, self.dotted, kind).nullable(self.nullable);
        field.documentation.extend(self.doc);
        field.coalesced_from = self.coalesced_from;
        field.choice_group = scope.choice_group;
        field
    }
}

/// Field kind plus the primitive its default value parses as
struct Resolved {
    kind: FieldKind,
    primitive: Option<String>,
}

impl Resolved {
    fn reference(target: String, one_to_one: bool, on_delete: OnDelete) -> Self {
        Self {
            kind: FieldKind::ToOne {
                target,
                one_to_one,
                on_delete,
                related_name: None,
            },
            primitive: None,
        }
    }
}

/// Outcome of size inference
struct Inferred<'a> {
    rel: String,
    ct: &'a ComplexType,
    many_to_many: bool,
}

// =============================================================================
// Walking
// =============================================================================

impl<'a> Compiler<'a> {
    pub(super) fn walk_attributes(&mut self, scope: &Scope, attributes: &'a [AttributeItem]) -> Result<()> {
        for item in attributes {
            match item {
                AttributeItem::Attribute(attr) if attr.usage != AttributeUse::Prohibited => {
                    let nullable = scope.nullable || !attr.is_required();
                    self.classify(scope, Item::Attribute(attr), nullable)?;
                }
                AttributeItem::Attribute(_) => {}
                AttributeItem::Group(group) => {
                    return Err(CompileError::unresolved(&group.reference, std::iter::empty()))
                }
            }
        }
        Ok(())
    }

    pub(super) fn walk_particle(&mut self, scope: &Scope, particle: &'a Particle) -> Result<()> {
        match particle {
            Particle::Element(el) => {
                let nullable = scope.nullable || el.is_optional();
                self.classify(scope, Item::Element(el), nullable)
            }
            Particle::Sequence(seq) => {
                let mut inner = scope.clone();
                inner.nullable |= seq.min_occurs == 0;
                for particle in &seq.particles {
                    self.walk_particle(&inner, particle)?;
                }
                Ok(())
            }
            Particle::Choice(choice) => {
                let mut inner = scope.clone();
                inner.nullable = true;
                inner.choice_group = Some(self.next_choice_group());
                for particle in &choice.particles {
                    self.walk_particle(&inner, particle)?;
                }
                Ok(())
            }
            Particle::Any(wildcard) => {
                self.record_wildcard(scope, wildcard);
                Ok(())
            }
            Particle::Group(group) => Err(CompileError::unresolved(&group.reference, std::iter::empty())),
        }
    }

    /// Attributes and content of a type and its extension bases, base first
    pub(super) fn walk_members(&mut self, scope: &Scope, ct: &'a ComplexType) -> Result<()> {
        let index = self.index;
        let mut chain = vec![ct];
        let mut current = ct;
        while let Some(base) = current
            .extension
            .as_ref()
            .and_then(|ext| index.find_complex(&ext.base))
        {
            if chain.iter().any(|seen| std::ptr::eq(*seen, base)) {
                break;
            }
            chain.push(base);
            current = base;
        }

        for ct in chain.into_iter().rev() {
            self.walk_attributes(scope, &ct.attributes)?;
            if let Some(sc) = &ct.simple_content {
                self.walk_attributes(scope, &sc.attributes)?;
            }
            if let Some(ext) = &ct.extension {
                self.walk_attributes(scope, &ext.attributes)?;
            }
            if let Some(content) = &ct.content {
                self.walk_particle(scope, content)?;
            }
            if let Some(content) = ct.extension.as_ref().and_then(|ext| ext.content.as_ref()) {
                self.walk_particle(scope, content)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Classification
    // =========================================================================

    fn classify(&mut self, scope: &Scope, item: Item<'a>, nullable: bool) -> Result<()> {
        let index = self.index;
        let rules = self.rules.for_type(&scope.entity, &scope.type_path)?;

        let raw = item.local_name();
        let local = rules.rename.apply(raw).unwrap_or_else(|| raw.to_string());
        let dotted = item.dotted(&scope.prefix, &local);
        let mut name = scope.field_name(&local);

        if rules.drop.matches(&name) {
            trace!(entity = %scope.entity, field = %name, "dropped");
            return self.add_field(&scope.type_path, Field::new(name, dotted, FieldKind::Dropped));
        }
        if rules.parent_field.as_deref() == Some(name.as_str()) {
            return self.add_field(&scope.type_path, Field::new(name, dotted, FieldKind::ParentAlias));
        }

        let mut bag_key = dotted.clone();
        let mut coalesced_from = None;
        if let Some(target) = rules.coalesce.apply(&name) {
            if name == dotted {
                bag_key = target.clone();
            }
            coalesced_from = Some(std::mem::replace(&mut name, target));
        }

        let doc = field_doc(&rules, scope, item, &name);
        let el = item.element();
        let ct = match el {
            Some(el) => index.element_complex_type(el)?,
            None => None,
        };
        let mut site = Site {
            name,
            dotted,
            doc,
            nullable,
            coalesced_from,
        };

        let inferred = match el {
            Some(el) if !has_explicit_rule(&rules, &site.name, ct.is_some()) => {
                self.infer_collection(scope, &site, el)?
            }
            _ => None,
        };

        if let Some(el) = el {
            if rules.one_to_one.matches(&site.name) {
                return self.reverse_relation(scope, &rules, site, el, true, None);
            }
            let inferred_many = inferred.as_ref().map(|i| i.many_to_many);
            if rules.one_to_many.matches(&site.name)
                || rules.one_to_many_override(&site.name).is_some()
                || inferred_many == Some(false)
            {
                return self.reverse_relation(scope, &rules, site, el, false, inferred);
            }
            if rules.many_to_many.matches(&site.name)
                || rules.many_to_many_override(&site.name).is_some()
                || inferred_many == Some(true)
            {
                return self.many_to_many(scope, &rules, site, el, inferred);
            }
        }

        if rules.json.matches(&site.name) {
            if !rules.drop_after_processing.matches(&site.name) {
                self.record_bag(scope, bag_key, site.doc, ct);
            }
            return Ok(());
        }

        let mut type_hint: Option<&'a str> = None;
        if el.is_some()
            && (rules.flatten.matches(&site.name)
                || (ct.is_some() && rules.has_flatten_prefix(&site.name)))
        {
            match ct {
                Some(ct2) => match &ct2.simple_content {
                    Some(sc) => {
                        self.diagnostics.warning(
                            scope.path(&site.dotted),
                            DiagnosticCode::FlattenReinterpreted,
                            format!("{} has simple content, using its {} value", ct2.label(), sc.base),
                        );
                        type_hint = Some(sc.base.as_str());
                    }
                    None => return self.flatten(scope, site, ct2),
                },
                None => self.diagnostics.warning(
                    scope.path(&site.dotted),
                    DiagnosticCode::FlattenWithoutComplexType,
                    "complexType not found for flattening, using the plain type",
                ),
            }
        }

        let mut reference: Option<&'a Extension> = None;
        if el.is_some() && rules.reference_extension.matches(&site.name) {
            let ct2 = ct.ok_or_else(|| CompileError::NotComplexType {
                path: scope.path(&site.dotted),
                relation: "Reference extension",
            })?;
            match &ct2.extension {
                Some(ext) => reference = Some(ext),
                None => self.diagnostics.warning(
                    scope.path(&site.dotted),
                    DiagnosticCode::ReferenceExtensionFallback,
                    format!("{} has no extension, treating it as a plain reference", ct2.label()),
                ),
            }
        }

        let (resolved, multiplicity) = match el {
            Some(el) if rules.array.matches(&site.name) => self.array_value(scope, &mut site, el, ct)?,
            Some(el) => {
                let resolved = if let Some(target) = rules.foreign_key_override(&site.name) {
                    self.override_target(scope, &site.name, ct, target)?
                } else if let Some(ext) = reference {
                    let target = self.build_entity(&ext.base, None, Vec::new())?;
                    Resolved::reference(target, false, OnDelete::Protect)
                } else {
                    self.resolve_value(scope, item, &site.name, type_hint)?
                };
                (resolved, el.max_occurs)
            }
            None => (self.resolve_value(scope, item, &site.name, None)?, MaxOccurs::default()),
        };

        let dotted = site.dotted.clone();
        let field_nullable = site.nullable;
        let mut field = site.into_field(scope, resolved.kind);
        field.max_occurs = multiplicity;

        if let Some(el) = el {
            if multiplicity.is_one() == field.kind.is_collection() {
                return Err(CompileError::Cardinality {
                    path: scope.path(&dotted),
                    max_occurs: multiplicity.to_string(),
                    type_name: index.effective_type_name(el).unwrap_or_default(),
                });
            }
        }

        self.finish_field(&rules, scope, &mut field, item.default_value(), resolved.primitive.as_deref())?;
        self.add_field(&scope.type_path, field)?;

        if let Some(ext) = reference {
            let mut nested = scope.clone();
            nested.prefix = format!("{}.", dotted);
            nested.nullable = field_nullable;
            self.walk_attributes(&nested, &ext.attributes)?;
            if let Some(content) = &ext.content {
                self.walk_particle(&nested, content)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Relations
    // =========================================================================

    /// Unbounded complex particle, or a wrapper holding exactly one
    /// unbounded complex child. M:N if the target is a root, else 1:N.
    fn infer_collection(&mut self, scope: &Scope, site: &Site, el: &'a Element) -> Result<Option<Inferred<'a>>> {
        let index = self.index;
        let Some(ct) = index.element_complex_type(el)? else {
            return Ok(None);
        };
        if !el.max_occurs.is_unbounded() {
            if !el.max_occurs.is_one() || !ct.attributes.is_empty() {
                return Ok(None);
            }
            match sole_particle(ct) {
                Some(child) if child.max_occurs.is_unbounded() => {
                    if index.element_complex_type(child)?.is_none() {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }

        let (rel, ct) = self.n_to_many_relation(scope, site, el)?;
        let many_to_many = self.roots.contains(&rel);
        trace!(field = %site.name, rel = %rel, many_to_many, "inferred collection");
        Ok(Some(Inferred { rel, ct, many_to_many }))
    }

    /// Target type path of a 1:N or M:N relation
    fn n_to_many_relation(&mut self, scope: &Scope, site: &Site, el: &'a Element) -> Result<(String, &'a ComplexType)> {
        let index = self.index;
        let (target_el, target_name) = if el.max_occurs.is_unbounded() {
            (el, site.name.clone())
        } else {
            let child = index
                .element_complex_type(el)?
                .and_then(unbounded_child);
            match child {
                Some(child) => (child, format!("{}_{}", site.name, child.local_name())),
                None => {
                    self.diagnostics.assumed_unbounded(&scope.path(&site.dotted));
                    (el, site.name.clone())
                }
            }
        };

        let ct = index
            .element_complex_type(target_el)?
            .ok_or_else(|| CompileError::NotComplexType {
                path: scope.path(&site.dotted),
                relation: "N:many",
            })?;
        let rel = match &ct.name {
            Some(name) => name.clone(),
            None => scope.path(&target_name),
        };
        Ok((rel, ct))
    }

    /// Owned children: the target receives a back-reference to this entity
    fn reverse_relation(
        &mut self,
        scope: &Scope,
        rules: &FieldRules,
        site: Site,
        el: &'a Element,
        one_to_one: bool,
        inferred: Option<Inferred<'a>>,
    ) -> Result<()> {
        let index = self.index;
        let (rel, ct) = if one_to_one {
            let ct = index
                .element_complex_type(el)?
                .ok_or_else(|| CompileError::NotComplexType {
                    path: scope.path(&site.dotted),
                    relation: "1:1",
                })?;
            let rel = ct.name.clone().unwrap_or_else(|| scope.path(&site.name));
            (rel, Some(ct))
        } else if let Some(target) = rules.one_to_many_override(&site.name) {
            (target.to_string(), None)
        } else if let Some(inferred) = inferred {
            (inferred.rel, Some(inferred.ct))
        } else {
            let (rel, ct) = self.n_to_many_relation(scope, &site, el)?;
            (rel, Some(ct))
        };

        let mut reverse_field = to_snake_case(&scope.entity);
        let taken = self
            .entities
            .get(&rel)
            .and_then(|e| e.field(&reverse_field))
            .map(|f| !matches!(&f.kind, FieldKind::ToOne { related_name: Some(r), .. } if *r == site.name))
            .unwrap_or(false);
        if taken {
            reverse_field = format!("{}_{}", reverse_field, site.name);
        }
        let back_reference = Field::new(
            reverse_field.clone(),
            "",
            FieldKind::ToOne {
                target: scope.entity.clone(),
                one_to_one,
                on_delete: OnDelete::Cascade,
                related_name: Some(site.name.clone()),
            },
        );
        let target = self.build_entity(&rel, ct, vec![back_reference])?;

        let kind = if one_to_one {
            FieldKind::ReverseOneToOne { target, reverse_field }
        } else {
            FieldKind::ReverseOneToMany { target, reverse_field }
        };
        let mut field = site.into_field(scope, kind);
        if !one_to_one {
            field.max_occurs = MaxOccurs::Unbounded;
        }
        self.finish_field(rules, scope, &mut field, None, None)?;
        self.add_field(&scope.type_path, field)
    }

    fn many_to_many(
        &mut self,
        scope: &Scope,
        rules: &FieldRules,
        site: Site,
        el: &'a Element,
        inferred: Option<Inferred<'a>>,
    ) -> Result<()> {
        let (rel, ct) = if let Some(target) = rules.many_to_many_override(&site.name) {
            (target.to_string(), None)
        } else if let Some(inferred) = inferred {
            (inferred.rel, Some(inferred.ct))
        } else {
            let (rel, ct) = self.n_to_many_relation(scope, &site, el)?;
            (rel, Some(ct))
        };

        let target = self.build_entity(&rel, ct, Vec::new())?;
        let mut field = site.into_field(
            scope,
            FieldKind::ManyToMany {
                target,
                related_name: None,
            },
        );
        field.max_occurs = MaxOccurs::Unbounded;
        self.finish_field(rules, scope, &mut field, None, None)?;
        self.add_field(&scope.type_path, field)
    }

    fn override_target(
        &mut self,
        scope: &Scope,
        name: &str,
        ct: Option<&'a ComplexType>,
        target: &str,
    ) -> Result<Resolved> {
        let inline_path = scope.path(name);
        let entity = if target == inline_path {
            let ct = ct.ok_or_else(|| CompileError::NotComplexType {
                path: inline_path.clone(),
                relation: "Foreign key",
            })?;
            self.build_entity(&inline_path, Some(ct), Vec::new())?
        } else {
            self.build_entity(target, None, Vec::new())?
        };
        Ok(Resolved::reference(entity, false, OnDelete::Protect))
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Kind of a plain (non-rule) item: scalar for simple types, to-one
    /// for complex ones
    fn resolve_value(
        &mut self,
        scope: &Scope,
        item: Item<'a>,
        name: &str,
        type_hint: Option<&str>,
    ) -> Result<Resolved> {
        let index = self.index;
        let config = self.config;

        let (type_name, inline_simple, inline_complex) = match item {
            Item::Element(el) => (
                type_hint.map(str::to_string).or_else(|| index.effective_type_name(el)),
                el.simple_type.as_ref(),
                el.complex_type.as_deref(),
            ),
            Item::Attribute(attr) => (
                type_hint.map(str::to_string).or_else(|| attr.type_name.clone()),
                attr.simple_type.as_ref(),
                None,
            ),
        };

        if let Some(type_name) = type_name {
            let scalar = is_builtin(&type_name)
                || config.type_override(&type_name).is_some()
                || index.simple_type(&type_name).is_some();
            if scalar {
                let repr = self
                    .scalars
                    .named(index, config, &type_name, &mut self.diagnostics)?;
                let primitive = if is_builtin(&type_name) {
                    Some(type_name)
                } else {
                    index.primitive_base(&type_name).ok()
                };
                return Ok(Resolved {
                    kind: FieldKind::Scalar(repr),
                    primitive,
                });
            }
            let ct = index.complex_type(&type_name)?;
            let target = self.build_entity(&type_name, Some(ct), Vec::new())?;
            return Ok(Resolved::reference(target, false, OnDelete::Protect));
        }

        if let Some(st) = inline_simple {
            let repr = self.scalars.inline(index, config, st, &mut self.diagnostics)?;
            return Ok(Resolved {
                kind: FieldKind::Scalar(repr),
                primitive: index.primitive_base(&st.base).ok(),
            });
        }

        if let Some(ct) = inline_complex {
            let target = self.build_entity(&scope.path(name), Some(ct), Vec::new())?;
            return Ok(Resolved::reference(target, true, OnDelete::Cascade));
        }

        let fallback = match item {
            Item::Element(_) => "xs:anyType",
            Item::Attribute(_) => "xs:string",
        };
        let repr = self
            .scalars
            .named(index, config, fallback, &mut self.diagnostics)?;
        Ok(Resolved {
            kind: FieldKind::Scalar(repr),
            primitive: None,
        })
    }

    /// Collection of scalars: the element itself, or the first element
    /// of its wrapper type
    fn array_value(
        &mut self,
        scope: &Scope,
        site: &mut Site,
        el: &'a Element,
        ct: Option<&'a ComplexType>,
    ) -> Result<(Resolved, MaxOccurs)> {
        let not_simple = || CompileError::NotSimpleType {
            path: scope.path(&site.dotted),
        };

        let (item_el, multiplicity) = match ct {
            Some(ct) => {
                let first = first_element(ct).ok_or_else(not_simple)?;
                let multiplicity = if el.max_occurs.is_one() {
                    first.max_occurs
                } else {
                    el.max_occurs
                };
                let inner = first
                    .documentation
                    .as_deref()
                    .map(normalize_doc)
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| first.local_name().to_string());
                let outer = site.doc.take().unwrap_or_else(|| site.name.clone());
                site.doc = Some(format!("{}::{}", outer, inner));
                (first, multiplicity)
            }
            None => (el, el.max_occurs),
        };

        let resolved = self.resolve_value(scope, Item::Element(item_el), &site.name, None)?;
        match resolved.kind {
            FieldKind::Scalar(repr) => Ok((
                Resolved {
                    kind: FieldKind::Collection(repr),
                    primitive: resolved.primitive,
                },
                multiplicity,
            )),
            _ => Err(not_simple()),
        }
    }

    /// Facet-independent field options: choice docs, kind overrides,
    /// nullability, defaults, keys and per-field overrides
    fn finish_field(
        &self,
        rules: &FieldRules,
        scope: &Scope,
        field: &mut Field,
        default: Option<&str>,
        primitive: Option<&str>,
    ) -> Result<()> {
        let path = scope.path(&field.dotted_path);
        let threshold = self.config.compiler.text_threshold;

        if let Some(repr) = field.kind.scalar_mut() {
            *repr = finalize(repr.clone(), threshold);
        }

        if let Some(repr) = field.kind.scalar() {
            let lines: Vec<String> = repr
                .choices
                .iter()
                .map(|c| {
                    if c.label == c.value {
                        c.value.clone()
                    } else {
                        format!("{} - {}", c.value, c.label)
                    }
                })
                .filter(|line| !field.documentation.iter().any(|d| d.contains(line.as_str())))
                .collect();
            if !lines.is_empty() {
                field.documentation.push(lines.join("\n"));
            }
        }

        if let Some(kind) = rules.kind_override(&field.name) {
            match field.kind.scalar_mut() {
                Some(repr) => repr.kind = kind.clone(),
                None => field.kind = FieldKind::Scalar(ScalarRepr::new(kind.clone())),
            }
        }

        field.nullable |= rules.null.matches(&field.name);

        let primitive = primitive.unwrap_or("xs:string");
        if let (Some(raw), Some(repr)) = (default, field.kind.scalar_mut()) {
            repr.default = Some(parse_default(primitive, raw, &path)?);
        }

        if rules.is_primary_key(&field.name) {
            field.primary_key = true;
        } else if rules.unique.matches(&field.name) {
            field.unique = true;
        } else if rules.index.matches(&field.name) {
            field.db_index = true;
        }

        if let Some(options) = rules.field_option(&field.name) {
            if let Some(repr) = field.kind.scalar_mut() {
                repr.max_length = options.max_length.or(repr.max_length);
                repr.max_digits = options.max_digits.or(repr.max_digits);
                repr.decimal_places = options.decimal_places.or(repr.decimal_places);
                if let Some(blank) = options.blank {
                    repr.not_blank = !blank;
                }
                if let Some(raw) = &options.default {
                    repr.default = Some(parse_default(primitive, raw, &path)?);
                }
            }
            if let Some(null) = options.null {
                field.nullable = null;
            }
            if let Some(unique) = options.unique {
                field.unique = unique;
            }
            if let Some(db_index) = options.db_index {
                field.db_index = db_index;
            }
            if let Some(name) = &options.related_name {
                if let FieldKind::ToOne { related_name, .. } | FieldKind::ManyToMany { related_name, .. } =
                    &mut field.kind
                {
                    *related_name = Some(name.clone());
                }
            }
        }

        if field.primary_key && field.nullable {
            return Err(CompileError::NullablePrimaryKey {
                entity: scope.entity.clone(),
                field: field.name.clone(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Flattening and Bags
    // =========================================================================

    /// Inline a complex type's members into the current entity
    fn flatten(&mut self, scope: &Scope, site: Site, ct: &'a ComplexType) -> Result<()> {
        let before = self.produced(&scope.type_path);
        let doc = site.doc.as_deref().unwrap_or(&site.name);
        let nested = scope.nested(&site.dotted, doc, site.nullable);
        trace!(entity = %scope.entity, prefix = %nested.prefix, "flattening {}", ct.label());

        self.walk_members(&nested, ct)?;

        if self.produced(&scope.type_path) == before {
            return Err(CompileError::EmptyFlatten {
                path: scope.path(&site.dotted),
                type_name: ct.label().to_string(),
            });
        }
        Ok(())
    }

    /// Fields plus bag entries recorded so far for a type path
    fn produced(&self, type_path: &str) -> usize {
        self.entities.get(type_path).map(|e| e.fields.len()).unwrap_or(0)
            + self.bags.get(type_path).map(BTreeMap::len).unwrap_or(0)
    }

    /// Store an element (and the documentation of everything beneath it)
    /// in the owning entity's attribute bag
    fn record_bag(&mut self, scope: &Scope, key: String, doc: Option<String>, ct: Option<&'a ComplexType>) {
        let mut entries = BTreeMap::new();
        if let Some(ct) = ct {
            let mut visited = BTreeSet::new();
            self.collect_bag_docs(&key, ct, &mut visited, &mut entries);
        }
        entries.insert(key, doc.unwrap_or_default());
        self.bags
            .entry(scope.type_path.clone())
            .or_default()
            .extend(entries);
    }

    fn collect_bag_docs(
        &self,
        prefix: &str,
        ct: &'a ComplexType,
        visited: &mut BTreeSet<String>,
        out: &mut BTreeMap<String, String>,
    ) {
        if let Some(name) = &ct.name {
            if !visited.insert(name.clone()) {
                return;
            }
        }
        let index = self.index;

        if let Some(base) = ct.extension.as_ref().and_then(|ext| index.find_complex(&ext.base)) {
            self.collect_bag_docs(prefix, base, visited, out);
        }

        let attributes = ct
            .attributes
            .iter()
            .chain(ct.extension.iter().flat_map(|ext| ext.attributes.iter()))
            .chain(ct.simple_content.iter().flat_map(|sc| sc.attributes.iter()));
        for item in attributes {
            if let AttributeItem::Attribute(attr) = item {
                out.insert(
                    format!("{}@{}", prefix, attr.local_name()),
                    clean_doc(attr.documentation.as_deref()),
                );
            }
        }

        let mut elements = Vec::new();
        for content in ct
            .content
            .iter()
            .chain(ct.extension.iter().filter_map(|ext| ext.content.as_ref()))
        {
            collect_elements(content, &mut elements);
        }
        for el in elements {
            let key = format!("{}.{}", prefix, el.local_name());
            out.insert(key.clone(), clean_doc(Item::Element(el).documentation()));
            if let Ok(Some(child)) = index.element_complex_type(el) {
                self.collect_bag_docs(&key, child, visited, out);
            }
        }
    }

    fn record_wildcard(&mut self, scope: &Scope, wildcard: &Wildcard) {
        let own = match (&wildcard.documentation, &wildcard.namespace) {
            (Some(doc), _) => normalize_doc(doc),
            (None, Some(namespace)) => format!("any element from {}", namespace),
            (None, None) => "any element".to_string(),
        };
        let doc = format!("{}{}", scope.doc_prefix, own);
        self.bags
            .entry(scope.type_path.clone())
            .or_default()
            .insert(format!("{}*", scope.prefix), doc);
    }

    // =========================================================================
    // Adding Fields
    // =========================================================================

    /// Append a field to the entity under construction: late drops,
    /// identifier limits, reverse-accessor clashes, coalescing
    pub(super) fn add_field(&mut self, type_path: &str, mut field: Field) -> Result<()> {
        let entity_name = self.entity_mut(type_path)?.name.clone();
        let rules = self.rules.for_type(&entity_name, type_path)?;

        if field.is_materialized() {
            if rules.drop_after_processing.matches(&field.name) {
                trace!(entity = %entity_name, field = %field.name, "dropped after processing");
                return Ok(());
            }
            let limit = self.config.compiler.identifier_limit;
            if field.name.chars().count() > limit {
                return Err(CompileError::IdentifierTooLong {
                    path: format!("{}.{}", type_path, field.dotted_path),
                    name: field.name,
                    limit,
                });
            }
            if let Some(related_name) = self.clashing_accessor(type_path, &field) {
                if let FieldKind::ToOne { related_name: slot, .. }
                | FieldKind::ManyToMany { related_name: slot, .. } = &mut field.kind
                {
                    *slot = Some(related_name);
                }
            }
        }

        let entity = self.entity_mut(type_path)?;
        let existing = entity
            .fields
            .iter()
            .position(|f| f.name == field.name && f.is_materialized());

        if let (Some(position), Some(original)) = (existing, field.coalesced_from.clone()) {
            let first = &mut entity.fields[position];
            for doc in field.documentation.drain(..) {
                if !first.documentation.contains(&doc) {
                    first.documentation.push(doc);
                }
            }
            let into = field.name.clone();
            entity.fields.push(Field {
                name: original,
                kind: FieldKind::CoalescedAlias { into },
                coalesced_from: None,
                ..field
            });
            return Ok(());
        }

        if let (Some(position), true) = (existing, field.is_materialized()) {
            let first = &entity.fields[position];
            if first.kind == field.kind && first.dotted_path == field.dotted_path {
                return Ok(());
            }
            return Err(CompileError::DuplicateField {
                entity: entity.name.clone(),
                field: field.name,
            });
        }

        entity.fields.push(field);
        Ok(())
    }

    /// A disambiguated reverse accessor name, if this entity or an
    /// ancestor already points at the same target with the same category
    fn clashing_accessor(&self, type_path: &str, field: &Field) -> Option<String> {
        let target = match &field.kind {
            FieldKind::ToOne {
                target,
                one_to_one: false,
                related_name: None,
                ..
            }
            | FieldKind::ManyToMany {
                target,
                related_name: None,
            } => target,
            _ => return None,
        };
        let category = field.kind.category();
        let entity = self.entities.get(type_path)?;

        let mut owner = Some(entity);
        let mut hops = 0;
        while let Some(current) = owner {
            let clash = current.fields.iter().any(|f| {
                f.is_materialized()
                    && f.name != field.name
                    && f.kind.category() == category
                    && f.kind.target() == Some(target.as_str())
            });
            if clash {
                return Some(format!("{}_as_{}", to_snake_case(&entity.name), field.name));
            }
            hops += 1;
            if hops > self.entities.len() {
                break;
            }
            owner = current.parent.as_deref().and_then(|p| self.entity_named(p));
        }
        None
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Any rule that takes the decision away from size inference
fn has_explicit_rule(rules: &FieldRules, name: &str, complex: bool) -> bool {
    rules.one_to_one.matches(name)
        || rules.one_to_many.matches(name)
        || rules.many_to_many.matches(name)
        || rules.one_to_many_override(name).is_some()
        || rules.many_to_many_override(name).is_some()
        || rules.json.matches(name)
        || rules.flatten.matches(name)
        || (complex && rules.has_flatten_prefix(name))
        || rules.array.matches(name)
        || rules.reference_extension.matches(name)
        || rules.foreign_key_override(name).is_some()
}

fn field_doc(rules: &FieldRules, scope: &Scope, item: Item<'_>, name: &str) -> Option<String> {
    if let Some(doc) = rules.field_doc(name) {
        return Some(doc.to_string());
    }
    let own = item
        .documentation()
        .map(normalize_doc)
        .filter(|d| !d.is_empty());
    if scope.doc_prefix.is_empty() {
        own
    } else {
        Some(format!(
            "{}{}",
            scope.doc_prefix,
            own.unwrap_or_else(|| name.to_string())
        ))
    }
}

fn clean_doc(doc: Option<&str>) -> String {
    doc.map(normalize_doc).unwrap_or_default()
}

/// The only element of a type's top-level sequence
fn sole_particle(ct: &ComplexType) -> Option<&Element> {
    match ct.content.as_ref()? {
        Particle::Sequence(seq) | Particle::Choice(seq) => match seq.particles.as_slice() {
            [Particle::Element(el)] => Some(el),
            _ => None,
        },
        Particle::Element(el) => Some(el),
        _ => None,
    }
}

/// First unbounded element of a type's top-level sequence
fn unbounded_child(ct: &ComplexType) -> Option<&Element> {
    match ct.content.as_ref()? {
        Particle::Sequence(seq) => seq.particles.iter().find_map(|p| match p {
            Particle::Element(el) if el.max_occurs.is_unbounded() => Some(el),
            _ => None,
        }),
        Particle::Element(el) if el.max_occurs.is_unbounded() => Some(el),
        _ => None,
    }
}

fn first_element(ct: &ComplexType) -> Option<&Element> {
    let mut elements = Vec::new();
    collect_elements(ct.content.as_ref()?, &mut elements);
    elements.into_iter().next()
}

fn collect_elements<'p>(particle: &'p Particle, out: &mut Vec<&'p Element>) {
    match particle {
        Particle::Element(el) => out.push(el),
        Particle::Sequence(c) | Particle::Choice(c) => {
            for p in &c.particles {
                collect_elements(p, out);
            }
        }
        Particle::Group(_) | Particle::Any(_) => {}
    }
}
