//! Entity Builder
//!
//! Builds the entity for one type path: inheritance link, attributes,
//! content walk, attribute bag and configured extra fields. Each type path
//! is walked once per compilation.

use std::collections::BTreeMap;
use tracing::debug;

use super::classify::Scope;
use super::scalar::{finalize, normalize_doc};
use super::Compiler;
use crate::diagnostics::DiagnosticCode;
use crate::entity::{Entity, Field, FieldKind, OnDelete, ScalarKind, ScalarRepr};
use crate::error::{CompileError, Result};
use crate::schema::{ComplexType, Element, Particle};

impl<'a> Compiler<'a> {
    /// Build (or fetch) the entity for a type path and return its name.
    /// `extra_fields` are appended even when the path was already built.
    pub(super) fn build_entity(
        &mut self,
        type_path: &str,
        ct: Option<&'a ComplexType>,
        extra_fields: Vec<Field>,
    ) -> Result<String> {
        let resolved = self.naming.resolve(type_path, &mut self.diagnostics);

        if self.built.contains(type_path) {
            if !extra_fields.is_empty() {
                for field in extra_fields {
                    self.add_field(type_path, field)?;
                }
                self.entity_mut(type_path)?.close();
            }
            return Ok(resolved.entity);
        }

        if let Some(existing) = self.entity_named(&resolved.entity) {
            if !resolved.merge {
                return Err(CompileError::DuplicateEntity {
                    entity: resolved.entity,
                    type_path: type_path.to_string(),
                    existing: existing.source_types.join(", "),
                });
            }
        }

        debug!(type_path, entity = %resolved.entity, "building entity");
        self.built.insert(type_path.to_string());
        self.entities.insert(
            type_path.to_string(),
            Entity::new(resolved.entity.clone(), type_path),
        );

        let index = self.index;
        let rules = self.rules.for_type(&resolved.entity, type_path)?;
        let scope = Scope::root(type_path, &resolved.entity);

        let mut parent: Option<String> = None;
        let mut content: Option<&'a Particle> = None;

        if !rules.custom {
            let ct = match ct {
                Some(ct) => ct,
                None => index.complex_type(type_path)?,
            };

            let doc = ct
                .documentation
                .as_deref()
                .or_else(|| index.container_of(ct).and_then(|c| c.documentation.as_deref()))
                .map(normalize_doc)
                .filter(|d| !d.is_empty());
            {
                let entity = self.entity_mut(type_path)?;
                entity.is_abstract = ct.is_abstract;
                entity.documentation.extend(doc);
            }

            self.walk_attributes(&scope, &ct.attributes)?;

            if let Some(particle) = &ct.content {
                content = Some(particle);
            } else if let Some(ext) = &ct.extension {
                if ext.is_empty() {
                    self.diagnostics.warning(
                        type_path,
                        DiagnosticCode::EmptyExtension,
                        format!("extension of {} adds nothing", ext.base),
                    );
                }
                parent = Some(ext.base.clone());
                self.walk_attributes(&scope, &ext.attributes)?;
                content = ext.content.as_ref();
            } else if let Some(sc) = &ct.simple_content {
                self.walk_attributes(&scope, &sc.attributes)?;
                let config = self.config;
                let repr = self
                    .scalars
                    .named(index, config, &sc.base, &mut self.diagnostics)?;
                let repr = finalize(repr, config.compiler.text_threshold);
                self.add_field(type_path, Field::new("value", "value", FieldKind::Scalar(repr)))?;
            } else {
                self.diagnostics.warning(
                    type_path,
                    DiagnosticCode::MissingContent,
                    format!("no sequence, choice or extension in {}", ct.label()),
                );
            }

            if parent.is_none() {
                if let Some(parent_field) = &rules.parent_field {
                    let element = content
                        .and_then(|particle| find_element(particle, parent_field))
                        .ok_or_else(|| CompileError::MissingParentField {
                            type_path: type_path.to_string(),
                            field: parent_field.clone(),
                        })?;
                    parent = index.effective_type_name(element);
                }
            }
        }

        if let Some(parent_type) = &rules.parent_type {
            parent = Some(parent_type.clone());
        }

        if let Some(parent_path) = parent {
            if rules.include_parent_fields {
                let parent_ct = index.complex_type(&parent_path)?;
                self.walk_members(&scope, parent_ct)?;
            } else {
                let parent_entity = self.build_entity(&parent_path, None, Vec::new())?;
                self.entity_mut(type_path)?.parent = Some(parent_entity);
            }
        }

        if let Some(particle) = content {
            self.walk_particle(&scope, particle)?;
        }

        if let Some(entries) = self.bags.remove(type_path) {
            let doc = bag_documentation(&entries);
            let bag = Field::new(
                self.config.compiler.bag_field_name.clone(),
                "",
                FieldKind::JsonBag { entries },
            )
            .nullable(true)
            .with_doc(doc);
            self.add_field(type_path, bag)?;
        }

        for extra in &rules.add_fields {
            let kind = match &extra.target {
                Some(target) => {
                    let target = match self.naming.reverse_resolve(target) {
                        Some(path) if index.find_complex(&path).is_some() || self.built.contains(&path) => {
                            self.build_entity(&path, None, Vec::new())?
                        }
                        _ => target.clone(),
                    };
                    if extra.many_to_many {
                        FieldKind::ManyToMany {
                            target,
                            related_name: None,
                        }
                    } else {
                        FieldKind::ToOne {
                            target,
                            one_to_one: false,
                            on_delete: OnDelete::Protect,
                            related_name: None,
                        }
                    }
                }
                None => {
                    let mut repr = ScalarRepr::new(extra.kind.clone().unwrap_or(ScalarKind::Text));
                    repr.max_length = extra.max_length;
                    FieldKind::Scalar(repr)
                }
            };
            let mut field = Field::new(extra.name.clone(), "", kind).nullable(extra.nullable);
            field.documentation.extend(extra.documentation.clone());
            self.add_field(type_path, field)?;
        }

        for field in extra_fields {
            self.add_field(type_path, field)?;
        }

        let inherited_number = self
            .entities
            .get(type_path)
            .and_then(|e| e.parent.as_deref())
            .and_then(|parent| self.entity_named(parent))
            .and_then(|parent| parent.number_field.clone());

        let entity = self.entity_mut(type_path)?;
        let primary = rules
            .primary_key
            .as_ref()
            .filter(|pk| entity.field(pk).is_some());
        entity.number_field = primary
            .or(rules.number_field.as_ref())
            .cloned()
            .or(inherited_number);
        entity.match_fields = rules.match_fields.clone();
        if let Some(is_abstract) = rules.is_abstract {
            entity.is_abstract = is_abstract;
        }
        entity.close();

        Ok(resolved.entity)
    }
}

/// One line per bag entry: `key [doc]`
pub(super) fn bag_documentation(entries: &BTreeMap<String, String>) -> String {
    let mut doc = String::from("JSON attributes:");
    for (key, value) in entries {
        if value.is_empty() {
            doc.push_str(&format!("\n{}", key));
        } else {
            doc.push_str(&format!("\n{} [{}]", key, value));
        }
    }
    doc
}

/// Direct (sequence-level) element with the given name
fn find_element<'p>(particle: &'p Particle, name: &str) -> Option<&'p Element> {
    match particle {
        Particle::Element(el) if el.local_name() == name => Some(el),
        Particle::Sequence(c) | Particle::Choice(c) => {
            c.particles.iter().find_map(|p| find_element(p, name))
        }
        _ => None,
    }
}
