//! Merge Engine
//!
//! Entities that several type paths map to are merged field by field.
//! Field identity is `(name, dotted path)`; a field missing from some of
//! the merged types becomes nullable and is annotated with where it is
//! missing (or, when it's in a minority, where it exists).

use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::builder::bag_documentation;
use super::rules::RuleBook;
use crate::entity::{Annotation, Entity, Field, FieldKind};
use crate::error::{CompileError, Result};

/// Merge entities sharing a name. Groups without any parent go first;
/// the rest follow in parent order so that every parent entity is final
/// before its children are merged.
pub(super) fn merge_entities(entities: Vec<Entity>, rules: &mut RuleBook<'_>) -> Result<Vec<Entity>> {
    let mut groups: Vec<Vec<Entity>> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for entity in entities {
        match slots.get(&entity.name) {
            Some(&slot) => groups[slot].push(entity),
            None => {
                slots.insert(entity.name.clone(), groups.len());
                groups.push(vec![entity]);
            }
        }
    }

    let (independent, mut pending): (Vec<_>, Vec<_>) = groups
        .into_iter()
        .partition(|group| group.iter().all(|e| e.parent.is_none()));

    let mut merged: Vec<Entity> = Vec::new();
    for group in independent {
        merge_into(group, &mut merged, rules)?;
    }

    while !pending.is_empty() {
        let done: HashSet<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|group| {
            group
                .iter()
                .filter_map(|e| e.parent.as_deref())
                .all(|parent| done.contains(parent) || !slots.contains_key(parent))
        });

        if ready.is_empty() {
            return Err(missing_parent(&waiting[0], &done));
        }
        for group in ready {
            merge_into(group, &mut merged, rules)?;
        }
        pending = waiting;
    }
    Ok(merged)
}

fn merge_into(group: Vec<Entity>, merged: &mut Vec<Entity>, rules: &mut RuleBook<'_>) -> Result<()> {
    let entity = if group.len() == 1 {
        group.into_iter().next()
    } else {
        Some(merge_group(group, merged, rules)?)
    };
    merged.extend(entity);
    Ok(())
}

fn missing_parent(group: &[Entity], done: &HashSet<&str>) -> CompileError {
    let parent = group
        .iter()
        .filter_map(|e| e.parent.as_deref())
        .find(|parent| !done.contains(parent))
        .unwrap_or_default();
    let mut types: Vec<String> = group
        .iter()
        .flat_map(|m| m.source_types.iter().cloned())
        .collect();
    types.sort();
    CompileError::MissingParent {
        entity: group.first().map(|e| e.name.clone()).unwrap_or_default(),
        parent: parent.to_string(),
        types: types.join("; "),
    }
}

fn merge_group(mut members: Vec<Entity>, merged: &mut [Entity], rules: &mut RuleBook<'_>) -> Result<Entity> {
    let name = members[0].name.clone();
    let mut source_types: Vec<String> = members
        .iter()
        .flat_map(|m| m.source_types.iter().cloned())
        .collect();
    source_types.sort();
    debug!(entity = %name, types = %source_types.join("; "), "merging entity");

    let parent = merge_parents(&name, &mut members, merged, rules)?;

    let mut seen = HashSet::new();
    let mut identities: Vec<(String, String)> = Vec::new();
    for member in &members {
        for field in &member.fields {
            let id = (field.name.clone(), field.dotted_path.clone());
            if seen.insert(id.clone()) {
                identities.push(id);
            }
        }
    }

    let mut fields = Vec::with_capacity(identities.len());
    for (field_name, dotted) in &identities {
        fields.push(merge_field(&name, field_name, dotted, &members, rules)?);
    }
    let fields = coalesce_aliases(&name, fields)?;

    let mut documentation: Vec<String> = members
        .iter()
        .flat_map(|m| m.documentation.iter().cloned())
        .collect();
    documentation.sort();
    documentation.dedup();

    let mut entity = Entity::new(name, String::new());
    entity.source_types = source_types;
    entity.parent = parent;
    entity.fields = fields;
    entity.is_abstract = members.iter().all(|m| m.is_abstract);
    entity.documentation = documentation;
    entity.number_field = members[0].number_field.clone();
    entity.match_fields = members[0].match_fields.clone();
    entity.close();
    Ok(entity)
}

/// Common parent of the members. Members without a parent, merged with
/// members whose parent is already final, become children of it and lose
/// the fields they would inherit from it or from its ancestors.
fn merge_parents(
    name: &str,
    members: &mut [Entity],
    merged: &mut [Entity],
    rules: &mut RuleBook<'_>,
) -> Result<Option<String>> {
    let mut parents: Vec<Option<String>> = members.iter().map(|m| m.parent.clone()).collect();
    parents.sort();
    parents.dedup();

    if let [None, Some(parent_name)] = parents.as_slice() {
        let parent_name = parent_name.clone();
        let lineage = ancestry(name, &parent_name, members, merged)?;

        for member in members.iter_mut().filter(|m| m.parent.is_none()) {
            let member_type = member.source_types.join("; ");
            let mut kept = Vec::with_capacity(member.fields.len());
            for field in std::mem::take(&mut member.fields) {
                let found = lineage.iter().find_map(|&owner| {
                    merged[owner]
                        .fields
                        .iter()
                        .position(|f| f.name == field.name && f.dotted_path == field.dotted_path)
                        .map(|slot| (owner, slot))
                });
                let Some((owner, slot)) = found else {
                    kept.push(field);
                    continue;
                };

                let ancestor = &mut merged[owner];
                let ancestor_type = ancestor.source_types.join("; ");
                let ancestor_path = ancestor.source_types.first().cloned().unwrap_or_default();
                let inherited = &mut ancestor.fields[slot];

                if let (FieldKind::JsonBag { entries }, FieldKind::JsonBag { entries: other }) =
                    (&mut inherited.kind, &field.kind)
                {
                    merge_bags(entries, other);
                    inherited.documentation = vec![bag_documentation(entries)];
                    continue;
                }

                let first = signature(inherited)?;
                let second = signature(&field)?;
                if first == second {
                    continue;
                }
                let ancestor_rules = rules.for_type(&ancestor.name, &ancestor_path)?;
                if !ancestor_rules.ignore_merge_mismatch.matches(&field.dotted_path) {
                    return Err(CompileError::MergeMismatch {
                        entity: name.to_string(),
                        path: field.dotted_path.clone(),
                        first_type: ancestor_type,
                        second_type: member_type,
                        diff: render_diff(&first, &second),
                    });
                }
            }
            member.fields = kept;
            member.parent = Some(parent_name.clone());
        }
        parents.remove(0);
    }

    let mut parents: Vec<String> = parents.into_iter().flatten().collect();
    if parents.len() > 1 {
        let mut types: Vec<String> = members
            .iter()
            .flat_map(|m| m.source_types.iter().cloned())
            .collect();
        types.sort();
        return Err(CompileError::DifferentParents {
            parents: parents.join(", "),
            types: types.join("; "),
        });
    }
    Ok(parents.pop())
}

/// Positions in `merged` of the parent and its ancestors, nearest first
fn ancestry(name: &str, parent: &str, members: &[Entity], merged: &[Entity]) -> Result<Vec<usize>> {
    let mut lineage: Vec<usize> = Vec::new();
    let mut next = Some(parent);
    while let Some(current) = next {
        let Some(position) = merged.iter().position(|e| e.name == current) else {
            let mut types: Vec<String> = members
                .iter()
                .flat_map(|m| m.source_types.iter().cloned())
                .collect();
            types.sort();
            return Err(CompileError::MissingParent {
                entity: name.to_string(),
                parent: current.to_string(),
                types: types.join("; "),
            });
        };
        if lineage.contains(&position) {
            break;
        }
        lineage.push(position);
        next = merged[position].parent.as_deref();
    }
    Ok(lineage)
}

fn merge_field(
    entity: &str,
    name: &str,
    dotted: &str,
    members: &[Entity],
    rules: &mut RuleBook<'_>,
) -> Result<Field> {
    let containing: Vec<(&Entity, &Field)> = members
        .iter()
        .filter_map(|m| m.field_by_identity(name, dotted).map(|f| (m, f)))
        .collect();
    let omnipresent = containing.len() == members.len();

    let mut fields: Vec<Field> = containing.iter().map(|(_, f)| (*f).clone()).collect();
    if !omnipresent || fields.iter().any(|f| f.nullable) {
        if fields.iter().any(|f| f.primary_key) {
            return Err(CompileError::NullablePrimaryKey {
                entity: entity.to_string(),
                field: name.to_string(),
            });
        }
        for field in &mut fields {
            field.nullable = true;
        }
    }

    let mut fields = fields.into_iter();
    let mut merged = match fields.next() {
        Some(field) => field,
        None => return Err(CompileError::DuplicateField {
            entity: entity.to_string(),
            field: name.to_string(),
        }),
    };
    let first_type = containing[0].0.source_types.join("; ");

    for (mut field, (member, _)) in fields.zip(containing.iter().skip(1)) {
        let member_type = member.source_types.join("; ");

        if let (FieldKind::JsonBag { entries }, FieldKind::JsonBag { entries: other }) =
            (&mut merged.kind, &field.kind)
        {
            merge_bags(entries, other);
            merged.documentation = vec![bag_documentation(entries)];
            continue;
        }

        unify(&mut merged, &mut field, &first_type, &member_type);
        merged.documentation = squeeze_docs(
            merged
                .documentation
                .iter()
                .chain(field.documentation.iter())
                .cloned(),
        );

        let first = signature(&merged)?;
        let second = signature(&field)?;
        if first == second {
            continue;
        }
        let member_rules = match member.source_types.first() {
            Some(type_path) => rules.for_type(&member.name, type_path)?,
            None => rules.for_type(&member.name, "")?,
        };
        if member_rules.ignore_merge_mismatch.matches(dotted) {
            merged
                .annotations
                .push(Annotation::MergeVariant(vec![member_type, describe(&field.kind)]));
        } else {
            return Err(CompileError::MergeMismatch {
                entity: entity.to_string(),
                path: dotted.to_string(),
                first_type,
                second_type: member_type,
                diff: render_diff(&first, &second),
            });
        }
    }

    if !omnipresent && merged.is_materialized() {
        let containing_types: BTreeSet<&str> = containing
            .iter()
            .flat_map(|(m, _)| m.source_types.iter().map(String::as_str))
            .collect();
        if containing.len() * 2 > members.len() {
            let lacking: BTreeSet<&str> = members
                .iter()
                .flat_map(|m| m.source_types.iter().map(String::as_str))
                .filter(|t| !containing_types.contains(t))
                .collect();
            merged
                .annotations
                .push(Annotation::NullIn(lacking.into_iter().map(String::from).collect()));
        } else {
            merged.annotations.push(Annotation::OnlyIn(
                containing_types.into_iter().map(String::from).collect(),
            ));
        }
    }

    Ok(merged)
}

/// Resolve the differences that merging accepts silently: a plain
/// reference wins over a one-to-one, an array wins over a single value of
/// the same scalar, a declared field wins over a dropped one
fn unify(first: &mut Field, other: &mut Field, first_type: &str, other_type: &str) {
    match (&first.kind, &other.kind) {
        (FieldKind::Scalar(single), FieldKind::Collection(array)) if single == array => {
            first.kind = other.kind.clone();
            first.max_occurs = other.max_occurs;
        }
        (FieldKind::Collection(array), FieldKind::Scalar(single)) if single == array => {
            other.kind = first.kind.clone();
            other.max_occurs = first.max_occurs;
        }
        _ => {}
    }

    if let (
        FieldKind::ToOne { target, one_to_one, .. },
        FieldKind::ToOne {
            target: other_target,
            one_to_one: other_one_to_one,
            ..
        },
    ) = (&first.kind, &other.kind)
    {
        if target == other_target && one_to_one != other_one_to_one {
            if *one_to_one {
                first.kind = other.kind.clone();
            } else {
                other.kind = first.kind.clone();
            }
        }
    }

    let first_dropped = matches!(first.kind, FieldKind::Dropped);
    let other_dropped = matches!(other.kind, FieldKind::Dropped);
    if first_dropped && !other_dropped {
        let mut replacement = other.clone();
        replacement
            .annotations
            .push(Annotation::ReplacesDropped(vec![first_type.to_string()]));
        *first = replacement;
        other.annotations = first.annotations.clone();
    } else if other_dropped && !first_dropped {
        first
            .annotations
            .push(Annotation::ReplacesDropped(vec![other_type.to_string()]));
        *other = first.clone();
    }
}

/// Later occurrences of a coalesced name become aliases of the first
fn coalesce_aliases(entity: &str, fields: Vec<Field>) -> Result<Vec<Field>> {
    let mut out: Vec<Field> = Vec::with_capacity(fields.len());
    for mut field in fields {
        let existing = out
            .iter()
            .position(|f| f.is_materialized() && f.name == field.name);
        match existing {
            Some(position) if field.is_materialized() => {
                if field.coalesced_from.is_none() && out[position].coalesced_from.is_none() {
                    return Err(CompileError::DuplicateField {
                        entity: entity.to_string(),
                        field: field.name,
                    });
                }
                let first = &mut out[position];
                first.documentation = squeeze_docs(
                    first
                        .documentation
                        .iter()
                        .chain(field.documentation.iter())
                        .cloned(),
                );
                let into = field.name.clone();
                let original = field
                    .coalesced_from
                    .take()
                    .unwrap_or_else(|| field.dotted_path.replace(['.', '@'], "_"));
                out.push(Field {
                    name: original,
                    kind: FieldKind::CoalescedAlias { into },
                    documentation: Vec::new(),
                    ..field
                });
            }
            _ => out.push(field),
        }
    }
    Ok(out)
}

/// Sorted, de-duplicated docs; a doc that extends the previous one
/// replaces it
pub(crate) fn squeeze_docs(docs: impl IntoIterator<Item = String>) -> Vec<String> {
    let sorted: BTreeSet<String> = docs.into_iter().collect();
    let mut out: Vec<String> = Vec::with_capacity(sorted.len());
    for doc in sorted {
        if out.last().map(|prev| doc.starts_with(prev.as_str())).unwrap_or(false) {
            out.pop();
        }
        out.push(doc);
    }
    out
}

/// Key-wise union; shared keys join their squeezed docs with `|`
fn merge_bags(entries: &mut BTreeMap<String, String>, other: &BTreeMap<String, String>) {
    for (key, doc) in other {
        match entries.get_mut(key) {
            Some(existing) => {
                let parts = existing
                    .split('|')
                    .chain(doc.split('|'))
                    .filter(|s| !s.is_empty())
                    .map(String::from);
                *existing = squeeze_docs(parts).join("|");
            }
            None => {
                entries.insert(key.clone(), doc.clone());
            }
        }
    }
}

/// Field representation compared when merging, without docs,
/// annotations, choice grouping and reverse accessor names
fn signature(field: &Field) -> Result<String> {
    let mut value = serde_json::to_value(field)?;
    if let Value::Object(map) = &mut value {
        for key in ["documentation", "annotations", "choice_group", "related_name", "coalesced_from"] {
            map.remove(key);
        }
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

fn describe(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Scalar(repr) => repr.kind.to_string(),
        FieldKind::Collection(repr) => format!("collection of {}", repr.kind),
        other => match other.target() {
            Some(target) => format!("{} {}", other.category(), target),
            None => other.category().to_string(),
        },
    }
}

fn render_diff(first: &str, second: &str) -> String {
    let diff = TextDiff::from_lines(first, second);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        out.push_str(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::entity::{ScalarKind, ScalarRepr};
    use crate::schema::MaxOccurs;

    fn scalar(name: &str, kind: ScalarKind) -> Field {
        Field::new(name, name, FieldKind::Scalar(ScalarRepr::new(kind)))
    }

    fn entity(type_path: &str, fields: Vec<Field>) -> Entity {
        let mut entity = Entity::new("Shape", type_path);
        entity.fields = fields;
        entity
    }

    fn derived(name: &str, type_path: &str, parent: Option<&str>, fields: &[&str]) -> Entity {
        let mut entity = Entity::new(name, type_path);
        entity.parent = parent.map(String::from);
        entity.fields = fields.iter().map(|f| scalar(f, ScalarKind::Text)).collect();
        entity
    }

    fn field_names(entity: &Entity) -> Vec<&str> {
        entity.fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_squeeze_docs() {
        let docs = squeeze_docs(
            ["Radius", "Radius in cm", "Area", "Area"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(docs, vec!["Area", "Radius in cm"]);
    }

    #[test]
    fn test_merge_bags() {
        let mut first = BTreeMap::from([("meta".to_string(), "Metadata".to_string())]);
        let second = BTreeMap::from([
            ("meta".to_string(), "Metadata block".to_string()),
            ("meta.tag".to_string(), String::new()),
        ]);
        merge_bags(&mut first, &second);
        assert_eq!(first["meta"], "Metadata block");
        assert!(first.contains_key("meta.tag"));
    }

    #[test]
    fn test_minority_field_only_in() {
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        let members = vec![
            entity("SquareType", vec![scalar("side", ScalarKind::Float), scalar("label", ScalarKind::Text)]),
            entity("CircleType", vec![scalar("radius", ScalarKind::Float), scalar("label", ScalarKind::Text)]),
            entity("TriangleType", vec![scalar("side", ScalarKind::Float), scalar("label", ScalarKind::Text)]),
        ];

        let merged = merge_entities(members, &mut rules).unwrap();
        assert_eq!(merged.len(), 1);
        let shape = &merged[0];
        assert_eq!(shape.source_types, vec!["CircleType", "SquareType", "TriangleType"]);

        let side = shape.field("side").unwrap();
        assert!(side.nullable);
        assert_eq!(side.annotations, vec![Annotation::NullIn(vec!["CircleType".into()])]);

        let radius = shape.field("radius").unwrap();
        assert!(radius.nullable);
        assert_eq!(radius.annotations, vec![Annotation::OnlyIn(vec!["CircleType".into()])]);

        let label = shape.field("label").unwrap();
        assert!(!label.nullable);
        assert!(label.annotations.is_empty());
    }

    #[test]
    fn test_mismatch_is_fatal_unless_ignored() {
        let members = || {
            vec![
                entity("SquareType", vec![scalar("size", ScalarKind::Float)]),
                entity("CircleType", vec![scalar("size", ScalarKind::Integer)]),
            ]
        };

        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        let err = merge_entities(members(), &mut rules).unwrap_err();
        match err {
            CompileError::MergeMismatch { path, diff, .. } => {
                assert_eq!(path, "size");
                assert!(diff.contains("-  \"kind\": \"float\""));
            }
            other => panic!("unexpected error: {}", other),
        }

        let config = CompilerConfig::from_toml_str(
            r#"
            [global]
            ignore_merge_mismatch_fields = ["size"]
            "#,
        )
        .unwrap();
        let mut rules = RuleBook::new(&config).unwrap();
        let merged = merge_entities(members(), &mut rules).unwrap();
        let size = merged[0].field("size").unwrap();
        assert!(matches!(size.annotations[0], Annotation::MergeVariant(_)));
    }

    #[test]
    fn test_nullable_primary_key_is_fatal() {
        let mut code = scalar("code", ScalarKind::Char);
        code.primary_key = true;
        let members = vec![
            entity("SquareType", vec![code]),
            entity("CircleType", vec![scalar("radius", ScalarKind::Float)]),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        assert!(matches!(
            merge_entities(members, &mut rules),
            Err(CompileError::NullablePrimaryKey { .. })
        ));
    }

    #[test]
    fn test_dropped_replaced_by_declared() {
        let members = vec![
            entity("SquareType", vec![Field::new("code", "code", FieldKind::Dropped)]),
            entity("CircleType", vec![scalar("code", ScalarKind::Text)]),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        let merged = merge_entities(members, &mut rules).unwrap();
        let code = merged[0].field("code").unwrap();
        assert_eq!(
            code.annotations,
            vec![Annotation::ReplacesDropped(vec!["SquareType".into()])]
        );
    }

    #[test]
    fn test_different_parents() {
        let mut square = entity("SquareType", vec![]);
        square.parent = Some("Polygon".to_string());
        let mut circle = entity("CircleType", vec![]);
        circle.parent = Some("Curve".to_string());
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        assert!(matches!(
            merge_entities(vec![square, circle], &mut rules),
            Err(CompileError::DifferentParents { .. })
        ));
    }

    #[test]
    fn test_single_value_widens_to_array() {
        let mut tags = Field::new("tag", "tag", FieldKind::Collection(ScalarRepr::new(ScalarKind::Text)));
        tags.max_occurs = MaxOccurs::Unbounded;
        let members = vec![
            entity("TypeA", vec![scalar("tag", ScalarKind::Text)]),
            entity("TypeB", vec![tags]),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();

        let merged = merge_entities(members, &mut rules).unwrap();
        let tag = merged[0].field("tag").unwrap();
        assert!(matches!(tag.kind, FieldKind::Collection(_)));
        assert_eq!(tag.max_occurs, MaxOccurs::Unbounded);
        assert!(!tag.nullable);
    }

    #[test]
    fn test_array_of_other_scalar_still_mismatches() {
        let members = vec![
            entity("TypeA", vec![scalar("tag", ScalarKind::Integer)]),
            entity(
                "TypeB",
                vec![Field::new("tag", "tag", FieldKind::Collection(ScalarRepr::new(ScalarKind::Text)))],
            ),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        assert!(matches!(
            merge_entities(members, &mut rules),
            Err(CompileError::MergeMismatch { .. })
        ));
    }

    #[test]
    fn test_parent_groups_merge_before_children() {
        // Children listed first; each group pairs a derived member with a
        // parentless one repeating the inherited fields
        let members = vec![
            derived("B", "B1", Some("A"), &["y"]),
            derived("B", "B2", None, &["code", "x", "y"]),
            derived("Root", "Root", None, &["code"]),
            derived("A", "ZA1", Some("Root"), &["x"]),
            derived("A", "ZA2", None, &["code", "x"]),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        let merged = merge_entities(members, &mut rules).unwrap();

        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "A", "B"]);

        let a = &merged[1];
        assert_eq!(a.parent.as_deref(), Some("Root"));
        assert_eq!(field_names(a), vec!["x"]);
        assert!(!a.fields[0].nullable);

        let b = &merged[2];
        assert_eq!(b.parent.as_deref(), Some("A"));
        assert_eq!(field_names(b), vec!["y"]);
        assert!(!b.fields[0].nullable);
    }

    #[test]
    fn test_inherited_field_mismatch_is_fatal() {
        let mut standalone = derived("A", "ZA2", None, &[]);
        standalone.fields.push(scalar("code", ScalarKind::Integer));
        let members = vec![
            derived("Root", "Root", None, &["code"]),
            derived("A", "ZA1", Some("Root"), &["x"]),
            standalone,
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        match merge_entities(members, &mut rules) {
            Err(CompileError::MergeMismatch { path, first_type, second_type, .. }) => {
                assert_eq!(path, "code");
                assert_eq!(first_type, "Root");
                assert_eq!(second_type, "ZA2");
            }
            other => panic!("Expected MergeMismatch, got {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn test_unknown_parent_is_fatal() {
        let members = vec![
            derived("C", "C1", Some("Ghost"), &["x"]),
            derived("C", "C2", None, &["x"]),
        ];
        let config = CompilerConfig::default();
        let mut rules = RuleBook::new(&config).unwrap();
        match merge_entities(members, &mut rules) {
            Err(CompileError::MissingParent { entity, parent, types }) => {
                assert_eq!(entity, "C");
                assert_eq!(parent, "Ghost");
                assert_eq!(types, "C1; C2");
            }
            other => panic!("Expected MissingParent, got {:?}", other.map(|m| m.len())),
        }
    }
}
