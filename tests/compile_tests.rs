//! End-to-end compilation tests
//!
//! Each test loads a schema fixture plus its rule file and checks the
//! entity graph that comes out.

use std::collections::HashSet;
use std::fs;

use schema_entities::schema::load_file;
use schema_entities::{
    compile, Annotation, Checksum, CompileError, CompiledGraph, CompilerConfig, DiagnosticCode,
    FieldKind, OnDelete, ScalarKind, SchemaIndex,
};

fn fixture(json: &str, toml: &str) -> (SchemaIndex, CompilerConfig) {
    let index = SchemaIndex::from_json(json).unwrap();
    let config = CompilerConfig::from_toml_str(toml).unwrap();
    (index, config)
}

fn compile_fixture(json: &str, toml: &str) -> CompiledGraph {
    let (index, config) = fixture(json, toml);
    compile(&index, &config).unwrap()
}

fn orders() -> CompiledGraph {
    compile_fixture(
        include_str!("fixtures/orders.json"),
        include_str!("fixtures/orders.toml"),
    )
}

fn invoices() -> CompiledGraph {
    compile_fixture(
        include_str!("fixtures/invoices.json"),
        include_str!("fixtures/invoices.toml"),
    )
}

/// Every required dependency precedes its dependent
fn assert_emission_order(graph: &CompiledGraph) {
    for (position, entity) in graph.entities.iter().enumerate() {
        for dep in entity.required_dependencies() {
            let dep_position = graph
                .position(dep)
                .unwrap_or_else(|| panic!("{} depends on missing {}", entity.name, dep));
            assert!(
                dep_position < position,
                "{} emitted before its dependency {}",
                entity.name,
                dep
            );
        }
    }
}

/// Entity names unique; materialized field names unique per entity
fn assert_unique_names(graph: &CompiledGraph) {
    let mut entities = HashSet::new();
    for entity in &graph.entities {
        assert!(entities.insert(&entity.name), "duplicate entity {}", entity.name);
        let mut fields = HashSet::new();
        for field in entity.materialized_fields() {
            assert!(
                fields.insert(&field.name),
                "duplicate field {}.{}",
                entity.name,
                field.name
            );
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

#[test]
fn test_unbounded_child_becomes_one_to_many() {
    let graph = orders();

    let order = graph.entity("Order").unwrap();
    assert_eq!(order.source_types, vec!["OrderType"]);
    assert_eq!(order.documentation, vec!["A customer order"]);

    let item = order.field("item").unwrap();
    assert_eq!(
        item.kind,
        FieldKind::ReverseOneToMany {
            target: "Item".to_string(),
            reverse_field: "order".to_string(),
        }
    );
    assert!(item.kind.is_collection());

    let child = graph.entity("Item").unwrap();
    let back = child.field("order").unwrap();
    assert_eq!(
        back.kind,
        FieldKind::ToOne {
            target: "Order".to_string(),
            one_to_one: false,
            on_delete: OnDelete::Cascade,
            related_name: Some("item".to_string()),
        }
    );
    assert!(!back.nullable);

    assert!(graph.position("Order").unwrap() < graph.position("Item").unwrap());
}

#[test]
fn test_pattern_bounded_scalar() {
    let graph = orders();
    let order = graph.entity("Order").unwrap();

    let number = order.field("number").unwrap();
    assert!(!number.nullable);
    let repr = number.kind.scalar().unwrap();
    assert_eq!(repr.kind, ScalarKind::Char);
    assert_eq!(repr.max_length, Some(4));
    assert_eq!(repr.source_type.as_deref(), Some("OrderNumber"));
    assert!(!repr.validators.is_empty());

    let currency = order.field("currency").unwrap();
    assert_eq!(currency.dotted_path, "@currency");
    assert!(!currency.nullable);
    assert_eq!(currency.kind.scalar().unwrap().kind, ScalarKind::Text);
}

#[test]
fn test_choice_branches_are_nullable() {
    let graph = orders();
    let order = graph.entity("Order").unwrap();

    let name = order.field("colorName").unwrap();
    let code = order.field("colorCode").unwrap();
    assert!(name.nullable);
    assert!(code.nullable);
    assert!(name.choice_group.is_some());
    assert_eq!(name.choice_group, code.choice_group);
    assert_eq!(name.documentation, vec!["Color by name"]);
}

#[test]
fn test_json_bag_aggregates_descendant_docs() {
    let graph = orders();
    let order = graph.entity("Order").unwrap();

    assert!(order.field("meta").is_none());
    assert!(order.field("meta_source").is_none());

    let bag = order.field("attrs").unwrap();
    assert!(bag.nullable);
    match &bag.kind {
        FieldKind::JsonBag { entries } => {
            assert_eq!(entries["meta"], "Import metadata");
            assert_eq!(entries["meta.source"], "Originating system");
            assert_eq!(entries["meta.batch"], "Import batch");
        }
        other => panic!("Expected a JSON bag, got {:?}", other),
    }
    assert_eq!(
        bag.documentation,
        vec!["JSON attributes:\nmeta [Import metadata]\nmeta.batch [Import batch]\nmeta.source [Originating system]"]
    );
}

#[test]
fn test_output_is_deterministic() {
    let first = orders();
    let second = orders();
    assert_eq!(first.to_json_pretty().unwrap(), second.to_json_pretty().unwrap());

    let fingerprint = first.fingerprint().unwrap();
    assert_eq!(fingerprint, second.fingerprint().unwrap());
    assert!(fingerprint.verify(&second.entities).unwrap());
}

#[test]
fn test_graph_invariants() {
    for graph in [
        orders(),
        compile_fixture(
            include_str!("fixtures/shapes.json"),
            include_str!("fixtures/shapes.toml"),
        ),
        compile_fixture(
            include_str!("fixtures/catalog.json"),
            include_str!("fixtures/catalog.toml"),
        ),
        invoices(),
    ] {
        assert_unique_names(&graph);
        assert_emission_order(&graph);
    }
}

// =============================================================================
// Coalescing
// =============================================================================

const COALESCING_RULES: &str = r#"
[compiler]
roots = ["OrderType"]

[[type_map]]
pattern = "(.*)Type"
entity = "$1"

[[entities]]
name = "Order"
json_fields = ["meta"]
coalesce_fields = [{ pattern = "color(Name|Code)", replace = "color" }]
"#;

#[test]
fn test_coalesced_fields_share_one_column() {
    let graph = compile_fixture(include_str!("fixtures/orders.json"), COALESCING_RULES);
    let order = graph.entity("Order").unwrap();

    let colors: Vec<_> = order
        .materialized_fields()
        .filter(|f| f.name.starts_with("color"))
        .collect();
    assert_eq!(colors.len(), 1);

    let color = colors[0];
    assert_eq!(color.name, "color");
    assert_eq!(color.dotted_path, "colorName");
    assert_eq!(color.coalesced_from.as_deref(), Some("colorName"));
    assert!(color.documentation.contains(&"Color by name".to_string()));
    assert!(color.documentation.contains(&"Color by palette code".to_string()));

    let alias = order.fields.iter().find(|f| f.name == "colorCode").unwrap();
    assert_eq!(
        alias.kind,
        FieldKind::CoalescedAlias {
            into: "color".to_string()
        }
    );
}

// =============================================================================
// Merging
// =============================================================================

#[test]
fn test_merged_entity_marks_minority_fields() {
    let graph = compile_fixture(
        include_str!("fixtures/shapes.json"),
        include_str!("fixtures/shapes.toml"),
    );
    assert_eq!(graph.entities.len(), 1);

    let shape = graph.entity("Shape").unwrap();
    assert_eq!(shape.source_types, vec!["TypeA", "TypeB"]);
    assert_eq!(shape.documentation, vec!["Round shape", "Square shape"]);

    let label = shape.field("label").unwrap();
    assert!(!label.nullable);
    assert!(label.annotations.is_empty());

    let radius = shape.field("radius").unwrap();
    assert!(radius.nullable);
    assert_eq!(radius.annotations, vec![Annotation::OnlyIn(vec!["TypeA".to_string()])]);

    let side = shape.field("side").unwrap();
    assert!(side.nullable);
    assert_eq!(side.annotations, vec![Annotation::OnlyIn(vec!["TypeB".to_string()])]);
}

#[test]
fn test_shared_name_without_merge_is_fatal() {
    let rules = r#"
        [compiler]
        roots = ["TypeA", "TypeB"]

        [[type_map]]
        pattern = "Type[AB]"
        entity = "Shape"
    "#;
    let (index, config) = fixture(include_str!("fixtures/shapes.json"), rules);
    match compile(&index, &config) {
        Err(CompileError::DuplicateEntity {
            entity,
            type_path,
            existing,
        }) => {
            assert_eq!(entity, "Shape");
            assert_eq!(type_path, "TypeB");
            assert_eq!(existing, "TypeA");
        }
        other => panic!("Expected DuplicateEntity, got {:?}", other.map(|g| g.entities.len())),
    }
}

#[test]
fn test_single_value_merges_into_array() {
    let json = r#"{
        "complex_types": [
            {"name": "TypeA", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "tag", "type": "xs:string"}
            ]}},
            {"name": "TypeB", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "tag", "type": "xs:string", "max_occurs": "unbounded"}
            ]}}
        ]
    }"#;
    let rules = r#"
        [compiler]
        roots = ["TypeA", "TypeB"]

        [[type_map]]
        pattern = "Type[AB]"
        entity = "Shape"
        merge = true

        [[entities]]
        name = "Shape"

        [[entities.if_type]]
        pattern = "TypeB"
        array_fields = ["tag"]
    "#;
    let graph = compile_fixture(json, rules);
    let tag = graph.entity("Shape").unwrap().field("tag").unwrap();
    match &tag.kind {
        FieldKind::Collection(repr) => assert_eq!(repr.kind, ScalarKind::Text),
        other => panic!("Expected a collection, got {:?}", other),
    }
    assert_eq!(tag.max_occurs.to_string(), "unbounded");
    assert!(!tag.nullable);
}

const LAYERED_MERGE: &str = r#"{
    "complex_types": [
        {"name": "Root", "content": {"kind": "sequence", "particles": [
            {"kind": "element", "name": "code", "type": "xs:string"}
        ]}},
        {"name": "ZA1", "extension": {"base": "Root", "content": {"kind": "sequence", "particles": [
            {"kind": "element", "name": "x", "type": "xs:string"}
        ]}}},
        {"name": "ZA2", "content": {"kind": "sequence", "particles": [
            {"kind": "element", "name": "code", "type": "xs:string"},
            {"kind": "element", "name": "x", "type": "xs:string"}
        ]}},
        {"name": "B1", "extension": {"base": "ZA1", "content": {"kind": "sequence", "particles": [
            {"kind": "element", "name": "y", "type": "xs:string"}
        ]}}},
        {"name": "B2", "content": {"kind": "sequence", "particles": [
            {"kind": "element", "name": "code", "type": "xs:string"},
            {"kind": "element", "name": "x", "type": "xs:string"},
            {"kind": "element", "name": "y", "type": "xs:string"}
        ]}}
    ]
}"#;

#[test]
fn test_parentless_member_adopts_merged_parent() {
    let rules = r#"
        [compiler]
        roots = ["B1", "B2", "ZA2"]

        [[type_map]]
        pattern = "Root"
        entity = "Root"

        [[type_map]]
        pattern = "ZA[12]"
        entity = "A"
        merge = true

        [[type_map]]
        pattern = "B[12]"
        entity = "B"
        merge = true
    "#;
    let graph = compile_fixture(LAYERED_MERGE, rules);

    let a = graph.entity("A").unwrap();
    assert_eq!(a.parent.as_deref(), Some("Root"));
    assert_eq!(a.source_types, vec!["ZA1", "ZA2"]);
    let a_fields: Vec<_> = a.materialized_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(a_fields, vec!["x"]);

    let b = graph.entity("B").unwrap();
    assert_eq!(b.parent.as_deref(), Some("A"));
    let b_fields: Vec<_> = b
        .materialized_fields()
        .map(|f| (f.name.as_str(), f.nullable))
        .collect();
    assert_eq!(b_fields, vec![("y", false)]);

    assert_unique_names(&graph);
    assert_emission_order(&graph);
}

// =============================================================================
// Inheritance and Owned Types
// =============================================================================

#[test]
fn test_extension_and_inline_types() {
    let graph = compile_fixture(
        include_str!("fixtures/catalog.json"),
        include_str!("fixtures/catalog.toml"),
    );

    let base = graph.entity("Base").unwrap();
    assert!(base.is_abstract);
    assert!(base.field("id").is_some());
    assert_eq!(
        graph.diagnostics.with_code(DiagnosticCode::MissingContent).count(),
        1
    );

    let product = graph.entity("Product").unwrap();
    assert_eq!(product.parent.as_deref(), Some("Base"));
    assert!(product.field("id").is_none());
    assert!(product.field("title").is_some());

    let dimensions = product.field("dimensions").unwrap();
    assert_eq!(
        dimensions.kind,
        FieldKind::ToOne {
            target: "Dimensions".to_string(),
            one_to_one: true,
            on_delete: OnDelete::Cascade,
            related_name: None,
        }
    );
    let owned = graph.entity("Dimensions").unwrap();
    assert_eq!(owned.source_types, vec!["ProductType.dimensions"]);
    assert!(owned.imports.decimal);

    let catalog = graph.entity("Catalog").unwrap();
    assert!(matches!(
        catalog.field("product").map(|f| &f.kind),
        Some(FieldKind::ReverseOneToMany { target, .. }) if target == "Product"
    ));

    let product_at = graph.position("Product").unwrap();
    for dep in ["Base", "Dimensions", "Catalog"] {
        assert!(graph.position(dep).unwrap() < product_at);
    }
}

#[test]
fn test_include_parent_fields_copies_members() {
    let rules = format!(
        "{}\n[[entities]]\nname = \"Product\"\ninclude_parent_fields = true\n",
        include_str!("fixtures/catalog.toml")
    );
    let graph = compile_fixture(include_str!("fixtures/catalog.json"), &rules);

    assert!(graph.entity("Base").is_none());
    let product = graph.entity("Product").unwrap();
    assert_eq!(product.parent, None);
    let id = product.field("id").unwrap();
    assert_eq!(id.dotted_path, "@id");
    assert!(!id.nullable);
    assert!(product.field("title").is_some());
}

#[test]
fn test_parent_field_becomes_inheritance_link() {
    let graph = invoices();
    let invoice = graph.entity("Invoice").unwrap();

    assert_eq!(invoice.parent.as_deref(), Some("Document"));
    assert!(invoice.field("header").is_none());
    let alias = invoice.fields.iter().find(|f| f.name == "header").unwrap();
    assert_eq!(alias.kind, FieldKind::ParentAlias);

    let document = graph.entity("Document").unwrap();
    assert_eq!(document.source_types, vec!["DocumentType"]);
    assert!(document.field("issued").is_some());
    assert!(graph.position("Document").unwrap() < graph.position("Invoice").unwrap());
}

// =============================================================================
// Flattening and References
// =============================================================================

#[test]
fn test_flattened_fields_are_prefixed() {
    let graph = invoices();
    let invoice = graph.entity("Invoice").unwrap();
    assert!(invoice.field("billing").is_none());
    assert!(graph.entity("Address").is_none());

    let city = invoice.field("billing_city").unwrap();
    assert_eq!(city.dotted_path, "billing.city");
    assert_eq!(city.documentation, vec!["Billing address::City name"]);
    assert!(city.nullable);

    let country = invoice.field("billing_country").unwrap();
    assert_eq!(country.dotted_path, "billing.@country");
    assert!(country.nullable);
}

#[test]
fn test_flattened_simple_content_keeps_its_value() {
    let graph = invoices();
    let invoice = graph.entity("Invoice").unwrap();

    let total = invoice.field("total").unwrap();
    assert_eq!(total.kind.scalar().unwrap().kind, ScalarKind::Decimal);
    assert!(!total.nullable);
    assert!(invoice.field("total_currency").is_none());
    assert!(invoice.imports.decimal);

    let notes: Vec<_> = graph
        .diagnostics
        .with_code(DiagnosticCode::FlattenReinterpreted)
        .collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].path, "InvoiceType.total");
}

#[test]
fn test_empty_flatten_is_fatal() {
    let json = r#"{
        "complex_types": [
            {"name": "OrderType", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "extra", "type": "EmptyType"}
            ]}},
            {"name": "EmptyType"}
        ]
    }"#;
    let rules = r#"
        [compiler]
        roots = ["OrderType"]

        [[type_map]]
        pattern = "(.*)Type"
        entity = "$1"

        [[entities]]
        name = "Order"
        flatten_fields = ["extra"]
    "#;
    let (index, config) = fixture(json, rules);
    match compile(&index, &config) {
        Err(CompileError::EmptyFlatten { path, type_name }) => {
            assert_eq!(path, "OrderType.extra");
            assert_eq!(type_name, "EmptyType");
        }
        other => panic!("Expected EmptyFlatten, got {:?}", other.map(|g| g.entities.len())),
    }
}

#[test]
fn test_reference_extension_splits_base_and_additions() {
    let graph = invoices();
    let invoice = graph.entity("Invoice").unwrap();

    let customer = invoice.field("customer").unwrap();
    assert_eq!(
        customer.kind,
        FieldKind::ToOne {
            target: "Party".to_string(),
            one_to_one: false,
            on_delete: OnDelete::Protect,
            related_name: None,
        }
    );
    assert!(!customer.nullable);
    assert!(graph.entity("CustomerRef").is_none());
    assert!(graph.entity("Party").unwrap().field("name").is_some());

    let role = invoice.field("customer_role").unwrap();
    assert_eq!(role.dotted_path, "customer.@role");
    assert!(role.nullable);
    let note = invoice.field("customer_note").unwrap();
    assert_eq!(note.dotted_path, "customer.note");
    assert!(note.nullable);
}

// =============================================================================
// Size Inference
// =============================================================================

#[test]
fn test_collection_of_root_type_becomes_many_to_many() {
    let graph = invoices();
    let invoice = graph.entity("Invoice").unwrap();

    for name in ["tag", "labels"] {
        let field = invoice.field(name).unwrap();
        match &field.kind {
            FieldKind::ManyToMany { target, .. } => assert_eq!(target, "Tag"),
            other => panic!("Expected {} to be many-to-many, got {:?}", name, other),
        }
        assert_eq!(field.max_occurs.to_string(), "unbounded");
    }

    let tag = graph.entity("Tag").unwrap();
    assert!(tag.field("invoice").is_none());
    assert!(invoice.dependencies.contains("Tag"));
}

// =============================================================================
// Fatal Errors
// =============================================================================

const BOUNDED_REPEAT: &str = r#"{
    "complex_types": [{"name": "OrderType", "content": {"kind": "sequence", "particles": [
        {"kind": "element", "name": "tag", "type": "xs:string", "max_occurs": 5}
    ]}}]
}"#;

#[test]
fn test_bounded_repeat_needs_a_rule() {
    let rules = r#"
        [compiler]
        roots = ["OrderType"]

        [[type_map]]
        pattern = "(.*)Type"
        entity = "$1"
    "#;
    let (index, config) = fixture(BOUNDED_REPEAT, rules);
    match compile(&index, &config) {
        Err(CompileError::Cardinality {
            path,
            max_occurs,
            type_name,
        }) => {
            assert_eq!(path, "OrderType.tag");
            assert_eq!(max_occurs, "5");
            assert_eq!(type_name, "xs:string");
        }
        other => panic!("Expected Cardinality, got {:?}", other.map(|g| g.entities.len())),
    }
}

#[test]
fn test_array_rule_accepts_bounded_repeat() {
    let rules = r#"
        [compiler]
        roots = ["OrderType"]

        [[type_map]]
        pattern = "(.*)Type"
        entity = "$1"

        [[entities]]
        name = "Order"
        array_fields = ["tag"]
    "#;
    let graph = compile_fixture(BOUNDED_REPEAT, rules);
    let tag = graph.entity("Order").unwrap().field("tag").unwrap();
    assert!(matches!(tag.kind, FieldKind::Collection(_)));
    assert_eq!(tag.max_occurs.to_string(), "5");
}

#[test]
fn test_identifier_limit_is_enforced() {
    let rules = r#"
        [compiler]
        roots = ["OrderType"]
        identifier_limit = 5

        [[type_map]]
        pattern = "(.*)Type"
        entity = "$1"
    "#;
    let (index, config) = fixture(include_str!("fixtures/orders.json"), rules);
    match compile(&index, &config) {
        Err(CompileError::IdentifierTooLong { path, name, limit }) => {
            assert_eq!(name, "currency");
            assert_eq!(path, "OrderType.@currency");
            assert_eq!(limit, 5);
        }
        other => panic!("Expected IdentifierTooLong, got {:?}", other.map(|g| g.entities.len())),
    }
}

#[test]
fn test_required_reference_cycle_is_fatal() {
    let json = r#"{
        "complex_types": [
            {"name": "TypeA", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "b", "type": "TypeB"}
            ]}},
            {"name": "TypeB", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "a", "type": "TypeA"}
            ]}}
        ]
    }"#;
    let rules = r#"
        [compiler]
        roots = ["TypeA"]

        [[type_map]]
        pattern = "Type(.*)"
        entity = "$1"
    "#;
    let (index, config) = fixture(json, rules);
    match compile(&index, &config) {
        Err(CompileError::DependencyCycle { entities }) => assert_eq!(entities, "A, B"),
        other => panic!("Expected DependencyCycle, got {:?}", other.map(|g| g.entities.len())),
    }
}

#[test]
fn test_optional_reference_cycle_compiles() {
    let json = r#"{
        "complex_types": [
            {"name": "TypeA", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "b", "type": "TypeB", "min_occurs": 0}
            ]}},
            {"name": "TypeB", "content": {"kind": "sequence", "particles": [
                {"kind": "element", "name": "a", "type": "TypeA"}
            ]}}
        ]
    }"#;
    let rules = r#"
        [compiler]
        roots = ["TypeA"]

        [[type_map]]
        pattern = "Type(.*)"
        entity = "$1"
    "#;
    let graph = compile_fixture(json, rules);
    assert_eq!(graph.entities.len(), 2);
    assert_emission_order(&graph);
    assert!(graph.entity("A").unwrap().field("b").unwrap().nullable);
}

// =============================================================================
// Filesystem
// =============================================================================

#[test]
fn test_compile_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let schema_path = dir.path().join("orders.json");
    let config_path = dir.path().join("orders.toml");
    fs::write(&schema_path, include_str!("fixtures/orders.json")).unwrap();
    fs::write(&config_path, include_str!("fixtures/orders.toml")).unwrap();

    let index = SchemaIndex::build(load_file(&schema_path).unwrap()).unwrap();
    let config = CompilerConfig::load_from(Some(config_path.as_path())).unwrap();
    let graph = compile(&index, &config).unwrap();

    assert_eq!(
        graph.fingerprint().unwrap(),
        orders().fingerprint().unwrap()
    );

    let recorded = Checksum::from(orders().fingerprint().unwrap().to_string());
    assert!(recorded.verify(&graph.entities).unwrap());
    assert!(!recorded.verify(&invoices().entities).unwrap());
}
