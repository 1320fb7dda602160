use formula_kernel::{
    AggregateDefinition, Aggregator, BinaryOp, ColumnId, DataType, Expr, KernelError, Schema,
    TableDefinition, TableId, Value,
};
use pretty_assertions::assert_eq;

fn values(schema: &Schema, column: ColumnId) -> Vec<Value> {
    schema.column(column).data().values().to_vec()
}

fn rows(offsets: &[usize]) -> Vec<Value> {
    offsets.iter().map(|&r| Value::Row(r)).collect()
}

/// Facts with a string column "Column21" holding A, A, A, B, projected onto a group table.
fn projection_model() -> (Schema, TableId, TableId) {
    let mut schema = Schema::new();
    let facts = schema.create_table("Facts").unwrap();
    let column21 = schema
        .create_column(facts, "Column21", DataType::String, false)
        .unwrap();
    for v in ["Value A", "Value A", "Value A", "Value B"] {
        schema.append_row(facts, &[(column21, v.into())]).unwrap();
    }

    let tuple = Expr::tuple(vec![Expr::member("Column21", Expr::path(&["Column21"]))]);
    let groups = schema
        .create_projection(
            "Groups",
            facts,
            "Group",
            &[("Column21", DataType::String)],
            tuple,
        )
        .unwrap();
    (schema, facts, groups)
}

#[test]
fn projection_discovers_distinct_groups() {
    let (mut schema, _facts, groups) = projection_model();
    let appended = schema.populate(groups).unwrap();
    assert_eq!(appended, 2);
    assert_eq!(schema.len(groups), 2);

    let key = schema.lookup_column("Groups", "Column21").unwrap();
    assert_eq!(
        values(&schema, key),
        vec![Value::from("Value A"), Value::from("Value B")]
    );
    let link = schema.lookup_column("Facts", "Group").unwrap();
    assert_eq!(values(&schema, link), rows(&[0, 0, 0, 1]));
}

#[test]
fn projection_rerun_adds_nothing() {
    let (mut schema, _facts, groups) = projection_model();
    schema.populate(groups).unwrap();
    assert_eq!(schema.populate(groups).unwrap(), 0);
    assert_eq!(schema.len(groups), 2);
}

#[test]
fn projection_after_clear_reproduces_rows() {
    let (mut schema, _facts, groups) = projection_model();
    schema.populate(groups).unwrap();
    let key = schema.lookup_column("Groups", "Column21").unwrap();
    let before = values(&schema, key);

    schema.clear_rows(groups);
    assert_eq!(schema.len(groups), 0);
    schema.populate(groups).unwrap();
    assert_eq!(values(&schema, key), before);
}

#[test]
fn projection_picks_up_new_facts() {
    let (mut schema, facts, groups) = projection_model();
    schema.populate(groups).unwrap();

    let column21 = schema.lookup_column("Facts", "Column21").unwrap();
    schema
        .append_row(facts, &[(column21, "Value C".into())])
        .unwrap();
    assert_eq!(schema.populate(groups).unwrap(), 1);

    let link = schema.lookup_column("Facts", "Group").unwrap();
    assert_eq!(values(&schema, link), rows(&[0, 0, 0, 1, 2]));
}

#[test]
fn projection_over_two_keys() {
    let mut schema = Schema::new();
    let facts = schema.create_table("Sales").unwrap();
    let region = schema
        .create_column(facts, "Region", DataType::String, false)
        .unwrap();
    let year = schema
        .create_column(facts, "Year", DataType::Number, false)
        .unwrap();
    for (r, y) in [("N", 2020.0), ("S", 2020.0), ("N", 2021.0), ("N", 2020.0)] {
        schema
            .append_row(facts, &[(region, r.into()), (year, y.into())])
            .unwrap();
    }

    let tuple = Expr::tuple(vec![
        Expr::member("Region", Expr::path(&["Region"])),
        Expr::member("Year", Expr::path(&["Year"])),
    ]);
    let groups = schema
        .create_projection(
            "RegionYears",
            facts,
            "RegionYear",
            &[("Region", DataType::String), ("Year", DataType::Number)],
            tuple,
        )
        .unwrap();

    assert_eq!(schema.populate(groups).unwrap(), 3);
    let link = schema.lookup_column("Sales", "RegionYear").unwrap();
    assert_eq!(values(&schema, link), rows(&[0, 1, 2, 0]));
}

#[test]
fn projection_feeds_count_aggregate() {
    let (mut schema, _facts, groups) = projection_model();
    let count = schema
        .create_column(groups, "Count", DataType::Number, false)
        .unwrap();
    schema.set_aggregate(
        count,
        AggregateDefinition::new("Facts", "Groups", Expr::number(1.0), Aggregator::Count),
    );

    schema.evaluate_all().unwrap();
    assert_eq!(values(&schema, count), vec![Value::from(3.0), Value::from(1.0)]);
}

/// Sources TA(x = 1, 2, 3) and TB(y = 1, 2, 3, 4).
fn product_sources() -> (Schema, TableId, TableId) {
    let mut schema = Schema::new();
    let a = schema.create_table("TA").unwrap();
    let x = schema.create_column(a, "x", DataType::Number, false).unwrap();
    for v in 1..=3 {
        schema.append_row(a, &[(x, f64::from(v).into())]).unwrap();
    }
    let b = schema.create_table("TB").unwrap();
    let y = schema.create_column(b, "y", DataType::Number, false).unwrap();
    for v in 1..=4 {
        schema.append_row(b, &[(y, f64::from(v).into())]).unwrap();
    }
    (schema, a, b)
}

#[test]
fn unfiltered_product_enumerates_every_combination() {
    let (mut schema, a, b) = product_sources();
    let product = schema
        .create_product("AB", &[("A", a), ("B", b)], None)
        .unwrap();

    assert_eq!(schema.populate(product).unwrap(), 12);
    let a_key = schema.lookup_column("AB", "A").unwrap();
    let b_key = schema.lookup_column("AB", "B").unwrap();
    assert_eq!(values(&schema, a_key), rows(&[0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]));
    assert_eq!(values(&schema, b_key), rows(&[0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]));
}

#[test]
fn filtered_product_keeps_matching_combinations() {
    let (mut schema, a, b) = product_sources();
    // this.[A].[x] >= 2 && this.[B].[y] >= 3
    let filter = Expr::binary(
        BinaryOp::And,
        Expr::binary(BinaryOp::GreaterEquals, Expr::path(&["A", "x"]), Expr::number(2.0)),
        Expr::binary(BinaryOp::GreaterEquals, Expr::path(&["B", "y"]), Expr::number(3.0)),
    );
    let product = schema
        .create_product("AB", &[("A", a), ("B", b)], Some(filter))
        .unwrap();

    assert_eq!(schema.populate(product).unwrap(), 4);
    let a_key = schema.lookup_column("AB", "A").unwrap();
    let b_key = schema.lookup_column("AB", "B").unwrap();
    assert_eq!(values(&schema, a_key), rows(&[1, 1, 2, 2]));
    assert_eq!(values(&schema, b_key), rows(&[2, 3, 2, 3]));

    assert_eq!(schema.populate(product).unwrap(), 0);
    schema.clear_rows(product);
    assert_eq!(schema.populate(product).unwrap(), 4);
}

#[test]
fn product_with_empty_source_is_empty() {
    let (mut schema, a, _b) = product_sources();
    let empty = schema.create_table("Empty").unwrap();
    schema.create_column(empty, "z", DataType::Number, false).unwrap();
    let product = schema
        .create_product("AE", &[("A", a), ("E", empty)], None)
        .unwrap();
    assert_eq!(schema.populate(product).unwrap(), 0);
}

#[test]
fn product_filter_must_be_boolean() {
    let (mut schema, a, b) = product_sources();
    let product = schema
        .create_product("AB", &[("A", a), ("B", b)], Some(Expr::path(&["A", "x"])))
        .unwrap();

    let err = schema.populate(product).unwrap_err();
    match err {
        KernelError::Row { table, row, .. } => {
            assert_eq!(table, "AB");
            assert_eq!(row, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The rejected candidate is not left behind.
    assert_eq!(schema.len(product), 0);
}

#[test]
fn product_without_keys_is_invalid() {
    let (mut schema, _a, _b) = product_sources();
    let product = schema.create_table("Bare").unwrap();
    schema.set_definition(product, TableDefinition::Product { filter: None });
    let err = schema.populate(product).unwrap_err();
    assert!(matches!(err, KernelError::InvalidDefinition { .. }), "{err}");
}

#[test]
fn subset_links_matching_base_rows() {
    let (mut schema, _a, b) = product_sources();
    let predicate = Expr::binary(BinaryOp::Greater, Expr::path(&["y"]), Expr::number(2.0));
    let subset = schema.create_subset("BigB", b, predicate).unwrap();

    assert_eq!(schema.populate(subset).unwrap(), 2);
    let link = schema.lookup_column("BigB", "Super").unwrap();
    assert_eq!(values(&schema, link), rows(&[2, 3]));
    assert_eq!(schema.populate(subset).unwrap(), 0);

    // Navigating back into the base table.
    let y = schema.lookup_column("TB", "y").unwrap();
    let Value::Row(base_row) = *schema.get_value(link, 1).unwrap() else {
        panic!("expected a row link");
    };
    assert_eq!(schema.get_value(y, base_row).unwrap(), &Value::from(4.0));
}

#[test]
fn subset_needs_a_single_super_key() {
    let (mut schema, a, b) = product_sources();
    let subset = schema
        .create_subset("SomeB", b, Expr::boolean(true))
        .unwrap();
    schema
        .create_column(subset, "Other", DataType::Table(b), true)
        .unwrap();
    let err = schema.populate(subset).unwrap_err();
    assert!(matches!(err, KernelError::InvalidDefinition { .. }), "{err}");

    let ok = schema.create_subset("AllA", a, Expr::boolean(true)).unwrap();
    assert_eq!(schema.populate(ok).unwrap(), 3);
}
