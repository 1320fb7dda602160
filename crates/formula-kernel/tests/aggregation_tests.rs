use formula_kernel::{
    AggregateDefinition, AggregationEvaluator, Aggregator, BinaryOp, ColumnId, DataType, Expr,
    KernelError, Schema, TableId, Value,
};
use pretty_assertions::assert_eq;

struct Model {
    schema: Schema,
    facts: TableId,
    groups: TableId,
    total: ColumnId,
}

/// Groups g0, g1, g2 and facts (g0, 40), (g1, 40), (g1, 50), (g1, 50).
fn model() -> Model {
    let mut schema = Schema::new();
    let groups = schema.create_table("Groups").unwrap();
    let name = schema
        .create_column(groups, "Name", DataType::String, true)
        .unwrap();
    let total = schema
        .create_column(groups, "Total", DataType::Number, false)
        .unwrap();
    for g in ["g0", "g1", "g2"] {
        schema.append_row(groups, &[(name, g.into())]).unwrap();
    }

    let facts = schema.create_table("Facts").unwrap();
    let group = schema
        .create_column(facts, "Group", DataType::Table(groups), false)
        .unwrap();
    let measure = schema
        .create_column(facts, "Measure", DataType::Number, false)
        .unwrap();
    for (g, m) in [(0, 40.0), (1, 40.0), (1, 50.0), (1, 50.0)] {
        schema
            .append_row(facts, &[(group, Value::Row(g)), (measure, m.into())])
            .unwrap();
    }

    Model {
        schema,
        facts,
        groups,
        total,
    }
}

fn doubled_plus_one() -> Expr {
    Expr::binary(
        BinaryOp::Add,
        Expr::binary(BinaryOp::Multiply, Expr::path(&["Measure"]), Expr::number(2.0)),
        Expr::number(1.0),
    )
}

fn totals(schema: &Schema, column: ColumnId) -> Vec<Value> {
    schema.column(column).data().values().to_vec()
}

#[test]
fn sum_of_derived_measure_per_group() {
    let mut m = model();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", doubled_plus_one(), Aggregator::Sum),
    );

    let mut evaluator = AggregationEvaluator::new(&m.schema, m.total).unwrap();
    assert_eq!(evaluator.facts(), m.facts);
    assert_eq!(evaluator.groups(), m.groups);
    m.schema.fill(m.total, Value::Number(0.0)).unwrap();
    evaluator.evaluate(&mut m.schema).unwrap();

    assert_eq!(
        totals(&m.schema, m.total),
        vec![Value::from(81.0), Value::from(283.0), Value::from(0.0)]
    );
}

#[test]
fn aggregation_starts_from_current_accumulator() {
    let mut m = model();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", doubled_plus_one(), Aggregator::Sum),
    );
    m.schema.fill(m.total, Value::Number(1000.0)).unwrap();

    let mut evaluator = AggregationEvaluator::new(&m.schema, m.total).unwrap();
    evaluator.evaluate(&mut m.schema).unwrap();

    assert_eq!(
        totals(&m.schema, m.total),
        vec![Value::from(1081.0), Value::from(1283.0), Value::from(1000.0)]
    );
}

#[test]
fn rerun_after_reset_is_idempotent() {
    let mut m = model();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", doubled_plus_one(), Aggregator::Sum),
    );

    m.schema.evaluate_column(m.total).unwrap();
    let first = totals(&m.schema, m.total);
    m.schema.evaluate_column(m.total).unwrap();
    assert_eq!(totals(&m.schema, m.total), first);
}

#[test]
fn count_min_max_aggregators() {
    let mut m = model();
    let cases = [
        (Aggregator::Count, vec![1.0.into(), 3.0.into(), 0.0.into()]),
        (Aggregator::Min, vec![40.0.into(), 40.0.into(), Value::Null]),
        (Aggregator::Max, vec![40.0.into(), 50.0.into(), Value::Null]),
    ];
    for (aggregator, expected) in cases {
        m.schema.set_aggregate(
            m.total,
            AggregateDefinition::new("Facts", "Groups", Expr::path(&["Measure"]), aggregator),
        );
        m.schema.evaluate_column(m.total).unwrap();
        assert_eq!(totals(&m.schema, m.total), expected);
    }
}

#[test]
fn custom_updater_over_value_and_measure() {
    let mut m = model();
    // Sum of squares.
    let updater = Expr::binary(
        BinaryOp::Add,
        Expr::var("value"),
        Expr::binary(BinaryOp::Multiply, Expr::var("measure"), Expr::var("measure")),
    );
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new(
            "Facts",
            "Groups",
            Expr::path(&["Measure"]),
            Aggregator::Custom(updater),
        ),
    );
    m.schema.fill(m.total, Value::Number(0.0)).unwrap();
    let mut evaluator = AggregationEvaluator::new(&m.schema, m.total).unwrap();
    evaluator.evaluate(&mut m.schema).unwrap();

    assert_eq!(
        totals(&m.schema, m.total),
        vec![Value::from(1600.0), Value::from(6600.0), Value::from(0.0)]
    );
}

#[test]
fn facts_without_group_are_skipped() {
    let mut m = model();
    let group = m.schema.lookup_column("Facts", "Group").unwrap();
    let measure = m.schema.lookup_column("Facts", "Measure").unwrap();
    m.schema
        .append_row(m.facts, &[(group, Value::Null), (measure, 7.0.into())])
        .unwrap();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", Expr::path(&["Measure"]), Aggregator::Sum),
    );

    m.schema.evaluate_column(m.total).unwrap();
    assert_eq!(
        totals(&m.schema, m.total),
        vec![Value::from(40.0), Value::from(140.0), Value::from(0.0)]
    );
}

#[test]
fn explicit_grouping_expression() {
    let mut m = model();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", Expr::path(&["Measure"]), Aggregator::Sum)
            .with_grouping(Expr::path(&["Group"])),
    );
    m.schema.evaluate_column(m.total).unwrap();
    assert_eq!(m.schema.get_value(m.total, 1).unwrap(), &Value::from(140.0));
}

#[test]
fn ambiguous_default_grouping_is_rejected() {
    let mut m = model();
    m.schema
        .create_column(m.facts, "Other", DataType::Table(m.groups), false)
        .unwrap();
    m.schema.set_aggregate(
        m.total,
        AggregateDefinition::new("Facts", "Groups", Expr::path(&["Measure"]), Aggregator::Sum),
    );

    let err = AggregationEvaluator::new(&m.schema, m.total).unwrap_err();
    match err {
        KernelError::Ambiguous { candidates, .. } => assert_eq!(candidates, "Group, Other"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn accumulator_must_live_on_group_table() {
    let mut m = model();
    let wrong = m
        .schema
        .create_column(m.facts, "Total", DataType::Number, false)
        .unwrap();
    m.schema.set_aggregate(
        wrong,
        AggregateDefinition::new("Facts", "Groups", Expr::path(&["Measure"]), Aggregator::Sum),
    );
    let err = AggregationEvaluator::new(&m.schema, wrong).unwrap_err();
    assert!(matches!(err, KernelError::InvalidDefinition { .. }), "{err}");
}

#[test]
fn definition_from_aggregate_call() {
    let call = Expr::call(
        "AGGREGATE",
        vec![
            Expr::member("facts", Expr::var("Facts")),
            Expr::member("groups", Expr::var("Groups")),
            Expr::member("measure", doubled_plus_one()),
            Expr::member("aggregator", Expr::var("SUM")),
        ],
    );
    let def = AggregateDefinition::from_call(&call).unwrap();
    assert_eq!(
        def,
        AggregateDefinition::new("Facts", "Groups", doubled_plus_one(), Aggregator::Sum)
    );

    let mut m = model();
    m.schema.set_aggregate(m.total, def);
    m.schema.evaluate_column(m.total).unwrap();
    assert_eq!(m.schema.get_value(m.total, 1).unwrap(), &Value::from(283.0));
}

#[test]
fn aggregate_call_with_unknown_aggregator_fails() {
    let call = Expr::call(
        "AGGREGATE",
        vec![
            Expr::member("facts", Expr::var("Facts")),
            Expr::member("groups", Expr::var("Groups")),
            Expr::member("measure", Expr::number(1.0)),
            Expr::member("aggregator", Expr::text("MEDIAN")),
        ],
    );
    let err = AggregateDefinition::from_call(&call).unwrap_err();
    assert!(err.to_string().contains("MEDIAN"), "{err}");
}

#[test]
fn fact_columns_named_like_updater_slots_still_aggregate() {
    let mut schema = Schema::new();
    let groups = schema.create_table("Groups").unwrap();
    let total = schema
        .create_column(groups, "Total", DataType::Number, false)
        .unwrap();
    for _ in 0..2 {
        schema.append_row(groups, &[]).unwrap();
    }

    let facts = schema.create_table("Facts").unwrap();
    let link = schema
        .create_column(facts, "group", DataType::Table(groups), false)
        .unwrap();
    let value = schema
        .create_column(facts, "value", DataType::Number, false)
        .unwrap();
    schema
        .create_column(facts, "measure", DataType::Number, false)
        .unwrap();
    for (g, v) in [(0, 1.0), (1, 2.0), (1, 3.0)] {
        schema
            .append_row(facts, &[(link, Value::Row(g)), (value, v.into())])
            .unwrap();
    }

    for aggregator in [Aggregator::Sum, Aggregator::Max] {
        schema.set_aggregate(
            total,
            AggregateDefinition::new("Facts", "Groups", Expr::path(&["value"]), aggregator),
        );
        schema.evaluate_column(total).unwrap();
    }
    assert_eq!(totals(&schema, total), vec![Value::from(1.0), Value::from(3.0)]);
}
