use formula_columnar::{ColumnError, ColumnOptions, ColumnType, IndexedColumn, Value};
use pretty_assertions::assert_eq;

fn strings(values: &[&str]) -> IndexedColumn {
    let mut column = IndexedColumn::new(ColumnType::String);
    for v in values {
        column.append(Value::from(*v)).unwrap();
    }
    column
}

#[test]
fn project_reads_insertion_order() {
    let column = strings(&["c", "a", "b"]);
    assert_eq!(column.project(0).unwrap(), &Value::from("c"));
    assert_eq!(column.project(2).unwrap(), &Value::from("b"));
    assert_eq!(column.sorted_offsets(), &[1, 2, 0]);
}

#[test]
fn project_out_of_range_fails() {
    let column = strings(&["a"]);
    assert_eq!(
        column.project(1).unwrap_err(),
        ColumnError::OutOfRange { offset: 1, len: 1 }
    );
}

#[test]
fn deproject_returns_every_matching_offset() {
    let column = strings(&["x", "y", "x", "z", "x", "y"]);
    assert_eq!(column.deproject(&"x".into()), &[0, 2, 4]);
    assert_eq!(column.deproject(&"y".into()), &[1, 5]);
    assert_eq!(column.deproject(&"z".into()), &[3]);
    assert!(column.deproject(&"w".into()).is_empty());
    assert!(column.deproject(&Value::Null).is_empty());
}

#[test]
fn equal_values_keep_insertion_order() {
    let mut column = IndexedColumn::new(ColumnType::Number);
    column.append(3.0.into()).unwrap();
    let o1 = column.append(7.0.into()).unwrap();
    column.append(1.0.into()).unwrap();
    let o2 = column.append(7.0.into()).unwrap();
    assert!(o1 < o2);
    assert_eq!(column.deproject(&7.0.into()), &[o1, o2]);
}

#[test]
fn set_value_moves_offset_between_runs() {
    let mut column = IndexedColumn::new(ColumnType::Number);
    for v in [10.0, 20.0, 10.0, 30.0] {
        column.append(v.into()).unwrap();
    }

    column.set_value(2, 30.0.into()).unwrap();

    assert_eq!(column.deproject(&10.0.into()), &[0]);
    assert_eq!(column.deproject(&30.0.into()), &[3, 2]);
    assert_eq!(column.project(0).unwrap(), &Value::Number(10.0));
    assert_eq!(column.project(1).unwrap(), &Value::Number(20.0));
    assert_eq!(column.project(3).unwrap(), &Value::Number(30.0));
    column.check_invariants().unwrap();
}

#[test]
fn set_value_out_of_range_leaves_column_untouched() {
    let mut column = strings(&["a", "b"]);
    let err = column.set_value(5, "c".into()).unwrap_err();
    assert!(matches!(err, ColumnError::OutOfRange { offset: 5, len: 2 }));
    assert_eq!(column.sorted_offsets(), &[0, 1]);
}

#[test]
fn type_mismatch_is_rejected() {
    let mut column = IndexedColumn::new(ColumnType::Row);
    column.append(Value::Row(4)).unwrap();
    column.append(Value::Null).unwrap();
    let err = column.append(Value::from(1.0)).unwrap_err();
    assert_eq!(
        err,
        ColumnError::TypeMismatch {
            expected: ColumnType::Row,
            actual: "number",
        }
    );
    assert_eq!(column.len(), 2);
}

#[test]
fn null_sorts_first() {
    let mut column = IndexedColumn::new(ColumnType::Number);
    column.append(2.0.into()).unwrap();
    column.append(Value::Null).unwrap();
    column.append((-1.0).into()).unwrap();
    assert_eq!(column.sorted_offsets(), &[1, 2, 0]);
}

#[test]
fn pop_removes_last_offset_from_index() {
    let mut column = strings(&["b", "a", "b"]);
    assert_eq!(column.pop(), Some(Value::from("b")));
    assert_eq!(column.deproject(&"b".into()), &[0]);
    assert_eq!(column.len(), 2);
    column.check_invariants().unwrap();

    let mut empty = IndexedColumn::new(ColumnType::String);
    assert_eq!(empty.pop(), None);
}

#[test]
fn fill_resets_every_cell() {
    let mut column = IndexedColumn::new(ColumnType::Number);
    for v in [4.0, 1.0, 3.0] {
        column.append(v.into()).unwrap();
    }
    column.fill(0.0.into()).unwrap();
    assert_eq!(column.deproject(&0.0.into()), &[0, 1, 2]);
    column.check_invariants().unwrap();
}

#[test]
fn options_deserialize_with_defaults() {
    let options: ColumnOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, ColumnOptions::default());

    let options: ColumnOptions = serde_json::from_str(r#"{"growth_increment": 16}"#).unwrap();
    assert_eq!(options.growth_increment, 16);
}
