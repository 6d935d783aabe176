#![allow(missing_docs)]

use matrixgraph::graph::Graph;
use matrixgraph::query::{
    compare_records, Entry, ExecOptions, ExecutionPlan, NodeScanOp, ProjectOp, Record,
    SkipLimitOp, SortKey, SortOp, ValuesOp, Value,
};
use matrixgraph::types::Result;
use proptest::prelude::*;

fn person(age: i64, name: &str) -> Record {
    let mut record = Record::new();
    record.set(0, Entry::Scalar(Value::Int(age)));
    record.set(1, Entry::Scalar(Value::from(name)));
    record
}

fn rows(records: &[Record]) -> Vec<(Value, Value)> {
    records.iter().map(|r| (r.value(0), r.value(1))).collect()
}

fn age_desc_name_asc() -> Vec<SortKey> {
    vec![SortKey::desc(0), SortKey::asc(1)]
}

#[test]
fn orders_by_age_desc_then_name_asc() -> Result<()> {
    let input = vec![person(30, "b"), person(30, "a"), person(20, "z")];
    let sort = SortOp::new(Box::new(ValuesOp::new(input)), age_desc_name_asc());
    let mut plan = ExecutionPlan::new(Box::new(sort), ExecOptions::default());
    let result = plan.execute(&Graph::default())?;
    assert_eq!(
        rows(&result.records),
        vec![
            (Value::Int(30), Value::from("a")),
            (Value::Int(30), Value::from("b")),
            (Value::Int(20), Value::from("z")),
        ]
    );
    Ok(())
}

#[test]
fn nulls_and_mixed_types_have_a_total_order() -> Result<()> {
    let mut missing = Record::new();
    missing.set(1, Entry::Scalar(Value::from("m")));
    let mut float = Record::new();
    float.set(0, Entry::Scalar(Value::Float(25.5)));
    let input = vec![person(30, "b"), missing, float, person(20, "z")];
    let sort = SortOp::new(Box::new(ValuesOp::new(input)), vec![SortKey::asc(0)]);
    let mut plan = ExecutionPlan::new(Box::new(sort), ExecOptions::default());
    let ages: Vec<Value> = plan.execute(&Graph::default())?.records.iter().map(|r| r.value(0)).collect();
    assert_eq!(
        ages,
        vec![Value::Null, Value::Int(20), Value::Float(25.5), Value::Int(30)]
    );
    Ok(())
}

#[test]
fn projected_properties_drive_a_bounded_sort() -> Result<()> {
    let mut graph = Graph::default();
    let person = graph.add_label("Person")?;
    for (age, name) in [(41, "ann"), (35, "bob"), (41, "al"), (19, "cy"), (35, "bea")] {
        graph.create_node(&[person], vec![("age", Value::Int(age)), ("name", Value::from(name))])?;
    }
    let scan = NodeScanOp::by_label(2, person);
    let age = ProjectOp::new(Box::new(scan), 2, "age", 0);
    let name = ProjectOp::new(Box::new(age), 2, "name", 1);
    let sort = SortOp::new(Box::new(name), age_desc_name_asc()).with_limit(1, 3);
    let root = SkipLimitOp::new(Box::new(sort), 1, Some(3));
    let mut plan = ExecutionPlan::new(Box::new(root), ExecOptions::default());
    let result = plan.execute(&graph)?;
    assert_eq!(
        rows(&result.records),
        vec![
            (Value::Int(41), Value::from("ann")),
            (Value::Int(35), Value::from("bea")),
            (Value::Int(35), Value::from("bob")),
        ]
    );
    Ok(())
}

#[test]
fn integers_beyond_float_precision_sort_consistently() -> Result<()> {
    let two_53 = 1i64 << 53;
    let values = [Value::Int(two_53 + 1), Value::Float(two_53 as f64), Value::Int(two_53)];
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let input: Vec<Record> = order
            .iter()
            .enumerate()
            .map(|(seq, &at)| {
                let mut record = Record::new();
                record.set(0, Entry::Scalar(values[at].clone()));
                record.set(2, Entry::Scalar(Value::Int(seq as i64)));
                record
            })
            .collect();
        let keys = vec![SortKey::asc(0)];
        let mut expected = input.clone();
        expected.sort_by(|a, b| compare_records(&keys, a, b));
        assert!(
            matches!(expected[2].value(0), Value::Int(v) if v == two_53 + 1),
            "largest must sort last for {order:?}"
        );

        for limit in 1..=3u64 {
            let sort = SortOp::new(Box::new(ValuesOp::new(input.clone())), keys.clone()).with_limit(0, limit);
            let root = SkipLimitOp::new(Box::new(sort), 0, Some(limit));
            let mut plan = ExecutionPlan::new(Box::new(root), ExecOptions::default());
            let got = plan.execute(&Graph::default())?.records;
            assert_eq!(got, expected[..limit as usize].to_vec(), "order {order:?} limit {limit}");
        }
        let full = SortOp::new(Box::new(ValuesOp::new(input)), keys);
        let mut plan = ExecutionPlan::new(Box::new(full), ExecOptions::default());
        assert_eq!(plan.execute(&Graph::default())?.records, expected, "order {order:?}");
    }
    Ok(())
}

fn arb_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec((0i64..6, prop::sample::select(vec!["a", "b", "c", "d"])), 0..60).prop_map(
        |items| {
            items
                .into_iter()
                .enumerate()
                .map(|(seq, (age, name))| {
                    let mut record = person(age, name);
                    record.set(2, Entry::Scalar(Value::Int(seq as i64)));
                    record
                })
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn bounded_mode_agrees_with_full_sort(
        records in arb_records(),
        skip in 0u64..10,
        limit in 0u64..15,
    ) {
        let keys = age_desc_name_asc();
        let mut expected = records.clone();
        expected.sort_by(|a, b| compare_records(&keys, a, b));
        let expected: Vec<Record> = expected
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();

        let bounded = SortOp::new(Box::new(ValuesOp::new(records.clone())), keys.clone())
            .with_limit(skip, limit);
        let root = SkipLimitOp::new(Box::new(bounded), skip, Some(limit));
        let mut plan = ExecutionPlan::new(Box::new(root), ExecOptions::default());
        let got = plan.execute(&Graph::default()).unwrap().records;
        prop_assert_eq!(&got, &expected);

        let full = SortOp::new(Box::new(ValuesOp::new(records)), keys);
        let root = SkipLimitOp::new(Box::new(full), skip, Some(limit));
        let mut plan = ExecutionPlan::new(Box::new(root), ExecOptions::default());
        let got = plan.execute(&Graph::default()).unwrap().records;
        prop_assert_eq!(&got, &expected);
    }
}
