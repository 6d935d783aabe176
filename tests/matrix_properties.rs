#![allow(missing_docs)]

use std::collections::BTreeMap;

use matrixgraph::matrix::{Format, MatrixOptions, Scalar, ScalarType, SetOutcome, TypedMatrix};
use matrixgraph::types::Result;
use proptest::prelude::*;

const DIM: u64 = 12;

#[derive(Clone, Debug)]
enum Op {
    Set { row: u64, col: u64, value: i64 },
    Remove { row: u64, col: u64 },
    Wait,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..DIM, 0..DIM, -3i64..4).prop_map(|(row, col, value)| Op::Set { row, col, value }),
        2 => (0..DIM, 0..DIM).prop_map(|(row, col)| Op::Remove { row, col }),
        1 => Just(Op::Wait),
    ]
}

fn assert_matches_model(m: &TypedMatrix, model: &BTreeMap<(u64, u64), i64>) {
    for row in 0..DIM {
        for col in 0..DIM {
            let got = m.extract_element(row, col).unwrap();
            let want = model.get(&(row, col)).map(|v| Scalar::Int64(*v));
            assert_eq!(got, want, "entry ({row}, {col})");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lookup_after_set_matches_model(ops in prop::collection::vec(arb_op(), 1..120)) {
        let mut m = TypedMatrix::new(ScalarType::Int64, DIM, DIM).unwrap();
        let mut model = BTreeMap::new();
        for op in ops {
            match op {
                Op::Set { row, col, value } => {
                    m.set_element(value, row, col).unwrap();
                    model.insert((row, col), value);
                    prop_assert_eq!(m.extract_element(row, col).unwrap(), Some(Scalar::Int64(value)));
                }
                Op::Remove { row, col } => {
                    let removed = m.remove_element(row, col).unwrap();
                    prop_assert_eq!(removed, model.remove(&(row, col)).is_some());
                }
                Op::Wait => {
                    m.wait().unwrap();
                    prop_assert!(!m.has_deferred_state());
                }
            }
        }
        assert_matches_model(&m, &model);
        m.wait().unwrap();
        assert_matches_model(&m, &model);
        prop_assert_eq!(m.nvals().unwrap(), model.len() as u64);
        let committed: Vec<(u64, u64, Scalar)> = m.tuples().collect();
        let expected: Vec<(u64, u64, Scalar)> = model
            .iter()
            .map(|(&(row, col), &value)| (row, col, Scalar::Int64(value)))
            .collect();
        prop_assert_eq!(committed, expected);
    }

    #[test]
    fn set_casts_into_element_type(
        entries in prop::collection::btree_map((0..DIM, 0..DIM), -1000i64..1000, 1..40),
        commit in any::<bool>(),
    ) {
        let mut m = TypedMatrix::new(ScalarType::Fp64, DIM, DIM).unwrap();
        for (&(row, col), &value) in &entries {
            m.set_element(value, row, col).unwrap();
        }
        if commit {
            m.wait().unwrap();
        }
        for (&(row, col), &value) in &entries {
            prop_assert_eq!(m.extract_element(row, col).unwrap(), Some(Scalar::Fp64(value as f64)));
        }
    }

    #[test]
    fn remove_then_set_restores_value(
        entries in prop::collection::btree_map((0..64u64, 0..64u64), 1i64..100, 2..30),
        pick in any::<prop::sample::Index>(),
        replacement in 1i64..100,
    ) {
        let mut m = TypedMatrix::with_options(ScalarType::Int64, 64, 64, MatrixOptions::sparse_only()).unwrap();
        for (&(row, col), &value) in &entries {
            m.set_element(value, row, col).unwrap();
        }
        m.wait().unwrap();
        let keys: Vec<(u64, u64)> = entries.keys().copied().collect();
        let (row, col) = keys[pick.index(keys.len())];

        prop_assert!(m.remove_element(row, col).unwrap());
        prop_assert_eq!(m.zombie_count(), 1);
        let outcome = m.set_element(replacement, row, col).unwrap();
        prop_assert_eq!(outcome, SetOutcome::Resurrected);
        prop_assert_eq!(m.zombie_count(), 0);
        prop_assert_eq!(m.pending_count(), 0);
        prop_assert_eq!(m.extract_element(row, col).unwrap(), Some(Scalar::Int64(replacement)));
        prop_assert_eq!(m.nvals().unwrap(), entries.len() as u64);
    }

    #[test]
    fn identical_values_stay_iso(
        cells in prop::collection::btree_set((0..100u64, 0..100u64), 1..200),
        value in 1i64..50,
    ) {
        let mut m = TypedMatrix::new(ScalarType::Int64, 100, 100).unwrap();
        for &(row, col) in &cells {
            m.set_element(value, row, col).unwrap();
        }
        prop_assert!(m.is_iso());
        prop_assert_eq!(m.value_storage_len(), 1);
        m.wait().unwrap();
        prop_assert!(m.is_iso());
        prop_assert_eq!(m.value_storage_len(), 1);

        m.set_element(value + 1, 99, 99).unwrap();
        prop_assert!(!m.is_iso());
        for &(row, col) in &cells {
            if (row, col) != (99, 99) {
                prop_assert_eq!(m.extract_element(row, col).unwrap(), Some(Scalar::Int64(value)));
            }
        }
        prop_assert_eq!(m.extract_element(99, 99).unwrap(), Some(Scalar::Int64(value + 1)));
    }
}

#[test]
fn differing_pending_type_commits_earlier_tuples() -> Result<()> {
    let mut m = TypedMatrix::new(ScalarType::Fp64, 50, 50)?;
    // The first assignment is absorbed by the iso representative on expansion.
    m.set_element(0.5f64, 0, 0)?;
    m.set_element(1.5f64, 0, 1)?;
    for k in 1..6u64 {
        m.set_element(k as f64 + 0.25, k, k)?;
    }
    assert!(m.pending_count() > 1);

    m.set_element(9i64, 20, 20)?;
    assert_eq!(m.pending_count(), 1, "only the differently typed tuple is queued");
    for k in 1..6u64 {
        assert_eq!(m.extract_element(k, k)?, Some(Scalar::Fp64(k as f64 + 0.25)));
    }
    assert_eq!(m.extract_element(20, 20)?, Some(Scalar::Fp64(9.0)));

    m.set_element(10i64, 21, 21)?;
    assert_eq!(m.pending_count(), 2, "same type queues without a commit");
    Ok(())
}

#[test]
fn every_format_answers_lookups() -> Result<()> {
    for format in [Format::Full, Format::Bitmap, Format::Sparse, Format::Hypersparse] {
        let options = MatrixOptions::default().sparsity(matrixgraph::matrix::Sparsity::Fixed(format));
        let mut m = TypedMatrix::with_options(ScalarType::Int64, 6, 6, options)?;
        for r in 0..6u64 {
            for c in 0..6u64 {
                m.set_element((r * 10 + c) as i64, r, c)?;
            }
        }
        m.wait()?;
        assert_eq!(m.format(), format);
        m.set_element(-1i64, 2, 3)?;
        assert_eq!(m.extract_element(2, 3)?, Some(Scalar::Int64(-1)), "{format:?}");
        assert_eq!(m.extract_element(5, 4)?, Some(Scalar::Int64(54)), "{format:?}");
        assert!(m.remove_element(1, 1)?);
        assert_eq!(m.extract_element(1, 1)?, None, "{format:?}");
        m.set_element(7i64, 1, 1)?;
        assert_eq!(m.extract_element(1, 1)?, Some(Scalar::Int64(7)), "{format:?}");
        assert_eq!(m.nvals()?, 36);
    }
    Ok(())
}
