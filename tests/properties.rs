use ggr::{partition, partition_with, verify_phc, Config, FunctionalDependencies, Table};
use proptest::prelude::*;

static ALPHABET: &[&str] = &["", "a", "b", "cc", "ddd"];

fn arb_rows() -> impl Strategy<Value = Vec<Vec<&'static str>>> {
    (1usize..5).prop_flat_map(|columns| {
        prop::collection::vec(
            prop::collection::vec(prop::sample::select(ALPHABET), columns),
            0..8,
        )
    })
}

fn arb_single_column() -> impl Strategy<Value = Vec<Vec<&'static str>>> {
    prop::collection::vec(prop::collection::vec(prop::sample::select(ALPHABET), 1), 0..10)
}

// Group the first two columns whenever the table has them.
fn pair_dependency(table: &Table) -> FunctionalDependencies {
    if table.column_count() >= 2 {
        FunctionalDependencies::new(vec![vec![0, 1]]).unwrap()
    } else {
        FunctionalDependencies::none()
    }
}

proptest! {
    #[test]
    fn every_row_appears_exactly_once(rows in arb_rows(), grouped in any::<bool>()) {
        let table = Table::from_rows(rows).unwrap();
        let deps = if grouped { pair_dependency(&table) } else { FunctionalDependencies::none() };
        let result = partition(&table, &deps).unwrap();

        let mut seen = result.original_rows.clone();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..table.row_count()).collect::<Vec<_>>());
        prop_assert_eq!(result.rows.len(), table.row_count());
        prop_assert_eq!(result.column_orders.len(), table.row_count());
    }

    #[test]
    fn every_row_keeps_every_column(rows in arb_rows(), grouped in any::<bool>()) {
        let table = Table::from_rows(rows).unwrap();
        let deps = if grouped { pair_dependency(&table) } else { FunctionalDependencies::none() };
        let result = partition(&table, &deps).unwrap();

        let all: Vec<usize> = (0..table.column_count()).collect();
        for (order, values) in result.column_orders.iter().zip(result.rows.iter()) {
            let mut order = order.clone();
            order.sort_unstable();
            prop_assert_eq!(&order, &all);
            prop_assert_eq!(values.len(), all.len());
        }
    }

    #[test]
    fn values_follow_column_order(rows in arb_rows()) {
        let table = Table::from_rows(rows).unwrap();
        let result = partition(&table, &FunctionalDependencies::none()).unwrap();

        for (row, columns, values) in result.iter() {
            for (&column, &value) in columns.iter().zip(values) {
                prop_assert_eq!(table.get(row, column), Some(value));
            }
        }
    }

    #[test]
    fn realized_phc_is_at_least_the_score(rows in arb_rows()) {
        let table = Table::from_rows(rows).unwrap();
        let result = partition(&table, &FunctionalDependencies::none()).unwrap();
        prop_assert!(verify_phc(&result.rows) >= result.score);
    }

    #[test]
    fn identical_inputs_give_identical_outputs(rows in arb_rows(), grouped in any::<bool>()) {
        let table = Table::from_rows(rows).unwrap();
        let deps = if grouped { pair_dependency(&table) } else { FunctionalDependencies::none() };
        prop_assert_eq!(partition(&table, &deps).unwrap(), partition(&table, &deps).unwrap());
    }

    #[test]
    fn reused_hit_count_matches(rows in arb_rows(), grouped in any::<bool>()) {
        let table = Table::from_rows(rows).unwrap();
        let deps = if grouped { pair_dependency(&table) } else { FunctionalDependencies::none() };
        let config = Config::default().with_reuse_selected_hit_count(true);
        prop_assert_eq!(
            partition_with(&table, &deps, &config).unwrap(),
            partition(&table, &deps).unwrap()
        );
    }

    #[test]
    fn single_column_score_is_exact(rows in arb_single_column()) {
        let table = Table::from_rows(rows).unwrap();
        let result = partition(&table, &FunctionalDependencies::none()).unwrap();

        let realized = verify_phc(&result.rows);
        prop_assert_eq!(realized, result.score);
        prop_assert!(realized >= verify_phc(&table.to_rows()));

        let mut sorted = result.rows.clone();
        sorted.sort();
        prop_assert_eq!(sorted, result.rows);
    }
}
