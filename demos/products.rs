use ggr::{partition, FunctionalDependencies, PhcSummary, Table};

fn main() -> Result<(), ggr::Error> {
    let table = Table::from_rows(vec![
        vec!["P001", "Electronics", "Smartphone with 128GB storage"],
        vec!["P002", "Electronics", "Laptop with 16GB RAM"],
        vec!["P003", "Clothing", "Cotton T-shirt, size M"],
        vec!["P004", "Electronics", "Wireless headphones"],
        vec!["P005", "Clothing", "Denim jeans, size 32"],
        vec!["P006", "Clothing", "Winter jacket, size L"],
    ])?;

    // Pass column groups here, e.g. `vec![vec![0, 1]]`, if a product ID implies its category.
    let deps = FunctionalDependencies::none();

    println!("original table:");
    for (i, row) in table.to_rows().iter().enumerate() {
        println!("  row {}: {:?}", i, row);
    }

    let result = partition(&table, &deps)?;
    println!();
    println!("computed PHC: {:.2}", result.score);
    println!("reordered table:");
    for (i, (_, _, values)) in result.iter().enumerate() {
        println!("  row {}: {:?}", i, values);
    }

    let summary = PhcSummary::compare(&table, &result);
    println!();
    println!("verified PHC: {:.2}", summary.verified);
    println!("original order PHC: {:.2}", summary.original);
    if summary.verified > summary.original {
        println!(
            "improvement: {:.1}% better PHC with reordering",
            summary.improvement() * 100.0
        );
    }

    Ok(())
}
