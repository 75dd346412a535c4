use csv_core::{ReadFieldResult, ReaderBuilder};
use ggr::*;
use std::io;
use std::str;
use tracing_subscriber::EnvFilter;

fn invalid_data<E>(error: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, error)
}

fn load_data<I: io::Read>(mut input: I) -> io::Result<Table> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 4096];
    let mut fieldlen = 0;
    let mut record = Vec::new();
    let mut rows = Vec::new();
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(invalid_data(format!(
                        "field too long on line {}",
                        tsv.line()
                    )));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen]).map_err(invalid_data)?;
                    fieldlen = 0;
                    record.push(field.to_owned());

                    if record_end {
                        rows.push(std::mem::take(&mut record));
                    }
                }
                ReadFieldResult::End => {
                    return Table::from_rows(rows).map_err(invalid_data);
                }
            }
        }
    }
}

fn parse_groups<I: Iterator<Item = String>>(args: I) -> io::Result<FunctionalDependencies> {
    let mut groups = Vec::new();
    for arg in args {
        let group = arg
            .split(',')
            .map(|column| column.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid_data(format!("bad dependency group {:?}: {}", arg, e)))?;
        groups.push(group);
    }
    FunctionalDependencies::new(groups).map_err(invalid_data)
}

fn main() -> io::Result<()> {
    let filter = EnvFilter::try_from_env("GGR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let deps = parse_groups(std::env::args().skip(1))?;
    let table = load_data(io::stdin().lock())?;

    println!("original table:");
    for (i, row) in table.to_rows().iter().enumerate() {
        println!("  {}: {:?}", i, row);
    }
    for (i, group) in deps.groups().enumerate() {
        println!("  dependency group {}: {:?}", i, group);
    }

    let result = partition(&table, &deps).map_err(invalid_data)?;

    println!();
    println!("reordered table:");
    for (i, (row, columns, values)) in result.iter().enumerate() {
        println!("  {}: ({}, {:?}) {:?}", i, row, columns, values);
    }

    let summary = PhcSummary::compare(&table, &result);
    println!();
    println!("  computed PHC: {:.2}", result.score);
    println!("  recursions: {}", result.recursions);
    println!("  verified PHC: {:.2}", summary.verified);
    println!("  verified PHR: {:.2}%", summary.hit_rate() * 100.0);
    println!("  original order PHC: {:.2}", summary.original);
    println!("  original order PHR: {:.2}%", summary.original_hit_rate() * 100.0);
    println!("  ideal PHC: {:.2}", summary.ideal);
    if summary.verified > summary.original {
        println!("  improvement: {:.1}%", summary.improvement() * 100.0);
    }

    Ok(())
}
