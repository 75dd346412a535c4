#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate provides an implementation of Greedy Group Recursion (GGR), the table reordering
//! heuristic described in:
//!
//! - Liu et al., [Optimizing LLM Queries in Relational Data Analytics Workloads][paper], 2024
//!
//! [paper]: https://arxiv.org/abs/2403.05821
//!
//! When every row of a table is rendered into its own prompt and those prompts are sent to a
//! language model one after another, an inference engine with a prefix cache can reuse its
//! key/value state for however many leading fields a prompt shares with the one before it. GGR
//! reorders the rows, and independently the fields within each row, so that consecutive rows share
//! long prefixes. The quality of an ordering is measured by its prefix hit count (PHC): the sum,
//! over adjacent rows, of the squared lengths of the leading field values they have in common.
//!
//! ```
//! use ggr::{partition, verify_phc, FunctionalDependencies, Table};
//!
//! let table = Table::from_rows(vec![
//!     vec!["Electronics", "Apple", "iPhone", "EL"],
//!     vec!["Clothing", "Nike", "Shoes", "CL"],
//!     vec!["Electronics", "Samsung", "TV", "EL"],
//!     vec!["Clothing", "Adidas", "Shoes", "CL"],
//!     vec!["Electronics", "Apple", "MacBook", "EL"],
//!     vec!["Clothing", "Nike", "T-Shirt", "CL"],
//! ])?;
//!
//! // A category and its code always travel together.
//! let deps = FunctionalDependencies::new(vec![vec![0, 3]])?;
//!
//! let result = partition(&table, &deps)?;
//! assert_eq!(result.rows[0], ["Electronics", "EL", "Apple", "MacBook"]);
//! assert_eq!(result.original_rows, [4, 0, 2, 3, 1, 5]);
//! assert_eq!(result.score, 436.0);
//! assert_eq!(verify_phc(&result.rows), 436.0);
//! assert_eq!(verify_phc(&table.to_rows()), 0.0);
//! # Ok::<(), ggr::Error>(())
//! ```
//!
//! The algorithm is greedy: at every step it picks the single (column, value) grouping with the
//! highest estimated hit count, puts the rows holding that value first with that value leading
//! their fields, and recurses separately on the grouped rows (with the grouped columns removed)
//! and on the rest. Nothing here promises a globally optimal ordering.

use lasso::{Rodeo, RodeoReader, Spur};
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::SortedIterator;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

/// A list of column indices, usually a grouping's covered columns.
///
/// Functional-dependency groups are small in practice, so this avoids heap allocations for groups
/// of up to four columns.
pub type Columns = SmallVec<[usize; 4]>;

/// Every way a call into this crate can fail. All of them mean the input was malformed; the
/// algorithm itself has no failure modes, and a failing input fails identically every time.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A row had a different number of fields than the first row of the table.
    #[error("row {row} has {found} fields but the table has {expected} columns")]
    RaggedRow {
        /// Index of the offending row.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of the offending row.
        found: usize,
    },

    /// A column was listed in more than one functional-dependency group, or twice in one group.
    #[error("column {column} appears in more than one functional-dependency group")]
    OverlappingGroups {
        /// The first repeated column found.
        column: usize,
    },

    /// A row index referred to a row the table doesn't have.
    #[error("row {row} is out of range for a table with {rows} rows")]
    RowOutOfRange {
        /// The out-of-range row.
        row: usize,
        /// How many rows the table has.
        rows: usize,
    },

    /// A column index, possibly one named by a functional-dependency group, referred to a column
    /// the table doesn't have.
    #[error("column {column} is out of range for a table with {columns} columns")]
    ColumnOutOfRange {
        /// The out-of-range column.
        column: usize,
        /// How many columns the table has.
        columns: usize,
    },
}

impl Error {
    /// Returns `true` if this error was caused by malformed input, which is currently every error.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Error::RaggedRow { .. }
            | Error::OverlappingGroups { .. }
            | Error::RowOutOfRange { .. }
            | Error::ColumnOutOfRange { .. } => true,
        }
    }
}

/// A specialized [`Result`](std::result::Result) type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An immutable, rectangular grid of text values.
///
/// Every distinct value is interned once, so comparing two cells is an integer comparison no
/// matter how long the values are. The length of each distinct value, in characters, is also
/// computed once up front since the scoring functions need it constantly.
pub struct Table {
    cells: Vec<Spur>,
    rows: usize,
    columns: usize,
    strings: RodeoReader<Spur>,
    lengths: HashMap<Spur, usize>,
}

impl Table {
    /// Builds a table from anything that yields rows of string-like values.
    ///
    /// The first row determines the number of columns. An empty input gives a table with no rows
    /// and no columns.
    ///
    /// ```
    /// use ggr::{Error, Table};
    ///
    /// let table = Table::from_rows(vec![vec!["a", "b"], vec!["c", "d"]])?;
    /// assert_eq!(table.row_count(), 2);
    /// assert_eq!(table.column_count(), 2);
    /// assert_eq!(table.get(1, 0), Some("c"));
    ///
    /// assert_eq!(
    ///     Table::from_rows(vec![vec!["a", "b"], vec!["c"]]).err(),
    ///     Some(Error::RaggedRow { row: 1, expected: 2, found: 1 })
    /// );
    /// # Ok::<(), ggr::Error>(())
    /// ```
    pub fn from_rows<R, F, S>(rows: R) -> Result<Self>
    where
        R: IntoIterator<Item = F>,
        F: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rodeo: Rodeo<Spur> = Rodeo::new();
        let mut lengths = HashMap::new();
        let mut cells = Vec::new();
        let mut columns = None;
        let mut row_count = 0;

        for (row, fields) in rows.into_iter().enumerate() {
            let start = cells.len();
            for field in fields {
                let field = field.as_ref();
                let key = rodeo.get_or_intern(field);
                lengths
                    .entry(key)
                    .or_insert_with(|| field.chars().count());
                cells.push(key);
            }

            let found = cells.len() - start;
            let expected = *columns.get_or_insert(found);
            if found != expected {
                return Err(Error::RaggedRow {
                    row,
                    expected,
                    found,
                });
            }
            row_count += 1;
        }

        cells.shrink_to_fit();
        lengths.shrink_to_fit();
        Ok(Table {
            cells,
            rows: row_count,
            columns: columns.unwrap_or(0),
            strings: rodeo.into_reader(),
            lengths,
        })
    }

    /// The number of rows in the table.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// The number of columns in the table.
    pub fn column_count(&self) -> usize {
        self.columns
    }

    /// Returns the value at the given position, or `None` if either index is out of range.
    pub fn get(&self, row: usize, column: usize) -> Option<&str> {
        if row < self.rows && column < self.columns {
            Some(self.value(row, column))
        } else {
            None
        }
    }

    /// Returns an iterator over the values of one row, in column order.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of range.
    pub fn row(&self, row: usize) -> impl Iterator<Item = &str> + '_ {
        assert!(row < self.rows, "row {} out of range", row);
        self.cells[row * self.columns..(row + 1) * self.columns]
            .iter()
            .map(move |key| self.strings.resolve(key))
    }

    /// Copies out every row in its original order, which is what [`verify_phc`] needs to measure
    /// the table before reordering.
    pub fn to_rows(&self) -> Vec<Vec<&str>> {
        (0..self.rows).map(|row| self.row(row).collect()).collect()
    }

    /// Returns `true` if `value` appears anywhere in the table.
    ///
    /// ```
    /// use ggr::Table;
    ///
    /// let table = Table::from_rows(vec![vec!["EL", "iPhone"], vec!["CL", "Shoes"]])?;
    /// assert!(table.contains("Shoes"));
    /// assert!(!table.contains("shoes"));
    /// assert!(!table.contains(""));
    /// # Ok::<(), ggr::Error>(())
    /// ```
    pub fn contains(&self, value: &str) -> bool {
        self.strings.get(value).is_some()
    }

    fn key(&self, row: usize, column: usize) -> Spur {
        self.cells[row * self.columns + column]
    }

    fn value(&self, row: usize, column: usize) -> &str {
        self.strings.resolve(&self.key(row, column))
    }

    fn resolve(&self, key: Spur) -> &str {
        self.strings.resolve(&key)
    }

    fn key_len(&self, key: Spur) -> usize {
        self.lengths[&key]
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries((0..self.rows).map(|row| self.row(row).collect::<Vec<_>>()))
            .finish()
    }
}

/// Disjoint groups of columns whose values are mutually inferable: within any row, knowing the
/// value in one column of a group tells you (or at least strongly suggests) the values in the
/// others.
///
/// When GGR groups rows by a value in one of these columns, it moves the whole group to the front
/// of those rows together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionalDependencies {
    groups: Vec<Columns>,
    membership: HashMap<usize, usize>,
}

impl FunctionalDependencies {
    /// Validates and indexes a collection of groups.
    ///
    /// Groups must be disjoint. Empty groups are ignored.
    ///
    /// ```
    /// use ggr::{Error, FunctionalDependencies};
    ///
    /// let deps = FunctionalDependencies::new(vec![vec![0, 3], vec![1, 4]])?;
    /// assert_eq!(deps.groups().count(), 2);
    ///
    /// assert_eq!(
    ///     FunctionalDependencies::new(vec![vec![0, 3], vec![3, 1]]),
    ///     Err(Error::OverlappingGroups { column: 3 })
    /// );
    /// # Ok::<(), ggr::Error>(())
    /// ```
    pub fn new<G, I>(groups: G) -> Result<Self>
    where
        G: IntoIterator<Item = I>,
        I: IntoIterator<Item = usize>,
    {
        let mut deps = FunctionalDependencies::none();
        for group in groups {
            let group: Columns = group.into_iter().collect();
            if group.is_empty() {
                continue;
            }
            let index = deps.groups.len();
            for column in group.iter().copied() {
                if deps.membership.insert(column, index).is_some() {
                    return Err(Error::OverlappingGroups { column });
                }
            }
            deps.groups.push(group);
        }
        Ok(deps)
    }

    /// Creates an empty set of dependencies, where no column implies any other.
    pub fn none() -> Self {
        FunctionalDependencies::default()
    }

    /// Returns an iterator over the groups, in the order they were given.
    pub fn groups(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.groups.iter().map(|group| &group[..])
    }

    /// Returns the columns that are inferable from `column`: the other members of its group, in
    /// the group's order. Columns that aren't in any group have nothing inferable from them.
    ///
    /// ```
    /// use ggr::FunctionalDependencies;
    ///
    /// let deps = FunctionalDependencies::new(vec![vec![4, 0, 2]])?;
    /// assert_eq!(deps.inferred(0).collect::<Vec<_>>(), [4, 2]);
    /// assert_eq!(deps.inferred(2).collect::<Vec<_>>(), [4, 0]);
    /// assert_eq!(deps.inferred(1).count(), 0);
    /// # Ok::<(), ggr::Error>(())
    /// ```
    pub fn inferred(&self, column: usize) -> impl Iterator<Item = usize> + '_ {
        self.membership
            .get(&column)
            .into_iter()
            .flat_map(move |&group| self.groups[group].iter().copied())
            .filter(move |&peer| peer != column)
    }

    /// Checks that every grouped column exists in a table with `columns` columns.
    pub fn check_columns(&self, columns: usize) -> Result<()> {
        match self
            .groups
            .iter()
            .flat_map(|group| group.iter().copied())
            .find(|&column| column >= columns)
        {
            Some(column) => Err(Error::ColumnOutOfRange { column, columns }),
            None => Ok(()),
        }
    }
}

/// The estimated value of grouping rows by one value of one column.
#[derive(Clone, Debug, PartialEq)]
pub struct HitCount {
    /// The estimated prefix hit count gained by putting all rows with this value next to each
    /// other, with the value at the front.
    pub hit_count: f64,

    /// The column the value was found in, followed by the columns inferable from it. These are
    /// the fields that move to the front of the grouped rows.
    pub covered: Columns,
}

/// Estimates the prefix hit count of grouping the rows in `rows` that have `value` in `column`.
///
/// With `n` matching rows, the grouped rows form `n - 1` adjacent pairs, each of which shares the
/// value itself plus whatever is inferable from it. An inferred column's values aren't known to
/// be equal across the group, so each one is scored as if its mean length were a shared field.
///
/// ```
/// use ggr::{hit_count, Error, FunctionalDependencies, Table};
///
/// let table = Table::from_rows(vec![
///     vec!["abc", "xy"],
///     vec!["abc", "wxyz"],
///     vec!["de", "xy"],
/// ])?;
/// let rows = [0, 1, 2];
///
/// let none = FunctionalDependencies::none();
/// assert_eq!(hit_count(&table, &rows, 0, "abc", &none)?.hit_count, 9.0);
/// assert_eq!(hit_count(&table, &rows, 0, "de", &none)?.hit_count, 0.0);
///
/// // The mean length of column 1 among the "abc" rows is 3.
/// let deps = FunctionalDependencies::new(vec![vec![0, 1]])?;
/// let abc = hit_count(&table, &rows, 0, "abc", &deps)?;
/// assert_eq!(abc.hit_count, 18.0);
/// assert_eq!(&abc.covered[..], [0, 1]);
///
/// assert_eq!(
///     hit_count(&table, &[0, 3], 0, "abc", &none),
///     Err(Error::RowOutOfRange { row: 3, rows: 3 })
/// );
/// # Ok::<(), ggr::Error>(())
/// ```
///
/// Fails if `column`, any index in `rows`, or any column in `deps` is out of range for `table`.
pub fn hit_count(
    table: &Table,
    rows: &[usize],
    column: usize,
    value: &str,
    deps: &FunctionalDependencies,
) -> Result<HitCount> {
    if column >= table.columns {
        return Err(Error::ColumnOutOfRange {
            column,
            columns: table.columns,
        });
    }
    if let Some(&row) = rows.iter().find(|&&row| row >= table.rows) {
        return Err(Error::RowOutOfRange {
            row,
            rows: table.rows,
        });
    }
    deps.check_columns(table.columns)?;

    Ok(match table.strings.get(value) {
        Some(key) => scan_hit_count(table, rows, column, key, deps),
        None => HitCount {
            hit_count: 0.0,
            covered: smallvec![column],
        },
    })
}

fn scan_hit_count(
    table: &Table,
    rows: &[usize],
    column: usize,
    key: Spur,
    deps: &FunctionalDependencies,
) -> HitCount {
    let matching: Vec<usize> = rows
        .iter()
        .copied()
        .filter(|&row| table.key(row, column) == key)
        .collect();
    group_hit_count(table, column, key, &matching, deps)
}

// Scores a group whose members are already known, so selection can score every value of a column
// from a single sorted pass instead of rescanning the rows once per value.
fn group_hit_count(
    table: &Table,
    column: usize,
    key: Spur,
    matching: &[usize],
    deps: &FunctionalDependencies,
) -> HitCount {
    let mut covered: Columns = smallvec![column];
    if matching.len() <= 1 {
        return HitCount {
            hit_count: 0.0,
            covered,
        };
    }

    let len = table.key_len(key) as f64;
    let mut total = len * len;
    for inferred in deps.inferred(column) {
        // Divide once so that groups with equal total lengths tie exactly.
        let sum: usize = matching
            .iter()
            .map(|&row| table.key_len(table.key(row, inferred)))
            .sum();
        let mean = sum as f64 / matching.len() as f64;
        total += mean * mean;
        covered.push(inferred);
    }

    HitCount {
        hit_count: total * (matching.len() - 1) as f64,
        covered,
    }
}

/// Knobs for [`partition_with`].
///
/// Every field has a default, so a configuration file only needs to mention the settings it
/// changes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Config {
    /// Stop recursing below this depth. A subproblem at the limit keeps its rows in their current
    /// order and its columns in table order, and contributes nothing to the score. `None` means
    /// no limit.
    pub max_depth: Option<usize>,

    /// Reuse the hit count computed while selecting a grouping instead of computing it again
    /// when combining the two halves. The result is identical either way.
    pub reuse_selected_hit_count: bool,
}

impl Config {
    /// Returns a copy of this configuration with the given depth limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Returns a copy of this configuration with the given [`reuse_selected_hit_count`] setting.
    ///
    /// [`reuse_selected_hit_count`]: Config::reuse_selected_hit_count
    pub fn with_reuse_selected_hit_count(mut self, reuse: bool) -> Self {
        self.reuse_selected_hit_count = reuse;
        self
    }
}

/// The reordered table produced by [`partition`].
///
/// `rows`, `column_orders`, and `original_rows` always have one entry per input row, and entry
/// `i` of each describes the same output row.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionResult<'a> {
    /// The hit count GGR predicted for this ordering. It is exact when there are no
    /// functional dependencies, except that it doesn't count prefixes that happen to be shared
    /// across the boundary between two groups; see [`verify_phc`] for the realized value.
    pub score: f64,

    /// The reordered rows, each with its fields reordered.
    pub rows: Vec<Vec<&'a str>>,

    /// For each output row, which input column each of its fields came from.
    pub column_orders: Vec<Vec<usize>>,

    /// For each output row, its index in the input table.
    pub original_rows: Vec<usize>,

    /// How many times the recursion was entered, counting base cases.
    pub recursions: usize,
}

impl<'a> PartitionResult<'a> {
    /// The number of rows in the result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the input table had no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns an iterator over `(original row, column order, values)` for each output row.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize], &[&'a str])> + '_ {
        self.original_rows
            .iter()
            .zip(self.column_orders.iter())
            .zip(self.rows.iter())
            .map(|((&row, columns), values)| (row, &columns[..], &values[..]))
    }
}

/// Reorders the rows of `table`, and the fields within each row, to maximize the prefix hit count.
///
/// This is [`partition_with`] using the default [`Config`].
///
/// ```
/// use ggr::{partition, FunctionalDependencies, Table};
///
/// let table = Table::from_rows(vec![vec!["x", "1"], vec!["x", "2"], vec!["y", "3"]])?;
/// let result = partition(&table, &FunctionalDependencies::none())?;
///
/// assert_eq!(result.rows, [["x", "1"], ["x", "2"], ["y", "3"]]);
/// assert_eq!(result.column_orders, [[0, 1], [0, 1], [0, 1]]);
/// assert_eq!(result.original_rows, [0, 1, 2]);
/// assert_eq!(result.score, 1.0);
/// assert_eq!(result.recursions, 3);
/// # Ok::<(), ggr::Error>(())
/// ```
pub fn partition<'a>(
    table: &'a Table,
    deps: &FunctionalDependencies,
) -> Result<PartitionResult<'a>> {
    partition_with(table, deps, &Config::default())
}

/// Reorders the rows of `table`, and the fields within each row, to maximize the prefix hit count.
///
/// The dependency groups are checked against the table before any work is done, so a malformed
/// input fails without producing a partial result.
pub fn partition_with<'a>(
    table: &'a Table,
    deps: &FunctionalDependencies,
    config: &Config,
) -> Result<PartitionResult<'a>> {
    deps.check_columns(table.column_count())?;

    let partitioner = Partitioner {
        table,
        deps,
        config,
    };
    let rows: Vec<usize> = (0..table.row_count()).collect();
    let columns: Vec<usize> = (0..table.column_count()).collect();
    let partial = partitioner.recurse(&rows, &columns, 0);

    debug!(
        rows = table.row_count(),
        columns = table.column_count(),
        score = partial.score,
        recursions = partial.recursions,
        "partitioned table"
    );

    Ok(PartitionResult {
        score: partial.score,
        rows: partial
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(|key| table.resolve(key)).collect())
            .collect(),
        column_orders: partial.column_orders,
        original_rows: partial.original_rows,
        recursions: partial.recursions,
    })
}

/// The best grouping found while scanning a subproblem.
struct Candidate {
    column: usize,
    key: Spur,
    score: HitCount,
}

/// A subproblem's result, still holding interned keys rather than strings.
struct Partial {
    score: f64,
    rows: Vec<Vec<Spur>>,
    column_orders: Vec<Vec<usize>>,
    original_rows: Vec<usize>,
    recursions: usize,
}

impl Partial {
    fn empty() -> Self {
        Partial {
            score: 0.0,
            rows: Vec::new(),
            column_orders: Vec::new(),
            original_rows: Vec::new(),
            recursions: 0,
        }
    }

    /// The result for rows that have nothing left to order once their prefix is in place.
    fn bare(rows: &[usize]) -> Self {
        Partial {
            score: 0.0,
            rows: vec![Vec::new(); rows.len()],
            column_orders: vec![Vec::new(); rows.len()],
            original_rows: rows.to_vec(),
            recursions: 0,
        }
    }

    fn append(&mut self, other: Partial) {
        self.score += other.score;
        self.rows.extend(other.rows);
        self.column_orders.extend(other.column_orders);
        self.original_rows.extend(other.original_rows);
        self.recursions += other.recursions;
    }
}

struct Partitioner<'a> {
    table: &'a Table,
    deps: &'a FunctionalDependencies,
    config: &'a Config,
}

impl Partitioner<'_> {
    // `columns` is always sorted: it starts as every column, and each step only removes some.
    //
    // The rows that don't match a selected grouping are ordered with the same columns and their
    // output goes after everything else, so instead of recursing on them this loops. Each pass
    // counts as one recursion, and only the grouped rows (which always have fewer columns left)
    // recurse for real. That keeps the stack depth bounded by the number of columns.
    fn recurse(&self, rows: &[usize], columns: &[usize], mut depth: usize) -> Partial {
        let mut result = Partial::empty();
        let mut rows = rows.to_vec();
        let mut sorted: Option<Vec<Vec<usize>>> = None;

        loop {
            if let [row] = rows[..] {
                result.append(self.single_row(row, columns));
                return result;
            }
            if let [column] = *columns {
                result.append(self.single_column(&rows, column));
                return result;
            }
            if self.config.max_depth.map_or(false, |max| depth >= max) {
                trace!(depth, rows = rows.len(), "depth limit reached");
                result.append(self.unordered(&rows, columns));
                return result;
            }

            let sorted = sorted.get_or_insert_with(|| self.sort_columns(&rows, columns));
            let best = match self.select(sorted, columns) {
                Some(best) => best,
                None => {
                    result.append(self.unordered(&rows, columns));
                    return result;
                }
            };

            let table = self.table;
            let is_match = |row: usize| table.key(row, best.column) == best.key;
            let (matching, non_matching): (Vec<usize>, Vec<usize>) =
                rows.iter().partition(|&&row| is_match(row));

            trace!(
                depth,
                column = best.column,
                value = table.resolve(best.key),
                hit_count = best.score.hit_count,
                matching = matching.len(),
                rest = non_matching.len(),
                "selected grouping"
            );

            let mut covered = best.score.covered.clone();
            covered.sort_unstable();
            debug_assert!(covered.iter().all(|c| columns.binary_search(c).is_ok()));
            let remaining: Vec<usize> = columns
                .iter()
                .copied()
                .assume_sorted_by_item()
                .difference(covered.iter().copied().assume_sorted_by_item())
                .collect();

            let grouped = if remaining.is_empty() {
                Partial::bare(&matching)
            } else {
                self.recurse(&matching, &remaining, depth + 1)
            };

            let selected = if self.config.reuse_selected_hit_count {
                best.score.hit_count
            } else {
                scan_hit_count(table, &rows, best.column, best.key, self.deps).hit_count
            };

            // Inferred columns aren't guaranteed to agree across the group, so the first matching
            // row stands in for all of them.
            let first = matching[0];
            let prefix: Vec<Spur> = best
                .score
                .covered
                .iter()
                .map(|&column| table.key(first, column))
                .collect();

            result.score += grouped.score + selected;
            result.recursions += 1 + grouped.recursions;
            result.original_rows.extend(grouped.original_rows);
            for (suffix, order) in grouped.rows.into_iter().zip(grouped.column_orders) {
                let mut row = prefix.clone();
                row.extend(suffix);
                result.rows.push(row);

                let mut full_order = best.score.covered.to_vec();
                full_order.extend(order);
                result.column_orders.push(full_order);
            }

            if non_matching.is_empty() {
                return result;
            }
            for column_rows in sorted.iter_mut() {
                column_rows.retain(|&row| !is_match(row));
            }
            rows = non_matching;
            depth += 1;
        }
    }

    /// Sorts a copy of `rows` by each column's values, keeping ties in row order.
    fn sort_columns(&self, rows: &[usize], columns: &[usize]) -> Vec<Vec<usize>> {
        let table = self.table;
        columns
            .iter()
            .map(|&column| {
                let mut sorted = rows.to_vec();
                sorted.sort_by_key(|&row| table.value(row, column));
                sorted
            })
            .collect()
    }

    /// Finds the grouping with the highest hit count, given the rows sorted by each column. Ties
    /// go to the earliest column, then the smallest value.
    fn select(&self, sorted: &[Vec<usize>], columns: &[usize]) -> Option<Candidate> {
        let table = self.table;
        let mut best: Option<Candidate> = None;

        for (&column, rows) in columns.iter().zip(sorted) {
            for group in runs(rows, |&row| table.key(row, column)) {
                let key = table.key(group[0], column);
                let score = group_hit_count(table, column, key, group, self.deps);
                if best
                    .as_ref()
                    .map_or(true, |best| score.hit_count > best.score.hit_count)
                {
                    best = Some(Candidate { column, key, score });
                }
            }
        }

        best
    }

    fn single_row(&self, row: usize, columns: &[usize]) -> Partial {
        Partial {
            score: 0.0,
            rows: vec![columns.iter().map(|&c| self.table.key(row, c)).collect()],
            column_orders: vec![columns.to_vec()],
            original_rows: vec![row],
            recursions: 1,
        }
    }

    fn single_column(&self, rows: &[usize], column: usize) -> Partial {
        let table = self.table;
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|&row| table.value(row, column));

        let score: f64 = runs(&sorted, |&row| table.key(row, column))
            .map(|group| {
                let key = table.key(group[0], column);
                group_hit_count(table, column, key, group, self.deps).hit_count
            })
            .sum();

        Partial {
            score,
            rows: sorted.iter().map(|&row| vec![table.key(row, column)]).collect(),
            column_orders: vec![vec![column]; sorted.len()],
            original_rows: sorted,
            recursions: 1,
        }
    }

    fn unordered(&self, rows: &[usize], columns: &[usize]) -> Partial {
        Partial {
            score: 0.0,
            rows: rows
                .iter()
                .map(|&row| columns.iter().map(|&c| self.table.key(row, c)).collect())
                .collect(),
            column_orders: vec![columns.to_vec(); rows.len()],
            original_rows: rows.to_vec(),
            recursions: 1,
        }
    }
}

/// Splits a slice into maximal runs of consecutive elements with equal keys.
fn runs<'s, T, K, F>(slice: &'s [T], mut key: F) -> impl Iterator<Item = &'s [T]>
where
    K: PartialEq,
    F: FnMut(&T) -> K,
{
    let mut rest = slice;
    std::iter::from_fn(move || {
        let first = key(rest.first()?);
        let len = 1 + rest[1..].iter().take_while(|item| key(*item) == first).count();
        let (run, tail) = rest.split_at(len);
        rest = tail;
        Some(run)
    })
}

/// Computes the prefix hit count an ordering actually achieves.
///
/// For each row after the first, this finds the leading fields it shares with the previous row,
/// stopping at the first field that differs or that either row lacks, and adds up the squared
/// length of each shared value. Rows may have different lengths.
///
/// ```
/// use ggr::verify_phc;
///
/// let rows = [
///     vec!["ab", "c", "x"],
///     vec!["ab", "c", "y"],
///     vec!["ab", "d", "y"],
///     vec!["ab"],
/// ];
/// assert_eq!(verify_phc(&rows), 5.0 + 4.0 + 4.0);
///
/// let none: [Vec<&str>; 0] = [];
/// assert_eq!(verify_phc(&none), 0.0);
/// ```
pub fn verify_phc<R, S>(rows: &[R]) -> f64
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    rows.windows(2)
        .map(|pair| {
            let previous = pair[0].as_ref();
            let current = pair[1].as_ref();
            previous
                .iter()
                .zip(current)
                .take_while(|(a, b)| a.as_ref() == b.as_ref())
                .map(|(value, _)| {
                    let len = value.as_ref().chars().count() as f64;
                    len * len
                })
                .sum::<f64>()
        })
        .sum()
}

/// The best prefix hit count any ordering of `table` could conceivably reach: every value shared
/// with the row before it.
///
/// ```
/// use ggr::{ideal_phc, Table};
///
/// let table = Table::from_rows(vec![vec!["ab", "c"], vec!["ab", "def"]])?;
/// assert_eq!(ideal_phc(&table), 4.0 + 1.0 + 4.0 + 9.0);
/// # Ok::<(), ggr::Error>(())
/// ```
pub fn ideal_phc(table: &Table) -> f64 {
    table
        .cells
        .iter()
        .map(|&key| {
            let len = table.key_len(key) as f64;
            len * len
        })
        .sum()
}

/// Measurements comparing a reordering with the table's original order.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub struct PhcSummary {
    /// The prefix hit count of the reordered rows.
    pub verified: f64,

    /// The prefix hit count of the table in its original order.
    pub original: f64,

    /// The upper bound from [`ideal_phc`].
    pub ideal: f64,
}

impl PhcSummary {
    /// Measures `result` against the table it was computed from.
    ///
    /// ```
    /// use ggr::{partition, FunctionalDependencies, PhcSummary, Table};
    ///
    /// let table = Table::from_rows(vec![vec!["b"], vec!["a"], vec!["b"]])?;
    /// let result = partition(&table, &FunctionalDependencies::none())?;
    /// let summary = PhcSummary::compare(&table, &result);
    ///
    /// assert_eq!(summary.verified, 1.0);
    /// assert_eq!(summary.original, 0.0);
    /// assert_eq!(summary.ideal, 3.0);
    /// assert_eq!(summary.improvement(), 1.0);
    /// # Ok::<(), ggr::Error>(())
    /// ```
    pub fn compare(table: &Table, result: &PartitionResult<'_>) -> Self {
        PhcSummary {
            verified: verify_phc(&result.rows),
            original: verify_phc(&table.to_rows()),
            ideal: ideal_phc(table),
        }
    }

    /// The fraction of the ideal hit count that the reordering achieved.
    pub fn hit_rate(&self) -> f64 {
        Self::rate(self.verified, self.ideal)
    }

    /// The fraction of the ideal hit count that the original order achieved.
    pub fn original_hit_rate(&self) -> f64 {
        Self::rate(self.original, self.ideal)
    }

    /// How much the reordering gained over the original order, relative to the original order's
    /// hit count (or to 1, if the original order had none).
    pub fn improvement(&self) -> f64 {
        (self.verified - self.original) / self.original.max(1.0)
    }

    fn rate(phc: f64, ideal: f64) -> f64 {
        if ideal > 0.0 {
            phc / ideal
        } else {
            0.0
        }
    }
}
