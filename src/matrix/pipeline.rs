use super::column::{ColumnRef, ColumnValue, ResolveCtx};
use super::model::{GradeStructure, SessionKey, StudentRow};
use super::progress::progress;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const EQ_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    #[default]
    All,
    Complete,
    Incomplete,
}

impl CompletionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(CompletionMode::All),
            "complete" => Some(CompletionMode::Complete),
            "incomplete" => Some(CompletionMode::Incomplete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gt" => Some(FilterOp::Gt),
            "lt" => Some(FilterOp::Lt),
            "eq" => Some(FilterOp::Eq),
            "gte" => Some(FilterOp::Gte),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericFilter {
    pub op: FilterOp,
    pub value: f64,
}

impl NumericFilter {
    pub fn accepts(&self, v: f64) -> bool {
        match self.op {
            FilterOp::Gt => v > self.value,
            FilterOp::Lt => v < self.value,
            FilterOp::Eq => (v - self.value).abs() < EQ_TOLERANCE,
            FilterOp::Gte => v >= self.value,
            FilterOp::Lte => v <= self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub column: ColumnRef,
    pub dir: SortDir,
}

/// Everything the host can tune on the grid view. One filter per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridQuery {
    pub search: String,
    pub completion: CompletionMode,
    pub filters: BTreeMap<ColumnRef, NumericFilter>,
    pub sort: Option<SortSpec>,
}

impl GridQuery {
    /// Selecting a new sort column replaces the previous one.
    pub fn set_sort(&mut self, column: ColumnRef, dir: SortDir) {
        self.sort = Some(SortSpec { column, dir });
    }

    pub fn set_filter(&mut self, column: ColumnRef, filter: Option<NumericFilter>) {
        match filter {
            Some(f) => {
                self.filters.insert(column, f);
            }
            None => {
                self.filters.remove(&column);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedRow {
    /// Position in the input slice.
    pub index: usize,
    pub progress: f64,
}

/// Case-folded, accent-stripped form used for search and name ordering.
pub fn fold_text(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

pub fn collate(a: &str, b: &str) -> Ordering {
    fold_text(a).cmp(&fold_text(b)).then_with(|| a.cmp(b))
}

fn matches_search(row: &StudentRow, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let name = fold_text(&format!("{} {}", row.nom, row.prenoms));
    name.contains(needle) || fold_text(&row.matricule).contains(needle)
}

fn compare_values(a: Option<&ColumnValue>, b: Option<&ColumnValue>, dir: SortDir) -> Ordering {
    let ord = match (a, b) {
        (None, None) => return Ordering::Equal,
        // Missing values go last whatever the direction.
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(ColumnValue::Text(x)), Some(ColumnValue::Text(y))) => collate(x, y),
        (Some(ColumnValue::Number(x)), Some(ColumnValue::Number(y))) => {
            (x - y).partial_cmp(&0.0).unwrap_or(Ordering::Equal)
        }
        (Some(ColumnValue::Number(_)), Some(ColumnValue::Text(_))) => Ordering::Less,
        (Some(ColumnValue::Text(_)), Some(ColumnValue::Number(_))) => Ordering::Greater,
    };
    match dir {
        SortDir::Asc => ord,
        SortDir::Desc => ord.reverse(),
    }
}

/// Search, completion filter, column filters, then sort. Does not touch the input.
pub fn derive_rows(
    structure: &GradeStructure,
    rows: &[StudentRow],
    active_sessions: &[SessionKey],
    query: &GridQuery,
) -> Vec<DerivedRow> {
    let ctx = ResolveCtx {
        structure,
        active_sessions,
    };
    let needle = fold_text(query.search.trim());

    let mut out: Vec<DerivedRow> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| matches_search(row, &needle))
        .map(|(index, row)| DerivedRow {
            index,
            progress: progress(structure, row, active_sessions),
        })
        .filter(|d| match query.completion {
            CompletionMode::All => true,
            CompletionMode::Complete => d.progress >= 100.0,
            CompletionMode::Incomplete => d.progress < 100.0,
        })
        .filter(|d| {
            query.filters.iter().all(|(column, filter)| {
                column
                    .resolve_number(ctx, &rows[d.index])
                    .map(|v| filter.accepts(v))
                    .unwrap_or(false)
            })
        })
        .collect();

    if let Some(sort) = query.sort.as_ref() {
        let mut keyed: Vec<(Option<ColumnValue>, DerivedRow)> = out
            .into_iter()
            .map(|d| (sort.column.resolve(ctx, &rows[d.index]), d))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare_values(a.as_ref(), b.as_ref(), sort.dir));
        out = keyed.into_iter().map(|(_, d)| d).collect();
    }

    tracing::debug!(
        input = rows.len(),
        output = out.len(),
        filters = query.filters.len(),
        "grid rows derived"
    );
    out
}
