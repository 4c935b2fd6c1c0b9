#![forbid(unsafe_code)]

//! Labeled vectors ([`Series`]) and tables ([`DataFrame`]) whose arithmetic
//! aligns operands on the sorted union of their labels before combining
//! them.
//!
//! Absent labels are never an error: they surface as the missing marker
//! (NaN) in the result, unless a numeric fill value is supplied, in which
//! case the fill stands in for the absent side before the operator runs.

use lf_columnar::{ArithmeticOp, Column, ColumnError, UnaryOp};
use lf_index::{
    AlignMode, AlignmentPlan, Index, IndexError, IndexLabel, align, align_union_sorted,
    validate_alignment_plan,
};
use lf_runtime::{AlignmentRequest, DecisionAction, EvidenceLedger, RuntimePolicy};
use lf_types::{DType, Scalar, nancount, nanmean, nansum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("duplicate {axis} label '{label}'")]
    DuplicateLabels { axis: &'static str, label: IndexLabel },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("fill value {0} is not numeric")]
    InvalidFillValue(String),
    #[error("label '{0}' not found")]
    LabelNotFound(IndexLabel),
    #[error("position {position} out of bounds for length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("runtime policy rejected {operation}: {cells} aligned cells over budget")]
    AdmissionRejected { operation: String, cells: usize },
    #[error(transparent)]
    Column(ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<ColumnError> for FrameError {
    fn from(err: ColumnError) -> Self {
        match err {
            ColumnError::InvalidFillValue { value } => Self::InvalidFillValue(value),
            other => Self::Column(other),
        }
    }
}

/// Which table axis a vector is matched against when broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Vector labels match row labels; the vector is applied to every column.
    Rows,
    /// Vector labels match column labels; the vector is applied to every row.
    #[default]
    Columns,
}

fn ensure_unique(index: &Index, axis: &'static str) -> Result<(), FrameError> {
    match index.first_duplicate() {
        Some(label) => Err(FrameError::DuplicateLabels {
            axis,
            label: label.clone(),
        }),
        None => Ok(()),
    }
}

fn ensure_numeric_fill(fill: Option<&Scalar>) -> Result<(), FrameError> {
    match fill {
        Some(value) if !value.is_missing() && !value.dtype().is_numeric() => {
            Err(FrameError::InvalidFillValue(value.to_string()))
        }
        _ => Ok(()),
    }
}

fn admit(
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
    request: AlignmentRequest,
) -> Result<(), FrameError> {
    let operation = request.operation.clone();
    let cells = request.aligned_cells();
    match policy.decide_alignment_admission(request, ledger) {
        DecisionAction::Allow => Ok(()),
        DecisionAction::Reject => {
            log::error!("{operation} rejected by runtime policy ({cells} aligned cells)");
            Err(FrameError::AdmissionRejected { operation, cells })
        }
    }
}

fn matched_slots(plan: &AlignmentPlan) -> usize {
    plan.union_index.len() - plan.unmatched_slots()
}

fn op_name(op: ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => "add",
        ArithmeticOp::Sub => "sub",
        ArithmeticOp::Mul => "mul",
        ArithmeticOp::Div => "div",
        ArithmeticOp::FloorDiv => "floordiv",
        ArithmeticOp::Mod => "mod",
        ArithmeticOp::Pow => "pow",
    }
}

fn missing_column(len: usize) -> Result<Column, FrameError> {
    Ok(Column::new(DType::Float64, vec![Scalar::missing(); len])?)
}

/// A single value repeated `len` times.
fn repeat_column(value: &Scalar, len: usize) -> Result<Column, FrameError> {
    Ok(Column::from_values(vec![value.clone(); len])?)
}

// ── Series ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawSeries {
    name: String,
    index: Index,
    column: Column,
}

impl TryFrom<RawSeries> for Series {
    type Error = FrameError;

    fn try_from(raw: RawSeries) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.index, raw.column)
    }
}

/// A labeled vector: unique labels with one nullable value each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }
        ensure_unique(&index, "row")?;

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    pub fn from_values(
        name: impl Into<String>,
        labels: Vec<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        Self::new(name, Index::new(labels), Column::from_values(values)?)
    }

    /// Build from `(label, value)` pairs, e.g. `{0: 2, 1: 4}`.
    pub fn from_pairs(
        name: impl Into<String>,
        pairs: Vec<(IndexLabel, Scalar)>,
    ) -> Result<Self, FrameError> {
        let (labels, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self::from_values(name, labels, values)
    }

    pub fn from_f64(
        name: impl Into<String>,
        labels: Vec<IndexLabel>,
        values: Vec<f64>,
    ) -> Result<Self, FrameError> {
        Self::new(name, Index::new(labels), Column::from_f64(values))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Value at `label`, or `None` when the label is absent.
    #[must_use]
    pub fn get(&self, label: &IndexLabel) -> Option<&Scalar> {
        self.index
            .position(label)
            .and_then(|pos| self.column.value(pos))
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.column.count_missing()
    }

    /// Sum of the non-missing values.
    #[must_use]
    pub fn sum(&self) -> Scalar {
        nansum(self.values())
    }

    /// Mean of the non-missing values; missing when there are none.
    #[must_use]
    pub fn mean(&self) -> Scalar {
        nanmean(self.values())
    }

    fn with_column(&self, name: String, index: Index, column: Column) -> Result<Self, FrameError> {
        Self::new(name, index, column)
    }

    /// Reindex onto `labels`; labels this series lacks become missing.
    pub fn reindex(&self, labels: Index) -> Result<Self, FrameError> {
        let positions = self.index.get_indexer(&labels);
        let column = self.column.reindex_by_positions(&positions)?;
        self.with_column(self.name.clone(), labels, column)
    }

    pub fn sort_index(&self) -> Result<Self, FrameError> {
        self.reindex(self.index.sort_values())
    }

    /// Every `step`-th element, starting with the first.
    pub fn take_every(&self, step: usize) -> Result<Self, FrameError> {
        let positions: Vec<Option<usize>> =
            (0..self.len()).step_by(step.max(1)).map(Some).collect();
        let column = self.column.reindex_by_positions(&positions)?;
        self.with_column(self.name.clone(), self.index.step_by(step), column)
    }

    pub fn fillna(&self, fill_value: &Scalar) -> Result<Self, FrameError> {
        let column = self.column.fillna(fill_value)?;
        self.with_column(self.name.clone(), self.index.clone(), column)
    }

    /// Align both series onto a shared label set.
    ///
    /// With [`AlignMode::Outer`] the labels are the sorted union. Slots an
    /// operand lacks hold `fill` when it is a number, the missing marker
    /// otherwise.
    pub fn align_with_fill(
        &self,
        other: &Self,
        mode: AlignMode,
        fill: Option<&Scalar>,
    ) -> Result<(Self, Self), FrameError> {
        ensure_numeric_fill(fill)?;
        let plan = align(&self.index, &other.index, mode);
        validate_alignment_plan(&plan)?;

        let left = self.column.reindex_with_fill(&plan.left_positions, fill)?;
        let right = other.column.reindex_with_fill(&plan.right_positions, fill)?;

        Ok((
            self.with_column(self.name.clone(), plan.union_index.clone(), left)?,
            other.with_column(other.name.clone(), plan.union_index, right)?,
        ))
    }

    pub fn align(&self, other: &Self, mode: AlignMode) -> Result<(Self, Self), FrameError> {
        self.align_with_fill(other, mode, None)
    }

    /// Apply `op` position by position. Both series must already carry the
    /// same labels in the same order; nothing is aligned here.
    pub fn elementwise(&self, other: &Self, op: ArithmeticOp) -> Result<Self, FrameError> {
        if self.index != other.index {
            return Err(FrameError::ShapeMismatch(format!(
                "elementwise {} needs identical labels ({} vs {} entries)",
                op.symbol(),
                self.len(),
                other.len()
            )));
        }
        let column = self.column.binary_numeric(&other.column, op)?;
        self.with_column(self.result_name(other, op), self.index.clone(), column)
    }

    fn result_name(&self, other: &Self, op: ArithmeticOp) -> String {
        if self.name == other.name {
            self.name.clone()
        } else {
            format!("{}{}{}", self.name, op.symbol(), other.name)
        }
    }

    /// Align on the sorted label union, then apply `op`.
    ///
    /// `fill` replaces the missing side wherever exactly one operand is
    /// missing; a missing `fill` is the same as none.
    pub fn arith_with_policy(
        &self,
        other: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, FrameError> {
        ensure_numeric_fill(fill)?;
        let plan = align_union_sorted(&self.index, &other.index);
        validate_alignment_plan(&plan)?;

        admit(
            policy,
            ledger,
            AlignmentRequest {
                operation: format!("series.{}", op_name(op)),
                left_shape: (self.len(), 1),
                right_shape: (other.len(), 1),
                aligned_shape: (plan.union_index.len(), 1),
                unmatched_cells: plan.unmatched_slots(),
            },
        )?;

        let column = if plan.is_identity() {
            self.column.binary_numeric_with_fill(&other.column, op, fill)?
        } else {
            let left = self.column.reindex_by_positions(&plan.left_positions)?;
            let right = other.column.reindex_by_positions(&plan.right_positions)?;
            left.binary_numeric_with_fill(&right, op, fill)?
        };

        self.with_column(self.result_name(other, op), plan.union_index, column)
    }

    pub fn arith(
        &self,
        other: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
    ) -> Result<Self, FrameError> {
        let mut ledger = EvidenceLedger::new();
        self.arith_with_policy(other, op, fill, &RuntimePolicy::strict(), &mut ledger)
    }

    pub fn add(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Add, None)
    }

    /// `self + other`, treating a label present on one side only as `fill`
    /// on the other.
    pub fn add_with_fill(&self, other: &Self, fill: &Scalar) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Add, Some(fill))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Sub, None)
    }

    pub fn mul(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Mul, None)
    }

    pub fn div(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Div, None)
    }

    pub fn floordiv(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::FloorDiv, None)
    }

    pub fn rem(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Mod, None)
    }

    pub fn pow(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Pow, None)
    }

    /// `self op scalar` at every label.
    pub fn arith_scalar(&self, op: ArithmeticOp, scalar: &Scalar) -> Result<Self, FrameError> {
        let column = self.column.binary_scalar(scalar, op, false)?;
        self.with_column(self.name.clone(), self.index.clone(), column)
    }

    /// `scalar op self` at every label.
    pub fn rarith_scalar(&self, op: ArithmeticOp, scalar: &Scalar) -> Result<Self, FrameError> {
        let column = self.column.binary_scalar(scalar, op, true)?;
        self.with_column(self.name.clone(), self.index.clone(), column)
    }

    /// Elementwise function; labels are kept as they are.
    pub fn apply_unary(&self, op: UnaryOp) -> Result<Self, FrameError> {
        let column = self.column.apply_unary(op)?;
        self.with_column(self.name.clone(), self.index.clone(), column)
    }
}

// ── DataFrame ──────────────────────────────────────────────────────────

/// A labeled table: unique row labels, unique column labels and one
/// [`Column`] per column label.
#[derive(Deserialize)]
struct RawDataFrame {
    index: Index,
    columns: Index,
    data: Vec<Column>,
}

impl TryFrom<RawDataFrame> for DataFrame {
    type Error = FrameError;

    fn try_from(raw: RawDataFrame) -> Result<Self, Self::Error> {
        Self::new(raw.index, raw.columns, raw.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataFrame")]
pub struct DataFrame {
    index: Index,
    columns: Index,
    data: Vec<Column>,
}

impl DataFrame {
    pub fn new(index: Index, columns: Index, data: Vec<Column>) -> Result<Self, FrameError> {
        if columns.len() != data.len() {
            return Err(FrameError::ShapeMismatch(format!(
                "{} column labels for {} columns",
                columns.len(),
                data.len()
            )));
        }
        for column in &data {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
        }
        ensure_unique(&index, "row")?;
        ensure_unique(&columns, "column")?;

        Ok(Self {
            index,
            columns,
            data,
        })
    }

    /// Build from `(column label, values)` pairs sharing `index`.
    pub fn from_columns(
        index: Index,
        columns: Vec<(IndexLabel, Vec<Scalar>)>,
    ) -> Result<Self, FrameError> {
        let mut labels = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (label, values) in columns {
            labels.push(label);
            data.push(Column::from_values(values)?);
        }
        Self::new(index, Index::new(labels), data)
    }

    /// Build from row-major values: `rows[i][j]` is the cell at row `i`,
    /// column `j`.
    pub fn from_rows(
        index: Index,
        columns: Index,
        rows: Vec<Vec<Scalar>>,
    ) -> Result<Self, FrameError> {
        if rows.len() != index.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: rows.len(),
            });
        }
        let mut by_column: Vec<Vec<Scalar>> = vec![Vec::with_capacity(rows.len()); columns.len()];
        for row in rows {
            if row.len() != columns.len() {
                return Err(FrameError::ShapeMismatch(format!(
                    "row of {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            for (slot, value) in by_column.iter_mut().zip(row) {
                slot.push(value);
            }
        }
        let data = by_column
            .into_iter()
            .map(Column::from_values)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(index, columns, data)
    }

    /// Collect named series into a table whose row labels are the sorted
    /// union of all series labels; column labels are the series names.
    pub fn from_series(series_list: Vec<Series>) -> Result<Self, FrameError> {
        let union = series_list
            .iter()
            .fold(Index::new(Vec::new()), |acc, series| {
                acc.union_sorted(series.index())
            });

        let mut labels = Vec::with_capacity(series_list.len());
        let mut data = Vec::with_capacity(series_list.len());
        for series in series_list {
            let positions = series.index.get_indexer(&union);
            data.push(series.column.reindex_by_positions(&positions)?);
            labels.push(IndexLabel::Utf8(series.name));
        }
        Self::new(union, Index::new(labels), data)
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &Index {
        &self.columns
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.columns.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    #[must_use]
    pub fn value(&self, row: &IndexLabel, column: &IndexLabel) -> Option<&Scalar> {
        let row = self.index.position(row)?;
        let col = self.columns.position(column)?;
        self.data[col].value(row)
    }

    /// Column `label` as a series labeled by this table's rows.
    pub fn column(&self, label: &IndexLabel) -> Result<Series, FrameError> {
        let pos = self
            .columns
            .position(label)
            .ok_or_else(|| FrameError::LabelNotFound(label.clone()))?;
        Series::new(label.to_string(), self.index.clone(), self.data[pos].clone())
    }

    /// Row `label` as a series labeled by this table's columns.
    pub fn row(&self, label: &IndexLabel) -> Result<Series, FrameError> {
        let pos = self
            .index
            .position(label)
            .ok_or_else(|| FrameError::LabelNotFound(label.clone()))?;
        self.row_at(pos)
    }

    /// Row at `position` (0-based) as a series labeled by this table's columns.
    pub fn iloc_row(&self, position: usize) -> Result<Series, FrameError> {
        if position >= self.index.len() {
            return Err(FrameError::PositionOutOfBounds {
                position,
                len: self.index.len(),
            });
        }
        self.row_at(position)
    }

    fn row_at(&self, pos: usize) -> Result<Series, FrameError> {
        let out_of_bounds = || FrameError::PositionOutOfBounds {
            position: pos,
            len: self.index.len(),
        };
        let values = self
            .data
            .iter()
            .map(|column| column.value(pos).cloned().ok_or_else(out_of_bounds))
            .collect::<Result<Vec<_>, _>>()?;
        let label = self.index.labels().get(pos).ok_or_else(out_of_bounds)?;
        Series::new(
            label.to_string(),
            self.columns.clone(),
            Column::from_values(values)?,
        )
    }

    pub fn select_columns(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let mut data = Vec::with_capacity(labels.len());
        for label in labels {
            let pos = self
                .columns
                .position(label)
                .ok_or_else(|| FrameError::LabelNotFound(label.clone()))?;
            data.push(self.data[pos].clone());
        }
        Self::new(self.index.clone(), Index::new(labels.to_vec()), data)
    }

    /// Rebuild onto new row and column labels. `None` positions are labels
    /// this table lacks and become missing.
    fn reindex_by_positions(
        &self,
        index: Index,
        row_positions: &[Option<usize>],
        columns: Index,
        col_positions: &[Option<usize>],
        fill: Option<&Scalar>,
    ) -> Result<Self, FrameError> {
        let data = col_positions
            .iter()
            .map(|slot| match (slot.and_then(|pos| self.data.get(pos)), fill) {
                (Some(column), _) => Ok(column.reindex_with_fill(row_positions, fill)?),
                (None, Some(fill)) if !fill.is_missing() => repeat_column(fill, row_positions.len()),
                (None, _) => missing_column(row_positions.len()),
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::new(index, columns, data)
    }

    pub fn reindex(&self, index: Index) -> Result<Self, FrameError> {
        let rows = self.index.get_indexer(&index);
        let cols: Vec<Option<usize>> = (0..self.columns.len()).map(Some).collect();
        self.reindex_by_positions(index, &rows, self.columns.clone(), &cols, None)
    }

    pub fn reindex_columns(&self, columns: Index) -> Result<Self, FrameError> {
        let rows: Vec<Option<usize>> = (0..self.index.len()).map(Some).collect();
        let cols = self.columns.get_indexer(&columns);
        self.reindex_by_positions(self.index.clone(), &rows, columns, &cols, None)
    }

    /// Align both tables on rows and columns independently.
    ///
    /// With [`AlignMode::Outer`] each axis becomes the sorted union of the
    /// two operands' labels. Cells an operand lacks hold `fill` when it is a
    /// number, the missing marker otherwise.
    pub fn align_with_fill(
        &self,
        other: &Self,
        mode: AlignMode,
        fill: Option<&Scalar>,
    ) -> Result<(Self, Self), FrameError> {
        ensure_numeric_fill(fill)?;
        let rows = align(&self.index, &other.index, mode);
        let cols = align(&self.columns, &other.columns, mode);
        validate_alignment_plan(&rows)?;
        validate_alignment_plan(&cols)?;

        let left = self.reindex_by_positions(
            rows.union_index.clone(),
            &rows.left_positions,
            cols.union_index.clone(),
            &cols.left_positions,
            fill,
        )?;
        let right = other.reindex_by_positions(
            rows.union_index,
            &rows.right_positions,
            cols.union_index,
            &cols.right_positions,
            fill,
        )?;
        Ok((left, right))
    }

    pub fn align(&self, other: &Self, mode: AlignMode) -> Result<(Self, Self), FrameError> {
        self.align_with_fill(other, mode, None)
    }

    /// Apply `op` cell by cell. Both tables must already carry the same row
    /// and column labels in the same order.
    pub fn elementwise(&self, other: &Self, op: ArithmeticOp) -> Result<Self, FrameError> {
        if self.index != other.index || self.columns != other.columns {
            return Err(FrameError::ShapeMismatch(format!(
                "elementwise {} needs identical labels ({:?} vs {:?})",
                op.symbol(),
                self.shape(),
                other.shape()
            )));
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(left, right)| left.binary_numeric(right, op))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.index.clone(), self.columns.clone(), data)
    }

    /// Align rows and columns on their sorted unions, then apply `op`.
    pub fn arith_with_policy(
        &self,
        other: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, FrameError> {
        ensure_numeric_fill(fill)?;
        let rows = align_union_sorted(&self.index, &other.index);
        let cols = align_union_sorted(&self.columns, &other.columns);
        validate_alignment_plan(&rows)?;
        validate_alignment_plan(&cols)?;

        let aligned_shape = (rows.union_index.len(), cols.union_index.len());
        let matched_cells = matched_slots(&rows) * matched_slots(&cols);
        admit(
            policy,
            ledger,
            AlignmentRequest {
                operation: format!("frame.{}", op_name(op)),
                left_shape: self.shape(),
                right_shape: other.shape(),
                aligned_shape,
                unmatched_cells: aligned_shape
                    .0
                    .saturating_mul(aligned_shape.1)
                    .saturating_sub(matched_cells),
            },
        )?;

        let left = self.reindex_by_positions(
            rows.union_index.clone(),
            &rows.left_positions,
            cols.union_index.clone(),
            &cols.left_positions,
            None,
        )?;
        let right = other.reindex_by_positions(
            rows.union_index,
            &rows.right_positions,
            cols.union_index,
            &cols.right_positions,
            None,
        )?;

        let data = left
            .data
            .iter()
            .zip(&right.data)
            .map(|(l, r)| l.binary_numeric_with_fill(r, op, fill))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(left.index, left.columns, data)
    }

    pub fn arith(
        &self,
        other: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
    ) -> Result<Self, FrameError> {
        let mut ledger = EvidenceLedger::new();
        self.arith_with_policy(other, op, fill, &RuntimePolicy::strict(), &mut ledger)
    }

    pub fn add(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Add, None)
    }

    pub fn add_with_fill(&self, other: &Self, fill: &Scalar) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Add, Some(fill))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Sub, None)
    }

    pub fn mul(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Mul, None)
    }

    pub fn div(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Div, None)
    }

    pub fn floordiv(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::FloorDiv, None)
    }

    pub fn rem(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Mod, None)
    }

    pub fn pow(&self, other: &Self) -> Result<Self, FrameError> {
        self.arith(other, ArithmeticOp::Pow, None)
    }

    /// Broadcast `series` across the table.
    ///
    /// With [`Axis::Columns`] the series labels are matched against the
    /// column labels (sorted union) and the adjusted series is combined with
    /// every row. With [`Axis::Rows`] they are matched against the row labels
    /// and the series is combined with every column.
    pub fn arith_series_with_policy(
        &self,
        series: &Series,
        op: ArithmeticOp,
        axis: Axis,
        fill: Option<&Scalar>,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, FrameError> {
        ensure_numeric_fill(fill)?;
        let target = match axis {
            Axis::Rows => &self.index,
            Axis::Columns => &self.columns,
        };
        let plan = align_union_sorted(target, series.index());
        validate_alignment_plan(&plan)?;

        let aligned_shape = match axis {
            Axis::Rows => (plan.union_index.len(), self.columns.len()),
            Axis::Columns => (self.index.len(), plan.union_index.len()),
        };
        let other_extent = match axis {
            Axis::Rows => aligned_shape.1,
            Axis::Columns => aligned_shape.0,
        };
        admit(
            policy,
            ledger,
            AlignmentRequest {
                operation: format!("frame.{}_series.{axis:?}", op_name(op)).to_lowercase(),
                left_shape: self.shape(),
                right_shape: (series.len(), 1),
                aligned_shape,
                unmatched_cells: plan.unmatched_slots() * other_extent,
            },
        )?;

        let vector = series.column.reindex_by_positions(&plan.right_positions)?;
        match axis {
            Axis::Rows => {
                let all_cols: Vec<Option<usize>> = (0..self.columns.len()).map(Some).collect();
                let frame = self.reindex_by_positions(
                    plan.union_index,
                    &plan.left_positions,
                    self.columns.clone(),
                    &all_cols,
                    None,
                )?;
                let data = frame
                    .data
                    .iter()
                    .map(|column| column.binary_numeric_with_fill(&vector, op, fill))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::new(frame.index, frame.columns, data)
            }
            Axis::Columns => {
                let all_rows: Vec<Option<usize>> = (0..self.index.len()).map(Some).collect();
                let frame = self.reindex_by_positions(
                    self.index.clone(),
                    &all_rows,
                    plan.union_index,
                    &plan.left_positions,
                    None,
                )?;
                let rows = frame.index.len();
                let data = frame
                    .data
                    .iter()
                    .zip(vector.values())
                    .map(|(column, value)| {
                        let broadcast = repeat_column(value, rows)?;
                        Ok(column.binary_numeric_with_fill(&broadcast, op, fill)?)
                    })
                    .collect::<Result<Vec<_>, FrameError>>()?;
                Self::new(frame.index, frame.columns, data)
            }
        }
    }

    pub fn arith_series(
        &self,
        series: &Series,
        op: ArithmeticOp,
        axis: Axis,
        fill: Option<&Scalar>,
    ) -> Result<Self, FrameError> {
        let mut ledger = EvidenceLedger::new();
        self.arith_series_with_policy(
            series,
            op,
            axis,
            fill,
            &RuntimePolicy::strict(),
            &mut ledger,
        )
    }

    /// `self - series`, broadcasting along `axis`.
    pub fn sub_series(&self, series: &Series, axis: Axis) -> Result<Self, FrameError> {
        self.arith_series(series, ArithmeticOp::Sub, axis, None)
    }

    /// `self op scalar` in every cell.
    pub fn arith_scalar(&self, op: ArithmeticOp, scalar: &Scalar) -> Result<Self, FrameError> {
        let data = self
            .data
            .iter()
            .map(|column| column.binary_scalar(scalar, op, false))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.index.clone(), self.columns.clone(), data)
    }

    /// Elementwise function; row and column labels are kept as they are.
    pub fn apply_unary(&self, op: UnaryOp) -> Result<Self, FrameError> {
        let data = self
            .data
            .iter()
            .map(|column| column.apply_unary(op))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.index.clone(), self.columns.clone(), data)
    }

    pub fn fillna(&self, fill_value: &Scalar) -> Result<Self, FrameError> {
        let data = self
            .data
            .iter()
            .map(|column| column.fillna(fill_value))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.index.clone(), self.columns.clone(), data)
    }

    fn cells(&self) -> Vec<Scalar> {
        self.data
            .iter()
            .flat_map(|column| column.values().iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.data.iter().map(Column::count_missing).sum()
    }

    /// Number of non-missing cells.
    #[must_use]
    pub fn count(&self) -> usize {
        nancount(&self.cells())
    }

    /// Sum over every non-missing cell.
    #[must_use]
    pub fn sum(&self) -> Scalar {
        nansum(&self.cells())
    }

    /// Mean over every non-missing cell of the table.
    #[must_use]
    pub fn mean(&self) -> Scalar {
        nanmean(&self.cells())
    }
}

// ── Operand ────────────────────────────────────────────────────────────

/// Either rank of labeled entity, for callers that hold both kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rank", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Vector(Series),
    Table(DataFrame),
}

impl From<Series> for Operand {
    fn from(value: Series) -> Self {
        Self::Vector(value)
    }
}

impl From<DataFrame> for Operand {
    fn from(value: DataFrame) -> Self {
        Self::Table(value)
    }
}

impl Operand {
    /// 1 for vectors, 2 for tables.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Vector(_) => 1,
            Self::Table(_) => 2,
        }
    }

    fn rank_mismatch(&self, other: &Self) -> FrameError {
        FrameError::ShapeMismatch(format!(
            "cannot combine rank {} with rank {}; broadcast a table against a vector explicitly",
            self.rank(),
            other.rank()
        ))
    }

    /// Outer-align two operands of the same rank.
    pub fn align(&self, other: &Self, fill: Option<&Scalar>) -> Result<(Self, Self), FrameError> {
        match (self, other) {
            (Self::Vector(left), Self::Vector(right)) => {
                let (l, r) = left.align_with_fill(right, AlignMode::Outer, fill)?;
                Ok((l.into(), r.into()))
            }
            (Self::Table(left), Self::Table(right)) => {
                let (l, r) = left.align_with_fill(right, AlignMode::Outer, fill)?;
                Ok((l.into(), r.into()))
            }
            _ => Err(self.rank_mismatch(other)),
        }
    }

    pub fn arith(
        &self,
        other: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
    ) -> Result<Self, FrameError> {
        match (self, other) {
            (Self::Vector(left), Self::Vector(right)) => Ok(left.arith(right, op, fill)?.into()),
            (Self::Table(left), Self::Table(right)) => Ok(left.arith(right, op, fill)?.into()),
            _ => Err(self.rank_mismatch(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use lf_columnar::{ArithmeticOp, ColumnError, UnaryOp};
    use lf_index::{AlignMode, Index, IndexLabel};
    use lf_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
    use lf_types::{DType, Scalar};

    use super::{Axis, DataFrame, FrameError, Operand, Series};

    fn int_series(name: &str, pairs: &[(i64, i64)]) -> Series {
        Series::from_pairs(
            name,
            pairs
                .iter()
                .map(|&(label, value)| (label.into(), Scalar::Int64(value)))
                .collect(),
        )
        .unwrap()
    }

    fn int_frame(rows: Vec<i64>, cols: &[&str], values: &[&[i64]]) -> DataFrame {
        DataFrame::from_rows(
            Index::from_i64(rows),
            Index::from_utf8(cols.to_vec()),
            values
                .iter()
                .map(|row| row.iter().copied().map(Scalar::Int64).collect())
                .collect(),
        )
        .unwrap()
    }

    fn label(name: &str) -> IndexLabel {
        IndexLabel::from(name)
    }

    #[test]
    fn series_add_without_fill_leaves_one_sided_labels_missing() {
        let a = int_series("A", &[(0, 2), (1, 4), (2, 6)]);
        let b = int_series("B", &[(1, 1), (2, 3), (3, 5)]);

        let out = a.add(&b).unwrap();
        assert_eq!(out.index(), &Index::from_i64(vec![0, 1, 2, 3]));
        assert!(out.values()[0].is_missing());
        assert_eq!(out.values()[1], Scalar::Float64(5.0));
        assert_eq!(out.values()[2], Scalar::Float64(9.0));
        assert!(out.values()[3].is_missing());
        assert_eq!(out.name(), "A+B");
    }

    #[test]
    fn series_add_with_fill_treats_absent_side_as_fill() {
        let a = int_series("A", &[(0, 2), (1, 4), (2, 6)]);
        let b = int_series("B", &[(1, 1), (2, 3), (3, 5)]);

        let out = a.add_with_fill(&b, &Scalar::Int64(0)).unwrap();
        assert_eq!(out.dtype(), DType::Float64);
        assert_eq!(
            out.values(),
            &[
                Scalar::Float64(2.0),
                Scalar::Float64(5.0),
                Scalar::Float64(9.0),
                Scalar::Float64(5.0)
            ]
        );
    }

    #[test]
    fn fill_does_not_apply_when_both_sides_missing() {
        let a = Series::from_values("a", vec![0_i64.into()], vec![Scalar::missing()]).unwrap();
        let b = Series::from_values("a", vec![0_i64.into()], vec![Scalar::missing()]).unwrap();
        let out = a.add_with_fill(&b, &Scalar::Int64(1)).unwrap();
        assert!(out.values()[0].is_missing());
    }

    #[test]
    fn identical_labels_keep_integer_results() {
        let a = int_series("x", &[(1, 10), (2, 20)]);
        let b = int_series("x", &[(1, 3), (2, 4)]);
        let out = a.sub(&b).unwrap();
        assert_eq!(out.dtype(), DType::Int64);
        assert_eq!(out.values(), &[Scalar::Int64(7), Scalar::Int64(16)]);
        assert_eq!(out.name(), "x");

        assert_eq!(a.mul(&b).unwrap().values(), &[Scalar::Int64(30), Scalar::Int64(80)]);
        assert_eq!(
            a.div(&b).unwrap().values(),
            &[Scalar::Float64(10.0 / 3.0), Scalar::Float64(5.0)]
        );
        assert_eq!(a.floordiv(&b).unwrap().values(), &[Scalar::Int64(3), Scalar::Int64(5)]);
        assert_eq!(a.rem(&b).unwrap().values(), &[Scalar::Int64(1), Scalar::Int64(0)]);
        assert_eq!(
            b.pow(&int_series("x", &[(1, 2), (2, 0)])).unwrap().values(),
            &[Scalar::Int64(9), Scalar::Int64(1)]
        );
    }

    #[test]
    fn output_order_is_sorted_regardless_of_operand_order() {
        let a = Series::from_values(
            "a",
            vec!["Texas".into(), "Alaska".into(), "California".into()],
            vec![Scalar::Float64(1.0), Scalar::Float64(2.0), Scalar::Float64(3.0)],
        )
        .unwrap();
        let b = Series::from_values(
            "b",
            vec!["New York".into(), "California".into()],
            vec![Scalar::Float64(10.0), Scalar::Float64(20.0)],
        )
        .unwrap();

        let out = a.div(&b).unwrap();
        assert_eq!(
            out.index(),
            &Index::from_utf8(vec!["Alaska", "California", "New York", "Texas"])
        );
        assert_eq!(out.get(&label("California")), Some(&Scalar::Float64(0.15)));
        assert!(out.get(&label("Alaska")).unwrap().is_missing());
        assert_eq!(b.div(&a).unwrap().index(), out.index());
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let err = Series::from_values(
            "dup",
            vec![1_i64.into(), 1_i64.into()],
            vec![Scalar::Int64(1), Scalar::Int64(2)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            FrameError::DuplicateLabels {
                axis: "row",
                label: IndexLabel::Int64(1)
            }
        );

        let err = DataFrame::from_columns(
            Index::from_i64(vec![0]),
            vec![
                (label("A"), vec![Scalar::Int64(1)]),
                (label("A"), vec![Scalar::Int64(2)]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::DuplicateLabels { axis: "column", .. }));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = Series::from_values("s", vec![0_i64.into()], vec![]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                index_len: 1,
                column_len: 0
            }
        );
    }

    #[test]
    fn non_numeric_fill_is_invalid() {
        let a = int_series("A", &[(0, 1)]);
        let err = a.add_with_fill(&a, &Scalar::from("zero")).unwrap_err();
        assert_eq!(err, FrameError::InvalidFillValue("zero".to_owned()));

        let frame = int_frame(vec![0], &["A"], &[&[1]]);
        let err = frame.add_with_fill(&frame, &Scalar::from("zero")).unwrap_err();
        assert_eq!(err, FrameError::InvalidFillValue("zero".to_owned()));
    }

    #[test]
    fn utf8_values_fail_with_column_error() {
        let text = Series::from_values("t", vec![0_i64.into()], vec![Scalar::from("a")]).unwrap();
        let err = text.add(&int_series("n", &[(0, 1)])).unwrap_err();
        assert_eq!(
            err,
            FrameError::Column(ColumnError::NonNumeric { dtype: DType::Utf8 })
        );
    }

    #[test]
    fn series_align_with_fill_fills_absent_slots_only() {
        let a = Series::from_values(
            "a",
            vec![0_i64.into(), 1_i64.into()],
            vec![Scalar::Float64(1.0), Scalar::missing()],
        )
        .unwrap();
        let b = int_series("b", &[(2, 7)]);

        let (l, r) = a
            .align_with_fill(&b, AlignMode::Outer, Some(&Scalar::Float64(0.0)))
            .unwrap();
        assert_eq!(l.index(), &Index::from_i64(vec![0, 1, 2]));
        assert_eq!(l.values()[0], Scalar::Float64(1.0));
        assert!(l.values()[1].is_missing());
        assert_eq!(l.values()[2], Scalar::Float64(0.0));
        assert_eq!(
            r.values(),
            &[Scalar::Float64(0.0), Scalar::Float64(0.0), Scalar::Float64(7.0)]
        );

        let (l, _) = a.align(&b, AlignMode::Inner).unwrap();
        assert!(l.is_empty());
    }

    #[test]
    fn elementwise_requires_aligned_inputs() {
        let a = int_series("a", &[(0, 1), (1, 2)]);
        let b = int_series("b", &[(1, 2), (0, 1)]);
        assert!(matches!(
            a.elementwise(&b, ArithmeticOp::Add),
            Err(FrameError::ShapeMismatch(_))
        ));
        let out = a.elementwise(&a, ArithmeticOp::Add).unwrap();
        assert_eq!(out.values(), &[Scalar::Int64(2), Scalar::Int64(4)]);
    }

    #[test]
    fn scalar_and_unary_preserve_labels() {
        let s = int_series("s", &[(5, 1), (3, 2)]);
        let out = s.arith_scalar(ArithmeticOp::Mul, &Scalar::Float64(0.5)).unwrap();
        assert_eq!(out.index(), s.index());
        assert_eq!(out.values(), &[Scalar::Float64(0.5), Scalar::Float64(1.0)]);

        let out = s.rarith_scalar(ArithmeticOp::Sub, &Scalar::Int64(10)).unwrap();
        assert_eq!(out.values(), &[Scalar::Int64(9), Scalar::Int64(8)]);

        let exp = s.apply_unary(UnaryOp::Exp).unwrap();
        assert_eq!(exp.index(), s.index());
        assert_eq!(exp.values()[0], Scalar::Float64(1_f64.exp()));
    }

    #[test]
    fn take_every_and_sort_index() {
        let s = int_series("s", &[(3, 30), (1, 10), (2, 20)]);
        let every = s.take_every(2).unwrap();
        assert_eq!(every.index(), &Index::from_i64(vec![3, 2]));
        assert_eq!(every.values(), &[Scalar::Int64(30), Scalar::Int64(20)]);

        let sorted = s.sort_index().unwrap();
        assert_eq!(sorted.index(), &Index::from_i64(vec![1, 2, 3]));
        assert_eq!(
            sorted.values(),
            &[Scalar::Int64(10), Scalar::Int64(20), Scalar::Int64(30)]
        );
    }

    #[test]
    fn frame_add_unions_rows_and_columns() {
        let a = int_frame(vec![0, 1], &["A", "B"], &[&[1, 11], &[5, 1]]);
        let b = int_frame(
            vec![0, 1, 2],
            &["B", "A", "C"],
            &[&[4, 0, 9], &[5, 8, 0], &[9, 2, 6]],
        );

        let out = a.add(&b).unwrap();
        assert_eq!(out.index(), &Index::from_i64(vec![0, 1, 2]));
        assert_eq!(out.columns(), &Index::from_utf8(vec!["A", "B", "C"]));
        assert_eq!(out.value(&0_i64.into(), &label("A")), Some(&Scalar::Float64(1.0)));
        assert_eq!(out.value(&0_i64.into(), &label("B")), Some(&Scalar::Float64(15.0)));
        assert_eq!(out.value(&1_i64.into(), &label("A")), Some(&Scalar::Float64(13.0)));
        assert_eq!(out.value(&1_i64.into(), &label("B")), Some(&Scalar::Float64(6.0)));
        assert!(out.value(&2_i64.into(), &label("A")).unwrap().is_missing());
        assert!(out.value(&0_i64.into(), &label("C")).unwrap().is_missing());
        assert_eq!(out.count_missing(), 5);
    }

    #[test]
    fn frame_integer_operators_on_shared_labels() {
        let a = int_frame(vec![0], &["A", "B"], &[&[7, -7]]);
        let b = int_frame(vec![0], &["A", "B"], &[&[2, 2]]);
        assert_eq!(
            a.floordiv(&b).unwrap().iloc_row(0).unwrap().values(),
            &[Scalar::Int64(3), Scalar::Int64(-4)]
        );
        assert_eq!(
            a.rem(&b).unwrap().iloc_row(0).unwrap().values(),
            &[Scalar::Int64(1), Scalar::Int64(1)]
        );
        assert_eq!(
            b.pow(&b).unwrap().iloc_row(0).unwrap().values(),
            &[Scalar::Int64(4), Scalar::Int64(4)]
        );
        assert_eq!(
            a.mul(&b).unwrap().sub(&a).unwrap().iloc_row(0).unwrap().values(),
            &[Scalar::Int64(7), Scalar::Int64(-7)]
        );
    }

    #[test]
    fn frame_add_with_mean_fill() {
        let a = int_frame(vec![0, 1], &["A", "B"], &[&[1, 11], &[5, 1]]);
        let b = int_frame(
            vec![0, 1, 2],
            &["B", "A", "C"],
            &[&[4, 0, 9], &[5, 8, 0], &[9, 2, 6]],
        );
        let fill = a.mean();
        assert_eq!(fill, Scalar::Float64(4.5));

        let out = a.add_with_fill(&b, &fill).unwrap();
        assert_eq!(out.count_missing(), 0);
        assert_eq!(out.value(&0_i64.into(), &label("A")), Some(&Scalar::Float64(1.0)));
        assert_eq!(out.value(&0_i64.into(), &label("C")), Some(&Scalar::Float64(13.5)));
        assert_eq!(out.value(&2_i64.into(), &label("A")), Some(&Scalar::Float64(6.5)));
        assert_eq!(out.value(&2_i64.into(), &label("C")), Some(&Scalar::Float64(10.5)));
    }

    #[test]
    fn frame_minus_own_first_row_zeroes_that_row() {
        let frame = int_frame(
            vec![0, 1, 2],
            &["Q", "R", "S", "T"],
            &[&[3, 8, 2, 4], &[2, 6, 4, 8], &[6, 1, 3, 8]],
        );
        let first = frame.iloc_row(0).unwrap();
        let out = frame.sub_series(&first, Axis::Columns).unwrap();

        assert_eq!(out.columns(), frame.columns());
        assert_eq!(out.iloc_row(0).unwrap().values(), vec![Scalar::Int64(0); 4].as_slice());
        assert_eq!(
            out.iloc_row(1).unwrap().values(),
            &[
                Scalar::Int64(-1),
                Scalar::Int64(-2),
                Scalar::Int64(2),
                Scalar::Int64(4)
            ]
        );
        assert_eq!(
            out.row(&2_i64.into()).unwrap().values(),
            &[
                Scalar::Int64(3),
                Scalar::Int64(-7),
                Scalar::Int64(1),
                Scalar::Int64(4)
            ]
        );
    }

    #[test]
    fn frame_minus_column_along_rows() {
        let frame = int_frame(vec![0, 1], &["Q", "R"], &[&[3, 8], &[2, 6]]);
        let r = frame.column(&label("R")).unwrap();
        let out = frame.sub_series(&r, Axis::Rows).unwrap();
        assert_eq!(
            out.column(&label("Q")).unwrap().values(),
            &[Scalar::Int64(-5), Scalar::Int64(-4)]
        );
        assert_eq!(
            out.column(&label("R")).unwrap().values(),
            &[Scalar::Int64(0), Scalar::Int64(0)]
        );
    }

    #[test]
    fn frame_minus_partial_row_leaves_missing_columns() {
        let frame = int_frame(
            vec![0, 1],
            &["Q", "R", "S", "T"],
            &[&[3, 8, 2, 4], &[2, 6, 4, 8]],
        );
        let halfrow = frame.iloc_row(0).unwrap().take_every(2).unwrap();
        assert_eq!(halfrow.index(), &Index::from_utf8(vec!["Q", "S"]));

        let out = frame.sub_series(&halfrow, Axis::Columns).unwrap();
        assert_eq!(out.columns(), frame.columns());
        let row1 = out.iloc_row(1).unwrap();
        assert_eq!(row1.get(&label("Q")), Some(&Scalar::Float64(-1.0)));
        assert!(row1.get(&label("R")).unwrap().is_missing());
        assert_eq!(row1.get(&label("S")), Some(&Scalar::Float64(2.0)));
        assert!(row1.get(&label("T")).unwrap().is_missing());
    }

    #[test]
    fn broadcast_along_rows_extends_row_labels() {
        let frame = int_frame(vec![0, 1], &["Q"], &[&[3], &[2]]);
        let vector = int_series("v", &[(1, 1), (5, 1)]);
        let out = frame
            .arith_series(&vector, ArithmeticOp::Add, Axis::Rows, None)
            .unwrap();
        assert_eq!(out.index(), &Index::from_i64(vec![0, 1, 5]));
        let q = out.column(&label("Q")).unwrap();
        assert!(q.values()[0].is_missing());
        assert_eq!(q.values()[1], Scalar::Float64(3.0));
        assert!(q.values()[2].is_missing());
    }

    #[test]
    fn broadcast_with_fill() {
        let frame = int_frame(vec![0], &["Q", "R"], &[&[3, 8]]);
        let vector = Series::from_values("v", vec![label("Q")], vec![Scalar::Int64(1)]).unwrap();
        let out = frame
            .arith_series(&vector, ArithmeticOp::Mul, Axis::Columns, Some(&Scalar::Int64(2)))
            .unwrap();
        assert_eq!(
            out.iloc_row(0).unwrap().values(),
            &[Scalar::Float64(3.0), Scalar::Float64(16.0)]
        );
    }

    #[test]
    fn frame_unary_and_scalar_keep_labels() {
        let frame = int_frame(vec![7, 9], &["A", "B"], &[&[0, 2], &[4, 6]]);
        let scaled = frame
            .arith_scalar(ArithmeticOp::Mul, &Scalar::Float64(std::f64::consts::PI / 4.0))
            .unwrap();
        let sin = scaled.apply_unary(UnaryOp::Sin).unwrap();
        assert_eq!(sin.index(), frame.index());
        assert_eq!(sin.columns(), frame.columns());
        let Scalar::Float64(v) = sin.value(&9_i64.into(), &label("B")).unwrap() else {
            panic!("expected float");
        };
        assert!((v - (6.0 * std::f64::consts::PI / 4.0).sin()).abs() < 1e-12);
    }

    #[test]
    fn frame_extraction_errors() {
        let frame = int_frame(vec![0], &["A"], &[&[1]]);
        assert_eq!(
            frame.iloc_row(3).unwrap_err(),
            FrameError::PositionOutOfBounds { position: 3, len: 1 }
        );
        assert_eq!(
            frame.column(&label("Z")).unwrap_err(),
            FrameError::LabelNotFound(label("Z"))
        );
        assert!(frame.select_columns(&[label("Z")]).is_err());
        assert!(matches!(
            DataFrame::from_rows(
                Index::from_i64(vec![0]),
                Index::from_utf8(vec!["A", "B"]),
                vec![vec![Scalar::Int64(1)]],
            ),
            Err(FrameError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn frame_reindex_and_select() {
        let frame = int_frame(vec![0, 1], &["A", "B"], &[&[1, 2], &[3, 4]]);
        let wider = frame
            .reindex_columns(Index::from_utf8(vec!["B", "C"]))
            .unwrap();
        assert_eq!(wider.shape(), (2, 2));
        assert_eq!(wider.value(&1_i64.into(), &label("B")), Some(&Scalar::Int64(4)));
        assert!(wider.value(&1_i64.into(), &label("C")).unwrap().is_missing());

        let taller = frame.reindex(Index::from_i64(vec![1, 2])).unwrap();
        assert_eq!(taller.value(&1_i64.into(), &label("A")), Some(&Scalar::Float64(3.0)));
        assert!(taller.value(&2_i64.into(), &label("A")).unwrap().is_missing());

        let picked = frame.select_columns(&[label("B")]).unwrap();
        assert_eq!(picked.shape(), (2, 1));
    }

    #[test]
    fn frame_from_series_unions_rows() {
        let area = Series::from_values(
            "area",
            vec!["Alaska".into(), "Texas".into()],
            vec![Scalar::Int64(1_723_337), Scalar::Int64(695_662)],
        )
        .unwrap();
        let population = Series::from_values(
            "population",
            vec!["California".into(), "Texas".into()],
            vec![Scalar::Int64(39_538_223), Scalar::Int64(29_145_505)],
        )
        .unwrap();

        let frame = DataFrame::from_series(vec![area, population]).unwrap();
        assert_eq!(
            frame.index(),
            &Index::from_utf8(vec!["Alaska", "California", "Texas"])
        );
        assert_eq!(frame.columns(), &Index::from_utf8(vec!["area", "population"]));
        assert!(frame.value(&label("California"), &label("area")).unwrap().is_missing());
        assert_eq!(frame.count(), 4);
    }

    #[test]
    fn frame_self_alignment_is_identity() {
        let frame = int_frame(vec![0, 1], &["A", "B"], &[&[1, 2], &[3, 4]]);
        let (l, r) = frame.align(&frame, AlignMode::Outer).unwrap();
        assert_eq!(l, frame);
        assert_eq!(r, frame);
    }

    #[test]
    fn operand_serializes_with_rank_tag() {
        let vector: Operand = int_series("v", &[(0, 1)]).into();
        let json = serde_json::to_value(&vector).unwrap();
        assert_eq!(json["rank"], "vector");
        assert_eq!(json["value"]["name"], "v");

        let back: Operand = serde_json::from_value(json).unwrap();
        assert_eq!(back, vector);
    }

    #[test]
    fn series_deserialize_rejects_duplicate_labels() {
        let series = int_series("s", &[(0, 1), (1, 2)]);
        let mut json = serde_json::to_value(&series).unwrap();
        json["index"]["labels"][1] = json["index"]["labels"][0].clone();

        let err = serde_json::from_value::<Series>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate row label '0'"), "{err}");
    }

    #[test]
    fn frame_deserialize_rejects_ragged_grid() {
        let frame = int_frame(vec![0, 1], &["A"], &[&[1], &[2]]);
        let mut json = serde_json::to_value(&frame).unwrap();
        json["data"][0]["values"]
            .as_array_mut()
            .unwrap()
            .truncate(1);

        let err = serde_json::from_value::<DataFrame>(json).unwrap_err();
        assert!(
            err.to_string()
                .contains("index length (2) does not match column length (1)"),
            "{err}"
        );

        let good = serde_json::to_value(&frame).unwrap();
        let back: DataFrame = serde_json::from_value(good).unwrap();
        assert_eq!(back, frame);
        assert_eq!(back.iloc_row(1).unwrap().values(), &[Scalar::Int64(2)]);
    }

    #[test]
    fn frame_ledger_cell_counts_saturate() {
        let a = int_frame(vec![0], &["A"], &[&[1]]);
        let mut ledger = EvidenceLedger::new();
        a.arith_with_policy(
            &a,
            ArithmeticOp::Add,
            None,
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .unwrap();
        let request = &ledger.records()[0].request;
        assert_eq!(request.unmatched_cells, 0);
        assert_eq!(request.aligned_cells(), 1);
    }

    #[test]
    fn operand_rank_mismatch_is_shape_error() {
        let vector: Operand = int_series("v", &[(0, 1)]).into();
        let table: Operand = int_frame(vec![0], &["A"], &[&[1]]).into();

        assert!(matches!(
            vector.arith(&table, ArithmeticOp::Add, None),
            Err(FrameError::ShapeMismatch(_))
        ));
        assert!(matches!(
            table.align(&vector, None),
            Err(FrameError::ShapeMismatch(_))
        ));

        let sum = table.arith(&table, ArithmeticOp::Add, None).unwrap();
        assert_eq!(sum.rank(), 2);
        let (l, r) = vector.align(&vector, Some(&Scalar::Int64(0))).unwrap();
        assert_eq!(l, r);
    }

    #[test]
    fn policy_cap_rejects_large_alignments_in_strict_mode() {
        let a = int_series("a", &[(0, 1), (1, 1)]);
        let b = int_series("b", &[(2, 1), (3, 1)]);
        let mut ledger = EvidenceLedger::new();

        let err = a
            .arith_with_policy(
                &b,
                ArithmeticOp::Add,
                None,
                &RuntimePolicy::strict_with_cap(3),
                &mut ledger,
            )
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::AdmissionRejected {
                operation: "series.add".to_owned(),
                cells: 4
            }
        );
        assert_eq!(ledger.records()[0].action, DecisionAction::Reject);
        assert_eq!(ledger.records()[0].request.unmatched_cells, 4);

        let out = a
            .arith_with_policy(
                &b,
                ArithmeticOp::Add,
                None,
                &RuntimePolicy::hardened(Some(3)),
                &mut ledger,
            )
            .unwrap();
        assert_eq!(out.len(), 4);
        assert!(ledger.records()[1].over_budget);
    }

    #[test]
    fn frame_ledger_records_unmatched_cells() {
        let a = int_frame(vec![0, 1], &["A", "B"], &[&[1, 2], &[3, 4]]);
        let b = int_frame(vec![1, 2], &["B", "C"], &[&[1, 2], &[3, 4]]);
        let mut ledger = EvidenceLedger::new();
        a.arith_with_policy(
            &b,
            ArithmeticOp::Sub,
            None,
            &RuntimePolicy::strict(),
            &mut ledger,
        )
        .unwrap();

        let request = &ledger.records()[0].request;
        assert_eq!(request.operation, "frame.sub");
        assert_eq!(request.aligned_shape, (3, 3));
        assert_eq!(request.unmatched_cells, 8);
    }

    #[test]
    fn broadcast_ledger_names_axis() {
        let frame = int_frame(vec![0], &["Q", "R"], &[&[1, 2]]);
        let row = frame.iloc_row(0).unwrap();
        let mut ledger = EvidenceLedger::new();
        frame
            .arith_series_with_policy(
                &row,
                ArithmeticOp::Sub,
                Axis::Columns,
                None,
                &RuntimePolicy::strict(),
                &mut ledger,
            )
            .unwrap();
        assert_eq!(ledger.records()[0].request.operation, "frame.sub_series.columns");
        assert_eq!(ledger.records()[0].request.unmatched_cells, 0);
    }
}
