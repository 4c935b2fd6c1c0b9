#![forbid(unsafe_code)]

use lf_types::{DType, Scalar, TypeError, cast_scalar, cast_scalar_owned, common_dtype, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed validity bits, one per row; a set bit means the value is present.
#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let len = values.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let len = raw.bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, &valid) in raw.bits.iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Ok(Self { words, len })
    }
}

/// Binary arithmetic operators, one per row of the operator table
/// (`+ - * / // % **`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl ArithmeticOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }

    #[must_use]
    pub fn apply_f64(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::FloorDiv => floor_div_f64(lhs, rhs),
            Self::Mod => {
                if rhs == 0.0 {
                    return f64::NAN;
                }
                let rem = lhs % rhs;
                if rem != 0.0 && (rem < 0.0) != (rhs < 0.0) {
                    rem + rhs
                } else {
                    rem
                }
            }
            Self::Pow => lhs.powf(rhs),
        }
    }

    /// Exact integer result, or `None` when the result needs a float
    /// (division, zero divisor, negative exponent, overflow of `//` `%` `**`).
    #[must_use]
    pub fn apply_i64(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => Some(lhs.wrapping_add(rhs)),
            Self::Sub => Some(lhs.wrapping_sub(rhs)),
            Self::Mul => Some(lhs.wrapping_mul(rhs)),
            Self::Div => None,
            Self::FloorDiv => {
                let quot = lhs.checked_div(rhs)?;
                let rem = lhs.checked_rem(rhs)?;
                Some(if rem != 0 && (rem < 0) != (rhs < 0) {
                    quot - 1
                } else {
                    quot
                })
            }
            Self::Mod => {
                let rem = lhs.checked_rem(rhs)?;
                Some(if rem != 0 && (rem < 0) != (rhs < 0) {
                    rem + rhs
                } else {
                    rem
                })
            }
            Self::Pow => {
                let exp = u32::try_from(rhs).ok()?;
                lhs.checked_pow(exp)
            }
        }
    }
}

/// Floor division computed from the remainder, so `1.0 // 0.1` is `9.0`
/// and `-1.0 // inf` is `-1.0`. A zero divisor gives `±inf` or NaN.
fn floor_div_f64(lhs: f64, rhs: f64) -> f64 {
    if rhs == 0.0 {
        return lhs / rhs;
    }
    let rem = lhs % rhs;
    let mut div = (lhs - rem) / rhs;
    if rem != 0.0 && (rem < 0.0) != (rhs < 0.0) {
        div -= 1.0;
    }
    if div == 0.0 {
        return 0.0_f64.copysign(lhs / rhs);
    }
    let floor = div.floor();
    if div - floor > 0.5 { floor + 1.0 } else { floor }
}

/// Elementwise functions that keep labels intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
}

impl UnaryOp {
    fn preserves_integers(self) -> bool {
        matches!(self, Self::Neg | Self::Abs)
    }

    fn apply_f64(self, value: f64) -> f64 {
        match self {
            Self::Neg => -value,
            Self::Abs => value.abs(),
            Self::Exp => value.exp(),
            Self::Ln => value.ln(),
            Self::Sqrt => value.sqrt(),
            Self::Sin => value.sin(),
            Self::Cos => value.cos(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("fill value {value} is not numeric")]
    InvalidFillValue { value: String },
    #[error("arithmetic requires numeric data but found dtype {dtype:?}")]
    NonNumeric { dtype: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A fill value that has passed validation. `None` means "keep missing".
fn checked_fill(fill: Option<&Scalar>) -> Result<Option<&Scalar>, ColumnError> {
    match fill {
        None => Ok(None),
        Some(value) if value.is_missing() => Ok(None),
        Some(value) if !value.dtype().is_numeric() => Err(ColumnError::InvalidFillValue {
            value: value.to_string(),
        }),
        Some(value) => Ok(Some(value)),
    }
}

fn as_i64(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Int64(v) => Some(*v),
        Scalar::Bool(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn arithmetic_dtype(dtype: DType) -> DType {
    match dtype {
        DType::Bool => DType::Int64,
        DType::Null => DType::Float64,
        other => other,
    }
}

fn ensure_numeric(dtype: DType) -> Result<(), ColumnError> {
    if dtype.is_numeric() {
        Ok(())
    } else {
        Err(ColumnError::NonNumeric { dtype })
    }
}

/// Wire shape of a [`Column`]. The validity mask is not read back; it is
/// rebuilt from the values.
#[derive(Deserialize)]
struct RawColumn {
    dtype: DType,
    values: Vec<Scalar>,
}

impl TryFrom<RawColumn> for Column {
    type Error = ColumnError;

    fn try_from(raw: RawColumn) -> Result<Self, Self::Error> {
        Self::new(raw.dtype, raw.values)
    }
}

/// Nullable, dtype-homogeneous values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawColumn")]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Construct a column, coercing values to `dtype`. Missing values are
    /// normalized to the dtype's missing marker.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let values = values
            .into_iter()
            .map(|value| cast_scalar_owned(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let validity = ValidityMask::from_values(&values);

        Ok(Self {
            dtype,
            values,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    pub fn from_f64(values: Vec<f64>) -> Self {
        let values: Vec<Scalar> = values.into_iter().map(Scalar::Float64).collect();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: DType::Float64,
            values,
            validity,
        }
    }

    /// Build from already-computed arithmetic results. An `Int64` result that
    /// holds a missing value or a float is promoted to `Float64`.
    fn from_results(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = if dtype == DType::Int64
            && values.iter().any(|v| !matches!(v, Scalar::Int64(_)))
        {
            DType::Float64
        } else {
            dtype
        };
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.len() - self.validity.count_valid()
    }

    /// Gather values at `positions`; `None` slots become missing.
    ///
    /// Integer and bool columns that gain a missing slot are promoted to
    /// `Float64` so the slot can hold NaN.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        self.reindex_with_fill(positions, None)
    }

    /// Like [`Column::reindex_by_positions`], but `None` slots take `fill`
    /// when it is a number.
    pub fn reindex_with_fill(
        &self,
        positions: &[Option<usize>],
        fill: Option<&Scalar>,
    ) -> Result<Self, ColumnError> {
        let fill = checked_fill(fill)?;
        let mut introduces_missing = false;
        let mut used_fill = false;
        let values = positions
            .iter()
            .map(|slot| match (slot.and_then(|idx| self.values.get(idx)), fill) {
                (Some(value), _) => value.clone(),
                (None, Some(fill)) => {
                    used_fill = true;
                    fill.clone()
                }
                (None, None) => {
                    introduces_missing = true;
                    Scalar::missing_for_dtype(self.dtype)
                }
            })
            .collect::<Vec<_>>();

        let mut dtype = self.dtype;
        if let (true, Some(fill)) = (used_fill, fill) {
            dtype = common_dtype(dtype, fill.dtype())?;
        }
        if introduces_missing && matches!(dtype, DType::Int64 | DType::Bool) {
            dtype = DType::Float64;
        }
        Self::new(dtype, values)
    }

    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        self.binary_numeric_with_fill(right, op, None)
    }

    /// Elementwise `op` over two equal-length columns.
    ///
    /// When `fill` is a number it replaces the missing side of every
    /// position where exactly one operand is missing. Positions missing on
    /// both sides stay missing.
    pub fn binary_numeric_with_fill(
        &self,
        right: &Self,
        op: ArithmeticOp,
        fill: Option<&Scalar>,
    ) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }
        let fill = checked_fill(fill)?;
        ensure_numeric(self.dtype)?;
        ensure_numeric(right.dtype)?;

        let mut out_dtype = arithmetic_dtype(common_dtype(self.dtype, right.dtype)?);
        if let Some(fill) = fill {
            out_dtype = arithmetic_dtype(common_dtype(out_dtype, fill.dtype())?);
        }
        if matches!(op, ArithmeticOp::Div) {
            out_dtype = DType::Float64;
        }
        let integer_path = out_dtype == DType::Int64;

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(lhs, rhs)| {
                let (lhs, rhs) = match (fill, lhs.is_missing(), rhs.is_missing()) {
                    (Some(fill), true, false) => (fill, rhs),
                    (Some(fill), false, true) => (lhs, fill),
                    _ => (lhs, rhs),
                };
                if lhs.is_missing() || rhs.is_missing() {
                    return Ok(Scalar::missing());
                }
                if integer_path {
                    if let (Some(a), Some(b)) = (as_i64(lhs), as_i64(rhs)) {
                        if let Some(out) = op.apply_i64(a, b) {
                            return Ok(Scalar::Int64(out));
                        }
                    }
                }
                Ok::<_, ColumnError>(Scalar::Float64(op.apply_f64(lhs.to_f64()?, rhs.to_f64()?)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_results(out_dtype, values)
    }

    /// Apply `op` between every value and a single scalar.
    ///
    /// `scalar_on_left` computes `scalar op value` instead of `value op scalar`.
    pub fn binary_scalar(
        &self,
        scalar: &Scalar,
        op: ArithmeticOp,
        scalar_on_left: bool,
    ) -> Result<Self, ColumnError> {
        ensure_numeric(scalar.dtype())?;
        let broadcast = Self::from_values(vec![scalar.clone(); self.len()])?;
        if scalar_on_left {
            broadcast.binary_numeric(self, op)
        } else {
            self.binary_numeric(&broadcast, op)
        }
    }

    pub fn apply_unary(&self, op: UnaryOp) -> Result<Self, ColumnError> {
        ensure_numeric(self.dtype)?;
        let keep_ints = op.preserves_integers()
            && matches!(self.dtype, DType::Int64 | DType::Bool);

        let values = self
            .values
            .iter()
            .map(|value| {
                if value.is_missing() {
                    return Ok(Scalar::missing());
                }
                if keep_ints {
                    if let Some(v) = as_i64(value) {
                        let out = match op {
                            UnaryOp::Abs => v.wrapping_abs(),
                            _ => v.wrapping_neg(),
                        };
                        return Ok(Scalar::Int64(out));
                    }
                }
                Ok::<_, ColumnError>(Scalar::Float64(op.apply_f64(value.to_f64()?)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dtype = if keep_ints {
            DType::Int64
        } else {
            DType::Float64
        };
        Self::from_results(dtype, values)
    }

    /// Replace every missing value with `fill_value`.
    pub fn fillna(&self, fill_value: &Scalar) -> Result<Self, ColumnError> {
        let Some(fill) = checked_fill(Some(fill_value))? else {
            return Ok(self.clone());
        };
        let dtype = arithmetic_dtype(common_dtype(self.dtype, fill.dtype())?);
        let cast_fill = cast_scalar(fill, dtype)?;
        let values = self
            .values
            .iter()
            .map(|v| {
                if v.is_missing() {
                    cast_fill.clone()
                } else {
                    v.clone()
                }
            })
            .collect();

        Self::new(dtype, values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}
