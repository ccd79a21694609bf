//! Triggers: threshold alarms over a filter's window aggregates.

use crate::monitor::filter::Aggregate;

/// Aggregate selected by a trigger over its filter's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AggregateKind {
    /// Number of matching records.
    Count = 0,
    /// Sum of the projected values.
    Sum = 1,
    /// Minimum projected value.
    Min = 2,
    /// Maximum projected value.
    Max = 3,
    /// Mean of the projected values.
    Mean = 4,
}

impl AggregateKind {
    /// Creates an AggregateKind from its wire tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Count),
            1 => Some(Self::Sum),
            2 => Some(Self::Min),
            3 => Some(Self::Max),
            4 => Some(Self::Mean),
            _ => None,
        }
    }
}

/// Relational operator of a trigger's threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelOp {
    /// Strictly less than.
    Lt = 0,
    /// Less than or equal.
    Le = 1,
    /// Strictly greater than.
    Gt = 2,
    /// Greater than or equal.
    Ge = 3,
    /// Equal.
    Eq = 4,
    /// Not equal.
    Ne = 5,
}

impl RelOp {
    /// Creates a RelOp from its wire tag.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lt),
            1 => Some(Self::Le),
            2 => Some(Self::Gt),
            3 => Some(Self::Ge),
            4 => Some(Self::Eq),
            5 => Some(Self::Ne),
            _ => None,
        }
    }

    /// Applies the operator to `lhs op rhs`.
    pub fn eval(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            RelOp::Lt => lhs < rhs,
            RelOp::Le => lhs <= rhs,
            RelOp::Gt => lhs > rhs,
            RelOp::Ge => lhs >= rhs,
            RelOp::Eq => lhs == rhs,
            RelOp::Ne => lhs != rhs,
        }
    }
}

/// A numeric threshold, written to metadata as a 16-byte tagged union.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    /// Integer threshold.
    Long(i64),
    /// Floating threshold.
    Double(f64),
}

const NUMERIC_TAG_LONG: u8 = 1;
const NUMERIC_TAG_DOUBLE: u8 = 2;

impl Numeric {
    /// The threshold as a float, the domain aggregates live in.
    pub fn as_f64(&self) -> f64 {
        match self {
            Numeric::Long(v) => *v as f64,
            Numeric::Double(v) => *v,
        }
    }

    /// Wire form: tag byte, 7 reserved bytes, 8-byte little-endian value.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        match self {
            Numeric::Long(v) => {
                out[0] = NUMERIC_TAG_LONG;
                out[8..].copy_from_slice(&v.to_le_bytes());
            }
            Numeric::Double(v) => {
                out[0] = NUMERIC_TAG_DOUBLE;
                out[8..].copy_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Parses the wire form.
    pub fn from_bytes(bytes: &[u8; 16]) -> Option<Self> {
        let value: [u8; 8] = bytes[8..].try_into().ok()?;
        match bytes[0] {
            NUMERIC_TAG_LONG => Some(Numeric::Long(i64::from_le_bytes(value))),
            NUMERIC_TAG_DOUBLE => Some(Numeric::Double(f64::from_le_bytes(value))),
            _ => None,
        }
    }
}

/// A registered trigger: a filter id, a target aggregate, a relational
/// operator, and a threshold.
///
/// Triggers hold no state; an external periodic sweeper walks a filter's
/// windows and calls [`Trigger::fires`] on each aggregate snapshot.
#[derive(Debug)]
pub struct Trigger {
    filter_id: usize,
    field: String,
    agg: AggregateKind,
    op: RelOp,
    threshold: Numeric,
}

impl Trigger {
    /// Creates a trigger descriptor.
    pub fn new(
        filter_id: usize,
        field: impl Into<String>,
        agg: AggregateKind,
        op: RelOp,
        threshold: Numeric,
    ) -> Self {
        Self {
            filter_id,
            field: field.into(),
            agg,
            op,
            threshold,
        }
    }

    /// Id of the filter whose aggregates this trigger watches.
    pub fn filter_id(&self) -> usize {
        self.filter_id
    }

    /// Name of the aggregated field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The watched aggregate.
    pub fn aggregate_kind(&self) -> AggregateKind {
        self.agg
    }

    /// The comparison operator.
    pub fn op(&self) -> RelOp {
        self.op
    }

    /// The threshold value.
    pub fn threshold(&self) -> Numeric {
        self.threshold
    }

    /// Whether `aggregate` crosses the trigger's threshold.
    pub fn fires(&self, aggregate: &Aggregate) -> bool {
        let observed = match self.agg {
            AggregateKind::Count => aggregate.count as f64,
            AggregateKind::Sum => aggregate.sum,
            AggregateKind::Min => aggregate.min,
            AggregateKind::Max => aggregate.max,
            AggregateKind::Mean => aggregate.mean(),
        };
        self.op.eval(observed, self.threshold.as_f64())
    }
}
