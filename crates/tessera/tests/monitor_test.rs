//! Integration tests for filters, triggers, and metadata persistence,
//! driven through the expression-compiler contract.

use std::sync::Arc;
use tempfile::TempDir;
use tessera::meta::{read_descriptors, Descriptor, META_FILE_NAME};
use tessera::{
    AggregateKind, ColumnType, CompiledFilter, Error, ExprError, ExpressionCompiler, ManualClock,
    Numeric, Record, RecordBuilder, RelOp, Schema, SchemaBuilder, Table, TableConfig, Value,
};

/// Compiles `field op literal` comparisons, e.g. `"val > 3.0"`.
struct SimpleCompiler;

#[derive(Clone, Copy)]
enum Op {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

struct Comparison {
    ordinal: usize,
    op: Op,
    literal: f64,
    projection: Vec<usize>,
}

impl CompiledFilter for Comparison {
    fn matches(&self, record: &Record<'_>) -> bool {
        let Some(value) = record.field(self.ordinal).as_f64() else {
            return false;
        };
        match self.op {
            Op::Gt => value > self.literal,
            Op::Ge => value >= self.literal,
            Op::Lt => value < self.literal,
            Op::Le => value <= self.literal,
            Op::Eq => value == self.literal,
            Op::Ne => value != self.literal,
        }
    }

    fn projection(&self) -> &[usize] {
        &self.projection
    }
}

impl ExpressionCompiler for SimpleCompiler {
    fn compile(
        &self,
        expression: &str,
        schema: &Schema,
    ) -> Result<Box<dyn CompiledFilter>, ExprError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let [field, op, literal] = parts.as_slice() else {
            return Err(ExprError::Parse {
                expression: expression.to_string(),
                message: "expected `field op literal`".to_string(),
            });
        };
        let ordinal = schema
            .ordinal(field)
            .ok_or_else(|| ExprError::UnknownField {
                field: (*field).to_string(),
            })?;
        if matches!(schema.columns()[ordinal].ty(), ColumnType::String(_)) {
            return Err(ExprError::TypeMismatch {
                expression: expression.to_string(),
                message: format!("field {field} is not numeric"),
            });
        }
        let op = match *op {
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            "<=" => Op::Le,
            "==" => Op::Eq,
            "!=" => Op::Ne,
            other => {
                return Err(ExprError::Parse {
                    expression: expression.to_string(),
                    message: format!("unknown operator {other}"),
                })
            }
        };
        let literal: f64 = literal.parse().map_err(|_| ExprError::Parse {
            expression: expression.to_string(),
            message: format!("bad literal {literal}"),
        })?;
        Ok(Box::new(Comparison {
            ordinal,
            op,
            literal,
            projection: vec![ordinal],
        }))
    }
}

fn schema() -> Schema {
    SchemaBuilder::new()
        .column("id", ColumnType::Int)
        .column("val", ColumnType::Double)
        .build()
        .unwrap()
}

fn record(schema: &Schema, id: i32, val: f64) -> Vec<u8> {
    let mut builder = RecordBuilder::new(schema);
    builder.set(0, Value::Int(id)).unwrap();
    builder.set(1, Value::Double(val)).unwrap();
    builder.finish()
}

fn monitored_table() -> Table {
    let config = TableConfig {
        compiler: Some(Arc::new(SimpleCompiler)),
        ..TableConfig::default()
    };
    Table::in_memory_with_config(schema(), config)
}

#[test]
fn test_filter_buckets_matching_records_by_window() {
    let table = monitored_table();
    let filter_id = table.add_filter("val > 3.0", 1_000).unwrap();

    for (ts, val) in [(0u64, 2.0), (500, 3.5), (1_500, 4.0)] {
        let bytes = record(table.schema(), 0, val);
        table.append_at(&bytes, ts).unwrap();
    }

    let filter = table.filter(filter_id).unwrap();
    assert_eq!(filter.aggregate(0).unwrap().count, 1);
    assert_eq!(filter.aggregate(1).unwrap().count, 1);
    assert!(filter.aggregate(2).is_none());
}

#[test]
fn test_filter_aggregates_track_projection() {
    let table = monitored_table();
    let filter_id = table.add_filter("val >= 0.0", 100).unwrap();

    for val in [1.0, 2.0, 6.0] {
        table
            .append_at(&record(table.schema(), 0, val), 10)
            .unwrap();
    }

    let agg = table.filter(filter_id).unwrap().aggregate(0).unwrap();
    assert_eq!(agg.count, 3);
    assert_eq!(agg.sum, 9.0);
    assert_eq!(agg.min, 1.0);
    assert_eq!(agg.max, 6.0);
    assert_eq!(agg.mean(), 3.0);
}

#[test]
fn test_filter_and_trigger_ids_are_dense() {
    let table = monitored_table();
    assert_eq!(table.add_filter("val > 0.0", 1_000).unwrap(), 0);
    assert_eq!(table.add_filter("val < 0.0", 1_000).unwrap(), 1);
    assert_eq!(table.num_filters(), 2);

    let t0 = table
        .add_trigger(0, "val", AggregateKind::Count, RelOp::Ge, Numeric::Long(10))
        .unwrap();
    let t1 = table
        .add_trigger(1, "val", AggregateKind::Sum, RelOp::Lt, Numeric::Double(0.0))
        .unwrap();
    assert_eq!((t0, t1), (0, 1));
    assert_eq!(table.num_triggers(), 2);
}

#[test]
fn test_add_filter_without_compiler_fails() {
    let table = Table::in_memory(schema());
    let err = table.add_filter("val > 3.0", 1_000).unwrap_err();
    match err {
        Error::Management(msg) => assert!(msg.contains("val > 3.0")),
        other => panic!("expected management error, got {other:?}"),
    }
}

#[test]
fn test_malformed_expression_keeps_source_text() {
    let table = monitored_table();
    let err = table.add_filter("val >", 1_000).unwrap_err();
    match err {
        Error::Management(msg) => assert!(msg.contains("val >")),
        other => panic!("expected management error, got {other:?}"),
    }

    let err = table.add_filter("missing > 1.0", 1_000).unwrap_err();
    match err {
        Error::Management(msg) => assert!(msg.contains("missing")),
        other => panic!("expected management error, got {other:?}"),
    }
}

#[test]
fn test_trigger_against_unknown_filter_fails() {
    let table = monitored_table();
    let err = table
        .add_trigger(0, "val", AggregateKind::Count, RelOp::Gt, Numeric::Long(1))
        .unwrap_err();
    assert!(matches!(err, Error::Management(_)));
}

#[test]
fn test_trigger_fires_against_filter_aggregate() {
    let table = monitored_table();
    let filter_id = table.add_filter("val > 3.0", 1_000).unwrap();
    let trigger_id = table
        .add_trigger(
            filter_id,
            "val",
            AggregateKind::Count,
            RelOp::Ge,
            Numeric::Long(2),
        )
        .unwrap();

    for val in [3.5, 4.0, 1.0] {
        table.append_at(&record(table.schema(), 0, val), 10).unwrap();
    }

    // The external sweeper contract: walk the filter's windows and
    // evaluate the trigger on each aggregate.
    let filter = table.filter(filter_id).unwrap();
    let trigger = table.trigger(trigger_id).unwrap();
    let fired: Vec<u64> = filter
        .windows()
        .into_iter()
        .filter(|(_, agg)| trigger.fires(agg))
        .map(|(window, _)| window)
        .collect();
    assert_eq!(fired, vec![0]);
}

#[test]
fn test_default_append_timestamps_come_from_injected_clock() {
    let clock = Arc::new(ManualClock::new(5_500));
    let clock_capability: Arc<dyn tessera::Clock> = clock.clone() as Arc<dyn tessera::Clock>;
    let config = TableConfig {
        clock: clock_capability,
        compiler: Some(Arc::new(SimpleCompiler)),
        ..TableConfig::default()
    };
    let table = Table::in_memory_with_config(schema(), config);
    let filter_id = table.add_filter("val > 0.0", 1_000).unwrap();

    table.append(&record(table.schema(), 0, 1.0)).unwrap();
    clock.advance(1_000);
    table.append(&record(table.schema(), 0, 1.0)).unwrap();

    let filter = table.filter(filter_id).unwrap();
    assert_eq!(filter.aggregate(5).unwrap().count, 1);
    assert_eq!(filter.aggregate(6).unwrap().count, 1);
}

#[test]
fn test_registrations_persist_descriptors() {
    let dir = TempDir::new().unwrap();
    let config = TableConfig {
        compiler: Some(Arc::new(SimpleCompiler)),
        ..TableConfig::default()
    };
    let table = Table::mapped_with_config(schema(), dir.path(), config).unwrap();

    table.add_index("val", 0.5).unwrap();
    table.add_filter("val > 3.0", 1_000).unwrap();
    table
        .add_trigger(
            0,
            "val",
            AggregateKind::Max,
            RelOp::Gt,
            Numeric::Double(100.0),
        )
        .unwrap();
    drop(table);

    let descriptors = read_descriptors(dir.path().join(META_FILE_NAME)).unwrap();
    assert_eq!(
        descriptors,
        vec![
            Descriptor::Index {
                id: 0,
                field: "val".to_string(),
                bucket_size: 0.5,
            },
            Descriptor::Filter {
                id: 0,
                expression: "val > 3.0".to_string(),
            },
            Descriptor::Trigger {
                id: 0,
                filter_id: 0,
                agg: AggregateKind::Max,
                field: "val".to_string(),
                op: RelOp::Gt,
                threshold: Numeric::Double(100.0),
            },
        ]
    );
}

#[test]
fn test_filters_see_only_records_appended_after_registration() {
    let table = monitored_table();
    table.append_at(&record(table.schema(), 0, 9.0), 0).unwrap();

    let filter_id = table.add_filter("val > 0.0", 1_000).unwrap();
    table.append_at(&record(table.schema(), 0, 9.0), 0).unwrap();

    let filter = table.filter(filter_id).unwrap();
    assert_eq!(filter.aggregate(0).unwrap().count, 1);
}
