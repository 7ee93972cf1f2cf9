//! Group-by aggregation and numeric column statistics over stored rows.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineError;
use crate::filter::sort_order;
use crate::types::{AggFunc, AggrData, Aggregation, ColumnDef, ColumnType, NumStats, Row};

/// Running totals for one numeric column within one group.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    rows: u64,
    non_null: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: Option<&Value>) {
        self.rows += 1;
        let Some(v) = value else { return };
        if v.is_null() {
            return;
        }
        self.non_null += 1;
        if let Some(n) = v.as_f64() {
            self.sum += n;
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.max = Some(self.max.map_or(n, |m| m.max(n)));
        }
    }

    fn avg(&self) -> Option<f64> {
        (self.non_null > 0).then(|| self.sum / self.non_null as f64)
    }
}

/// Resolved aggregate: column index (if any), function, integer output.
struct Plan {
    func: AggFunc,
    column: Option<usize>,
    integral: bool,
}

fn column_index(
    columns: &[ColumnDef],
    table: &str,
    name: &str,
) -> Result<(usize, ColumnType), EngineError> {
    columns
        .iter()
        .position(|c| c.name == name)
        .map(|i| (i, columns[i].col_type))
        .ok_or_else(|| EngineError::ColumnNotFound {
            table: table.to_string(),
            column: name.to_string(),
        })
}

fn number(n: f64, integral: bool) -> Value {
    if integral && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Aggregate `rows`, ordering groups by their group-by values.
///
/// With no group-by columns the whole table forms one group, so the result
/// has exactly one row even when the table is empty.
pub fn aggregate(
    table: &str,
    columns: &[ColumnDef],
    rows: &[Row],
    spec: &Aggregation,
) -> Result<AggrData, EngineError> {
    if spec.group_by.is_empty() && spec.aggregates.is_empty() {
        return Err(EngineError::InvalidSpec(
            "aggregation needs group-by columns or aggregates".to_string(),
        ));
    }

    let group_idx = spec
        .group_by
        .iter()
        .map(|name| column_index(columns, table, name).map(|(i, _)| i))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plans = Vec::with_capacity(spec.aggregates.len());
    for agg in &spec.aggregates {
        let plan = match (&agg.column, agg.func) {
            (None, AggFunc::Count) => Plan {
                func: AggFunc::Count,
                column: None,
                integral: true,
            },
            (None, _) => {
                return Err(EngineError::InvalidSpec(format!(
                    "{} requires a column",
                    agg.label()
                )));
            }
            (Some(name), func) => {
                let (idx, col_type) = column_index(columns, table, name)?;
                if func != AggFunc::Count && !col_type.is_numeric() {
                    return Err(EngineError::ColumnNotNumeric {
                        table: table.to_string(),
                        column: name.clone(),
                    });
                }
                Plan {
                    func,
                    column: Some(idx),
                    integral: col_type == ColumnType::Integer,
                }
            }
        };
        plans.push(plan);
    }

    // Group keys are matched by their JSON text; order of first appearance
    // is discarded by the final sort.
    let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    if group_idx.is_empty() {
        groups.push((Vec::new(), vec![Accumulator::default(); plans.len()]));
        index.insert(String::new(), 0);
    }

    for row in rows {
        let key: Vec<Value> = group_idx.iter().map(|&i| row.cells[i].clone()).collect();
        let key_text = if group_idx.is_empty() {
            String::new()
        } else {
            Value::Array(key.clone()).to_string()
        };
        let slot = *index.entry(key_text).or_insert_with(|| {
            groups.push((key, vec![Accumulator::default(); plans.len()]));
            groups.len() - 1
        });
        for (acc, plan) in groups[slot].1.iter_mut().zip(&plans) {
            match plan.column {
                Some(i) => acc.push(row.cells.get(i)),
                None => acc.push(Some(&Value::Bool(true))),
            }
        }
    }

    groups.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b)
            .map(|(x, y)| sort_order(x, y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out_columns = spec.group_by.clone();
    out_columns.extend(spec.aggregates.iter().map(|a| a.label()));

    let out_rows = groups
        .into_iter()
        .map(|(mut key, accs)| {
            for (acc, plan) in accs.iter().zip(&plans) {
                let value = match plan.func {
                    AggFunc::Count => Value::from(acc.non_null),
                    AggFunc::Sum if acc.non_null == 0 => Value::Null,
                    AggFunc::Sum => number(acc.sum, plan.integral),
                    AggFunc::Min => acc.min.map_or(Value::Null, |n| number(n, plan.integral)),
                    AggFunc::Max => acc.max.map_or(Value::Null, |n| number(n, plan.integral)),
                    AggFunc::Avg => acc.avg().map_or(Value::Null, Value::from),
                };
                key.push(value);
            }
            key
        })
        .collect();

    Ok(AggrData {
        columns: out_columns,
        rows: out_rows,
    })
}

/// Min, max, average and non-null count of a numeric column.
pub fn num_stats(
    table: &str,
    columns: &[ColumnDef],
    rows: &[Row],
    column: &str,
) -> Result<NumStats, EngineError> {
    let (idx, col_type) = column_index(columns, table, column)?;
    if !col_type.is_numeric() {
        return Err(EngineError::ColumnNotNumeric {
            table: table.to_string(),
            column: column.to_string(),
        });
    }

    let mut acc = Accumulator::default();
    for row in rows {
        acc.push(row.cells.get(idx));
    }

    Ok(NumStats {
        min: acc.min,
        max: acc.max,
        avg: acc.avg(),
        count: acc.non_null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Aggregate;
    use serde_json::json;

    fn sales() -> (Vec<ColumnDef>, Vec<Row>) {
        let columns = vec![
            ColumnDef::new("region", ColumnType::Text),
            ColumnDef::new("units", ColumnType::Integer),
            ColumnDef::new("price", ColumnType::Real),
        ];
        let data = [
            ("west", json!(3), json!(2.5)),
            ("east", json!(1), json!(4.0)),
            ("west", json!(5), Value::Null),
            ("east", Value::Null, json!(1.0)),
            ("north", json!(2), json!(3.0)),
        ];
        let rows = data
            .into_iter()
            .enumerate()
            .map(|(i, (r, u, p))| Row {
                id: i as u64 + 1,
                cells: vec![json!(r), u, p],
            })
            .collect();
        (columns, rows)
    }

    #[test]
    fn test_group_by_sum_and_count() {
        let (columns, rows) = sales();
        let spec = Aggregation {
            group_by: vec!["region".to_string()],
            aggregates: vec![
                Aggregate::count_rows(),
                Aggregate::new(AggFunc::Sum, "units"),
                Aggregate::new(AggFunc::Avg, "price"),
            ],
        };
        let result = aggregate("sales", &columns, &rows, &spec).unwrap();
        assert_eq!(
            result.columns,
            vec!["region", "count(*)", "sum(units)", "avg(price)"]
        );
        assert_eq!(
            result.rows,
            vec![
                vec![json!("east"), json!(2), json!(1), json!(2.5)],
                vec![json!("north"), json!(1), json!(2), json!(3.0)],
                vec![json!("west"), json!(2), json!(8), json!(2.5)],
            ]
        );
    }

    #[test]
    fn test_whole_table_aggregate_on_empty_rows() {
        let (columns, _) = sales();
        let spec = Aggregation {
            group_by: vec![],
            aggregates: vec![
                Aggregate::count_rows(),
                Aggregate::new(AggFunc::Max, "units"),
            ],
        };
        let result = aggregate("sales", &columns, &[], &spec).unwrap();
        assert_eq!(result.rows, vec![vec![json!(0), Value::Null]]);
    }

    #[test]
    fn test_aggregate_rejects_bad_columns() {
        let (columns, rows) = sales();
        let missing = Aggregation {
            group_by: vec!["nope".to_string()],
            aggregates: vec![],
        };
        assert!(matches!(
            aggregate("sales", &columns, &rows, &missing),
            Err(EngineError::ColumnNotFound { .. })
        ));

        let text_sum = Aggregation {
            group_by: vec![],
            aggregates: vec![Aggregate::new(AggFunc::Sum, "region")],
        };
        assert!(matches!(
            aggregate("sales", &columns, &rows, &text_sum),
            Err(EngineError::ColumnNotNumeric { .. })
        ));

        assert!(matches!(
            aggregate("sales", &columns, &rows, &Aggregation::default()),
            Err(EngineError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_num_stats() {
        let (columns, rows) = sales();
        let stats = num_stats("sales", &columns, &rows, "units").unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(5.0));
        assert_eq!(stats.avg, Some(11.0 / 4.0));

        assert!(matches!(
            num_stats("sales", &columns, &rows, "region"),
            Err(EngineError::ColumnNotNumeric { .. })
        ));
    }
}
