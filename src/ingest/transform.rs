use super::model::ValidationError;
use crate::model::ProductionRecord;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// 规范字段名 + 上游可能使用的别名
struct Field {
    name: &'static str,
    aliases: &'static [&'static str],
}

const FIELD_CODE: Field = Field { name: "field_code", aliases: &["field_code", "fieldCode"] };
const FIELD_NAME: Field = Field { name: "field_name", aliases: &["field_name", "_field_name", "fieldName"] };
const WELL_CODE: Field = Field { name: "well_code", aliases: &["well_code", "wellCode"] };
const WELL_REFERENCE: Field = Field {
    name: "well_reference",
    aliases: &["well_reference", "_well_reference", "wellReference"],
};
const WELL_NAME: Field = Field { name: "well_name", aliases: &["well_name", "wellName"] };
const PERIOD: Field = Field {
    name: "production_period",
    aliases: &["production_period", "productionPeriod"],
};
const DAYS: Field = Field {
    name: "days_on_production",
    aliases: &["days_on_production", "daysOnProduction"],
};
const OIL: Field = Field { name: "oil_production_kbd", aliases: &["oil_production_kbd", "oil_kbd"] };
const GAS: Field = Field { name: "gas_production_mmcfd", aliases: &["gas_production_mmcfd", "gas_mmcfd"] };
const LIQUIDS: Field = Field {
    name: "liquids_production_kbd",
    aliases: &["liquids_production_kbd", "liquids_kbd"],
};
const WATER: Field = Field { name: "water_production_kbd", aliases: &["water_production_kbd", "water_kbd"] };
const DATA_SOURCE: Field = Field { name: "data_source", aliases: &["data_source", "dataSource"] };
const PARTITION: Field = Field { name: "partition_0", aliases: &["partition_0", "partition"] };

fn period_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // YYYY-MM，可带 -DD 以及时间部分
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{2})(?:-(\d{2})(?:[T ].*)?)?$").expect("period pattern is valid")
    })
}

/// 校验周期格式并原样返回（去首尾空白）；不合法返回 None
///
/// 周期是自然键的一部分，`2024-01` 与 `2024-01-15` 是两个不同的周期。
pub fn parse_period(raw: &str) -> Option<String> {
    let token = raw.trim();
    let caps = period_regex().captures(token)?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    if let Some(day) = caps.get(3) {
        let day: u32 = day.as_str().parse().ok()?;
        if !(1..=31).contains(&day) {
            return None;
        }
    }
    Some(token.to_string())
}

/// 取第一个存在且非 null 的别名
fn lookup<'a>(row: &'a Map<String, Value>, field: &Field) -> Option<&'a Value> {
    field.aliases.iter().find_map(|k| match row.get(*k) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    })
}

fn required<'a>(row: &'a Map<String, Value>, field: &Field) -> Result<&'a Value, ValidationError> {
    lookup(row, field).ok_or_else(|| ValidationError::new(field.name, "required field is missing"))
}

fn to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn as_integer(field: &str, v: &Value) -> Result<i64, ValidationError> {
    let parsed = match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    };
    parsed.ok_or_else(|| ValidationError::new(field, format!("not an integer: {}", v)))
}

fn as_float(field: &str, v: &Value) -> Result<f64, ValidationError> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(ValidationError::new(field, format!("not a number: {}", v))),
    }
}

fn non_negative_int(field: &str, v: &Value) -> Result<i64, ValidationError> {
    let n = as_integer(field, v)?;
    if n < 0 {
        return Err(ValidationError::new(field, format!("must be >= 0, got {}", n)));
    }
    Ok(n)
}

/// 产量字段：缺失/null 视为 0，负数或非数字报错
fn rate(row: &Map<String, Value>, field: &Field) -> Result<f64, ValidationError> {
    match lookup(row, field) {
        None => Ok(0.0),
        Some(v) => {
            let f = as_float(field.name, v)?;
            if f < 0.0 {
                return Err(ValidationError::new(field.name, format!("must be >= 0, got {}", f)));
            }
            Ok(f)
        }
    }
}

fn text(row: &Map<String, Value>, field: &Field) -> String {
    lookup(row, field).map(to_text).unwrap_or_default()
}

fn required_text(row: &Map<String, Value>, field: &Field) -> Result<String, ValidationError> {
    required(row, field).map(to_text)
}

/// 上游原始行 -> ProductionRecord
pub fn transform_row(row: &Value, default_source: &str) -> Result<ProductionRecord, ValidationError> {
    let obj = row
        .as_object()
        .ok_or_else(|| ValidationError::new("row", "expected a JSON object"))?;

    let field_code = as_integer(FIELD_CODE.name, required(obj, &FIELD_CODE)?)?;
    let field_name = required_text(obj, &FIELD_NAME)?;
    let well_code = as_integer(WELL_CODE.name, required(obj, &WELL_CODE)?)?;
    let well_reference = required_text(obj, &WELL_REFERENCE)?;
    let well_name = required_text(obj, &WELL_NAME)?;

    let raw_period = required(obj, &PERIOD)?;
    let production_period = raw_period
        .as_str()
        .and_then(parse_period)
        .ok_or_else(|| {
            ValidationError::new(PERIOD.name, format!("not a valid period: {}", raw_period))
        })?;

    let days_on_production = non_negative_int(DAYS.name, required(obj, &DAYS)?)?;

    let oil_kbd = rate(obj, &OIL)?;
    let gas_mmcfd = rate(obj, &GAS)?;
    let liquids_kbd = rate(obj, &LIQUIDS)?;
    let water_kbd = rate(obj, &WATER)?;

    let data_source = Some(text(obj, &DATA_SOURCE))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_source.to_string());
    let partition = Some(text(obj, &PARTITION))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| production_period.chars().take(4).collect());

    Ok(ProductionRecord {
        field_code,
        field_name,
        well_code,
        well_reference,
        well_name,
        production_period,
        days_on_production,
        oil_kbd,
        gas_mmcfd,
        liquids_kbd,
        water_kbd,
        data_source,
        source_data: row.to_string(),
        partition,
        created_at: None,
        updated_at: None,
    })
}
