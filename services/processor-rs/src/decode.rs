//! Payload decoding and the fixed field-to-row mapping.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const STEP: &str = "step";
pub const TYPE: &str = "type";
pub const AMOUNT: &str = "amount";
pub const NAME_ORIG: &str = "nameOrig";
pub const OLD_BALANCE_ORG: &str = "oldbalanceOrg";
pub const NEW_BALANCE_ORIG: &str = "newbalanceOrig";
pub const NAME_DEST: &str = "nameDest";
pub const OLD_BALANCE_DEST: &str = "oldbalanceDest";
pub const NEW_BALANCE_DEST: &str = "newbalanceDest";
pub const IS_FRAUD: &str = "isFraud";
pub const IS_FLAGGED_FRAUD: &str = "isFlaggedFraud";

/// Column names in the order they are read from a payload.
pub const FIELDS: [&str; 11] = [
    STEP,
    TYPE,
    AMOUNT,
    NAME_ORIG,
    OLD_BALANCE_ORG,
    NEW_BALANCE_ORIG,
    NAME_DEST,
    OLD_BALANCE_DEST,
    NEW_BALANCE_DEST,
    IS_FRAUD,
    IS_FLAGGED_FRAUD,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("field `{0}` is missing or has the wrong type")]
    FieldInvalid(&'static str),
}

/// One transaction event as published on the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub step: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    #[serde(rename = "nameOrig")]
    pub name_orig: String,
    #[serde(rename = "oldbalanceOrg")]
    pub old_balance_org: f64,
    #[serde(rename = "newbalanceOrig")]
    pub new_balance_orig: f64,
    #[serde(rename = "nameDest")]
    pub name_dest: String,
    #[serde(rename = "oldbalanceDest")]
    pub old_balance_dest: f64,
    #[serde(rename = "newbalanceDest")]
    pub new_balance_dest: f64,
    #[serde(rename = "isFraud")]
    pub is_fraud: i64,
    #[serde(rename = "isFlaggedFraud")]
    pub is_flagged_fraud: i64,
}

impl TransactionRecord {
    /// Project the record into a warehouse row keyed by column name.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::with_capacity(FIELDS.len());
        row.insert(STEP.to_string(), Value::from(self.step));
        row.insert(TYPE.to_string(), Value::from(self.kind.clone()));
        row.insert(AMOUNT.to_string(), Value::from(self.amount));
        row.insert(NAME_ORIG.to_string(), Value::from(self.name_orig.clone()));
        row.insert(OLD_BALANCE_ORG.to_string(), Value::from(self.old_balance_org));
        row.insert(NEW_BALANCE_ORIG.to_string(), Value::from(self.new_balance_orig));
        row.insert(NAME_DEST.to_string(), Value::from(self.name_dest.clone()));
        row.insert(OLD_BALANCE_DEST.to_string(), Value::from(self.old_balance_dest));
        row.insert(NEW_BALANCE_DEST.to_string(), Value::from(self.new_balance_dest));
        row.insert(IS_FRAUD.to_string(), Value::from(self.is_fraud));
        row.insert(IS_FLAGGED_FRAUD.to_string(), Value::from(self.is_flagged_fraud));
        row
    }
}

/// Parse a raw payload and pull out the eleven transaction fields.
///
/// Fields are read in [`FIELDS`] order, so the error names the first field
/// that is absent or cannot be coerced.
pub fn decode(raw_payload: &str) -> Result<TransactionRecord, DecodeError> {
    let document: Value =
        serde_json::from_str(raw_payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(doc) = document else {
        return Err(DecodeError::Malformed("payload is not a JSON object".to_string()));
    };

    Ok(TransactionRecord {
        step: int_field(&doc, STEP)?,
        kind: string_field(&doc, TYPE)?,
        amount: float_field(&doc, AMOUNT)?,
        name_orig: string_field(&doc, NAME_ORIG)?,
        old_balance_org: float_field(&doc, OLD_BALANCE_ORG)?,
        new_balance_orig: float_field(&doc, NEW_BALANCE_ORIG)?,
        name_dest: string_field(&doc, NAME_DEST)?,
        old_balance_dest: float_field(&doc, OLD_BALANCE_DEST)?,
        new_balance_dest: float_field(&doc, NEW_BALANCE_DEST)?,
        is_fraud: int_field(&doc, IS_FRAUD)?,
        is_flagged_fraud: int_field(&doc, IS_FLAGGED_FRAUD)?,
    })
}

fn int_field(doc: &Map<String, Value>, name: &'static str) -> Result<i64, DecodeError> {
    let value = match doc.get(name) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_to_i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    value.ok_or(DecodeError::FieldInvalid(name))
}

fn float_field(doc: &Map<String, Value>, name: &'static str) -> Result<f64, DecodeError> {
    let value = match doc.get(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or(DecodeError::FieldInvalid(name))
}

fn string_field(doc: &Map<String, Value>, name: &'static str) -> Result<String, DecodeError> {
    doc.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(DecodeError::FieldInvalid(name))
}

// i64::MAX is not representable as f64; the bound below is 2^63.
fn truncate_to_i64(v: f64) -> Option<i64> {
    let t = v.trunc();
    if t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Some(t as i64)
    } else {
        None
    }
}
