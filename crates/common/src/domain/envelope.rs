use crate::domain::result::{DomainError, DomainResult};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;

/// Discriminant routed to the receipt storage routine
pub const RECEIPT_EXTRACTION_ACTION: &str = "receipt_extraction";

/// Classification the front-end attaches to every receipt it submits
pub const SPENDING_OPERATION: &str = "spending";

/// Identity of the user who submitted a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submitter {
    pub id: i64,
    pub username: Option<String>,
}

/// Handler selected by the envelope's `action` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ReceiptExtraction,
    /// Any value other than a known discriminant, rendered as text
    Unrecognized(String),
    Missing,
}

impl Action {
    pub fn from_field(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Action::Missing,
            Some(Value::String(name)) if name == RECEIPT_EXTRACTION_ACTION => {
                Action::ReceiptExtraction
            }
            Some(Value::String(name)) => Action::Unrecognized(name.clone()),
            Some(other) => Action::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ReceiptExtraction => f.write_str(RECEIPT_EXTRACTION_ACTION),
            Action::Unrecognized(name) => f.write_str(name),
            Action::Missing => f.write_str("<missing>"),
        }
    }
}

/// Envelope as assembled by the producer side.
///
/// Serializes to the wire format consumers decode with [`DecodedEnvelope`].
/// Absent optional fields are written as `null`, matching what the front-end
/// has always published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptEnvelope {
    pub user: Submitter,
    pub action: String,
    pub operation: Option<String>,
    pub total_amount: Option<f64>,
    pub date: Option<String>,
    pub receipt: Value,
}

impl ReceiptEnvelope {
    /// Build a `receipt_extraction` envelope from the completion text returned
    /// by the vision service.
    ///
    /// Text that does not parse as a JSON object is wrapped as `{"raw": text}`
    /// so the submission is still recorded.
    pub fn receipt_extraction(user: Submitter, completion_text: &str) -> Self {
        let text = completion_text.trim();
        let receipt = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Value::Object(fields),
            _ => json!({ "raw": text }),
        };

        let total_amount = receipt.get("total_amount").and_then(amount_value);
        let date = receipt.get("date").and_then(date_value);

        Self {
            user,
            action: RECEIPT_EXTRACTION_ACTION.to_string(),
            operation: Some(SPENDING_OPERATION.to_string()),
            total_amount,
            date,
            receipt,
        }
    }

    /// Encode as the UTF-8 JSON message body
    pub fn to_payload(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DomainError::MalformedEnvelope(e.to_string()))
    }
}

/// Envelope as received by the consumer.
///
/// Keeps the decoded JSON object untouched so it can be stored verbatim, and
/// projects the typed values the storage routine needs. Fields of an
/// unexpected shape read as absent instead of failing the whole message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    fields: Map<String, Value>,
}

impl DecodedEnvelope {
    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DomainError::MalformedEnvelope(format!("invalid JSON body: {}", e)))?;

        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DomainError::MalformedEnvelope(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn action(&self) -> Action {
        Action::from_field(self.fields.get("action"))
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_field("id").and_then(Value::as_i64)
    }

    pub fn username(&self) -> Option<&str> {
        self.user_field("username").and_then(Value::as_str)
    }

    pub fn operation(&self) -> Option<&str> {
        self.fields.get("operation").and_then(Value::as_str)
    }

    pub fn receipt(&self) -> Option<&Map<String, Value>> {
        self.fields.get("receipt").and_then(Value::as_object)
    }

    /// Top-level `total_amount`, falling back to `receipt.total_amount`
    pub fn total_amount(&self) -> Option<f64> {
        self.with_receipt_fallback("total_amount", amount_value)
    }

    /// Top-level `date`, falling back to `receipt.date`
    pub fn date(&self) -> Option<String> {
        self.with_receipt_fallback("date", date_value)
    }

    /// The envelope exactly as it was decoded
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    fn user_field(&self, key: &str) -> Option<&Value> {
        self.fields
            .get("user")
            .and_then(Value::as_object)
            .and_then(|user| user.get(key))
    }

    fn with_receipt_fallback<T>(&self, key: &str, project: fn(&Value) -> Option<T>) -> Option<T> {
        self.fields.get(key).and_then(project).or_else(|| {
            self.receipt()
                .and_then(|receipt| receipt.get(key))
                .and_then(project)
        })
    }
}

fn amount_value(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    amount.is_finite().then_some(amount)
}

fn date_value(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|date| !date.is_empty())
        .map(str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
