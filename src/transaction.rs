//! Transaction Decoding
//!
//! Parses the opaque payload of a queue message into a typed [`Transaction`].
//! Decoding fails closed: anything that is not exactly the expected record is
//! a [`DecodeError`], and a decode failure is never retried.
//!
//! # Wire Format
//!
//! ```text
//! {
//!   "id": "<uuid>",
//!   "messageType": "Credit" | "Debit",
//!   "bankAccountId": "<uuid>",
//!   "amount": <non-negative JSON number>
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::core_types::{AccountId, TransactionId};

const CREDIT_LABEL: &str = "Credit";
const DEBIT_LABEL: &str = "Debit";

/// Reasons a payload cannot become a [`Transaction`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is not a well-formed transaction record: {0}")]
    Malformed(String),

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not a valid identifier: {value}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("Amount is not a valid non-negative number: {0}")]
    InvalidAmount(String),

    #[error("Unrecognized transaction kind: {0}")]
    UnrecognizedKind(String),
}

/// Direction of a balance change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Credit,
    Debit,
    /// Label outside the two known kinds. Only a permissive decoder yields this.
    Unrecognized(String),
}

impl TransactionKind {
    pub fn from_label(label: &str) -> Self {
        match label {
            CREDIT_LABEL => TransactionKind::Credit,
            DEBIT_LABEL => TransactionKind::Debit,
            other => TransactionKind::Unrecognized(other.to_string()),
        }
    }

    /// Wire label of this kind
    pub fn as_str(&self) -> &str {
        match self {
            TransactionKind::Credit => CREDIT_LABEL,
            TransactionKind::Debit => DEBIT_LABEL,
            TransactionKind::Unrecognized(label) => label,
        }
    }

    #[inline]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, TransactionKind::Unrecognized(_))
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded balance-changing event
///
/// Ephemeral: built per message and dropped once the message is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub account_id: AccountId,
    /// Magnitude, never negative. The sign comes from `kind`.
    pub amount: Decimal,
}

impl Transaction {
    pub fn new(kind: TransactionKind, account_id: AccountId, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            account_id,
            amount,
        }
    }

    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self::new(TransactionKind::Credit, account_id, amount)
    }

    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self::new(TransactionKind::Debit, account_id, amount)
    }

    /// Balance delta this transaction applies: `+amount` for Credit,
    /// `-amount` for Debit, `None` for an unrecognized kind.
    pub fn signed_amount(&self) -> Option<Decimal> {
        match self.kind {
            TransactionKind::Credit => Some(self.amount),
            TransactionKind::Debit => Some(-self.amount),
            TransactionKind::Unrecognized(_) => None,
        }
    }

    /// Encode into the wire format accepted by [`JsonTransactionDecoder`]
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        let wire = WireTransaction {
            id: self.id.to_string(),
            message_type: self.kind.as_str().to_string(),
            bank_account_id: self.account_id.to_string(),
            // Decimal's Display never uses exponent notation
            amount: serde_json::Number::from_str(&self.amount.normalize().to_string())?,
        };
        serde_json::to_vec(&wire)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    id: String,
    message_type: String,
    bank_account_id: String,
    amount: serde_json::Number,
}

/// Every field optional so absence can be told apart from a type mismatch
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    id: Option<Value>,
    message_type: Option<Value>,
    bank_account_id: Option<Value>,
    amount: Option<Value>,
}

/// Payload decoder seam used by the message processor
pub trait TransactionDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Transaction, DecodeError>;
}

/// JSON decoder for the transaction wire format
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTransactionDecoder {
    accept_unknown_kinds: bool,
}

impl JsonTransactionDecoder {
    /// Rejects any kind label other than `Credit`/`Debit`
    pub fn strict() -> Self {
        Self {
            accept_unknown_kinds: false,
        }
    }

    /// Passes unknown kind labels through as [`TransactionKind::Unrecognized`]
    pub fn permissive() -> Self {
        Self {
            accept_unknown_kinds: true,
        }
    }
}

impl TransactionDecoder for JsonTransactionDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Transaction, DecodeError> {
        let raw: RawTransaction =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let id = parse_identifier("id", raw.id)?;
        let account_id = parse_identifier("bankAccountId", raw.bank_account_id)?;

        let kind = match required("messageType", raw.message_type)? {
            Value::String(label) => TransactionKind::from_label(&label),
            other => return Err(DecodeError::UnrecognizedKind(other.to_string())),
        };
        if !kind.is_recognized() && !self.accept_unknown_kinds {
            return Err(DecodeError::UnrecognizedKind(kind.as_str().to_string()));
        }

        let amount = match required("amount", raw.amount)? {
            Value::Number(n) => parse_amount(&n)?,
            other => return Err(DecodeError::InvalidAmount(other.to_string())),
        };

        Ok(Transaction {
            id,
            kind,
            account_id,
            amount,
        })
    }
}

fn required(field: &'static str, value: Option<Value>) -> Result<Value, DecodeError> {
    match value {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn parse_identifier(field: &'static str, value: Option<Value>) -> Result<Uuid, DecodeError> {
    match required(field, value)? {
        Value::String(s) => Uuid::parse_str(&s).map_err(|_| DecodeError::InvalidIdentifier {
            field,
            value: s,
        }),
        other => Err(DecodeError::InvalidIdentifier {
            field,
            value: other.to_string(),
        }),
    }
}

/// Exact decimal from a JSON number.
///
/// serde_json keeps the literal text of every number, so the digits are
/// parsed directly. Values a `Decimal` cannot hold without rounding are
/// rejected.
fn parse_amount(number: &serde_json::Number) -> Result<Decimal, DecodeError> {
    let text = number.to_string();
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text)
    } else {
        Decimal::from_str_exact(&text)
    };
    let amount = parsed.map_err(|_| DecodeError::InvalidAmount(text.clone()))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(DecodeError::InvalidAmount(text));
    }
    // "-0" decodes to a negative zero; store it as plain zero
    Ok(amount.abs())
}
