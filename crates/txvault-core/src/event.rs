//! Feed event types for txvault.
//!
//! The webhook feed delivers enhanced transactions tagged by a string `type`.
//! Decoding turns each one into a closed [`FeedEvent`]: transfers are the only
//! kind persisted, everything else lands in [`FeedEvent::Unrecognized`] and is
//! skipped without charging anyone.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DatabaseId;

/// Type tag of transfer transactions.
pub const TRANSFER: &str = "TRANSFER";

/// Fee payer recorded when the feed does not name one.
pub const UNKNOWN_FEE_PAYER: &str = "unknown";

/// Row persisted into a tenant's transfer table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Slot the transaction landed in.
    pub slot: i64,
    /// Transaction signature, the natural unique key.
    pub signature: String,
    /// Account paying the fee.
    pub fee_payer: String,
    /// Fee in lamports.
    pub fee: i32,
    /// Human readable summary from the feed.
    pub description: Option<String>,
    /// Per-account balance changes, stored opaque.
    pub account_data: Value,
    /// Instruction list, stored opaque.
    pub instructions: Value,
}

/// A decoded transfer together with the addresses it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    /// Distinct addresses referenced by the account data and tracked-address list.
    pub addresses: BTreeSet<String>,
    /// The row to persist.
    pub record: TransferRecord,
}

/// One transaction from the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A transfer, routed and persisted.
    Transfer(TransferEvent),
    /// Any other kind; ignored.
    Unrecognized {
        /// The type tag as delivered.
        kind: String,
    },
}

impl FeedEvent {
    /// Decode a single feed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an object or a transfer lacks
    /// its slot or signature. Only the type tag of other kinds is read.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let tag = KindTag::deserialize(&value)?;
        if !tag.kind.eq_ignore_ascii_case(TRANSFER) {
            return Ok(Self::Unrecognized { kind: tag.kind });
        }

        let raw: RawTransaction = serde_json::from_value(value)?;

        let addresses = collect_addresses(&raw.account_data, raw.tracked_addresses.as_deref());
        let record = raw.into_transfer_record()?;
        Ok(Self::Transfer(TransferEvent { addresses, record }))
    }

    /// The type tag of this event.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Transfer(_) => TRANSFER,
            Self::Unrecognized { kind } => kind,
        }
    }
}

/// One queue payload: either a single transaction or an array of them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventBatch {
    /// Events in delivery order.
    pub events: Vec<FeedEvent>,
}

impl EventBatch {
    /// Decode a queue payload.
    ///
    /// # Errors
    ///
    /// Returns the first decoding error; a batch is accepted or rejected whole.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let events = match value {
            Value::Array(items) => items
                .into_iter()
                .map(FeedEvent::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![FeedEvent::from_value(other)?],
        };
        Ok(Self { events })
    }

    /// Iterate over the transfers in the batch.
    pub fn transfers(&self) -> impl Iterator<Item = &TransferEvent> {
        self.events.iter().filter_map(|event| match event {
            FeedEvent::Transfer(transfer) => Some(transfer),
            FeedEvent::Unrecognized { .. } => None,
        })
    }
}

/// A backfill job: historical transactions for one tenant database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedJob {
    /// Target tenant database.
    pub database_id: DatabaseId,
    /// Raw feed transactions.
    pub transactions: Vec<Value>,
}

/// Errors that can occur when decoding feed payloads.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload does not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is missing or empty.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A numeric field does not fit the stored column type.
    #[error("field out of range: {0}")]
    OutOfRange(&'static str),
}

#[derive(Debug, Deserialize)]
struct KindTag {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    #[serde(default)]
    account_data: Vec<Value>,
    #[serde(default)]
    tracked_addresses: Option<Vec<String>>,
    #[serde(default)]
    slot: Option<u64>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    fee_payer: Option<String>,
    #[serde(default)]
    fee: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instructions: Option<Value>,
    #[serde(default)]
    transaction: Option<Value>,
}

impl RawTransaction {
    fn into_transfer_record(self) -> Result<TransferRecord, EventError> {
        let signature = self
            .signature
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("signature"))?;
        let slot = self.slot.ok_or(EventError::MissingField("slot"))?;
        let slot = i64::try_from(slot).map_err(|_| EventError::OutOfRange("slot"))?;
        let fee = i32::try_from(self.fee.unwrap_or(0)).map_err(|_| EventError::OutOfRange("fee"))?;

        // Older payloads only carry the raw message; its first key pays the fee.
        let fee_payer = self
            .fee_payer
            .filter(|p| !p.is_empty())
            .or_else(|| {
                self.transaction
                    .as_ref()
                    .and_then(|t| t.pointer("/message/accountKeys/0"))
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_else(|| UNKNOWN_FEE_PAYER.to_string());

        Ok(TransferRecord {
            slot,
            signature,
            fee_payer,
            fee,
            description: self.description.filter(|d| !d.is_empty()),
            account_data: Value::Array(self.account_data),
            instructions: self
                .instructions
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| Value::Array(Vec::new())),
        })
    }
}

fn collect_addresses(account_data: &[Value], tracked: Option<&[String]>) -> BTreeSet<String> {
    account_data
        .iter()
        .filter_map(|entry| entry.get("account").and_then(Value::as_str))
        .chain(tracked.unwrap_or_default().iter().map(String::as_str))
        .filter(|address| !address.is_empty())
        .map(String::from)
        .collect()
}
