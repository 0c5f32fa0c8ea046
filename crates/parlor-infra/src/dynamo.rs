//! DynamoDB-backed document store.
//!
//! Implements `DocumentStore` from `parlor-core` over a single DynamoDB
//! table keyed by (`pk`, `sk`). Row layout:
//!
//! - `record` holds the full JSON document of the row,
//! - `expires_at` (epoch seconds) is the table's TTL attribute,
//! - session rows additionally mirror their mutable fields
//!   (`message_count`, `last_message_at`, `updated_at`, `title`) as
//!   top-level attributes so `ADD` and condition expressions apply to them
//!   natively. Reads rehydrate the document and overlay those attributes,
//!   so the JSON blob never goes stale for callers.
//!
//! The counter update is the one subtle part: DynamoDB has no single-call
//! "increment and assign max" expression, so `update` first attempts the
//! combined expression guarded by a `#lm < :lm` condition and, when only
//! the max-assignment loses, retries with the increment alone. Each attempt
//! is atomic server-side and an increment is never lost.

use std::collections::HashMap;

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, TimeZone, Utc};
use parlor_core::store::{
    AttributeUpdate, DocumentStore, QueryPage, RecordKey, ScanOrder, StoredRecord,
};
use parlor_types::error::StoreError;
use tracing::debug;

const ATTR_PK: &str = "pk";
const ATTR_SK: &str = "sk";
const ATTR_RECORD: &str = "record";
const ATTR_EXPIRES_AT: &str = "expires_at";
const ATTR_MESSAGE_COUNT: &str = "message_count";
const ATTR_LAST_MESSAGE_AT: &str = "last_message_at";
const ATTR_UPDATED_AT: &str = "updated_at";
const ATTR_TITLE: &str = "title";

/// Environment variable naming the conversation table.
pub const TABLE_ENV: &str = "PARLOR_TABLE";

/// Table name used when `PARLOR_TABLE` is unset.
pub const DEFAULT_TABLE: &str = "parlor-conversations";

/// DynamoDB implementation of the conversation document store.
///
/// The client handle is constructor-injected; nothing here is process-wide
/// state. TTL expiry is enforced by DynamoDB itself, but because TTL
/// deletion can lag, reads additionally filter rows whose `expires_at` has
/// already passed.
pub struct DynamoDocumentStore {
    client: Client,
    table: String,
}

impl DynamoDocumentStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Build a store from ambient AWS configuration and `PARLOR_TABLE`.
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        let table = std::env::var(TABLE_ENV).unwrap_or_else(|_| DEFAULT_TABLE.to_string());
        Self::new(Client::new(&config), table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn send_update(
        &self,
        key: &RecordKey,
        updates: &[AttributeUpdate],
        include_max: bool,
    ) -> Result<(), SendUpdateError> {
        let parts = build_update_expression(updates, include_max);
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(ATTR_PK, AttributeValue::S(key.partition.clone()))
            .key(ATTR_SK, AttributeValue::S(key.sort.clone()))
            .update_expression(parts.expression)
            .condition_expression(parts.condition);
        for (placeholder, name) in parts.names {
            request = request.expression_attribute_names(placeholder, name);
        }
        for (placeholder, value) in parts.values {
            request = request.expression_attribute_values(placeholder, value);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(SendUpdateError::ConditionFailed)
            }
            Err(e) => Err(SendUpdateError::Other(e.to_string())),
        }
    }
}

enum SendUpdateError {
    ConditionFailed,
    Other(String),
}

struct UpdateExpressionParts {
    expression: String,
    condition: String,
    names: Vec<(String, String)>,
    values: Vec<(String, AttributeValue)>,
}

/// Translate an `AttributeUpdate` batch into a DynamoDB update expression.
///
/// A batch must not address the same attribute twice (callers never do).
/// When `include_max` is false any max-assignment in the batch is dropped,
/// leaving the unconditional parts guarded only by row existence.
fn build_update_expression(
    updates: &[AttributeUpdate],
    include_max: bool,
) -> UpdateExpressionParts {
    let mut set_parts: Vec<String> = Vec::new();
    let mut add_parts: Vec<String> = Vec::new();
    let mut names: Vec<(String, String)> = vec![("#pk".to_string(), ATTR_PK.to_string())];
    let mut values: Vec<(String, AttributeValue)> = Vec::new();
    let mut condition = "attribute_exists(#pk)".to_string();

    for update in updates {
        match update {
            AttributeUpdate::IncrementMessageCount(by) => {
                add_parts.push("#mc :inc".to_string());
                names.push(("#mc".to_string(), ATTR_MESSAGE_COUNT.to_string()));
                values.push((":inc".to_string(), AttributeValue::N(by.to_string())));
            }
            AttributeUpdate::SetMessageCount(count) => {
                set_parts.push("#mc = :mc".to_string());
                names.push(("#mc".to_string(), ATTR_MESSAGE_COUNT.to_string()));
                values.push((":mc".to_string(), AttributeValue::N(count.to_string())));
            }
            AttributeUpdate::MaxLastMessageAt(at) => {
                if include_max {
                    set_parts.push("#lm = :lm".to_string());
                    names.push(("#lm".to_string(), ATTR_LAST_MESSAGE_AT.to_string()));
                    values.push((
                        ":lm".to_string(),
                        AttributeValue::N(at.timestamp_millis().to_string()),
                    ));
                    condition = "attribute_exists(#pk) AND (attribute_not_exists(#lm) OR #lm < :lm)"
                        .to_string();
                }
            }
            AttributeUpdate::SetTitle(title) => {
                set_parts.push("#ti = :ti".to_string());
                names.push(("#ti".to_string(), ATTR_TITLE.to_string()));
                values.push((":ti".to_string(), AttributeValue::S(title.clone())));
            }
            AttributeUpdate::SetUpdatedAt(at) => {
                set_parts.push("#ua = :ua".to_string());
                names.push(("#ua".to_string(), ATTR_UPDATED_AT.to_string()));
                values.push((":ua".to_string(), AttributeValue::S(at.to_rfc3339())));
            }
        }
    }

    let mut expression = String::new();
    if !set_parts.is_empty() {
        expression.push_str("SET ");
        expression.push_str(&set_parts.join(", "));
    }
    if !add_parts.is_empty() {
        if !expression.is_empty() {
            expression.push(' ');
        }
        expression.push_str("ADD ");
        expression.push_str(&add_parts.join(", "));
    }

    UpdateExpressionParts {
        expression,
        condition,
        names,
        values,
    }
}

fn encode_item(key: &RecordKey, record: &StoredRecord) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let json = serde_json::to_string(record)
        .map_err(|e| StoreError::Validation(format!("unserializable record: {e}")))?;
    let mut item = HashMap::from([
        (ATTR_PK.to_string(), AttributeValue::S(key.partition.clone())),
        (ATTR_SK.to_string(), AttributeValue::S(key.sort.clone())),
        (ATTR_RECORD.to_string(), AttributeValue::S(json)),
        (
            ATTR_EXPIRES_AT.to_string(),
            AttributeValue::N(record.expires_at().timestamp().to_string()),
        ),
    ]);
    if let StoredRecord::Session(session) = record {
        item.insert(
            ATTR_MESSAGE_COUNT.to_string(),
            AttributeValue::N(session.message_count.to_string()),
        );
        item.insert(
            ATTR_LAST_MESSAGE_AT.to_string(),
            AttributeValue::N(session.last_message_at.timestamp_millis().to_string()),
        );
        item.insert(
            ATTR_UPDATED_AT.to_string(),
            AttributeValue::S(session.updated_at.to_rfc3339()),
        );
        item.insert(
            ATTR_TITLE.to_string(),
            AttributeValue::S(session.title.clone()),
        );
    }
    Ok(item)
}

fn decode_item(item: &HashMap<String, AttributeValue>) -> Result<StoredRecord, StoreError> {
    let json = string_attr(item, ATTR_RECORD)?;
    let mut record: StoredRecord = serde_json::from_str(json)
        .map_err(|e| StoreError::Validation(format!("malformed stored record: {e}")))?;
    if let StoredRecord::Session(session) = &mut record {
        if let Some(count) = number_attr(item, ATTR_MESSAGE_COUNT)? {
            session.message_count = count.max(0) as u64;
        }
        if let Some(millis) = number_attr(item, ATTR_LAST_MESSAGE_AT)? {
            session.last_message_at = millis_to_datetime(millis)?;
        }
        if let Some(AttributeValue::S(at)) = item.get(ATTR_UPDATED_AT) {
            session.updated_at = DateTime::parse_from_rfc3339(at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Validation(format!("malformed updated_at: {e}")))?;
        }
        if let Some(AttributeValue::S(title)) = item.get(ATTR_TITLE) {
            session.title = title.clone();
        }
    }
    Ok(record)
}

fn string_attr<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str, StoreError> {
    item.get(name)
        .and_then(|av| av.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| StoreError::Validation(format!("row is missing string attribute '{name}'")))
}

fn number_attr(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<Option<i64>, StoreError> {
    match item.get(name) {
        None => Ok(None),
        Some(av) => {
            let raw = av.as_n().map_err(|_| {
                StoreError::Validation(format!("attribute '{name}' is not numeric"))
            })?;
            raw.parse::<i64>()
                .map(Some)
                .map_err(|e| StoreError::Validation(format!("malformed number '{name}': {e}")))
        }
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Validation("timestamp out of range".to_string()))
}

fn is_expired(item: &HashMap<String, AttributeValue>, now: DateTime<Utc>) -> bool {
    matches!(
        number_attr(item, ATTR_EXPIRES_AT),
        Ok(Some(secs)) if secs <= now.timestamp()
    )
}

impl DocumentStore for DynamoDocumentStore {
    async fn put(&self, key: RecordKey, record: StoredRecord) -> Result<(), StoreError> {
        let item = encode_item(&key, &record)?;
        let mut request = self.client.put_item().table_name(&self.table);
        for (name, value) in item {
            request = request.item(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(ATTR_PK, AttributeValue::S(key.partition.clone()))
            .key(ATTR_SK, AttributeValue::S(key.sort.clone()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match result.item {
            Some(item) if !is_expired(&item, Utc::now()) => decode_item(&item).map(Some),
            _ => Ok(None),
        }
    }

    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        order: ScanOrder,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let mut request = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression("#pk = :pk AND begins_with(#sk, :prefix)")
            .expression_attribute_names("#pk", ATTR_PK)
            .expression_attribute_names("#sk", ATTR_SK)
            .expression_attribute_values(":pk", AttributeValue::S(partition.to_string()))
            .expression_attribute_values(":prefix", AttributeValue::S(sort_prefix.to_string()))
            .scan_index_forward(order == ScanOrder::Ascending)
            .limit(limit.min(i32::MAX as usize) as i32);
        if let Some(after) = start_after {
            request = request
                .exclusive_start_key(ATTR_PK, AttributeValue::S(partition.to_string()))
                .exclusive_start_key(ATTR_SK, AttributeValue::S(after.to_string()));
        }

        let result = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let now = Utc::now();
        let items = result.items.unwrap_or_default();
        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            // TTL deletion lags; expired rows are filtered here as well.
            if is_expired(item, now) {
                continue;
            }
            records.push(decode_item(item)?);
        }
        let last_sort_key = result
            .last_evaluated_key
            .as_ref()
            .and_then(|key| key.get(ATTR_SK))
            .and_then(|av| av.as_s().ok())
            .cloned();

        Ok(QueryPage {
            records,
            last_sort_key,
        })
    }

    async fn update(
        &self,
        key: &RecordKey,
        updates: &[AttributeUpdate],
    ) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let has_max = updates
            .iter()
            .any(|u| matches!(u, AttributeUpdate::MaxLastMessageAt(_)));

        match self.send_update(key, updates, true).await {
            Ok(()) => Ok(()),
            Err(SendUpdateError::ConditionFailed) if has_max => {
                // The stored watermark is already newer; keep the
                // unconditional parts (the increment must still land).
                debug!(sort_key = %key.sort, "max-assignment lost, retrying increment alone");
                match self.send_update(key, updates, false).await {
                    Ok(()) => Ok(()),
                    Err(SendUpdateError::ConditionFailed) => Err(StoreError::NotFound),
                    Err(SendUpdateError::Other(msg)) => Err(StoreError::Unavailable(msg)),
                }
            }
            Err(SendUpdateError::ConditionFailed) => Err(StoreError::NotFound),
            Err(SendUpdateError::Other(msg)) => Err(StoreError::Unavailable(msg)),
        }
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key(ATTR_PK, AttributeValue::S(key.partition.clone()))
            .key(ATTR_SK, AttributeValue::S(key.sort.clone()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_types::chat::{ChatMessage, ChatSession, MessageRole};
    use parlor_types::owner::OwnerScope;

    fn sample_session() -> ChatSession {
        let now = Utc::now();
        ChatSession {
            session_id: "s1".to_string(),
            owner: OwnerScope::organization("org-7"),
            title: "Quarterly planning".to_string(),
            backend: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            message_count: 4,
            created_at: now,
            updated_at: now,
            last_message_at: now,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            expires_at: now + chrono::Duration::days(90),
        }
    }

    #[test]
    fn test_session_item_roundtrip_overlays_counters() {
        let session = sample_session();
        let key = RecordKey::new("ORG#org-7", "SESSION#s1");
        let mut item = encode_item(&key, &StoredRecord::Session(session.clone())).unwrap();

        // Simulate counter updates that only touched the mirror attributes.
        item.insert(
            ATTR_MESSAGE_COUNT.to_string(),
            AttributeValue::N("9".to_string()),
        );
        let decoded = decode_item(&item).unwrap().into_session().unwrap();
        assert_eq!(decoded.message_count, 9);
        assert_eq!(decoded.title, session.title);
        assert_eq!(
            decoded.last_message_at.timestamp_millis(),
            session.last_message_at.timestamp_millis()
        );
    }

    #[test]
    fn test_message_item_roundtrip() {
        let now = Utc::now();
        let message = ChatMessage {
            session_id: "s1".to_string(),
            message_id: "m1".to_string(),
            role: MessageRole::Assistant,
            content: "hello".to_string(),
            timestamp: now,
            usage: None,
            context: None,
            expires_at: now + chrono::Duration::days(90),
        };
        let key = RecordKey::new("SESSION#s1", "MSG#0000000000000100#m1");
        let item = encode_item(&key, &StoredRecord::Message(message.clone())).unwrap();
        assert!(!item.contains_key(ATTR_MESSAGE_COUNT));

        let decoded = decode_item(&item).unwrap().into_message().unwrap();
        assert_eq!(decoded.message_id, "m1");
        assert_eq!(decoded.content, "hello");
    }

    #[test]
    fn test_expired_item_detection() {
        let session = sample_session();
        let key = RecordKey::new("ORG#org-7", "SESSION#s1");
        let item = encode_item(&key, &StoredRecord::Session(session)).unwrap();
        assert!(!is_expired(&item, Utc::now()));
        assert!(is_expired(&item, Utc::now() + chrono::Duration::days(91)));
    }

    #[test]
    fn test_counter_update_expression() {
        let now = Utc::now();
        let updates = [
            AttributeUpdate::IncrementMessageCount(1),
            AttributeUpdate::MaxLastMessageAt(now),
            AttributeUpdate::SetUpdatedAt(now),
        ];
        let parts = build_update_expression(&updates, true);
        assert!(parts.expression.contains("ADD #mc :inc"));
        assert!(parts.expression.contains("#lm = :lm"));
        assert!(parts.condition.contains("#lm < :lm"));

        // Fallback drops the max-assignment but keeps the increment.
        let parts = build_update_expression(&updates, false);
        assert!(parts.expression.contains("ADD #mc :inc"));
        assert!(!parts.expression.contains("#lm"));
        assert_eq!(parts.condition, "attribute_exists(#pk)");
    }

    #[test]
    fn test_repair_update_expression_sets_count() {
        let parts = build_update_expression(&[AttributeUpdate::SetMessageCount(7)], true);
        assert!(parts.expression.starts_with("SET #mc = :mc"));
        assert!(
            parts
                .values
                .iter()
                .any(|(p, v)| p == ":mc" && v.as_n().is_ok_and(|n| n.as_str() == "7"))
        );
    }

    #[test]
    fn test_malformed_record_is_validation_error() {
        let item = HashMap::from([
            (ATTR_PK.to_string(), AttributeValue::S("USER#u1".to_string())),
            (ATTR_SK.to_string(), AttributeValue::S("SESSION#s1".to_string())),
            (ATTR_RECORD.to_string(), AttributeValue::S("{not json".to_string())),
        ]);
        assert!(matches!(
            decode_item(&item),
            Err(StoreError::Validation(_))
        ));
    }
}
