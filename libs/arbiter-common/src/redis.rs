use crate::types::{JudgeEvent, JudgeRecord, JudgeRequest};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only key layout and payload encoding
/// Ensures the submitter and the worker never drift on key names

pub const QUEUE_KEY: &str = "arbiter:queue";
pub const EVENTS_PREFIX: &str = "arbiter:events";
pub const RESULT_PREFIX: &str = "arbiter:result";

/// Event list for a request
pub fn events_key(request_id: &uuid::Uuid) -> String {
    format!("{}:{}", EVENTS_PREFIX, request_id)
}

/// Result key for a request
pub fn result_key(request_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, request_id)
}

fn encode<T: serde::Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })
}

fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
    })
}

/// Push a request to the judge queue
/// Uses RPUSH for FIFO semantics
pub async fn push_request(
    conn: &mut redis::aio::ConnectionManager,
    request: &JudgeRequest,
) -> RedisResult<()> {
    let payload = encode(request)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a request from the judge queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_request(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<JudgeRequest>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => Ok(Some(decode(&payload)?)),
        None => Ok(None),
    }
}

/// Append one event to the request's event log (kept for 24 hours)
pub async fn push_event(
    conn: &mut redis::aio::ConnectionManager,
    request_id: &uuid::Uuid,
    event: &JudgeEvent,
) -> RedisResult<()> {
    let key = events_key(request_id);
    let payload = encode(event)?;
    let _: () = conn.rpush(&key, payload).await?;
    let _: () = conn.expire(&key, 86400).await?;
    Ok(())
}

/// Read events starting at `offset`
pub async fn read_events(
    conn: &mut redis::aio::ConnectionManager,
    request_id: &uuid::Uuid,
    offset: isize,
) -> RedisResult<Vec<JudgeEvent>> {
    let payloads: Vec<String> = conn.lrange(events_key(request_id), offset, -1).await?;
    payloads.iter().map(|p| decode(p)).collect()
}

/// Store the final record with a 24-hour TTL
pub async fn store_record(
    conn: &mut redis::aio::ConnectionManager,
    record: &JudgeRecord,
) -> RedisResult<()> {
    let payload = encode(record)?;
    let _: () = conn
        .set_ex(result_key(&record.request_id), payload, 86400)
        .await?;
    Ok(())
}

/// Retrieve the final record
pub async fn get_record(
    conn: &mut redis::aio::ConnectionManager,
    request_id: &uuid::Uuid,
) -> RedisResult<Option<JudgeRecord>> {
    let payload: Option<String> = conn.get(result_key(request_id)).await?;

    match payload {
        Some(data) => Ok(Some(decode(&data)?)),
        None => Ok(None),
    }
}
