//! Per-user JSON documents with shallow-merge writes and change notification.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;

use crate::cloud::{
    DocumentSnapshot, UserId, merge_fields,
    server::{ServerState, error::ServerError, token::Caller},
    wire::{ListenQuery, MergeRequest},
};

/// A new revision of a document, sent to waiting listeners.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    /// The collection of the document.
    pub collection: String,
    /// The ID of the document.
    pub id: String,
    /// The document after the change.
    pub snapshot: DocumentSnapshot,
}

/// Create the document table.
///
/// Deleted documents keep their row with `data` set to NULL so their revision
/// keeps increasing.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_document_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS document (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT,
                last_modified TEXT NOT NULL,
                revision INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
                )",
        (),
    )?;

    Ok(())
}

/// Get the latest snapshot of a document, [DocumentSnapshot::missing] if it was
/// never written.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn get_document(
    collection: &str,
    id: &str,
    connection: &Connection,
) -> Result<DocumentSnapshot, ServerError> {
    let row: Option<(Option<String>, OffsetDateTime, i64)> = connection
        .query_row(
            "SELECT data, last_modified, revision FROM document WHERE collection = ?1 AND id = ?2",
            (collection, id),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((data, last_modified, revision)) = row else {
        return Ok(DocumentSnapshot::missing());
    };

    let data = match data {
        Some(text) => Some(
            serde_json::from_str::<Map<String, Value>>(&text)
                .map_err(|error| ServerError::CorruptDocument(format!("{collection}/{id}: {error}")))?,
        ),
        None => None,
    };

    Ok(DocumentSnapshot {
        data,
        last_modified: Some(last_modified),
        revision: u64::try_from(revision).unwrap_or_default(),
    })
}

fn save_document(
    collection: &str,
    id: &str,
    snapshot: &DocumentSnapshot,
    connection: &Connection,
) -> Result<(), ServerError> {
    let data = snapshot
        .data
        .as_ref()
        .map(|data| Value::Object(data.clone()).to_string());

    connection.execute(
        "INSERT INTO document (collection, id, data, last_modified, revision)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (collection, id) DO UPDATE SET
            data = excluded.data,
            last_modified = excluded.last_modified,
            revision = excluded.revision",
        (
            collection,
            id,
            data,
            snapshot.last_modified,
            i64::try_from(snapshot.revision).unwrap_or(i64::MAX),
        ),
    )?;

    Ok(())
}

/// Shallow-merge `fields` into a document on behalf of `user_id`.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn merge_document(
    collection: &str,
    id: &str,
    fields: Map<String, Value>,
    user_id: &UserId,
    connection: &Connection,
) -> Result<DocumentSnapshot, ServerError> {
    let current = get_document(collection, id, connection)?;
    let now = OffsetDateTime::now_utc();

    let snapshot = DocumentSnapshot {
        data: Some(merge_fields(current.data, fields, user_id, now)),
        last_modified: Some(now),
        revision: current.revision + 1,
    };
    save_document(collection, id, &snapshot, connection)?;

    Ok(snapshot)
}

/// Delete a document, returning the new snapshot if it existed.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn delete_document(
    collection: &str,
    id: &str,
    connection: &Connection,
) -> Result<Option<DocumentSnapshot>, ServerError> {
    let current = get_document(collection, id, connection)?;

    if !current.exists() {
        return Ok(None);
    }

    let snapshot = DocumentSnapshot {
        data: None,
        last_modified: Some(OffsetDateTime::now_utc()),
        revision: current.revision + 1,
    };
    save_document(collection, id, &snapshot, connection)?;

    Ok(Some(snapshot))
}

fn read_snapshot(
    state: &ServerState,
    collection: &str,
    id: &str,
) -> Result<DocumentSnapshot, ServerError> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;

    get_document(collection, id, &connection)
}

fn notify(state: &ServerState, collection: String, id: String, snapshot: DocumentSnapshot) {
    // Sending only fails when nobody is listening.
    let _ = state.changes.send(DocumentChange {
        collection,
        id,
        snapshot,
    });
}

/// Read a document.
pub async fn get(
    State(state): State<ServerState>,
    caller: Caller,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<DocumentSnapshot>, ServerError> {
    caller.ensure_owner(&id)?;

    let snapshot = read_snapshot(&state, &collection, &id)?;

    if snapshot.exists() {
        Ok(Json(snapshot))
    } else {
        Err(ServerError::DocumentNotFound)
    }
}

/// Shallow-merge the request fields into a document.
pub async fn merge(
    State(state): State<ServerState>,
    caller: Caller,
    Path((collection, id)): Path<(String, String)>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<DocumentSnapshot>, ServerError> {
    caller.ensure_owner(&id)?;

    let snapshot = {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| ServerError::DatabaseLockError)?;
        merge_document(&collection, &id, request.fields, &caller.user_id, &connection)?
    };

    tracing::debug!("{collection}/{id} is now at revision {}", snapshot.revision);
    notify(&state, collection, id, snapshot.clone());

    Ok(Json(snapshot))
}

/// Delete a document. Deleting a missing document succeeds.
pub async fn delete(
    State(state): State<ServerState>,
    caller: Caller,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, ServerError> {
    caller.ensure_owner(&id)?;

    let deleted = {
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| ServerError::DatabaseLockError)?;
        delete_document(&collection, &id, &connection)?
    };

    if let Some(snapshot) = deleted {
        tracing::debug!("{collection}/{id} deleted at revision {}", snapshot.revision);
        notify(&state, collection, id, snapshot);
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Wait for a document to move past the revision in `after`.
///
/// Without `after` the current snapshot is returned straight away. Responds
/// with `204 No Content` if nothing changes within the listen timeout.
pub async fn listen(
    State(state): State<ServerState>,
    caller: Caller,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<ListenQuery>,
) -> Result<Response, ServerError> {
    caller.ensure_owner(&id)?;

    // Subscribe before reading so a change between the two is not missed.
    let mut changes = state.changes.subscribe();
    let current = read_snapshot(&state, &collection, &id)?;

    let after = match query.after {
        Some(after) if current.revision <= after => after,
        _ => return Ok(Json(current).into_response()),
    };

    let timeout = tokio::time::sleep(state.config.listen_timeout);
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            _ = &mut timeout => return Ok(StatusCode::NO_CONTENT.into_response()),
            change = changes.recv() => match change {
                Ok(change) if change.collection == collection
                    && change.id == id
                    && change.snapshot.revision > after =>
                {
                    return Ok(Json(change.snapshot).into_response());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("listener for {collection}/{id} skipped {skipped} changes");
                    let current = read_snapshot(&state, &collection, &id)?;

                    if current.revision > after {
                        return Ok(Json(current).into_response());
                    }
                }
                Err(RecvError::Closed) => return Ok(StatusCode::NO_CONTENT.into_response()),
            },
        }
    }
}
