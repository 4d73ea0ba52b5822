//! Chat store — SQLite persistence, the single source of truth.
//!
//! Every cross-admin coordination point goes through a conditional SQL
//! update here, never through in-process locks: multiple server processes
//! may share one database. Writes that must be observed together (message
//! append + unread increment, claim + history entry) run inside a single
//! immediate transaction. All rusqlite access happens on the blocking
//! thread pool.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use deskline_protocol::{
    new_id, AssignmentEntry, ChatMessage, ChatState, ChatStatus, ChatSummary, Role, UnreadCount,
};

use crate::error::ChatError;

/// Outcome of a message append, carrying everything the caller needs to
/// broadcast without a follow-up fetch.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: ChatMessage,
    pub chat: ChatSummary,
    /// The sending admin claimed the chat as part of this send.
    pub auto_claimed: bool,
    /// A customer message reopened a resolved chat.
    pub reopened: bool,
}

/// Outcome of a takeover.
#[derive(Debug, Clone)]
pub struct TakeoverOutcome {
    pub chat: ChatSummary,
    /// `None` when the chat had no holder (takeover degenerated to a claim).
    pub previous_admin_id: Option<String>,
}

#[derive(Clone)]
pub struct ChatStore {
    db_path: PathBuf,
}

impl ChatStore {
    /// Open (creating if missing) the database and apply pending migrations.
    pub fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = open_conn(&db_path)?;
        crate::migration_runner::run_migrations(&mut conn)?;

        Ok(Self { db_path })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ChatError> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&path).map_err(anyhow::Error::from)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("store task panicked: {e}")))?
    }

    /// Fetch the chat owned by `customer_id`, creating it when absent.
    /// Returns `true` when a new chat was created.
    pub async fn get_or_create(&self, customer_id: &str) -> Result<(ChatState, bool), ChatError> {
        let customer_id = customer_id.to_string();
        self.with_conn(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM chats WHERE customer_id = ?1",
                    [&customer_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok((load_state(conn, &id)?.ok_or(ChatError::NotFound)?, false));
            }

            let id = new_id();
            let now = now_iso8601();
            // UNIQUE(customer_id) makes creation idempotent across processes;
            // a concurrent insert wins and we read the winner back.
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO chats (id, customer_id, status, created_at)
                 VALUES (?1, ?2, 'unassigned', ?3)",
                params![id, customer_id, now],
            )?;

            let id: String = conn.query_row(
                "SELECT id FROM chats WHERE customer_id = ?1",
                [&customer_id],
                |row| row.get(0),
            )?;
            Ok((
                load_state(conn, &id)?.ok_or(ChatError::NotFound)?,
                inserted > 0,
            ))
        })
        .await
    }

    pub async fn get_state(&self, chat_id: &str) -> Result<ChatState, ChatError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| load_state(conn, &chat_id)?.ok_or(ChatError::NotFound))
            .await
    }

    pub async fn get_summary(&self, chat_id: &str) -> Result<ChatSummary, ChatError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound))
            .await
    }

    /// List chats most-recently-active first, optionally filtered by status.
    pub async fn list(&self, status: Option<ChatStatus>) -> Result<Vec<ChatSummary>, ChatError> {
        self.with_conn(move |conn| {
            let base = "SELECT id, customer_id, status, assigned_admin_id, unread_customer,
                        unread_admin, last_message_at, created_at FROM chats";
            let order = " ORDER BY last_message_at DESC, created_at DESC";

            let mut chats = Vec::new();
            match status {
                Some(s) => {
                    let sql = format!("{base} WHERE status = ?1{order}");
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([status_to_str(s)], summary_from_row)?;
                    for row in rows {
                        chats.push(row?);
                    }
                }
                None => {
                    let sql = format!("{base}{order}");
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map([], summary_from_row)?;
                    for row in rows {
                        chats.push(row?);
                    }
                }
            }
            Ok(chats)
        })
        .await
    }

    /// Claim an unassigned chat. The update is conditional on the current
    /// status — when two admins race, exactly one succeeds and the other
    /// gets `AlreadyAssigned`.
    pub async fn claim(&self, chat_id: &str, admin_id: &str) -> Result<ChatSummary, ChatError> {
        let (chat_id, admin_id) = (chat_id.to_string(), admin_id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_iso8601();

            let updated = tx.execute(
                "UPDATE chats SET status = 'assigned', assigned_admin_id = ?2
                 WHERE id = ?1 AND status = 'unassigned'",
                params![chat_id, admin_id],
            )?;
            if updated == 0 {
                let exists: Option<String> = tx
                    .query_row("SELECT id FROM chats WHERE id = ?1", [&chat_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                return Err(match exists {
                    Some(_) => ChatError::AlreadyAssigned,
                    None => ChatError::NotFound,
                });
            }

            open_history_entry(&tx, &chat_id, &admin_id, &now)?;
            tx.commit()?;

            load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)
        })
        .await
    }

    /// Force-reassign a chat to `admin_id` regardless of the current holder.
    /// Falls back to claim semantics when the chat has no holder.
    pub async fn takeover(
        &self,
        chat_id: &str,
        admin_id: &str,
    ) -> Result<TakeoverOutcome, ChatError> {
        let (chat_id, admin_id) = (chat_id.to_string(), admin_id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_iso8601();

            let previous: Option<String> = tx
                .query_row(
                    "SELECT assigned_admin_id FROM chats WHERE id = ?1",
                    [&chat_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(ChatError::NotFound)?;

            if previous.as_deref() == Some(admin_id.as_str()) {
                // Taking over a chat you already hold is a no-op.
                tx.commit()?;
                let chat = load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)?;
                return Ok(TakeoverOutcome {
                    chat,
                    previous_admin_id: None,
                });
            }

            close_history_entry(&tx, &chat_id, &now)?;
            tx.execute(
                "UPDATE chats SET status = 'assigned', assigned_admin_id = ?2 WHERE id = ?1",
                params![chat_id, admin_id],
            )?;
            open_history_entry(&tx, &chat_id, &admin_id, &now)?;
            tx.commit()?;

            let chat = load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)?;
            Ok(TakeoverOutcome {
                chat,
                previous_admin_id: previous,
            })
        })
        .await
    }

    /// Return an assigned chat to the shared pool. Holder only.
    pub async fn release(&self, chat_id: &str, admin_id: &str) -> Result<ChatSummary, ChatError> {
        let (chat_id, admin_id) = (chat_id.to_string(), admin_id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_iso8601();

            let updated = tx.execute(
                "UPDATE chats SET status = 'unassigned', assigned_admin_id = NULL
                 WHERE id = ?1 AND status = 'assigned' AND assigned_admin_id = ?2",
                params![chat_id, admin_id],
            )?;
            if updated == 0 {
                let exists: Option<String> = tx
                    .query_row("SELECT id FROM chats WHERE id = ?1", [&chat_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                return Err(match exists {
                    Some(_) => ChatError::NotHolder,
                    None => ChatError::NotFound,
                });
            }

            close_history_entry(&tx, &chat_id, &now)?;
            tx.commit()?;

            load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)
        })
        .await
    }

    /// Mark an assigned chat resolved. Holder only.
    pub async fn resolve(&self, chat_id: &str, admin_id: &str) -> Result<ChatSummary, ChatError> {
        let (chat_id, admin_id) = (chat_id.to_string(), admin_id.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_iso8601();

            let updated = tx.execute(
                "UPDATE chats SET status = 'resolved', assigned_admin_id = NULL
                 WHERE id = ?1 AND status = 'assigned' AND assigned_admin_id = ?2",
                params![chat_id, admin_id],
            )?;
            if updated == 0 {
                let exists: Option<String> = tx
                    .query_row("SELECT id FROM chats WHERE id = ?1", [&chat_id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                return Err(match exists {
                    Some(_) => ChatError::NotHolder,
                    None => ChatError::NotFound,
                });
            }

            close_history_entry(&tx, &chat_id, &now)?;
            tx.commit()?;

            load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)
        })
        .await
    }

    /// Append a message and bump the recipient's unread counter in one
    /// transaction. Composes the claim (admin send to an unheld chat) and
    /// the resolved-reopen (customer send) transitions into the same
    /// transaction so no message ever lands on a chat without an owner
    /// contract being honored.
    pub async fn append_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        sender_role: Role,
        body: &str,
    ) -> Result<SendOutcome, ChatError> {
        let chat_id = chat_id.to_string();
        let sender_id = sender_id.to_string();
        let body = body.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_iso8601();

            let row: Option<(String, String, Option<String>)> = tx
                .query_row(
                    "SELECT customer_id, status, assigned_admin_id FROM chats WHERE id = ?1",
                    [&chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let (customer_id, status, assignee) = row.ok_or(ChatError::NotFound)?;
            let status = status_from_str(&status)?;

            let mut auto_claimed = false;
            let mut reopened = false;

            match sender_role {
                Role::Admin => match status {
                    ChatStatus::Assigned if assignee.as_deref() == Some(sender_id.as_str()) => {}
                    ChatStatus::Assigned => return Err(ChatError::NotHolder),
                    ChatStatus::Unassigned | ChatStatus::Resolved => {
                        // First responder becomes the assignee. Same
                        // conditional shape as `claim` — the WHERE guard is
                        // what keeps concurrent first responders honest.
                        let updated = tx.execute(
                            "UPDATE chats SET status = 'assigned', assigned_admin_id = ?2
                             WHERE id = ?1 AND status != 'assigned'",
                            params![chat_id, sender_id],
                        )?;
                        if updated == 0 {
                            return Err(ChatError::AlreadyAssigned);
                        }
                        open_history_entry(&tx, &chat_id, &sender_id, &now)?;
                        auto_claimed = true;
                    }
                },
                Role::Customer => {
                    if customer_id != sender_id {
                        return Err(ChatError::NotFound);
                    }
                    if status == ChatStatus::Resolved {
                        // Reopen into the shared pool; no admin is holding it.
                        tx.execute(
                            "UPDATE chats SET status = 'unassigned'
                             WHERE id = ?1 AND status = 'resolved'",
                            [&chat_id],
                        )?;
                        reopened = true;
                    }
                }
            }

            let message = ChatMessage {
                id: new_id(),
                chat_id: chat_id.clone(),
                sender_id: sender_id.clone(),
                sender_role,
                body: body.clone(),
                created_at: now.clone(),
                is_read: false,
            };
            tx.execute(
                "INSERT INTO chat_messages (id, chat_id, sender_id, sender_role, body, created_at, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                params![
                    message.id,
                    message.chat_id,
                    message.sender_id,
                    role_to_str(sender_role),
                    message.body,
                    message.created_at
                ],
            )?;

            // Unread increment rides the same transaction as the append.
            let recipient_col = match sender_role.opposite() {
                Role::Customer => "unread_customer",
                Role::Admin => "unread_admin",
            };
            tx.execute(
                &format!(
                    "UPDATE chats SET {recipient_col} = {recipient_col} + 1, last_message_at = ?2
                     WHERE id = ?1"
                ),
                params![chat_id, now],
            )?;
            tx.commit()?;

            let chat = load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)?;
            Ok(SendOutcome {
                message,
                chat,
                auto_claimed,
                reopened,
            })
        })
        .await
    }

    /// Zero `reader_role`'s unread counter and flip `is_read` on every
    /// message from the other role. Idempotent.
    pub async fn mark_read(
        &self,
        chat_id: &str,
        reader_role: Role,
    ) -> Result<UnreadCount, ChatError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let reader_col = match reader_role {
                Role::Customer => "unread_customer",
                Role::Admin => "unread_admin",
            };
            let updated = tx.execute(
                &format!("UPDATE chats SET {reader_col} = 0 WHERE id = ?1"),
                [&chat_id],
            )?;
            if updated == 0 {
                return Err(ChatError::NotFound);
            }
            tx.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE chat_id = ?1 AND sender_role = ?2 AND is_read = 0",
                params![chat_id, role_to_str(reader_role.opposite())],
            )?;
            tx.commit()?;

            let chat = load_summary(conn, &chat_id)?.ok_or(ChatError::NotFound)?;
            Ok(chat.unread)
        })
        .await
    }

    /// Destructive maintenance action: purge a chat, its messages and its
    /// audit trail. Not a status transition.
    pub async fn delete(&self, chat_id: &str) -> Result<(), ChatError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM chat_messages WHERE chat_id = ?1", [&chat_id])?;
            tx.execute(
                "DELETE FROM assignment_history WHERE chat_id = ?1",
                [&chat_id],
            )?;
            let deleted = tx.execute("DELETE FROM chats WHERE id = ?1", [&chat_id])?;
            if deleted == 0 {
                return Err(ChatError::NotFound);
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn open_conn(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

fn open_history_entry(
    conn: &Connection,
    chat_id: &str,
    admin_id: &str,
    now: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO assignment_history (chat_id, admin_id, assigned_at) VALUES (?1, ?2, ?3)",
        params![chat_id, admin_id, now],
    )?;
    Ok(())
}

fn close_history_entry(conn: &Connection, chat_id: &str, now: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE assignment_history SET unassigned_at = ?2
         WHERE chat_id = ?1 AND unassigned_at IS NULL",
        params![chat_id, now],
    )?;
    Ok(())
}

fn load_summary(conn: &Connection, chat_id: &str) -> Result<Option<ChatSummary>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, customer_id, status, assigned_admin_id, unread_customer,
         unread_admin, last_message_at, created_at FROM chats WHERE id = ?1",
        [chat_id],
        summary_from_row,
    )
    .optional()
}

fn load_state(conn: &Connection, chat_id: &str) -> Result<Option<ChatState>, ChatError> {
    let summary = match load_summary(conn, chat_id)? {
        Some(s) => s,
        None => return Ok(None),
    };

    let mut messages = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, sender_id, sender_role, body, created_at, is_read
         FROM chat_messages WHERE chat_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map([chat_id], |row| {
        let role: String = row.get(3)?;
        Ok(ChatMessage {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_role: role_from_str(&role)?,
            body: row.get(4)?,
            created_at: row.get(5)?,
            is_read: row.get::<_, i64>(6)? != 0,
        })
    })?;
    for row in rows {
        messages.push(row?);
    }

    let mut assignment_history = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT admin_id, assigned_at, unassigned_at
         FROM assignment_history WHERE chat_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([chat_id], |row| {
        Ok(AssignmentEntry {
            admin_id: row.get(0)?,
            assigned_at: row.get(1)?,
            unassigned_at: row.get(2)?,
        })
    })?;
    for row in rows {
        assignment_history.push(row?);
    }

    Ok(Some(ChatState {
        id: summary.id,
        customer_id: summary.customer_id,
        status: summary.status,
        assigned_admin_id: summary.assigned_admin_id,
        unread: summary.unread,
        last_message_at: summary.last_message_at,
        created_at: summary.created_at,
        messages,
        assignment_history,
    }))
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> Result<ChatSummary, rusqlite::Error> {
    let status: String = row.get(2)?;
    Ok(ChatSummary {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        status: status_from_str(&status)?,
        assigned_admin_id: row.get(3)?,
        unread: UnreadCount {
            customer: row.get::<_, i64>(4)? as u32,
            admin: row.get::<_, i64>(5)? as u32,
        },
        last_message_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn status_to_str(status: ChatStatus) -> &'static str {
    match status {
        ChatStatus::Unassigned => "unassigned",
        ChatStatus::Assigned => "assigned",
        ChatStatus::Resolved => "resolved",
    }
}

fn status_from_str(s: &str) -> Result<ChatStatus, rusqlite::Error> {
    match s {
        "unassigned" => Ok(ChatStatus::Unassigned),
        "assigned" => Ok(ChatStatus::Assigned),
        "resolved" => Ok(ChatStatus::Resolved),
        other => Err(column_error(format!("unknown chat status: {other}"))),
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Customer => "customer",
        Role::Admin => "admin",
    }
}

fn role_from_str(s: &str) -> Result<Role, rusqlite::Error> {
    match s {
        "customer" => Ok(Role::Customer),
        "admin" => Ok(Role::Admin),
        other => Err(column_error(format!("unknown sender role: {other}"))),
    }
}

fn column_error(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

/// Current time as an ISO 8601 string (UTC, second precision).
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    time_to_iso8601(secs)
}

fn time_to_iso8601(secs: u64) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (hh, mm, ss) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days (Howard Hinnant's algorithm)
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!("{year:04}-{month:02}-{day:02}T{hh:02}:{mm:02}:{ss:02}Z")
}
