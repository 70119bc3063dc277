use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const CREATE_LOGS: &str = "CREATE TABLE IF NOT EXISTS logs (
     id INTEGER PRIMARY KEY AUTOINCREMENT,
     timestamp TEXT NOT NULL,
     level TEXT NOT NULL,
     target TEXT NOT NULL,
     message TEXT NOT NULL,
     fields TEXT,
     conversation_id TEXT,
     turn_id TEXT
 );
 CREATE INDEX IF NOT EXISTS idx_logs_conversation ON logs(conversation_id);
 CREATE INDEX IF NOT EXISTS idx_logs_turn ON logs(turn_id);";

const DEFAULT_LIMIT: u32 = 100;

/// A WARN+ record persisted for operators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorLogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub conversation_id: Option<String>,
    pub turn_id: Option<String>,
}

/// Exact-match filters; `None` matches everything. Newest records first.
#[derive(Clone, Debug, Default)]
pub struct OperatorLogQuery {
    pub level: Option<String>,
    pub conversation_id: Option<String>,
    pub turn_id: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink for WARN+ events.
pub struct OperatorLog {
    conn: Mutex<Connection>,
}

impl OperatorLog {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(CREATE_LOGS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_LOGS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        // A failed log write must never take down the caller.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, conversation_id, turn_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.conversation_id,
                record.turn_id,
            ],
        );
    }

    pub fn query(&self, q: &OperatorLogQuery) -> Result<Vec<OperatorLogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, level, target, message, fields, conversation_id, turn_id
             FROM logs
             WHERE (?1 IS NULL OR level = ?1)
               AND (?2 IS NULL OR conversation_id = ?2)
               AND (?3 IS NULL OR turn_id = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let level = q.level.as_deref().map(str::to_uppercase);
        let rows = stmt.query_map(
            rusqlite::params![level, q.conversation_id, q.turn_id, q.limit.unwrap_or(DEFAULT_LIMIT)],
            |row| {
                Ok(OperatorLogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    conversation_id: row.get(6)?,
                    turn_id: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    conversation_id: Option<String>,
    turn_id: Option<String>,
}

/// tracing Layer that writes WARN+ events to an [`OperatorLog`].
pub struct OperatorLogLayer {
    sink: Arc<OperatorLog>,
}

impl OperatorLogLayer {
    pub fn new(sink: Arc<OperatorLog>) -> Self {
        Self { sink }
    }
}

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    conversation_id: Option<String>,
    turn_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            conversation_id: None,
            turn_id: None,
        }
    }

    fn record_string(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "conversation_id" => self.conversation_id = Some(value),
            "turn_id" => self.turn_id = Some(value),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_string(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_string(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Stored on spans so child events inherit conversation/turn ids.
struct SpanFields {
    conversation_id: Option<String>,
    turn_id: Option<String>,
}

impl<S> Layer<S> for OperatorLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.conversation_id.is_none() || visitor.turn_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.conversation_id.is_none() {
                            visitor.conversation_id.clone_from(&fields.conversation_id);
                        }
                        if visitor.turn_id.is_none() {
                            visitor.turn_id.clone_from(&fields.turn_id);
                        }
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            conversation_id: visitor.conversation_id,
            turn_id: visitor.turn_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if visitor.conversation_id.is_some() || visitor.turn_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanFields {
                    conversation_id: visitor.conversation_id,
                    turn_id: visitor.turn_id,
                });
            }
        }
    }
}
