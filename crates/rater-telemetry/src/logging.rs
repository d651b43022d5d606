use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS warnings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        logged_at TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        essay_id TEXT,
        blind_id TEXT,
        trait_name TEXT,
        error_kind TEXT,
        extra TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_warnings_essay ON warnings(essay_id);
    CREATE INDEX IF NOT EXISTS idx_warnings_blind ON warnings(blind_id);
";

/// One persisted warning or error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub logged_at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub essay_id: Option<String>,
    pub blind_id: Option<String>,
    pub trait_name: Option<String>,
    pub error_kind: Option<String>,
    /// Remaining event fields as a JSON object.
    pub extra: Option<String>,
}

/// Filters for [`SqliteLogSink::query`]. Unset filters match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub essay_id: Option<String>,
    pub blind_id: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite table of warn+ events from annotation work.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, level: &str, target: &str, fields: &EventFields) -> Result<(), rusqlite::Error> {
        let extra = (!fields.extra.is_empty())
            .then(|| Value::Object(fields.extra.clone()).to_string());
        self.conn.lock().execute(
            "INSERT INTO warnings
                 (logged_at, level, target, message, essay_id, blind_id, trait_name, error_kind, extra)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Utc::now().to_rfc3339(),
                level,
                target,
                fields.message.as_deref().unwrap_or_default(),
                fields.ids.essay_id,
                fields.ids.blind_id,
                fields.ids.trait_name,
                fields.error_kind,
                extra,
            ],
        )?;
        Ok(())
    }

    /// Newest first, at most `limit` (default 100) rows.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, logged_at, level, target, message, essay_id, blind_id, trait_name, error_kind, extra
             FROM warnings
             WHERE (?1 IS NULL OR level = ?1)
               AND (?2 IS NULL OR essay_id = ?2)
               AND (?3 IS NULL OR blind_id = ?3)
             ORDER BY id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![q.level, q.essay_id, q.blind_id, q.limit.unwrap_or(100)],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    logged_at: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    essay_id: row.get(5)?,
                    blind_id: row.get(6)?,
                    trait_name: row.get(7)?,
                    error_kind: row.get(8)?,
                    extra: row.get(9)?,
                })
            },
        )?;
        rows.collect()
    }

    /// Most recent record, if any.
    pub fn latest(&self) -> Result<Option<LogRecord>, rusqlite::Error> {
        Ok(self
            .query(&LogQuery {
                limit: Some(1),
                ..LogQuery::default()
            })?
            .into_iter()
            .next())
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM warnings", [], |row| row.get(0))
    }
}

/// Ids that locate an event in annotation work. Spans carry them so
/// events inside `save` or `open` inherit them.
#[derive(Clone, Debug, Default, PartialEq)]
struct WorkIds {
    essay_id: Option<String>,
    blind_id: Option<String>,
    trait_name: Option<String>,
}

impl WorkIds {
    fn is_empty(&self) -> bool {
        self.essay_id.is_none() && self.blind_id.is_none() && self.trait_name.is_none()
    }

    fn fill_from(&mut self, outer: &WorkIds) {
        for (mine, theirs) in [
            (&mut self.essay_id, &outer.essay_id),
            (&mut self.blind_id, &outer.blind_id),
            (&mut self.trait_name, &outer.trait_name),
        ] {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}

#[derive(Debug, Default)]
struct EventFields {
    message: Option<String>,
    ids: WorkIds,
    error_kind: Option<String>,
    extra: Map<String, Value>,
}

impl EventFields {
    fn put(&mut self, name: &str, value: Value) {
        let column = match name {
            "message" => &mut self.message,
            "essay_id" => &mut self.ids.essay_id,
            "blind_id" => &mut self.ids.blind_id,
            "trait_name" => &mut self.ids.trait_name,
            "error_kind" => &mut self.error_kind,
            other => {
                self.extra.insert(other.to_string(), value);
                return;
            }
        };
        *column = Some(match value {
            Value::String(s) => s,
            other => other.to_string(),
        });
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field.name(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field.name(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.into());
    }
}

/// Layer that writes warn and error events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        if fields.ids.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(ids) = span.extensions().get::<WorkIds>() {
                    fields.ids.fill_from(ids);
                }
            }
        }

        if let Err(e) = self.sink.insert(&level.to_string(), event.metadata().target(), &fields) {
            // logging from inside the layer would recurse
            eprintln!("rater-telemetry: dropped log record: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("logs.db")).unwrap();
        (dir, Arc::new(sink))
    }

    fn capture(sink: &Arc<SqliteLogSink>, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn only_warn_and_error_are_kept() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            tracing::debug!("chatty");
            tracing::info!("annotation saved");
            tracing::warn!("saving incomplete annotation");
            tracing::error!("backend unreachable");
        });
        assert_eq!(sink.count().unwrap(), 2);
        let latest = sink.latest().unwrap().unwrap();
        assert_eq!(latest.level, "ERROR");
        assert_eq!(latest.message, "backend unreachable");
    }

    #[test]
    fn rater_fields_land_in_columns() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            tracing::warn!(
                essay_id = 12_i64,
                trait_name = "content",
                stale = ?vec![6],
                "dropping selections past the essay"
            );
            tracing::warn!(status = 404_u64, error_kind = "not_found", "backend rejected request");
        });

        let records = sink.query(&LogQuery::default()).unwrap();
        let rejected = &records[0];
        assert_eq!(rejected.error_kind.as_deref(), Some("not_found"));
        assert_eq!(rejected.extra.as_deref(), Some(r#"{"status":404}"#));

        let stale = &records[1];
        assert_eq!(stale.essay_id.as_deref(), Some("12"));
        assert_eq!(stale.trait_name.as_deref(), Some("content"));
        assert_eq!(stale.extra.as_deref(), Some(r#"{"stale":"[6]"}"#));
        assert_eq!(stale.target, module_path!());
    }

    #[test]
    fn events_inherit_ids_from_enclosing_spans() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            let save = tracing::warn_span!("save", essay_id = 42_i64, blind_id = "b-7");
            let _outer = save.enter();
            let inner = tracing::info_span!("toggle", trait_name = "language");
            let _inner = inner.enter();
            tracing::warn!(essay_id = 43_i64, "explicit id wins");
        });

        let record = sink.latest().unwrap().unwrap();
        assert_eq!(record.essay_id.as_deref(), Some("43"));
        assert_eq!(record.blind_id.as_deref(), Some("b-7"));
        assert_eq!(record.trait_name.as_deref(), Some("language"));
        assert_eq!(record.extra, None);
    }

    #[test]
    fn query_filters_by_blind_id_and_level() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            tracing::warn!(blind_id = "b-1", "first essay");
            tracing::error!(blind_id = "b-1", "first essay failed");
            tracing::warn!(blind_id = "b-2", "second essay");
        });

        let for_b1 = sink
            .query(&LogQuery {
                blind_id: Some("b-1".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(for_b1.len(), 2);
        assert_eq!(for_b1[0].message, "first essay failed");

        let errors = sink
            .query(&LogQuery {
                blind_id: Some("b-1".into()),
                level: Some("ERROR".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn limit_keeps_the_newest() {
        let (_dir, sink) = sink();
        capture(&sink, || {
            for i in 0..5 {
                tracing::warn!(essay_id = i, "retry");
            }
        });
        let records = sink
            .query(&LogQuery {
                limit: Some(2),
                ..LogQuery::default()
            })
            .unwrap();
        let ids: Vec<_> = records.iter().filter_map(|r| r.essay_id.as_deref()).collect();
        assert_eq!(ids, vec!["4", "3"]);
    }

    #[test]
    fn reopening_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs.db");
        {
            let sink = Arc::new(SqliteLogSink::new(&path).unwrap());
            capture(&sink, || tracing::warn!("before restart"));
        }
        let sink = SqliteLogSink::new(&path).unwrap();
        assert_eq!(sink.count().unwrap(), 1);
    }
}
