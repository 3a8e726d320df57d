use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// `task_schedules` holds the durable intent for every recurring or one-off
/// schedule; `task_requests` is the audit trail of immediate dispatches.
/// Both reference the catalog's `tasks` table, so the catalog schema must be
/// created first on the same database.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS task_schedules (
            schedule_id         TEXT    NOT NULL PRIMARY KEY,
            user_schedule_name  TEXT    NOT NULL,
            live_schedule_name  TEXT    UNIQUE,
            task_name           TEXT    NOT NULL REFERENCES tasks(task_name),
            args                TEXT    NOT NULL,   -- JSON array
            kwargs              TEXT    NOT NULL,   -- JSON object
            schedule_type       TEXT    NOT NULL,
            schedule_data       TEXT    NOT NULL,   -- JSON, as submitted
            cancelled           INTEGER NOT NULL DEFAULT 0,
            created_by          TEXT,
            last_updated_by     TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            CHECK ((live_schedule_name IS NULL) = (schedule_type = 'IMMEDIATE'))
        );

        CREATE INDEX IF NOT EXISTS idx_task_schedules_task
            ON task_schedules (task_name, live_schedule_name);

        CREATE TABLE IF NOT EXISTS task_requests (
            request_id          TEXT    NOT NULL PRIMARY KEY,
            task_name           TEXT    NOT NULL REFERENCES tasks(task_name),
            user_schedule_name  TEXT    NOT NULL,
            executor            TEXT    NOT NULL,
            args                TEXT    NOT NULL,
            kwargs              TEXT    NOT NULL,
            status              TEXT    NOT NULL DEFAULT 'SUBMITTED',
            created_by          TEXT,
            last_updated_by     TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        );

        -- Recent-requests listing filters on created_at.
        CREATE INDEX IF NOT EXISTS idx_task_requests_created ON task_requests (created_at);
        ",
    )?;
    Ok(())
}
