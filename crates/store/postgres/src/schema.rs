/// Schema bootstrap, applied idempotently at startup.
///
/// `(ts)` indices serve newest-first listings; `(alert_id)` indices serve
/// the investigation/action joins.
pub(crate) const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS alerts (
    id          TEXT PRIMARY KEY,
    ts          TIMESTAMPTZ NOT NULL,
    severity    TEXT NOT NULL,
    record      JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS alerts_ts_idx ON alerts (ts DESC);

CREATE TABLE IF NOT EXISTS investigations (
    alert_id    TEXT PRIMARY KEY,
    ts          TIMESTAMPTZ NOT NULL,
    verdict     TEXT NOT NULL,
    record      JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS investigations_ts_idx ON investigations (ts DESC);

CREATE TABLE IF NOT EXISTS actions (
    id          TEXT PRIMARY KEY,
    alert_id    TEXT NOT NULL,
    ts          TIMESTAMPTZ NOT NULL,
    action_type TEXT NOT NULL,
    record      JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS actions_ts_idx ON actions (ts DESC);
CREATE INDEX IF NOT EXISTS actions_alert_idx ON actions (alert_id);
";
