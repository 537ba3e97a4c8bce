pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE IF NOT EXISTS hosts (
  ip_address        TEXT PRIMARY KEY,
  hostname          TEXT,
  first_seen_ms     INTEGER NOT NULL,
  last_observed_ms  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS port_state (
  ip_address      TEXT NOT NULL REFERENCES hosts(ip_address) ON DELETE CASCADE,
  port            INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  status          TEXT NOT NULL CHECK (status IN ('open','closed','filtered','unfiltered','open|filtered','closed|filtered')),
  observed_ms     INTEGER NOT NULL,
  PRIMARY KEY (ip_address, port)
);

CREATE TABLE IF NOT EXISTS port_history (
  history_id      INTEGER PRIMARY KEY AUTOINCREMENT,
  ip_address      TEXT NOT NULL REFERENCES hosts(ip_address) ON DELETE CASCADE,
  port            INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  status          TEXT NOT NULL CHECK (status IN ('open','closed','filtered','unfiltered','open|filtered','closed|filtered')),
  observed_ms     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS port_changes (
  change_id       INTEGER PRIMARY KEY AUTOINCREMENT,
  ip_address      TEXT NOT NULL REFERENCES hosts(ip_address) ON DELETE CASCADE,
  port            INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  change_kind     TEXT NOT NULL CHECK (change_kind IN ('added','removed','updated')),
  observed_ms     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_lookup ON port_history(ip_address, port, observed_ms);
CREATE INDEX IF NOT EXISTS idx_changes_host ON port_changes(ip_address, observed_ms);

COMMIT;
"#
;
