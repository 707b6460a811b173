/// Schema for the cache partitions and the pending write queue.
pub const SCHEMA: &str = r#"
-- Named cache partitions; rowid order is creation order
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request/response pairs keyed by full URL within a partition
CREATE TABLE IF NOT EXISTS cache_entries (
    partition_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, url)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(url);

-- Writes queued while offline, replayed by background sync
CREATE TABLE IF NOT EXISTS pending_messages (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
