//! Database schema and migrations for Depot.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Folder hierarchy
    r#"
CREATE TABLE folders (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    parent_id       INTEGER REFERENCES folders(id) ON DELETE CASCADE,
    access_rule     TEXT NOT NULL DEFAULT 'inherit',  -- 'inherit', 'anyone', 'logged_in', 'only_these'
    access_members  TEXT,                             -- comma-separated, for 'only_these'
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX idx_folders_parent_name ON folders(COALESCE(parent_id, 0), name);
"#,
    // v2: Asset records
    r#"
CREATE TABLE assets (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    folder_id           INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    name                TEXT NOT NULL,
    visibility          TEXT NOT NULL DEFAULT 'inherit',  -- 'inherit', 'public', 'protected'
    location            TEXT NOT NULL,                    -- path relative to the store root
    stored_visibility   TEXT NOT NULL,                    -- visibility the content was written under
    hash                TEXT NOT NULL,
    size                INTEGER NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE(folder_id, name)
);

CREATE INDEX idx_assets_folder ON assets(folder_id);
"#,
];
