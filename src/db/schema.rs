//! Table definitions.
//!
//! Every statement is idempotent so `Storage::open` can run them on each start.

/// `(table name, CREATE statement)` in dependency order.
pub const TABLES: &[(&str, &str)] = &[
    (
        "accounts",
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            username      TEXT    NOT NULL UNIQUE,
            password      TEXT    NOT NULL,
            email         TEXT    NOT NULL UNIQUE,
            level         INTEGER NOT NULL,
            registered_at INTEGER NOT NULL,
            last_login    INTEGER
        )
        "#,
    ),
    (
        "characters",
        r#"
        CREATE TABLE IF NOT EXISTS characters (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id        INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            name              TEXT    NOT NULL UNIQUE,
            slot              INTEGER NOT NULL,
            gender            INTEGER NOT NULL,
            hair_style        INTEGER NOT NULL,
            hair_color        INTEGER NOT NULL,
            level             INTEGER NOT NULL,
            character_points  INTEGER NOT NULL,
            correction_points INTEGER NOT NULL,
            money             INTEGER NOT NULL,
            map_id            INTEGER NOT NULL,
            x                 INTEGER NOT NULL,
            y                 INTEGER NOT NULL
        )
        "#,
    ),
    (
        "character_attributes",
        r#"
        CREATE TABLE IF NOT EXISTS character_attributes (
            character_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
            attribute    INTEGER NOT NULL,
            value        INTEGER NOT NULL,
            PRIMARY KEY (character_id, attribute)
        )
        "#,
    ),
    (
        "inventories",
        r#"
        CREATE TABLE IF NOT EXISTS inventories (
            character_id INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
            slot         INTEGER NOT NULL,
            item_id      INTEGER NOT NULL,
            amount       INTEGER NOT NULL,
            PRIMARY KEY (character_id, slot)
        )
        "#,
    ),
    (
        "guilds",
        r#"
        CREATE TABLE IF NOT EXISTS guilds (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT    NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "guild_members",
        r#"
        CREATE TABLE IF NOT EXISTS guild_members (
            guild_id    INTEGER NOT NULL REFERENCES guilds(id) ON DELETE CASCADE,
            member_name TEXT    NOT NULL,
            rights      INTEGER NOT NULL,
            PRIMARY KEY (guild_id, member_name)
        )
        "#,
    ),
    (
        "channels",
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id           INTEGER PRIMARY KEY,
            name         TEXT    NOT NULL,
            announcement TEXT    NOT NULL,
            password     TEXT,
            joinable     INTEGER NOT NULL
        )
        "#,
    ),
];

/// Secondary indexes, created after the tables.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_characters_account ON characters(account_id)",
    "CREATE INDEX IF NOT EXISTS idx_guild_members_name ON guild_members(member_name)",
];
