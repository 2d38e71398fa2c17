diesel::table! {
    secrets (id) {
        id -> Text,
        payload -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

/// Applied on startup; the table is created if it does not exist yet.
pub const CREATE_SECRETS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS secrets (
    id          TEXT PRIMARY KEY,
    payload     TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS secrets_created_at_idx ON secrets (created_at);
";
