//! SQLite schema definition.

/// Complete database schema for the token queue.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Tokens (one row per booking)
-- ============================================================================

CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_number INTEGER NOT NULL CHECK (token_number >= 1),
    booking_date TEXT NOT NULL,                   -- YYYY-MM-DD
    patient_name TEXT NOT NULL,
    patient_phone TEXT NOT NULL,
    patient_age INTEGER NOT NULL,
    patient_gender TEXT NOT NULL DEFAULT 'male'
        CHECK (patient_gender IN ('male', 'female', 'other')),
    symptoms TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'waiting'
        CHECK (status IN ('waiting', 'called', 'served', 'skipped', 'cancelled')),
    estimated_time TEXT NOT NULL DEFAULT '',      -- display string, derived
    notify_sms INTEGER NOT NULL DEFAULT 0,
    notify_whatsapp INTEGER NOT NULL DEFAULT 0,
    called_at TEXT,
    served_at TEXT,
    cancelled_at TEXT,
    cancellation_reason TEXT,
    actual_wait_time INTEGER,                     -- minutes, fixed at serve
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (booking_date, token_number)           -- numbers never reused per day
);

CREATE INDEX IF NOT EXISTS idx_tokens_date_status ON tokens(booking_date, status);
CREATE INDEX IF NOT EXISTS idx_tokens_phone ON tokens(patient_phone);

-- ============================================================================
-- Sessions (one row per calendar date)
-- ============================================================================

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL UNIQUE,                    -- YYYY-MM-DD
    shift TEXT NOT NULL DEFAULT 'morning'
        CHECK (shift IN ('morning', 'evening', 'full-day')),
    status TEXT NOT NULL DEFAULT 'scheduled'
        CHECK (status IN ('scheduled', 'active', 'paused', 'ended', 'cancelled')),
    start_time TEXT,
    end_time TEXT,
    paused_at TEXT,
    delay_minutes INTEGER NOT NULL DEFAULT 0,
    total_patients INTEGER NOT NULL DEFAULT 0,
    served_patients INTEGER NOT NULL DEFAULT 0,
    skipped_patients INTEGER NOT NULL DEFAULT 0,
    cancelled_patients INTEGER NOT NULL DEFAULT 0,
    avg_wait_time INTEGER NOT NULL DEFAULT 0,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sessions_date_status ON sessions(date, status);

-- ============================================================================
-- Leaves (clinic closures, at most one per date)
-- ============================================================================

CREATE TABLE IF NOT EXISTS leaves (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL UNIQUE,                    -- YYYY-MM-DD
    reason TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'planned'
        CHECK (kind IN ('planned', 'emergency')),
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_leaves_date ON leaves(date);
"#;
