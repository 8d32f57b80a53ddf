// ==========================================
// 临期库存应急调拨系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少调度器与人工操作并发写入时的偶发 busy 错误
// - 统一建表（幂等），供主程序与测试共用
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化全部表结构（幂等）
///
/// 表:
/// - stock_item / dispenser: 外部写入，本系统只读
/// - emergency_assignment: 应急分派
/// - movement_history: 调拨流水（只追加）
/// - notification_queue: 通知出站队列
/// - reminder_ledger: 截止提醒台账
/// - config_kv: 配置
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS stock_item (
            stock_item_id TEXT PRIMARY KEY,
            product_name TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            unit_price REAL NOT NULL DEFAULT 0,
            expiry_date TEXT NOT NULL,
            is_emergency INTEGER NOT NULL DEFAULT 0,
            emergency_declared_at TEXT,
            risk_level TEXT,
            quantity_synced_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_stock_item_branch
          ON stock_item(branch_id, is_emergency);

        CREATE TABLE IF NOT EXISTS dispenser (
            dispenser_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            contact TEXT,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE INDEX IF NOT EXISTS idx_dispenser_branch
          ON dispenser(branch_id, status);

        CREATE TABLE IF NOT EXISTS emergency_assignment (
            assignment_id TEXT PRIMARY KEY,
            stock_item_id TEXT NOT NULL REFERENCES stock_item(stock_item_id),
            dispenser_id TEXT NOT NULL REFERENCES dispenser(dispenser_id),
            assigned_quantity INTEGER NOT NULL CHECK (assigned_quantity > 0),
            deadline TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'cancelled')),
            notes TEXT,
            assigned_at TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_assignment_stock_status
          ON emergency_assignment(stock_item_id, status);

        CREATE INDEX IF NOT EXISTS idx_assignment_dispenser
          ON emergency_assignment(dispenser_id, status);

        CREATE TABLE IF NOT EXISTS movement_history (
            movement_id TEXT PRIMARY KEY,
            stock_item_id TEXT NOT NULL,
            from_branch_id TEXT NOT NULL,
            dispenser_id TEXT,
            quantity_moved INTEGER NOT NULL,
            movement_type TEXT NOT NULL,
            reference_id TEXT,
            moved_by TEXT NOT NULL,
            moved_at TEXT NOT NULL,
            notes TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_movement_stock
          ON movement_history(stock_item_id, moved_at);

        CREATE TABLE IF NOT EXISTS notification_queue (
            task_id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            recipient TEXT NOT NULL,
            body TEXT NOT NULL,
            metadata_json TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            next_attempt_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            sent_at TEXT,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_notification_queue_status
          ON notification_queue(status, next_attempt_at);

        CREATE TABLE IF NOT EXISTS reminder_ledger (
            assignment_id TEXT PRIMARY KEY
                REFERENCES emergency_assignment(assignment_id),
            last_sent_at TEXT NOT NULL,
            reminder_count INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )?;

    // v1 → v2: 库存数量同步时间
    ensure_column(conn, "stock_item", "quantity_synced_at", "TEXT")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 列不存在时补列（旧库升级）
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> rusqlite::Result<()> {
    let exists: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1", table),
        [column],
        |row| row.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {};", table, column, decl))?;
    }
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
