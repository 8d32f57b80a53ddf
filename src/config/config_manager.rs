// ==========================================
// 临期库存应急调拨系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 缺失或格式错误的配置项回退到默认值,并记录告警
// ==========================================

use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const REMINDER_WINDOW_HOURS: &str = "reminder.window_hours";
    pub const REMINDER_COOLDOWN_HOURS: &str = "reminder.cooldown_hours";
    pub const REMINDER_INTERVAL_SECS: &str = "reminder.interval_secs";
    pub const NOTIFICATION_MAX_RETRIES: &str = "notification.max_retries";
    pub const NOTIFICATION_BACKOFF_BASE_SECS: &str = "notification.backoff_base_secs";
    pub const NOTIFICATION_BACKOFF_MAX_SECS: &str = "notification.backoff_max_secs";
    pub const NOTIFICATION_CHANNEL_CAPACITY: &str = "notification.channel_capacity";
    pub const NOTIFICATION_DEFAULT_COUNTRY_CODE: &str = "notification.default_country_code";
    pub const NOTIFICATION_LOCALE: &str = "notification.locale";
}

// ==========================================
// DispatchConfig - 运行配置（类型化）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    // ===== 截止提醒 =====
    pub reminder_window_hours: i64,   // 提醒窗口（截止前多少小时内提醒）
    pub reminder_cooldown_hours: i64, // 同一分派两次提醒的最小间隔
    pub reminder_interval_secs: u64,  // 调度周期

    // ===== 通知出站队列 =====
    pub notification_max_retries: i32,
    pub notification_backoff_base_secs: i64,
    pub notification_backoff_max_secs: i64,
    pub notification_channel_capacity: usize,
    pub default_country_code: String, // 号码规范化时补全的国家码（不含+）
    pub locale: String,               // 通知模板语言
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reminder_window_hours: 24,
            reminder_cooldown_hours: 12,
            reminder_interval_secs: 3600,
            notification_max_retries: 3,
            notification_backoff_base_secs: 30,
            notification_backoff_max_secs: 3600,
            notification_channel_capacity: 64,
            default_country_code: String::new(),
            locale: "zh-CN".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn reminder_window(&self) -> Duration {
        Duration::hours(self.reminder_window_hours)
    }

    pub fn reminder_cooldown(&self) -> Duration {
        Duration::hours(self.reminder_cooldown_hours)
    }

    pub fn reminder_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reminder_interval_secs.max(1))
    }

    /// 第 retry_count 次失败后的退避时长（指数退避，封顶）
    pub fn backoff_for(&self, retry_count: i32) -> Duration {
        let exp = retry_count.clamp(0, 20) as u32;
        let secs = self
            .notification_backoff_base_secs
            .max(0)
            .saturating_mul(2_i64.saturating_pow(exp));
        Duration::seconds(secs.min(self.notification_backoff_max_secs.max(0)))
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 写入配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析数值配置，缺失/非法时回退默认值
    fn get_parsed_or<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        match self.get_global_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, default = %default, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// 加载类型化运行配置
    pub fn load_dispatch_config(&self) -> RepositoryResult<DispatchConfig> {
        let d = DispatchConfig::default();

        let locale = self
            .get_global_config_value(config_keys::NOTIFICATION_LOCALE)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(d.locale.clone());

        let default_country_code = self
            .get_global_config_value(config_keys::NOTIFICATION_DEFAULT_COUNTRY_CODE)?
            .map(|v| v.trim().trim_start_matches('+').to_string())
            .unwrap_or_default();

        let config = DispatchConfig {
            reminder_window_hours: self
                .get_parsed_or(config_keys::REMINDER_WINDOW_HOURS, d.reminder_window_hours)?,
            reminder_cooldown_hours: self
                .get_parsed_or(config_keys::REMINDER_COOLDOWN_HOURS, d.reminder_cooldown_hours)?,
            reminder_interval_secs: self
                .get_parsed_or(config_keys::REMINDER_INTERVAL_SECS, d.reminder_interval_secs)?,
            notification_max_retries: self
                .get_parsed_or(config_keys::NOTIFICATION_MAX_RETRIES, d.notification_max_retries)?,
            notification_backoff_base_secs: self.get_parsed_or(
                config_keys::NOTIFICATION_BACKOFF_BASE_SECS,
                d.notification_backoff_base_secs,
            )?,
            notification_backoff_max_secs: self.get_parsed_or(
                config_keys::NOTIFICATION_BACKOFF_MAX_SECS,
                d.notification_backoff_max_secs,
            )?,
            notification_channel_capacity: self.get_parsed_or(
                config_keys::NOTIFICATION_CHANNEL_CAPACITY,
                d.notification_channel_capacity,
            )?,
            default_country_code,
            locale,
        };

        tracing::debug!(?config, "运行配置已加载");
        Ok(config)
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        serde_json::to_string(&json!(config_map))
            .map_err(|e| RepositoryError::InternalError(e.to_string()))
    }
}
