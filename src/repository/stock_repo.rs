// ==========================================
// 临期库存应急调拨系统 - 库存条目数据仓储
// ==========================================
// 红线: 本系统不直接扣减库存数量,只读 quantity/expiry/is_emergency
// 例外: risk_level 为派生字段,允许刷新
// ==========================================

use crate::domain::stock::StockItem;
use crate::domain::types::RiskLevel;
use crate::repository::codec::{date_to_db, parse_date, parse_opt_ts, ts_to_db};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT stock_item_id, product_name, branch_id, quantity, unit_price,
           expiry_date, is_emergency, emergency_declared_at, risk_level
    FROM stock_item
"#;

// ==========================================
// StockItemRepository - 库存条目仓储
// ==========================================
pub struct StockItemRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StockItemRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入或覆盖库存条目（外部导入/应急声明的落库入口）
    ///
    /// 每次写入刷新 quantity_synced_at: 此前完成的分派视为已计入 quantity
    pub fn upsert(&self, item: &StockItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO stock_item (
                stock_item_id, product_name, branch_id, quantity, unit_price,
                expiry_date, is_emergency, emergency_declared_at, risk_level,
                quantity_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(stock_item_id) DO UPDATE SET
                product_name = excluded.product_name,
                branch_id = excluded.branch_id,
                quantity = excluded.quantity,
                unit_price = excluded.unit_price,
                expiry_date = excluded.expiry_date,
                is_emergency = excluded.is_emergency,
                emergency_declared_at = excluded.emergency_declared_at,
                risk_level = excluded.risk_level,
                quantity_synced_at = excluded.quantity_synced_at
            "#,
            params![
                item.stock_item_id,
                item.product_name,
                item.branch_id,
                item.quantity,
                item.unit_price,
                date_to_db(&item.expiry_date),
                item.is_emergency as i32,
                item.emergency_declared_at.as_ref().map(ts_to_db),
                item.risk_level.map(|r| r.as_str()),
                ts_to_db(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, stock_item_id: &str) -> RepositoryResult<Option<StockItem>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE stock_item_id = ?1", SELECT_COLUMNS);
        let item = conn
            .query_row(&sql, params![stock_item_id], map_row)
            .optional()?;
        Ok(item)
    }

    /// 查询网点内全部库存条目
    pub fn find_by_branch(&self, branch_id: &str) -> RepositoryResult<Vec<StockItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE branch_id = ?1 ORDER BY expiry_date ASC, stock_item_id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![branch_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(items)
    }

    /// 查询网点内已声明应急的库存条目（按有效期升序）
    pub fn find_emergency_by_branch(&self, branch_id: &str) -> RepositoryResult<Vec<StockItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE branch_id = ?1 AND is_emergency = 1 ORDER BY expiry_date ASC, stock_item_id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![branch_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(items)
    }

    /// 批量刷新派生风险等级
    pub fn refresh_risk_levels(&self, levels: &[(String, RiskLevel)]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (stock_item_id, level) in levels {
            count += tx.execute(
                "UPDATE stock_item SET risk_level = ?1 WHERE stock_item_id = ?2",
                params![level.as_str(), stock_item_id],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

fn map_row(row: &Row) -> SqliteResult<StockItem> {
    let expiry_raw: String = row.get(5)?;
    let is_emergency: i32 = row.get(6)?;
    let risk_raw: Option<String> = row.get(8)?;

    Ok(StockItem {
        stock_item_id: row.get(0)?,
        product_name: row.get(1)?,
        branch_id: row.get(2)?,
        quantity: row.get(3)?,
        unit_price: row.get(4)?,
        expiry_date: parse_date(5, &expiry_raw)?,
        is_emergency: is_emergency != 0,
        emergency_declared_at: parse_opt_ts(7, row.get(7)?)?,
        risk_level: risk_raw.as_deref().and_then(RiskLevel::from_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn make_item(id: &str, branch: &str, emergency: bool, expiry: NaiveDate) -> StockItem {
        StockItem {
            stock_item_id: id.to_string(),
            product_name: format!("药品-{}", id),
            branch_id: branch.to_string(),
            quantity: 20,
            unit_price: 3.5,
            expiry_date: expiry,
            is_emergency: emergency,
            emergency_declared_at: None,
            risk_level: None,
        }
    }

    #[test]
    fn test_upsert_and_find_by_id() {
        let repo = StockItemRepository::new(setup_test_db());
        let item = make_item("S1", "B1", true, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        repo.upsert(&item).unwrap();

        let found = repo.find_by_id("S1").unwrap().unwrap();
        assert_eq!(found.quantity, 20);
        assert!(found.is_emergency);
        assert_eq!(found.expiry_date, item.expiry_date);

        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_find_emergency_by_branch_filters_flag_and_branch() {
        let repo = StockItemRepository::new(setup_test_db());
        let d = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        repo.upsert(&make_item("S1", "B1", true, d)).unwrap();
        repo.upsert(&make_item("S2", "B1", false, d)).unwrap();
        repo.upsert(&make_item("S3", "B2", true, d)).unwrap();

        let items = repo.find_emergency_by_branch("B1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].stock_item_id, "S1");
        assert_eq!(repo.find_by_branch("B1").unwrap().len(), 2);
    }

    #[test]
    fn test_refresh_risk_levels() {
        let repo = StockItemRepository::new(setup_test_db());
        let d = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        repo.upsert(&make_item("S1", "B1", true, d)).unwrap();

        let n = repo
            .refresh_risk_levels(&[("S1".to_string(), RiskLevel::Critical)])
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            repo.find_by_id("S1").unwrap().unwrap().risk_level,
            Some(RiskLevel::Critical)
        );
    }
}
