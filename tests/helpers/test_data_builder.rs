// ==========================================
// 测试数据构建器 - 用于集成测试
// ==========================================

use chrono::{Duration, NaiveDate, Utc};
use emergency_dispatch::app::AppState;
use emergency_dispatch::domain::types::DispenserStatus;
use emergency_dispatch::domain::{Dispenser, StockItem};

// ==========================================
// StockItem 构建器
// ==========================================

pub struct StockItemBuilder {
    stock_item_id: String,
    product_name: String,
    branch_id: String,
    quantity: i64,
    unit_price: f64,
    expiry_date: NaiveDate,
    is_emergency: bool,
}

impl StockItemBuilder {
    pub fn new(stock_item_id: &str) -> Self {
        Self {
            stock_item_id: stock_item_id.to_string(),
            product_name: format!("product-{}", stock_item_id),
            branch_id: "B1".to_string(),
            quantity: 10,
            unit_price: 1.0,
            expiry_date: Utc::now().date_naive() + Duration::days(10),
            is_emergency: true,
        }
    }

    pub fn product(mut self, name: &str) -> Self {
        self.product_name = name.to_string();
        self
    }

    pub fn branch(mut self, branch_id: &str) -> Self {
        self.branch_id = branch_id.to_string();
        self
    }

    pub fn quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// 距今天的过期天数（负数表示已过期）
    pub fn expires_in_days(mut self, days: i64) -> Self {
        self.expiry_date = Utc::now().date_naive() + Duration::days(days);
        self
    }

    pub fn not_emergency(mut self) -> Self {
        self.is_emergency = false;
        self
    }

    pub fn build(self) -> StockItem {
        StockItem {
            stock_item_id: self.stock_item_id,
            product_name: self.product_name,
            branch_id: self.branch_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            expiry_date: self.expiry_date,
            is_emergency: self.is_emergency,
            emergency_declared_at: if self.is_emergency { Some(Utc::now()) } else { None },
            risk_level: None,
        }
    }

    /// 构建并写入数据库
    pub fn insert(self, state: &AppState) -> StockItem {
        let item = self.build();
        state.stock_repo.upsert(&item).expect("写入库存条目失败");
        item
    }
}

// ==========================================
// Dispenser 构建器
// ==========================================

pub struct DispenserBuilder {
    dispenser_id: String,
    name: String,
    branch_id: String,
    contact: Option<String>,
    status: DispenserStatus,
}

impl DispenserBuilder {
    pub fn new(dispenser_id: &str) -> Self {
        Self {
            dispenser_id: dispenser_id.to_string(),
            name: format!("name-{}", dispenser_id),
            branch_id: "B1".to_string(),
            contact: Some("+254700000001".to_string()),
            status: DispenserStatus::Active,
        }
    }

    pub fn branch(mut self, branch_id: &str) -> Self {
        self.branch_id = branch_id.to_string();
        self
    }

    pub fn contact(mut self, contact: Option<&str>) -> Self {
        self.contact = contact.map(str::to_string);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.status = DispenserStatus::Inactive;
        self
    }

    pub fn build(self) -> Dispenser {
        Dispenser {
            dispenser_id: self.dispenser_id,
            name: self.name,
            branch_id: self.branch_id,
            contact: self.contact,
            status: self.status,
        }
    }

    /// 构建并写入数据库
    pub fn insert(self, state: &AppState) -> Dispenser {
        let dispenser = self.build();
        state
            .dispenser_repo
            .upsert(&dispenser)
            .expect("写入配送员失败");
        dispenser
    }
}
