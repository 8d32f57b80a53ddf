// ==========================================
// 临期库存应急调拨系统 - 应急分派数据仓储
// ==========================================
// 红线: 同一库存条目 pending 分派数量之和 ≤ 库存数量（事务内复核）
// 红线: 状态只允许 pending → completed / cancelled（存储层守卫）
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use self::core::AssignmentRepository;
