// ==========================================
// 临期库存应急调拨系统 - 引擎层
// ==========================================
// 职责: 实现分级、评分、公平分派规则,不拼 SQL
// 红线: Engine 不拼 SQL, 不做 I/O, 输入相同输出相同
// ==========================================

pub mod distributor;
pub mod events;
pub mod risk_classifier;
pub mod workload;

// 重导出核心引擎
pub use distributor::{
    AllocationAccumulator, AllocationTable, CategoryAllocation, DispenserTarget,
    DistributionError, EquitableDistributor, ExecutionPlan, SkipReason, SkippedItem,
};
pub use events::{
    AssignmentEvent, AssignmentEventPublisher, AssignmentEventType, NoOpEventPublisher,
    OptionalEventPublisher,
};
pub use risk_classifier::RiskClassifier;
pub use workload::WorkloadScorer;
