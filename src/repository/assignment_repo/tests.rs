use super::AssignmentRepository;
use crate::domain::assignment::EmergencyAssignment;
use crate::domain::types::AssignmentStatus;
use crate::repository::error::RepositoryError;
use chrono::{Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();

    conn.execute_batch(
        r#"
        INSERT INTO stock_item (stock_item_id, product_name, branch_id, quantity, unit_price, expiry_date, is_emergency)
        VALUES ('S1', '阿莫西林', 'B1', 10, 2.5, '2026-04-01', 1);
        INSERT INTO dispenser (dispenser_id, name, branch_id, contact, status)
        VALUES ('D1', '张三', 'B1', '0712345678', 'active');
        INSERT INTO dispenser (dispenser_id, name, branch_id, contact, status)
        VALUES ('D2', '李四', 'B1', NULL, 'active');
        "#,
    )
    .unwrap();

    Arc::new(Mutex::new(conn))
}

fn make_assignment(id: &str, dispenser: &str, qty: i64) -> EmergencyAssignment {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
    EmergencyAssignment {
        assignment_id: id.to_string(),
        stock_item_id: "S1".to_string(),
        dispenser_id: dispenser.to_string(),
        assigned_quantity: qty,
        deadline: now + Duration::days(2),
        status: AssignmentStatus::Pending,
        notes: None,
        assigned_at: now,
        assigned_by: "tester".to_string(),
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_insert_returns_joined_view() {
    let repo = AssignmentRepository::new(setup_test_db());

    let view = repo.insert(&make_assignment("A1", "D1", 4)).unwrap();
    assert_eq!(view.assignment.assigned_quantity, 4);
    assert_eq!(view.product_name.as_deref(), Some("阿莫西林"));
    assert_eq!(view.branch_id.as_deref(), Some("B1"));
    assert_eq!(view.dispenser_name.as_deref(), Some("张三"));
    assert_eq!(view.dispenser_contact.as_deref(), Some("0712345678"));
    assert_eq!(repo.pending_quantity_by_item("S1").unwrap(), 4);
}

#[test]
fn test_insert_rejects_over_allocation() {
    let repo = AssignmentRepository::new(setup_test_db());
    repo.insert(&make_assignment("A1", "D1", 7)).unwrap();

    let err = repo.insert(&make_assignment("A2", "D2", 4)).unwrap_err();
    match err {
        RepositoryError::OverAllocation {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 4);
            assert_eq!(available, 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(repo.count_by_item("S1").unwrap(), 1);
}

#[test]
fn test_batch_insert_is_all_or_nothing() {
    let repo = AssignmentRepository::new(setup_test_db());

    let batch = vec![
        make_assignment("A1", "D1", 6),
        make_assignment("A2", "D2", 5), // 6 + 5 > 10
    ];
    assert!(repo.batch_insert(&batch).is_err());
    assert_eq!(repo.count_by_item("S1").unwrap(), 0);

    let ok = vec![make_assignment("A1", "D1", 5), make_assignment("A2", "D2", 5)];
    let views = repo.batch_insert(&ok).unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(repo.pending_quantity_by_item("S1").unwrap(), 10);
}

#[test]
fn test_completed_sets_completed_at_and_is_terminal() {
    let repo = AssignmentRepository::new(setup_test_db());
    repo.insert(&make_assignment("A1", "D1", 3)).unwrap();

    let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let view = repo
        .update_status("A1", AssignmentStatus::Completed, now)
        .unwrap();
    assert_eq!(view.assignment.status, AssignmentStatus::Completed);
    assert_eq!(view.assignment.completed_at, Some(now));

    for to in [
        AssignmentStatus::Pending,
        AssignmentStatus::Cancelled,
        AssignmentStatus::Completed,
    ] {
        let err = repo.update_status("A1", to, now).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
    }

    // 完成后释放 pending 占用
    assert_eq!(repo.pending_quantity_by_item("S1").unwrap(), 0);
}

#[test]
fn test_cancel_does_not_set_completed_at() {
    let repo = AssignmentRepository::new(setup_test_db());
    repo.insert(&make_assignment("A1", "D1", 3)).unwrap();

    let view = repo
        .update_status("A1", AssignmentStatus::Cancelled, Utc::now())
        .unwrap();
    assert_eq!(view.assignment.status, AssignmentStatus::Cancelled);
    assert!(view.assignment.completed_at.is_none());
}

#[test]
fn test_update_status_unknown_id() {
    let repo = AssignmentRepository::new(setup_test_db());
    let err = repo
        .update_status("missing", AssignmentStatus::Completed, Utc::now())
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
}

#[test]
fn test_history_excludes_cancelled() {
    let repo = AssignmentRepository::new(setup_test_db());
    repo.insert(&make_assignment("A1", "D1", 2)).unwrap();
    repo.insert(&make_assignment("A2", "D2", 2)).unwrap();
    repo.update_status("A2", AssignmentStatus::Cancelled, Utc::now())
        .unwrap();

    let history = repo.find_history_by_branch("B1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].assignment_id, "A1");

    assert_eq!(repo.find_pending().unwrap().len(), 1);
    assert_eq!(repo.find_by_branch("B1").unwrap().len(), 2);
}

#[test]
fn test_completed_units_stay_held_until_quantity_sync() {
    let conn = setup_test_db();
    let repo = AssignmentRepository::new(conn.clone());
    repo.insert(&make_assignment("A1", "D1", 6)).unwrap();
    repo.update_status("A1", AssignmentStatus::Completed, Utc::now())
        .unwrap();

    assert_eq!(repo.pending_quantity_by_item("S1").unwrap(), 0);
    assert_eq!(repo.held_quantity_by_item("S1").unwrap(), 6);

    let err = repo.insert(&make_assignment("A2", "D2", 5)).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::OverAllocation { available: 4, .. }
    ));

    // 外部同步: 数量已扣减为 4,同步时间晚于完成时间
    let synced_at = crate::repository::codec::ts_to_db(&(Utc::now() + Duration::seconds(1)));
    conn.lock()
        .unwrap()
        .execute(
            "UPDATE stock_item SET quantity = 4, quantity_synced_at = ?1 WHERE stock_item_id = 'S1'",
            [synced_at],
        )
        .unwrap();

    assert_eq!(repo.held_quantity_by_item("S1").unwrap(), 0);
    repo.insert(&make_assignment("A2", "D2", 4)).unwrap();
    assert_eq!(repo.held_quantity_by_item("S1").unwrap(), 4);
}

#[test]
fn test_cancelled_units_are_released() {
    let repo = AssignmentRepository::new(setup_test_db());
    repo.insert(&make_assignment("A1", "D1", 6)).unwrap();
    repo.update_status("A1", AssignmentStatus::Cancelled, Utc::now())
        .unwrap();

    assert_eq!(repo.held_quantity_by_item("S1").unwrap(), 0);
    repo.insert(&make_assignment("A2", "D2", 10)).unwrap();
}
