//! End-to-end scenarios over the message pipeline and the callback
//! protocol, with the backend and the LLM mocked at their trait seams.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use cf_bitable::testing::{page_of, record_with_fields, MockBitableClient, Scripted};
use cf_bitable::FieldType;
use cf_domain::config::Config;
use cf_domain::pending::{
    ActionKind, ActionPayload, OperationEntry, OperationStatus, PendingAction, PendingStatus,
};
use cf_domain::record::{Record, TableRef};
use cf_gateway::runtime::{handle_callback, handle_message, CallbackInput, MessageInput};
use cf_gateway::state::AppState;
use cf_llm::MockLlm;
use cf_state::{InMemoryStateStore, ManualTime, StateManager};

fn case_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            record_with_fields(
                &format!("rec{i}"),
                &[
                    ("案号", &format!("(2024)粤0101民初{}号", 100 + i)),
                    ("案由", "合同纠纷"),
                    ("案件状态", "未结"),
                ],
            )
        })
        .collect()
}

fn build_state(client: Arc<MockBitableClient>, llm: Arc<MockLlm>) -> AppState {
    AppState::build(Arc::new(Config::default()), client, llm)
}

fn message(text: &str) -> MessageInput {
    MessageInput {
        open_id: "ou_user".into(),
        user_name: "王律师".into(),
        text: text.into(),
        event_id: None,
        chat_id: None,
        is_group_chat: false,
    }
}

fn callback(action: &str, value: serde_json::Value) -> CallbackInput {
    CallbackInput {
        open_id: "ou_user".into(),
        user_name: "王律师".into(),
        callback_action: action.into(),
        value,
        chat_id: None,
        is_group_chat: false,
    }
}

// ── S1: query happy path ────────────────────────────────────────────

#[tokio::test]
async fn s1_query_happy_path() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]));
    client.script("search", Scripted::Page(page_of(case_records(5))));
    let state = build_state(client, Arc::new(MockLlm::new()));

    let response = handle_message(&state, message("查所有案件")).await;
    assert!(response
        .text_fallback
        .starts_with("案件项目总库查询结果（共 5 条）"));

    let snapshot = state.states.state_of("ou_user");
    let last = snapshot.last_result.expect("last_result persisted");
    assert_eq!(last.value.records.len(), 5);
    assert_eq!(
        snapshot.active_table.expect("active_table persisted").value.table_id,
        "tbl1"
    );
}

// ── S2: table disambiguation ────────────────────────────────────────

#[tokio::test]
async fn s2_disambiguation_then_choice() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[
        ("tbl2", "合同管理表"),
        ("tbl3", "合同归档表"),
    ]));
    let state = build_state(client.clone(), Arc::new(MockLlm::new()));

    let first = handle_message(&state, message("看看合同")).await;
    assert!(first.text_fallback.contains("请回复表名确认"));
    assert!(first.text_fallback.contains("合同管理表"));

    let snapshot = state.states.state_of("ou_user");
    assert_eq!(
        snapshot.last_result.expect("candidates parked").value.candidates.len(),
        2
    );

    // The reply naming a candidate re-executes against that table.
    client.script("search", Scripted::Page(page_of(case_records(2))));
    let second = handle_message(&state, message("合同管理表")).await;
    assert!(second.text_fallback.contains("合同管理表查询结果"));
    assert_eq!(
        state
            .states
            .state_of("ou_user")
            .active_table
            .expect("table committed")
            .value
            .table_id,
        "tbl2"
    );
}

// ── S3: create propose → confirm → commit ───────────────────────────

#[tokio::test]
async fn s3_create_propose_confirm_commit() {
    let client = Arc::new(
        MockBitableClient::new()
            .with_tables(&[("tbl1", "案件项目总库")])
            .with_fields(
                "tbl1",
                &[
                    ("案号", FieldType::Text),
                    ("委托人", FieldType::Text),
                    ("案件状态", FieldType::SingleSelect),
                ],
            ),
    );
    let llm = Arc::new(MockLlm::new());
    llm.push_slots(&[("案号", "(2024)粤0101民初100号"), ("委托人", "张三")]);
    let state = build_state(client.clone(), llm);

    let proposal = handle_message(
        &state,
        message("新增一个案件，案号(2024)粤0101民初100号，委托人 张三"),
    )
    .await;
    assert!(proposal.text_fallback.contains("请确认后执行"));
    let card = proposal.card_template.expect("confirm card");
    assert_eq!(card.template_id, "action.confirm");
    assert_eq!(card.params["confirm_action"], "create_record_confirm");

    let pending = state.states.pending_action("ou_user").expect("parked");
    assert_eq!(pending.action, ActionKind::CreateRecord);
    assert_eq!(pending.status, PendingStatus::Proposed);

    let commit = handle_callback(
        &state,
        callback("create_record_confirm", json!({ "table_type": "case" })),
        None,
    )
    .await;
    assert!(commit.text_fallback.contains("创建成功"));
    assert_eq!(
        commit.card_template.expect("success card").template_id,
        "create.success"
    );

    // Exactly one backend write, carrying an idempotency key.
    {
        let writes = client.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].op, "create");
        assert!(writes[0].idempotency_key.is_some());
        // The registered default went out with the user fields.
        assert_eq!(writes[0].fields["案件状态"], json!("未结"));
    }

    // Slot cleared, history executed, focus moved to the new record.
    let snapshot = state.states.state_of("ou_user");
    assert!(snapshot.pending_action.is_none());
    assert_eq!(
        snapshot.pending_action_history.last().unwrap().action.status,
        PendingStatus::Executed
    );
    assert_eq!(
        snapshot.active_record.expect("active record").value.source,
        "mutation"
    );
}

// ── S4: double-tap confirm ──────────────────────────────────────────

#[tokio::test]
async fn s4_double_tap_creates_once() {
    let client = Arc::new(
        MockBitableClient::new()
            .with_tables(&[("tbl1", "案件项目总库")])
            .with_fields("tbl1", &[("案号", FieldType::Text)]),
    );
    let llm = Arc::new(MockLlm::new());
    llm.push_slots(&[("案号", "(2024)粤0101民初100号")]);
    let state = build_state(client.clone(), llm);

    handle_message(&state, message("新增案件，案号(2024)粤0101民初100号")).await;
    let value = json!({ "table_type": "case" });

    let first = handle_callback(&state, callback("create_record_confirm", value.clone()), None).await;
    assert!(first.text_fallback.contains("创建成功"));

    let second =
        handle_callback(&state, callback("create_record_confirm", value), None).await;
    assert_eq!(second.text_fallback, "已处理");

    assert_eq!(client.writes.lock().len(), 1);
}

// ── S5: batch partial failure + retry ───────────────────────────────

fn batch_update_payload(record_id: &str) -> ActionPayload {
    ActionPayload::Update {
        table: TableRef::new("tbl1", "案件项目总库"),
        record_id: record_id.into(),
        fields: BTreeMap::from([("案件状态".to_string(), json!("已结案"))]),
        diff: Vec::new(),
        reminders: Vec::new(),
    }
}

#[tokio::test]
async fn s5_batch_partial_failure_then_retry() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]));
    client.fail_writes_for("rec_b");
    let state = build_state(client.clone(), Arc::new(MockLlm::new()));

    let action = PendingAction::new(
        ActionKind::BatchUpdateRecords,
        batch_update_payload("rec_a"),
        Utc::now(),
        300,
    )
    .with_operations(vec![
        OperationEntry::new(0, batch_update_payload("rec_a")),
        OperationEntry::new(1, batch_update_payload("rec_b")),
        OperationEntry::new(2, batch_update_payload("rec_c")),
    ]);
    state.states.set_pending_action("ou_user", action);

    let outcome = handle_callback(
        &state,
        callback("batch_update_records_confirm", json!({})),
        None,
    )
    .await;
    assert!(outcome.text_fallback.contains("成功 1 条"));
    assert!(outcome.text_fallback.contains("失败 1 条"));
    assert!(outcome.text_fallback.contains("重试"));

    let pending = state.states.pending_action("ou_user").expect("still parked");
    assert_eq!(pending.operations[0].status, OperationStatus::Succeeded);
    assert_eq!(pending.operations[1].status, OperationStatus::Failed);
    assert_eq!(
        pending.operations[1].error_code.as_deref(),
        Some("record_not_found")
    );
    assert_eq!(pending.operations[2].status, OperationStatus::Skipped);

    // Retry: only the failed and skipped entries run again.
    let retry = handle_callback(
        &state,
        callback("batch_update_records_retry", json!({})),
        None,
    )
    .await;
    assert!(retry.text_fallback.contains("失败 1 条"));

    let pending = state.states.pending_action("ou_user").expect("parked for retry");
    assert_eq!(pending.operations[0].status, OperationStatus::Succeeded);
    assert_eq!(pending.operations[1].status, OperationStatus::Failed);
    assert_eq!(pending.operations[2].status, OperationStatus::Skipped);

    // rec_a was written exactly once across both rounds.
    let writes = client.writes.lock();
    let rec_a_writes = writes
        .iter()
        .filter(|w| w.record_id.as_deref() == Some("rec_a"))
        .count();
    assert_eq!(rec_a_writes, 1);
}

// ── S6: pending expiry ──────────────────────────────────────────────

#[tokio::test]
async fn s6_confirm_after_expiry_is_rejected() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]));
    let mut state = build_state(client.clone(), Arc::new(MockLlm::new()));

    // Swap in a controllable clock for the state manager.
    let time = ManualTime::new(Utc::now());
    state.states = Arc::new(StateManager::new(
        Arc::new(InMemoryStateStore::new()),
        Arc::new(time.clone()),
        Config::default().state.clone(),
    ));

    let action = PendingAction::new(
        ActionKind::DeleteRecord,
        ActionPayload::Delete {
            table: TableRef::new("tbl1", "案件项目总库"),
            record_id: "rec1".into(),
            summary: Default::default(),
        },
        Utc::now(),
        300,
    );
    state.states.set_pending_action("ou_user", action);

    time.advance_secs(301);

    let response = handle_callback(
        &state,
        callback("delete_record_confirm", json!({})),
        None,
    )
    .await;
    assert_eq!(response.text_fallback, "操作已过期，请重新发起");

    // Nothing was deleted; the action landed in history as invalidated.
    assert!(client.writes.lock().is_empty());
    let history = state.states.pending_history("ou_user");
    assert_eq!(history.last().unwrap().action.status, PendingStatus::Invalidated);
}

// ── Callback-name mismatch (stale card) ─────────────────────────────

#[tokio::test]
async fn stale_card_callback_is_rejected() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]));
    let state = build_state(client.clone(), Arc::new(MockLlm::new()));

    let action = PendingAction::new(
        ActionKind::UpdateRecord,
        batch_update_payload("rec_a"),
        Utc::now(),
        300,
    );
    state.states.set_pending_action("ou_user", action);

    // The card says delete, the pending action is an update: reject.
    let response = handle_callback(
        &state,
        callback("delete_record_confirm", json!({})),
        None,
    )
    .await;
    assert_eq!(response.text_fallback, "操作已过期，请重新发起");
    assert!(client.writes.lock().is_empty());
    // The pending action is untouched.
    assert!(state.states.pending_action("ou_user").is_some());
}

// ── Cancel path ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_invalidates_without_writing() {
    let client = Arc::new(MockBitableClient::new().with_tables(&[("tbl1", "案件项目总库")]));
    let state = build_state(client.clone(), Arc::new(MockLlm::new()));

    let action = PendingAction::new(
        ActionKind::DeleteRecord,
        ActionPayload::Delete {
            table: TableRef::new("tbl1", "案件项目总库"),
            record_id: "rec1".into(),
            summary: Default::default(),
        },
        Utc::now(),
        300,
    );
    state.states.set_pending_action("ou_user", action);

    let response = handle_callback(
        &state,
        callback("delete_record_cancel", json!({})),
        None,
    )
    .await;
    assert!(response.text_fallback.contains("已取消"));
    assert!(client.writes.lock().is_empty());
    let history = state.states.pending_history("ou_user");
    assert_eq!(history.last().unwrap().action.status, PendingStatus::Invalidated);
}
