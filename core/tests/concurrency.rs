//! Several connections to one database file, racing on the same rows.

use rust_decimal_macros::dec;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use wekeza_core::{
    agency_gateway::{AgencyTxnStatus, AgencyTxnType, AuthRequest, TransactionRequest},
    agent_manager::{AgentStatus, AgentType, FloatOperation, OnboardAgentRequest},
    authorization_queue::{MakerInfo, Priority, QueueStatus},
    engine::DfsEngine,
    error::ErrorKind,
    ledger::{AccountType, PostingMeta},
    operation::{CashMovement, QueuedOperation},
    types::Money,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn file_engine() -> (TempDir, DfsEngine) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dfs.db");
    let engine = DfsEngine::build_test_at(path.to_str().unwrap()).unwrap();
    (dir, engine)
}

fn open_account(engine: &DfsEngine, balance: Money) -> String {
    let ledger = engine.ledger();
    let account = ledger
        .open_account("Shared account", AccountType::Savings, None, None)
        .unwrap();
    if balance > Money::ZERO {
        ledger
            .credit(
                &account.account_number,
                balance,
                "SEED",
                PostingMeta::new("opening balance", "BRANCH"),
            )
            .unwrap();
    }
    account.account_number
}

fn active_agent(engine: &DfsEngine, n: usize) -> String {
    let agents = engine.agents();
    let agent = agents
        .onboard(&OnboardAgentRequest {
            agent_name: format!("Agent {n}"),
            national_id: format!("NID-{n:04}"),
            phone_number: format!("+2547220{n:05}"),
            agent_type: AgentType::Retailer,
            parent_agent_id: None,
            business_name: None,
            pin: "2468".to_string(),
            location: None,
            kyc_documents: Vec::new(),
            created_by: "OFFICER-1".to_string(),
        })
        .unwrap();
    agents
        .approve(&agent.agent_id, "MANAGER-1", None)
        .unwrap();
    agent.agent_id
}

/// Run `work` on `n` threads, each with its own connection, released together.
fn race<T, F>(engine: &DfsEngine, n: usize, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, &DfsEngine) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let work = Arc::new(work);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let conn = engine.reopen().unwrap();
            let barrier = barrier.clone();
            let work = work.clone();
            thread::spawn(move || {
                barrier.wait();
                work(i, &conn)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Many checkers approving the same item at once: exactly one executes.
#[test]
fn concurrent_approvals_execute_once() {
    let (_dir, engine) = file_engine();
    let account = open_account(&engine, Money::ZERO);
    let queue_id = engine
        .queue()
        .submit(
            &QueuedOperation::CashDeposit(CashMovement {
                account_number: account.clone(),
                amount: dec!(100000),
                narration: None,
            }),
            &MakerInfo {
                maker_id: "TLR-001".to_string(),
                maker_name: "Grace Teller".to_string(),
                branch_code: "NBO-001".to_string(),
            },
            Priority::Medium,
        )
        .unwrap()
        .queue_id;

    let id = queue_id.clone();
    let results = race(&engine, 8, move |i, conn| {
        conn.queue().approve(&id, &format!("SUP-{i:03}"))
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "exactly one approval wins");
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind(), ErrorKind::Conflict, "losers see a conflict: {err}");
    }

    assert_eq!(engine.ledger().account(&account).unwrap().balance, dec!(100000));
    assert_eq!(engine.store().posting_count(&account).unwrap(), 1);
    assert_eq!(engine.store().event_count("queue_item_completed").unwrap(), 1);
    assert_eq!(engine.queue().get(&queue_id).unwrap().status, QueueStatus::Completed);
}

/// Deposits racing on one agent's float never overdraw it.
#[test]
fn concurrent_cash_in_respects_float() {
    let (_dir, engine) = file_engine();
    let agents = engine.agents();
    let agent = agents
        .onboard(&OnboardAgentRequest {
            agent_name: "Gikomba Stores".to_string(),
            national_id: "NID-RACE".to_string(),
            phone_number: "+254722000000".to_string(),
            agent_type: AgentType::Retailer,
            parent_agent_id: None,
            business_name: None,
            pin: "2468".to_string(),
            location: None,
            kyc_documents: Vec::new(),
            created_by: "OFFICER-1".to_string(),
        })
        .unwrap();
    agents
        .approve(&agent.agent_id, "MANAGER-1", Some(dec!(10000)))
        .unwrap();
    let account = open_account(&engine, Money::ZERO);
    let session = engine
        .gateway()
        .authenticate(&AuthRequest {
            agent_id: agent.agent_id.clone(),
            device_id: "POS-RACE".to_string(),
            pin: "2468".to_string(),
            biometric: false,
            location: None,
        })
        .unwrap();

    let token = session.session_token.clone();
    let customer = account.clone();
    let results = race(&engine, 4, move |_, conn| {
        conn.gateway().process_transaction(
            &token,
            &TransactionRequest {
                transaction_type: AgencyTxnType::CashIn,
                customer_account: customer.clone(),
                amount: dec!(4000),
                location: None,
            },
        )
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 2, "only two 4000 deposits fit in a 10000 float");

    let store = engine.store();
    assert_eq!(engine.agents().agent(&agent.agent_id).unwrap().float_balance, dec!(2000));
    assert_eq!(engine.ledger().account(&account).unwrap().balance, dec!(8000));
    assert_eq!(
        store
            .agency_transaction_count(&agent.agent_id, AgencyTxnStatus::Completed)
            .unwrap(),
        2
    );
    assert_eq!(
        store
            .agency_transaction_count(&agent.agent_id, AgencyTxnStatus::Failed)
            .unwrap(),
        2
    );
    // INITIAL_CREDIT plus the two deposits.
    assert_eq!(store.float_transaction_count(&agent.agent_id).unwrap(), 3);
}

/// Termination racing a float top-up: one of them wins, and a terminated
/// agent never holds float.
#[test]
fn terminate_and_float_credit_do_not_interleave() {
    let (_dir, engine) = file_engine();
    for round in 0..20 {
        let agent_id = active_agent(&engine, round);
        let id = agent_id.clone();
        let results = race(&engine, 2, move |i, conn| {
            let agents = conn.agents();
            if i == 0 {
                agents.terminate(&id, "exit", "MANAGER-1").map(|_| ())
            } else {
                agents
                    .adjust_float(&id, FloatOperation::Credit, dec!(100), "OPS", None)
                    .map(|_| ())
            }
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1, "round {round}: exactly one side wins");
        let agent = engine.agents().agent(&agent_id).unwrap();
        if agent.status == AgentStatus::Terminated {
            assert_eq!(agent.float_balance, Money::ZERO, "round {round}");
        } else {
            assert_eq!(agent.float_balance, dec!(100), "round {round}");
        }
    }
}
