use rust_decimal_macros::dec;
use wekeza_core::{
    agent_manager::{AgentType, OnboardAgentRequest},
    authorization_queue::{MakerInfo, PendingFilter, Priority, QueueStatus},
    engine::DfsEngine,
    error::{DfsError, ErrorKind},
    executor::{CustomerType, ExecutionOutcome, LoanStatus},
    ledger::{AccountStatus, AccountType, PostingMeta},
    operation::{
        AccountClosure, BankTransfer, CashMovement, FloatTopup, LoanApplication, LoanRepayment,
        NewAccount, NewCustomer, PolicySale, QueuedOperation,
    },
    types::Money,
};

// ── Test helpers ────────────────────────────────────────────────────────────

const MAKER: &str = "TLR-001";
const CHECKER: &str = "SUP-001";

fn make_engine() -> DfsEngine {
    DfsEngine::build_test().unwrap()
}

fn maker(branch_code: &str) -> MakerInfo {
    MakerInfo {
        maker_id: MAKER.to_string(),
        maker_name: "Grace Teller".to_string(),
        branch_code: branch_code.to_string(),
    }
}

fn submit(engine: &DfsEngine, op: QueuedOperation, priority: Priority) -> String {
    engine
        .queue()
        .submit(&op, &maker("NBO-001"), priority)
        .unwrap()
        .queue_id
}

fn approve(engine: &DfsEngine, op: QueuedOperation) -> ExecutionOutcome {
    let queue_id = submit(engine, op, Priority::Medium);
    engine.queue().approve(&queue_id, CHECKER).unwrap().result
}

fn new_customer(national_id: &str) -> QueuedOperation {
    QueuedOperation::CifCreate(NewCustomer {
        full_name: "Amina Wanjiru".to_string(),
        national_id: national_id.to_string(),
        phone_number: "+254700000001".to_string(),
        email: None,
        customer_type: CustomerType::Individual,
    })
}

fn funded_account(engine: &DfsEngine, balance: Money) -> String {
    let ledger = engine.ledger();
    let account = ledger
        .open_account("Branch customer", AccountType::Current, None, None)
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

fn balance_of(engine: &DfsEngine, account: &str) -> Money {
    engine.ledger().account(account).unwrap().balance
}

// ── Submit and approve ───────────────────────────────────────────────────────

/// Submitting parks the operation; nothing happens until a checker approves.
#[test]
fn cif_create_runs_only_on_approval() {
    let engine = make_engine();
    let queue = engine.queue();

    let receipt = queue
        .submit(&new_customer("ID-1001"), &maker("NBO-001"), Priority::High)
        .unwrap();
    assert!(receipt.queue_id.starts_with("AQ-"));
    assert_eq!(receipt.status, "PENDING_APPROVAL");
    assert_eq!(engine.store().customer_count().unwrap(), 0);

    let item = queue.get(&receipt.queue_id).unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.transaction_type, "CIF_CREATE");
    assert_eq!(item.operation().unwrap(), new_customer("ID-1001"));

    let approval = queue.approve(&receipt.queue_id, CHECKER).unwrap();
    assert_eq!(approval.status, QueueStatus::Completed);
    let ExecutionOutcome::CustomerCreated { cif_number } = &approval.result else {
        panic!("expected a new customer, got {:?}", approval.result);
    };
    assert!(cif_number.starts_with("CIF"));
    assert_eq!(engine.store().customer_count().unwrap(), 1);

    let item = queue.get(&receipt.queue_id).unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.approved_by.as_deref(), Some(CHECKER));
    assert!(item.completed_at.is_some());
    assert_eq!(
        item.execution_result,
        Some(serde_json::to_value(&approval.result).unwrap())
    );
}

/// An item executes at most once.
#[test]
fn second_approval_is_a_conflict() {
    let engine = make_engine();
    let queue_id = submit(&engine, new_customer("ID-1002"), Priority::High);
    engine.queue().approve(&queue_id, CHECKER).unwrap();

    let err = engine.queue().approve(&queue_id, "SUP-002").unwrap_err();
    assert!(matches!(err, DfsError::QueueItemNotPending { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(engine.store().customer_count().unwrap(), 1);
    assert_eq!(engine.store().event_count("queue_item_completed").unwrap(), 1);
}

/// Makers cannot check their own work, either way.
#[test]
fn maker_cannot_approve_or_reject_own_item() {
    let engine = make_engine();
    let queue_id = submit(&engine, new_customer("ID-1003"), Priority::High);
    let queue = engine.queue();

    let err = queue.approve(&queue_id, MAKER).unwrap_err();
    assert!(matches!(err, DfsError::SelfApproval { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = queue.reject(&queue_id, MAKER, "changed my mind").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(queue.get(&queue_id).unwrap().status, QueueStatus::Pending);
}

/// Rejection needs a reason, is final and never executes the operation.
#[test]
fn rejection_is_terminal() {
    let engine = make_engine();
    let queue_id = submit(&engine, new_customer("ID-1004"), Priority::High);
    let queue = engine.queue();

    assert_eq!(
        queue.reject(&queue_id, CHECKER, "  ").unwrap_err().kind(),
        ErrorKind::Validation
    );

    let rejected = queue
        .reject(&queue_id, CHECKER, "incomplete KYC")
        .unwrap();
    assert_eq!(rejected.status, QueueStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("incomplete KYC"));

    let err = queue.approve(&queue_id, CHECKER).unwrap_err();
    assert!(matches!(err, DfsError::QueueItemNotPending { .. }), "got {err:?}");
    assert_eq!(engine.store().customer_count().unwrap(), 0);

    assert!(matches!(
        queue.approve("AQ-MISSING", CHECKER).unwrap_err(),
        DfsError::QueueItemNotFound(_)
    ));
}

/// A failing executor leaves the item PENDING and no money moved.
#[test]
fn failed_execution_rolls_back_approval() {
    let engine = make_engine();
    let account = funded_account(&engine, dec!(1000));
    let queue_id = submit(
        &engine,
        QueuedOperation::CashWithdrawal(CashMovement {
            account_number: account.clone(),
            amount: dec!(5000),
            narration: None,
        }),
        Priority::Medium,
    );

    let err = engine.queue().approve(&queue_id, CHECKER).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    let DfsError::ExecutionFailed { source, .. } = &err else {
        panic!("expected ExecutionFailed, got {err:?}");
    };
    assert!(matches!(**source, DfsError::InsufficientFunds { .. }));

    let item = engine.queue().get(&queue_id).unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert!(item.approved_by.is_none(), "the claim is rolled back too");
    assert_eq!(balance_of(&engine, &account), dec!(1000));

    // The same item can be approved once the account is funded.
    engine
        .ledger()
        .credit(&account, dec!(4000), "TOPUP", PostingMeta::new("top up", "BRANCH"))
        .unwrap();
    engine.queue().approve(&queue_id, CHECKER).unwrap();
    assert_eq!(balance_of(&engine, &account), Money::ZERO);
}

/// A duplicate national id fails at execution, not at submission.
#[test]
fn duplicate_customer_fails_execution() {
    let engine = make_engine();
    approve(&engine, new_customer("ID-2000"));

    let queue_id = submit(&engine, new_customer("ID-2000"), Priority::High);
    let err = engine.queue().approve(&queue_id, CHECKER).unwrap_err();
    assert!(matches!(err, DfsError::ExecutionFailed { .. }), "got {err:?}");
    assert_eq!(engine.store().customer_count().unwrap(), 1);
}

// ── Inbox ────────────────────────────────────────────────────────────────────

/// The inbox is URGENT first, then oldest first, and filters narrow it.
#[test]
fn pending_list_is_ordered_and_filtered() {
    let engine = make_engine();
    let queue = engine.queue();
    let low = submit(&engine, new_customer("ID-3001"), Priority::Low);
    let urgent_a = submit(&engine, new_customer("ID-3002"), Priority::Urgent);
    let medium = queue
        .submit(&new_customer("ID-3003"), &maker("MSA-001"), Priority::Medium)
        .unwrap()
        .queue_id;
    let urgent_b = submit(&engine, new_customer("ID-3004"), Priority::Urgent);
    let done = submit(&engine, new_customer("ID-3005"), Priority::Urgent);
    queue.approve(&done, CHECKER).unwrap();

    let ids: Vec<_> = queue
        .list_pending(&PendingFilter::default())
        .unwrap()
        .into_iter()
        .map(|i| i.queue_id)
        .collect();
    assert_eq!(ids, vec![urgent_a, urgent_b.clone(), medium.clone(), low]);

    let by_branch = queue
        .list_pending(&PendingFilter {
            branch_code: Some("MSA-001".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_branch.len(), 1);
    assert_eq!(by_branch[0].queue_id, medium);

    let urgent = queue
        .list_pending(&PendingFilter {
            priority: Some(Priority::Urgent),
            transaction_type: Some("CIF_CREATE".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(urgent.len(), 2);

    let none = queue
        .list_pending(&PendingFilter {
            transaction_type: Some("LOAN_APPLICATION".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(engine.store().queue_count(QueueStatus::Pending).unwrap(), 4);
}

/// Threshold evaluation follows the role ceilings and the always-approve list.
#[test]
fn threshold_decisions() {
    let engine = make_engine();
    let queue = engine.queue();

    let small = queue.evaluate_threshold("CASH_DEPOSIT", dec!(40000), "TELLER");
    assert!(!small.requires_approval);
    assert_eq!(small.priority, Priority::Low);

    let large = queue.evaluate_threshold("CASH_DEPOSIT", dec!(60000), "TELLER");
    assert!(large.requires_approval);
    assert_eq!(large.priority, Priority::Medium);

    let supervisor = queue.evaluate_threshold("CASH_DEPOSIT", dec!(60000), "SUPERVISOR");
    assert!(!supervisor.requires_approval);

    let cif = queue.evaluate_threshold("CIF_CREATE", Money::ZERO, "BRANCH_MANAGER");
    assert!(cif.requires_approval);
    assert_eq!(cif.priority, Priority::High);

    let unknown = queue.evaluate_threshold("SAFE_DEPOSIT_BOX", dec!(1), "TELLER");
    assert!(unknown.requires_approval);
}

// ── Executors ────────────────────────────────────────────────────────────────

/// Customer, then account with an opening deposit, then closure after draining.
#[test]
fn account_lifecycle_through_the_queue() {
    let engine = make_engine();
    let ExecutionOutcome::CustomerCreated { cif_number } = approve(&engine, new_customer("ID-4001"))
    else {
        panic!("expected a new customer");
    };

    let opened = approve(
        &engine,
        QueuedOperation::AccountOpening(NewAccount {
            cif_number: cif_number.clone(),
            account_name: "Amina Savings".to_string(),
            account_type: AccountType::Savings,
            initial_deposit: Some(dec!(1000)),
        }),
    );
    let ExecutionOutcome::AccountOpened { account_number, balance } = opened else {
        panic!("expected an opened account, got {opened:?}");
    };
    assert_eq!(balance, dec!(1000));
    let account = engine.ledger().account(&account_number).unwrap();
    assert_eq!(account.cif_number.as_deref(), Some(cif_number.as_str()));

    approve(
        &engine,
        QueuedOperation::CashWithdrawal(CashMovement {
            account_number: account_number.clone(),
            amount: dec!(1000),
            narration: Some("closing withdrawal".to_string()),
        }),
    );
    approve(
        &engine,
        QueuedOperation::AccountClosure(AccountClosure {
            account_number: account_number.clone(),
            reason: "customer request".to_string(),
        }),
    );
    assert_eq!(
        engine.ledger().account(&account_number).unwrap().status,
        AccountStatus::Disabled
    );
}

/// Opening an account for an unknown customer fails execution.
#[test]
fn account_opening_needs_customer() {
    let engine = make_engine();
    let queue_id = submit(
        &engine,
        QueuedOperation::AccountOpening(NewAccount {
            cif_number: "CIF-NOPE".to_string(),
            account_name: "Ghost".to_string(),
            account_type: AccountType::Savings,
            initial_deposit: None,
        }),
        Priority::High,
    );
    let err = engine.queue().approve(&queue_id, CHECKER).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
}

/// Approved transfers post both legs under the queue id.
#[test]
fn bank_transfer_executes_on_approval() {
    let engine = make_engine();
    let from = funded_account(&engine, dec!(10000));
    let to = funded_account(&engine, Money::ZERO);

    let queue_id = submit(
        &engine,
        QueuedOperation::BankTransfer(BankTransfer {
            from_account: from.clone(),
            to_account: to.clone(),
            amount: dec!(2500),
            narration: None,
        }),
        Priority::Medium,
    );
    let outcome = engine.queue().approve(&queue_id, CHECKER).unwrap().result;
    assert_eq!(
        outcome,
        ExecutionOutcome::Transferred {
            reference: queue_id,
            from_balance: dec!(7500),
            to_balance: dec!(2500),
        }
    );
}

/// Disbursement credits the account; an overpaid repayment refunds the
/// excess and closes the loan.
#[test]
fn loan_disbursement_and_overpaid_repayment() {
    let engine = make_engine();
    let account = funded_account(&engine, dec!(500));

    let disbursed = approve(
        &engine,
        QueuedOperation::LoanApplication(LoanApplication {
            account_number: account.clone(),
            principal: dec!(20000),
            interest_rate: dec!(0.14),
            term_months: 12,
        }),
    );
    let ExecutionOutcome::LoanDisbursed { loan_id, .. } = disbursed else {
        panic!("expected a disbursement, got {disbursed:?}");
    };
    assert_eq!(balance_of(&engine, &account), dec!(20500));

    let partial = approve(
        &engine,
        QueuedOperation::LoanRepayment(LoanRepayment {
            loan_id: loan_id.clone(),
            account_number: account.clone(),
            amount: dec!(15000),
        }),
    );
    assert!(matches!(
        partial,
        ExecutionOutcome::LoanRepaid { status: LoanStatus::Active, .. }
    ));

    let last = approve(
        &engine,
        QueuedOperation::LoanRepayment(LoanRepayment {
            loan_id: loan_id.clone(),
            account_number: account.clone(),
            amount: dec!(5500),
        }),
    );
    assert_eq!(
        last,
        ExecutionOutcome::LoanRepaid {
            loan_id: loan_id.clone(),
            amount_applied: dec!(5000),
            refunded: dec!(500),
            outstanding: Money::ZERO,
            status: LoanStatus::Paid,
        }
    );
    assert_eq!(balance_of(&engine, &account), dec!(500));

    let queue_id = submit(
        &engine,
        QueuedOperation::LoanRepayment(LoanRepayment {
            loan_id,
            account_number: account,
            amount: dec!(1),
        }),
        Priority::Low,
    );
    let err = engine.queue().approve(&queue_id, CHECKER).unwrap_err();
    let DfsError::ExecutionFailed { source, .. } = &err else {
        panic!("expected ExecutionFailed, got {err:?}");
    };
    assert!(matches!(**source, DfsError::LoanNotActive { .. }));
}

/// A policy sale debits the premium and records the policy.
#[test]
fn policy_sale_debits_premium() {
    let engine = make_engine();
    let account = funded_account(&engine, dec!(3000));

    let outcome = approve(
        &engine,
        QueuedOperation::PolicySale(PolicySale {
            account_number: account.clone(),
            policy_type: "LIFE".to_string(),
            premium: dec!(1200),
            sum_assured: dec!(500000),
        }),
    );
    let ExecutionOutcome::PolicyIssued { policy_number, premium } = outcome else {
        panic!("expected an issued policy, got {outcome:?}");
    };
    assert!(policy_number.starts_with("POL"));
    assert_eq!(premium, dec!(1200));
    assert_eq!(balance_of(&engine, &account), dec!(1800));
    assert_eq!(engine.store().policies_for_account(&account).unwrap().len(), 1);
}

/// Float top-ups go through the agent float ledger.
#[test]
fn float_topup_credits_agent() {
    let engine = make_engine();
    let agents = engine.agents();
    let agent = agents
        .onboard(&OnboardAgentRequest {
            agent_name: "Kibera Mini Mart".to_string(),
            national_id: "NID-TOPUP".to_string(),
            phone_number: "+254711999999".to_string(),
            agent_type: AgentType::SubAgent,
            parent_agent_id: None,
            business_name: None,
            pin: "123456".to_string(),
            location: None,
            kyc_documents: Vec::new(),
            created_by: "OFFICER-1".to_string(),
        })
        .unwrap();
    agents.approve(&agent.agent_id, "MANAGER-1", None).unwrap();

    let queue_id = submit(
        &engine,
        QueuedOperation::AgentFloatTopup(FloatTopup {
            agent_id: agent.agent_id.clone(),
            amount: dec!(75000),
            reference: None,
        }),
        Priority::Medium,
    );
    let outcome = engine.queue().approve(&queue_id, CHECKER).unwrap().result;
    assert_eq!(
        outcome,
        ExecutionOutcome::FloatToppedUp {
            agent_id: agent.agent_id.clone(),
            reference: queue_id,
            new_balance: dec!(75000),
        }
    );
    let statement = agents.float_statement(&agent.agent_id, 5).unwrap();
    assert_eq!(statement[0].processed_by, CHECKER);
}
