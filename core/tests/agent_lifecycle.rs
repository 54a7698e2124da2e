use rust_decimal_macros::dec;
use wekeza_core::{
    agent_manager::{
        AgentStatus, AgentType, FloatOperation, FloatTxnType, KycDocument, OnboardAgentRequest,
    },
    engine::DfsEngine,
    error::{DfsError, ErrorKind},
    ledger::AccountType,
    types::Money,
};

// ── Test helpers ────────────────────────────────────────────────────────────

fn make_engine() -> DfsEngine {
    DfsEngine::build_test().unwrap()
}

fn request(n: u32, agent_type: AgentType) -> OnboardAgentRequest {
    OnboardAgentRequest {
        agent_name: format!("Agent {n}"),
        national_id: format!("NID-{n:04}"),
        phone_number: format!("+25471100{n:04}"),
        agent_type,
        parent_agent_id: None,
        business_name: Some(format!("Shop {n}")),
        pin: "1234".to_string(),
        location: None,
        kyc_documents: vec![KycDocument {
            document_type: "NATIONAL_ID".to_string(),
            document_ref: format!("DOC-{n}"),
        }],
        created_by: "OFFICER-1".to_string(),
    }
}

fn active_agent(engine: &DfsEngine, n: u32, float: Money) -> String {
    let agents = engine.agents();
    let agent = agents.onboard(&request(n, AgentType::Retailer)).unwrap();
    let initial = if float > Money::ZERO { Some(float) } else { None };
    agents.approve(&agent.agent_id, "MANAGER-1", initial).unwrap();
    agent.agent_id
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Onboarding applies the tier defaults, parks the agent in
/// PENDING_APPROVAL, opens a zero settlement account and stores KYC unverified.
#[test]
fn onboarding_applies_tier_defaults() {
    let engine = make_engine();
    let agent = engine
        .agents()
        .onboard(&request(1, AgentType::Retailer))
        .unwrap();

    assert!(agent.agent_id.starts_with("AGT-"));
    assert_eq!(agent.status, AgentStatus::PendingApproval);
    assert_eq!(agent.daily_limit, dec!(500000));
    assert_eq!(agent.transaction_limit, dec!(50000));
    assert_eq!(agent.commission_rate, dec!(0.007));
    assert_eq!(agent.float_balance, Money::ZERO);

    let settlement = engine.ledger().account(&agent.settlement_account).unwrap();
    assert_eq!(settlement.account_type, AccountType::Settlement);
    assert_eq!(settlement.agent_id.as_deref(), Some(agent.agent_id.as_str()));
    assert_eq!(settlement.balance, Money::ZERO);

    let docs = engine.store().kyc_documents(&agent.agent_id).unwrap();
    assert_eq!(docs.len(), 1);
    assert!(!docs[0].1, "KYC documents start unverified");

    let super_agent = engine
        .agents()
        .onboard(&request(2, AgentType::SuperAgent))
        .unwrap();
    assert_eq!(super_agent.daily_limit, dec!(5000000));
    assert_eq!(super_agent.commission_rate, dec!(0.003));
}

/// A national id or phone number can only be registered once.
#[test]
fn duplicate_identity_is_rejected() {
    let engine = make_engine();
    let agents = engine.agents();
    agents.onboard(&request(1, AgentType::Retailer)).unwrap();

    let mut same_id = request(2, AgentType::Retailer);
    same_id.national_id = "NID-0001".to_string();
    let err = agents.onboard(&same_id).unwrap_err();
    assert!(
        matches!(err, DfsError::DuplicateAgent { field: "national_id", .. }),
        "got {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut same_phone = request(3, AgentType::Retailer);
    same_phone.phone_number = request(1, AgentType::Retailer).phone_number;
    let err = agents.onboard(&same_phone).unwrap_err();
    assert!(
        matches!(err, DfsError::DuplicateAgent { field: "phone_number", .. }),
        "got {err:?}"
    );
}

/// Missing fields and malformed PINs are rejected before anything is written.
#[test]
fn onboarding_validates_input() {
    let engine = make_engine();
    let agents = engine.agents();

    let mut bad_pin = request(1, AgentType::Retailer);
    bad_pin.pin = "12a4".to_string();
    assert_eq!(agents.onboard(&bad_pin).unwrap_err().kind(), ErrorKind::Validation);

    let mut short_pin = request(1, AgentType::Retailer);
    short_pin.pin = "123".to_string();
    assert_eq!(agents.onboard(&short_pin).unwrap_err().kind(), ErrorKind::Validation);

    let mut no_name = request(1, AgentType::Retailer);
    no_name.agent_name = "  ".to_string();
    assert_eq!(agents.onboard(&no_name).unwrap_err().kind(), ErrorKind::Validation);

    let mut orphan = request(1, AgentType::SubAgent);
    orphan.parent_agent_id = Some("AGT-MISSING".to_string());
    assert!(matches!(
        agents.onboard(&orphan).unwrap_err(),
        DfsError::AgentNotFound(_)
    ));
    assert_eq!(engine.store().event_count("agent_onboarded").unwrap(), 0);
}

/// Approval activates the agent once, seeding the float with one
/// INITIAL_CREDIT. A second approval is a conflict.
#[test]
fn approval_is_one_shot() {
    let engine = make_engine();
    let agents = engine.agents();
    let agent = agents.onboard(&request(1, AgentType::Retailer)).unwrap();

    let approved = agents
        .approve(&agent.agent_id, "MANAGER-1", Some(dec!(50000)))
        .unwrap();
    assert_eq!(approved.status, AgentStatus::Active);
    assert_eq!(approved.float_balance, dec!(50000));
    assert_eq!(approved.approved_by.as_deref(), Some("MANAGER-1"));

    let statement = agents.float_statement(&agent.agent_id, 10).unwrap();
    assert_eq!(statement.len(), 1);
    assert_eq!(statement[0].transaction_type, FloatTxnType::InitialCredit);
    assert_eq!(statement[0].new_balance, dec!(50000));

    let err = agents
        .approve(&agent.agent_id, "MANAGER-1", Some(dec!(50000)))
        .unwrap_err();
    assert!(matches!(err, DfsError::NotPendingApproval { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(agents.agent(&agent.agent_id).unwrap().float_balance, dec!(50000));

    let history = agents.status_history(&agent.agent_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_status, AgentStatus::PendingApproval);
    assert_eq!(history[0].new_status, AgentStatus::Active);
}

/// Float never goes negative; a rejected debit leaves no trace, and every
/// accepted change has exactly one float transaction row.
#[test]
fn float_never_goes_negative() {
    let engine = make_engine();
    let agent_id = active_agent(&engine, 1, dec!(10000));
    let agents = engine.agents();

    let ops = [
        (FloatOperation::Debit, dec!(4000), true),
        (FloatOperation::Debit, dec!(7000), false),
        (FloatOperation::Credit, dec!(2500), true),
        (FloatOperation::Debit, dec!(8500), true),
        (FloatOperation::Debit, dec!(0.01), false),
    ];
    for (op, amount, should_pass) in ops {
        let before = agents.agent(&agent_id).unwrap().float_balance;
        let result = agents.adjust_float(&agent_id, op, amount, "OPS-1", None);
        let after = agents.agent(&agent_id).unwrap().float_balance;
        assert!(after >= Money::ZERO);
        match result {
            Ok(txn) => {
                assert!(should_pass, "{op} {amount} should have failed");
                assert_eq!(txn.old_balance, before);
                assert_eq!(txn.new_balance, after);
            }
            Err(err) => {
                assert!(!should_pass, "{op} {amount} failed: {err}");
                assert!(matches!(err, DfsError::InsufficientFloat { .. }), "got {err:?}");
                assert_eq!(after, before);
            }
        }
    }

    assert_eq!(agents.agent(&agent_id).unwrap().float_balance, Money::ZERO);
    // INITIAL_CREDIT plus the three accepted adjustments.
    assert_eq!(engine.store().float_transaction_count(&agent_id).unwrap(), 4);
}

/// Supplied references are kept; generated ones are unique.
#[test]
fn float_references_are_unique() {
    let engine = make_engine();
    let agent_id = active_agent(&engine, 1, dec!(100));
    let agents = engine.agents();

    let a = agents
        .adjust_float(&agent_id, FloatOperation::Credit, dec!(1), "OPS", None)
        .unwrap();
    let b = agents
        .adjust_float(&agent_id, FloatOperation::Credit, dec!(1), "OPS", None)
        .unwrap();
    assert_ne!(a.reference, b.reference);

    agents
        .adjust_float(&agent_id, FloatOperation::Credit, dec!(1), "OPS", Some("BANK-REF-9"))
        .unwrap();
    let err = agents
        .adjust_float(&agent_id, FloatOperation::Credit, dec!(1), "OPS", Some("BANK-REF-9"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(agents.agent(&agent_id).unwrap().float_balance, dec!(103));
}

/// Float adjustments require an ACTIVE agent.
#[test]
fn adjust_float_requires_active_agent() {
    let engine = make_engine();
    let agents = engine.agents();
    let pending = agents.onboard(&request(1, AgentType::Retailer)).unwrap();

    let err = agents
        .adjust_float(&pending.agent_id, FloatOperation::Credit, dec!(10), "OPS", None)
        .unwrap_err();
    assert!(matches!(err, DfsError::AgentNotActive { .. }), "got {err:?}");

    let err = agents
        .adjust_float("AGT-NOPE", FloatOperation::Credit, dec!(10), "OPS", None)
        .unwrap_err();
    assert!(matches!(err, DfsError::AgentNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Suspension is audited; suspending twice fails and a suspended agent
/// can be reactivated.
#[test]
fn suspend_and_reactivate() {
    let engine = make_engine();
    let agent_id = active_agent(&engine, 1, Money::ZERO);
    let agents = engine.agents();

    let suspended = agents.suspend(&agent_id, "cash shortfall", "AUDIT-1").unwrap();
    assert_eq!(suspended.status, AgentStatus::Suspended);

    let err = agents.suspend(&agent_id, "again", "AUDIT-1").unwrap_err();
    assert!(matches!(err, DfsError::AgentNotActive { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert!(matches!(
        agents.suspend("AGT-NOPE", "x", "AUDIT-1").unwrap_err(),
        DfsError::AgentNotFound(_)
    ));
    assert_eq!(
        agents.suspend(&agent_id, " ", "AUDIT-1").unwrap_err().kind(),
        ErrorKind::Validation
    );

    let back = agents.reactivate(&agent_id, "shortfall cleared", "AUDIT-1").unwrap();
    assert_eq!(back.status, AgentStatus::Active);

    let history = agents.status_history(&agent_id).unwrap();
    let trail: Vec<_> = history.iter().map(|c| c.new_status).collect();
    assert_eq!(
        trail,
        vec![AgentStatus::Active, AgentStatus::Suspended, AgentStatus::Active]
    );
    assert_eq!(history[1].reason, "cash shortfall");
    assert_eq!(history[1].changed_by, "AUDIT-1");
}

/// Termination needs an empty float and is final.
#[test]
fn terminate_requires_empty_float() {
    let engine = make_engine();
    let agent_id = active_agent(&engine, 1, dec!(500));
    let agents = engine.agents();

    let err = agents.terminate(&agent_id, "closing", "MANAGER-1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    agents
        .adjust_float(&agent_id, FloatOperation::Debit, dec!(500), "OPS", None)
        .unwrap();
    let terminated = agents.terminate(&agent_id, "closing", "MANAGER-1").unwrap();
    assert_eq!(terminated.status, AgentStatus::Terminated);

    assert!(agents.reactivate(&agent_id, "oops", "MANAGER-1").is_err());
    assert!(agents.suspend(&agent_id, "oops", "MANAGER-1").is_err());
}

/// The hierarchy view is one level up and one level down.
#[test]
fn hierarchy_is_one_level_each_way() {
    let engine = make_engine();
    let agents = engine.agents();

    let top = agents.onboard(&request(1, AgentType::SuperAgent)).unwrap();
    let mut mid_req = request(2, AgentType::SubAgent);
    mid_req.parent_agent_id = Some(top.agent_id.clone());
    let mid = agents.onboard(&mid_req).unwrap();
    let mut leaf_req = request(3, AgentType::Retailer);
    leaf_req.parent_agent_id = Some(mid.agent_id.clone());
    let leaf = agents.onboard(&leaf_req).unwrap();

    let view = agents.hierarchy(&mid.agent_id).unwrap();
    assert_eq!(view.agent.agent_id, mid.agent_id);
    assert_eq!(view.parent.map(|p| p.agent_id), Some(top.agent_id.clone()));
    assert_eq!(view.children.len(), 1);
    assert_eq!(view.children[0].agent_id, leaf.agent_id);

    let top_view = agents.hierarchy(&top.agent_id).unwrap();
    assert!(top_view.parent.is_none());
    assert_eq!(top_view.children.len(), 1, "grandchildren are not included");
}

/// A terminated agent cannot take on new children.
#[test]
fn terminated_parent_is_rejected() {
    let engine = make_engine();
    let parent_id = active_agent(&engine, 1, Money::ZERO);
    let agents = engine.agents();
    agents.terminate(&parent_id, "exit", "MANAGER-1").unwrap();

    let mut child = request(2, AgentType::Retailer);
    child.parent_agent_id = Some(parent_id);
    assert_eq!(agents.onboard(&child).unwrap_err().kind(), ErrorKind::Validation);
}
