//! dfs-runner: headless driver for the Wekeza DFS core.
//!
//! Usage:
//!   dfs-runner --db dfs.db --data-dir ./data
//!   dfs-runner --db dfs.db --ipc-mode        (one JSON command per stdin line)

use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::io::{self, BufRead, Write};
use wekeza_core::{
    agency_gateway::{AgencyTxnType, AuthRequest, TransactionRequest},
    agent_manager::{AgentType, FloatOperation, OnboardAgentRequest},
    authorization_queue::{MakerInfo, PendingFilter, Priority},
    config::DfsConfig,
    engine::DfsEngine,
    executor::{CustomerType, ExecutionOutcome},
    ledger::AccountType,
    operation::{NewAccount, NewCustomer, QueuedOperation},
    response::into_response,
    types::Money,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    OnboardAgent(OnboardAgentRequest),
    ApproveAgent {
        agent_id: String,
        approver_id: String,
        #[serde(default)]
        initial_float: Option<Money>,
    },
    AdjustFloat {
        agent_id: String,
        operation: FloatOperation,
        amount: Money,
        processed_by: String,
        #[serde(default)]
        reference: Option<String>,
    },
    SuspendAgent {
        agent_id: String,
        reason: String,
        changed_by: String,
    },
    ReactivateAgent {
        agent_id: String,
        reason: String,
        changed_by: String,
    },
    TerminateAgent {
        agent_id: String,
        reason: String,
        changed_by: String,
    },
    AgentHierarchy {
        agent_id: String,
    },
    AgentPerformance {
        agent_id: String,
        period_days: u32,
    },
    SettleCommissions {
        agent_id: String,
        processed_by: String,
    },
    FloatStatement {
        agent_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    Authenticate(AuthRequest),
    ValidateSession {
        session_token: String,
    },
    ProcessTransaction {
        session_token: String,
        request: TransactionRequest,
    },
    EvaluateThreshold {
        transaction_type: String,
        amount: Money,
        maker_role: String,
    },
    Submit {
        operation: QueuedOperation,
        maker: MakerInfo,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        maker_role: Option<String>,
    },
    Approve {
        queue_id: String,
        approver_id: String,
    },
    Reject {
        queue_id: String,
        approver_id: String,
        reason: String,
    },
    ListPending {
        #[serde(default)]
        filter: PendingFilter,
    },
    GetQueueItem {
        queue_id: String,
    },
    Account {
        account_number: String,
    },
    Quit,
}

fn default_limit() -> usize {
    20
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = parse_arg(&args, "--db", ":memory:".to_string());
    let data_dir = parse_arg(&args, "--data-dir", "./data".to_string());

    if !ipc_mode {
        println!("Wekeza DFS - dfs-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let config = DfsConfig::load(&data_dir)?;
    let engine = DfsEngine::open(&db, config)?;

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        run_demo(&engine)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &DfsEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "error_kind": "validation",
                });
                writeln!(stdout, "{err_json}")?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = handle_command(engine, cmd);
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &DfsEngine, cmd: IpcCommand) -> serde_json::Value {
    let agents = engine.agents();
    let gateway = engine.gateway();
    let queue = engine.queue();

    match cmd {
        IpcCommand::OnboardAgent(req) => into_response(agents.onboard(&req)),
        IpcCommand::ApproveAgent {
            agent_id,
            approver_id,
            initial_float,
        } => into_response(agents.approve(&agent_id, &approver_id, initial_float)),
        IpcCommand::AdjustFloat {
            agent_id,
            operation,
            amount,
            processed_by,
            reference,
        } => into_response(agents.adjust_float(
            &agent_id,
            operation,
            amount,
            &processed_by,
            reference.as_deref(),
        )),
        IpcCommand::SuspendAgent {
            agent_id,
            reason,
            changed_by,
        } => into_response(agents.suspend(&agent_id, &reason, &changed_by)),
        IpcCommand::ReactivateAgent {
            agent_id,
            reason,
            changed_by,
        } => into_response(agents.reactivate(&agent_id, &reason, &changed_by)),
        IpcCommand::TerminateAgent {
            agent_id,
            reason,
            changed_by,
        } => into_response(agents.terminate(&agent_id, &reason, &changed_by)),
        IpcCommand::AgentHierarchy { agent_id } => into_response(agents.hierarchy(&agent_id)),
        IpcCommand::AgentPerformance {
            agent_id,
            period_days,
        } => into_response(agents.performance(&agent_id, period_days)),
        IpcCommand::SettleCommissions {
            agent_id,
            processed_by,
        } => into_response(agents.settle_commissions(&agent_id, &processed_by)),
        IpcCommand::FloatStatement { agent_id, limit } => {
            into_response(agents.float_statement(&agent_id, limit))
        }
        IpcCommand::Authenticate(req) => into_response(gateway.authenticate(&req)),
        IpcCommand::ValidateSession { session_token } => {
            into_response(gateway.validate_session(&session_token))
        }
        IpcCommand::ProcessTransaction {
            session_token,
            request,
        } => into_response(gateway.process_transaction(&session_token, &request)),
        IpcCommand::EvaluateThreshold {
            transaction_type,
            amount,
            maker_role,
        } => into_response(Ok(queue.evaluate_threshold(
            &transaction_type,
            amount,
            &maker_role,
        ))),
        IpcCommand::Submit {
            operation,
            maker,
            priority,
            maker_role,
        } => {
            let priority = priority.unwrap_or_else(|| {
                queue
                    .evaluate_threshold(
                        operation.transaction_type(),
                        operation.amount(),
                        maker_role.as_deref().unwrap_or_default(),
                    )
                    .priority
            });
            into_response(queue.submit(&operation, &maker, priority))
        }
        IpcCommand::Approve {
            queue_id,
            approver_id,
        } => into_response(queue.approve(&queue_id, &approver_id)),
        IpcCommand::Reject {
            queue_id,
            approver_id,
            reason,
        } => into_response(queue.reject(&queue_id, &approver_id, &reason)),
        IpcCommand::ListPending { filter } => into_response(queue.list_pending(&filter)),
        IpcCommand::GetQueueItem { queue_id } => into_response(queue.get(&queue_id)),
        IpcCommand::Account { account_number } => {
            into_response(engine.ledger().account(&account_number))
        }
        IpcCommand::Quit => serde_json::json!({ "success": true }),
    }
}

/// Walk one customer and one agent from creation to a first cash deposit.
fn run_demo(engine: &DfsEngine) -> Result<()> {
    let queue = engine.queue();
    let teller = MakerInfo {
        maker_id: "TLR-001".to_string(),
        maker_name: "Demo Teller".to_string(),
        branch_code: "NBO-001".to_string(),
    };

    let cif_op = QueuedOperation::CifCreate(NewCustomer {
        full_name: "Amina Wanjiru".to_string(),
        national_id: format!("ID{}", wekeza_core::types::short_uuid()),
        phone_number: "+254700000001".to_string(),
        email: None,
        customer_type: CustomerType::Individual,
    });
    let decision = queue.evaluate_threshold(cif_op.transaction_type(), cif_op.amount(), "TELLER");
    let receipt = queue.submit(&cif_op, &teller, decision.priority)?;
    log::info!("demo: CIF_CREATE queued as {}", receipt.queue_id);
    let approved = queue.approve(&receipt.queue_id, "SUP-001")?;
    let ExecutionOutcome::CustomerCreated { cif_number } = approved.result else {
        anyhow::bail!("unexpected CIF_CREATE outcome");
    };

    let open_op = QueuedOperation::AccountOpening(NewAccount {
        cif_number: cif_number.clone(),
        account_name: "Amina Wanjiru Savings".to_string(),
        account_type: AccountType::Savings,
        initial_deposit: Some(Decimal::from(1_000)),
    });
    let receipt = queue.submit(&open_op, &teller, Priority::High)?;
    let opened = queue.approve(&receipt.queue_id, "SUP-001")?;
    let ExecutionOutcome::AccountOpened { account_number, .. } = opened.result else {
        anyhow::bail!("unexpected ACCOUNT_OPENING outcome");
    };

    let agents = engine.agents();
    let agent = agents.onboard(&OnboardAgentRequest {
        agent_name: "Kibera Mini Mart".to_string(),
        national_id: format!("AG{}", wekeza_core::types::short_uuid()),
        phone_number: format!("+2547{}", wekeza_core::types::short_uuid()),
        agent_type: AgentType::Retailer,
        parent_agent_id: None,
        business_name: Some("Kibera Mini Mart".to_string()),
        pin: "4321".to_string(),
        location: None,
        kyc_documents: Vec::new(),
        created_by: "AGENCY-OFFICER".to_string(),
    })?;
    agents.approve(&agent.agent_id, "AGENCY-MANAGER", Some(Decimal::from(50_000)))?;

    let gateway = engine.gateway();
    let session = gateway.authenticate(&AuthRequest {
        agent_id: agent.agent_id.clone(),
        device_id: "POS-DEMO".to_string(),
        pin: "4321".to_string(),
        biometric: false,
        location: None,
    })?;
    let outcome = gateway.process_transaction(
        &session.session_token,
        &TransactionRequest {
            transaction_type: AgencyTxnType::CashIn,
            customer_account: account_number.clone(),
            amount: Decimal::from(5_000),
            location: None,
        },
    )?;

    print_summary(engine, &cif_number, &account_number, &agent.agent_id)?;
    println!("  last txn:       {}", outcome.transaction_ref());
    Ok(())
}

fn print_summary(
    engine: &DfsEngine,
    cif_number: &str,
    account_number: &str,
    agent_id: &str,
) -> Result<()> {
    let account = engine.ledger().account(account_number)?;
    let agent = engine.agents().agent(agent_id)?;
    let commissions = engine.store().commissions_for_agent(agent_id)?;
    let pending = engine.queue().list_pending(&PendingFilter::default())?;

    println!("=== RUN SUMMARY ===");
    println!("  customer:       {cif_number}");
    println!("  account:        {account_number} balance {}", account.balance);
    println!("  agent:          {agent_id} ({})", agent.status);
    println!("  agent float:    {}", agent.float_balance);
    println!(
        "  commissions:    {} totalling {}",
        commissions.len(),
        commissions.iter().map(|c| c.commission_amount).sum::<Money>()
    );
    println!("  queue pending:  {}", pending.len());
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
