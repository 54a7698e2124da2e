//! Agency transaction gateway.
//!
//! Agents authenticate a device with their PIN and receive a server-side
//! session token. Cash operations then run under that session: limits are
//! checked and the float, the customer account, the agency transaction and
//! the commission are all written in one unit of work. Every request, even a
//! failed one, leaves an audit row.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    agent_manager::{hash_pin, post_float, Agent, AgentStatus, FloatTxnType},
    clock::Clock,
    config::{CommissionBasis, DfsConfig},
    error::{DfsError, DfsResult},
    event::DfsEvent,
    geo::{haversine_km, GeoPoint},
    ledger::{Account, AccountStatus, Ledger, PostingMeta},
    response::error_body,
    store::BankStore,
    types::{day_key, format_ts, generate_reference, round_money, validate_amount, EntityId, Money},
};

const CHANNEL: &str = "AGENCY";

db_enum! {
    pub enum AgencyTxnType {
        CashIn => "CASH_IN",
        CashOut => "CASH_OUT",
        BalanceInquiry => "BALANCE_INQUIRY",
        MiniStatement => "MINI_STATEMENT",
        BillPayment => "BILL_PAYMENT",
        FundTransfer => "FUND_TRANSFER",
        AccountOpening => "ACCOUNT_OPENING",
    }
}

db_enum! {
    pub enum AgencyTxnStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Reversed => "REVERSED",
    }
}

db_enum! {
    pub enum CommissionStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Reversed => "REVERSED",
    }
}

db_enum! {
    pub enum AuthStatus {
        Success => "SUCCESS",
        Failed => "FAILED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub agent_id: EntityId,
    pub device_id: String,
    pub pin: String,
    #[serde(default)]
    pub biometric: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// One row of the authentication log. Successful rows carry the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthAttempt {
    pub agent_id: EntityId,
    pub device_id: String,
    pub status: AuthStatus,
    pub failure_reason: Option<String>,
    #[serde(skip)]
    pub session_token: Option<String>,
    pub location: Option<GeoPoint>,
    pub biometric_used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_token: String,
    pub agent_id: EntityId,
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub transaction_type: AgencyTxnType,
    pub customer_account: EntityId,
    #[serde(default)]
    pub amount: Money,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgencyTransaction {
    pub transaction_ref: String,
    pub agent_id: EntityId,
    pub customer_account: EntityId,
    pub transaction_type: AgencyTxnType,
    pub amount: Money,
    pub commission: Money,
    pub status: AgencyTxnStatus,
    pub failure_reason: Option<String>,
    pub device_id: String,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCommission {
    pub agent_id: EntityId,
    pub transaction_ref: String,
    pub commission_amount: Money,
    pub commission_type: AgencyTxnType,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionOutcome {
    CashIn {
        transaction_ref: String,
        amount: Money,
        commission: Money,
        customer_balance: Money,
        agent_float: Money,
    },
    CashOut {
        transaction_ref: String,
        amount: Money,
        commission: Money,
        customer_balance: Money,
        agent_float: Money,
    },
    BalanceInquiry {
        transaction_ref: String,
        account_holder: String,
        balance: Money,
        status: AccountStatus,
    },
}

impl TransactionOutcome {
    pub fn transaction_ref(&self) -> &str {
        match self {
            Self::CashIn { transaction_ref, .. }
            | Self::CashOut { transaction_ref, .. }
            | Self::BalanceInquiry { transaction_ref, .. } => transaction_ref,
        }
    }
}

pub struct AgencyGateway<'e> {
    store: &'e BankStore,
    config: &'e DfsConfig,
    clock: &'e dyn Clock,
}

impl<'e> AgencyGateway<'e> {
    pub fn new(store: &'e BankStore, config: &'e DfsConfig, clock: &'e dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Verify agent, PIN and (when both are known) location, then issue a session.
    /// Failed attempts are logged before the error is returned.
    pub fn authenticate(&self, req: &AuthRequest) -> DfsResult<Session> {
        let now = self.clock.now();
        match self.check_credentials(req) {
            Ok(()) => {}
            Err(err) => {
                self.record_failed_auth(req, &err, &now)?;
                log::warn!("gateway: auth failed for {} on {}: {err}", req.agent_id, req.device_id);
                return Err(err);
            }
        }

        let session = Session {
            session_token: session_token(&req.agent_id, &req.device_id, &now),
            agent_id: req.agent_id.clone(),
            device_id: req.device_id.clone(),
            issued_at: now,
            expires_at: now + Duration::hours(self.config.gateway.session_ttl_hours),
        };
        self.store.atomic(|s| {
            s.insert_auth_attempt(&AuthAttempt {
                agent_id: req.agent_id.clone(),
                device_id: req.device_id.clone(),
                status: AuthStatus::Success,
                failure_reason: None,
                session_token: Some(session.session_token.clone()),
                location: req.location,
                biometric_used: req.biometric,
                created_at: now,
                expires_at: Some(session.expires_at),
            })?;
            s.record_agent_login(&req.agent_id, &now, req.location)?;
            s.append_event(
                &DfsEvent::AgentAuthenticated {
                    agent_id: req.agent_id.clone(),
                    device_id: req.device_id.clone(),
                },
                &now,
            )
        })?;
        log::info!(
            "gateway: session issued to {} on {} until {}",
            session.agent_id,
            session.device_id,
            format_ts(&session.expires_at)
        );
        Ok(session)
    }

    fn check_credentials(&self, req: &AuthRequest) -> DfsResult<()> {
        let agent = match self.store.agent(&req.agent_id)? {
            Some(agent) if agent.status == AgentStatus::Active => agent,
            _ => return Err(DfsError::AgentNotFoundOrInactive(req.agent_id.clone())),
        };
        if hash_pin(&agent.agent_id, &req.pin) != agent.pin_hash {
            return Err(DfsError::InvalidPin);
        }
        if let Some(here) = req.location {
            if !here.is_valid() {
                return Err(DfsError::Validation("location is out of range".to_string()));
            }
        }
        if let (Some(here), Some(last)) = (req.location, agent.last_location) {
            let distance_km = haversine_km(here, last);
            if distance_km > self.config.gateway.geofence_radius_km {
                return Err(DfsError::LocationVerificationFailed { distance_km });
            }
        }
        Ok(())
    }

    fn record_failed_auth(
        &self,
        req: &AuthRequest,
        err: &DfsError,
        at: &DateTime<Utc>,
    ) -> DfsResult<()> {
        self.store.atomic(|s| {
            s.insert_auth_attempt(&AuthAttempt {
                agent_id: req.agent_id.clone(),
                device_id: req.device_id.clone(),
                status: AuthStatus::Failed,
                failure_reason: Some(err.to_string()),
                session_token: None,
                location: req.location,
                biometric_used: req.biometric,
                created_at: *at,
                expires_at: None,
            })?;
            s.append_event(
                &DfsEvent::AgentAuthenticationFailed {
                    agent_id: req.agent_id.clone(),
                    device_id: req.device_id.clone(),
                    reason: err.to_string(),
                },
                at,
            )
        })
    }

    /// Look up a session; expired or unknown tokens are `InvalidSession`.
    pub fn validate_session(&self, session_token: &str) -> DfsResult<Session> {
        let session = self
            .store
            .session(session_token)?
            .ok_or(DfsError::InvalidSession)?;
        if self.clock.now() >= session.expires_at {
            return Err(DfsError::InvalidSession);
        }
        Ok(session)
    }

    pub fn process_transaction(
        &self,
        session_token: &str,
        req: &TransactionRequest,
    ) -> DfsResult<TransactionOutcome> {
        let session = self.validate_session(session_token)?;
        let now = self.clock.now();
        let transaction_ref = generate_reference("AGY", &now);

        let request_json = serde_json::to_string(req)?;
        let result = self.store.atomic(|s| {
            let outcome = self.dispatch(s, &session, req, &transaction_ref, &now)?;
            s.insert_agency_audit(
                &session.agent_id,
                req.transaction_type,
                &request_json,
                &serde_json::to_value(&outcome)?.to_string(),
                true,
                &now,
            )?;
            Ok(outcome)
        });

        if let Err(err) = &result {
            log::warn!(
                "gateway: {} {} for {} failed: {err}",
                req.transaction_type,
                req.amount,
                session.agent_id
            );
            let failed = AgencyTransaction {
                transaction_ref: transaction_ref.clone(),
                agent_id: session.agent_id.clone(),
                customer_account: req.customer_account.clone(),
                transaction_type: req.transaction_type,
                amount: req.amount,
                commission: Money::ZERO,
                status: AgencyTxnStatus::Failed,
                failure_reason: Some(err.to_string()),
                device_id: session.device_id.clone(),
                location: req.location,
                created_at: now,
                completed_at: None,
            };
            let recorded = self.store.atomic(|s| {
                s.insert_agency_transaction(&failed)?;
                s.insert_agency_audit(
                    &session.agent_id,
                    req.transaction_type,
                    &request_json,
                    &error_body(err).to_string(),
                    false,
                    &now,
                )
            });
            if let Err(record_err) = recorded {
                log::error!("gateway: could not record failed {transaction_ref}: {record_err}");
            }
        }
        result
    }

    fn dispatch(
        &self,
        s: &BankStore,
        session: &Session,
        req: &TransactionRequest,
        transaction_ref: &str,
        now: &DateTime<Utc>,
    ) -> DfsResult<TransactionOutcome> {
        let agent = match s.agent(&session.agent_id)? {
            Some(agent) if agent.status == AgentStatus::Active => agent,
            _ => return Err(DfsError::AgentNotFoundOrInactive(session.agent_id.clone())),
        };
        let ctx = TxnContext {
            session,
            req,
            transaction_ref,
            now,
        };

        match req.transaction_type {
            AgencyTxnType::CashIn => {
                self.validate_limits(s, &agent, req.amount, now)?;
                self.cash_in(s, &agent, &ctx)
            }
            AgencyTxnType::CashOut => {
                self.validate_limits(s, &agent, req.amount, now)?;
                self.cash_out(s, &agent, &ctx)
            }
            AgencyTxnType::BalanceInquiry => self.balance_inquiry(s, &agent, &ctx),
            other => Err(DfsError::UnsupportedTransactionType(other.as_str().to_string())),
        }
    }

    /// Per-transaction ceiling, then today's completed total plus this amount.
    fn validate_limits(
        &self,
        s: &BankStore,
        agent: &Agent,
        amount: Money,
        now: &DateTime<Utc>,
    ) -> DfsResult<()> {
        validate_amount(amount)?;
        if amount > agent.transaction_limit {
            return Err(DfsError::ExceedsTransactionLimit {
                amount,
                limit: agent.transaction_limit,
            });
        }
        let used = s.agent_completed_total(&agent.agent_id, &day_key(now))?;
        if used + amount > agent.daily_limit {
            return Err(DfsError::ExceedsDailyLimit {
                used,
                amount,
                limit: agent.daily_limit,
            });
        }
        Ok(())
    }

    fn cash_in(&self, s: &BankStore, agent: &Agent, ctx: &TxnContext<'_>) -> DfsResult<TransactionOutcome> {
        let amount = ctx.req.amount;
        let account = customer_account(s, &ctx.req.customer_account)?;
        if agent.float_balance < amount {
            return Err(DfsError::InsufficientAgentFloat {
                available: agent.float_balance,
                requested: amount,
            });
        }

        let float = post_float(
            s,
            agent,
            FloatTxnType::Debit,
            amount,
            ctx.transaction_ref,
            &agent.agent_id,
            ctx.now,
        )?;
        let narration = format!("Agency cash deposit via {}", agent.agent_id);
        let posting = Ledger::new(s, self.clock).credit(
            &account.account_number,
            amount,
            ctx.transaction_ref,
            PostingMeta::new(&narration, CHANNEL),
        )?;
        let commission = self.complete(s, agent, ctx)?;

        Ok(TransactionOutcome::CashIn {
            transaction_ref: ctx.transaction_ref.to_string(),
            amount,
            commission,
            customer_balance: posting.new_balance,
            agent_float: float.new_balance,
        })
    }

    fn cash_out(&self, s: &BankStore, agent: &Agent, ctx: &TxnContext<'_>) -> DfsResult<TransactionOutcome> {
        let amount = ctx.req.amount;
        let account = customer_account(s, &ctx.req.customer_account)?;
        if account.balance < amount {
            return Err(DfsError::InsufficientCustomerBalance {
                available: account.balance,
                requested: amount,
            });
        }
        let ceiling = self.config.gateway.customer_daily_withdrawal_limit;
        let withdrawn = s.customer_withdrawal_total(&account.account_number, &day_key(ctx.now))?;
        if withdrawn + amount > ceiling {
            return Err(DfsError::DailyWithdrawalLimitExceeded {
                used: withdrawn,
                amount,
                limit: ceiling,
            });
        }

        let narration = format!("Agency cash withdrawal via {}", agent.agent_id);
        let posting = Ledger::new(s, self.clock).debit(
            &account.account_number,
            amount,
            ctx.transaction_ref,
            PostingMeta::new(&narration, CHANNEL),
        )?;
        let float = post_float(
            s,
            agent,
            FloatTxnType::Credit,
            amount,
            ctx.transaction_ref,
            &agent.agent_id,
            ctx.now,
        )?;
        let commission = self.complete(s, agent, ctx)?;

        Ok(TransactionOutcome::CashOut {
            transaction_ref: ctx.transaction_ref.to_string(),
            amount,
            commission,
            customer_balance: posting.new_balance,
            agent_float: float.new_balance,
        })
    }

    fn balance_inquiry(
        &self,
        s: &BankStore,
        agent: &Agent,
        ctx: &TxnContext<'_>,
    ) -> DfsResult<TransactionOutcome> {
        let account = s
            .account(&ctx.req.customer_account)?
            .ok_or_else(|| DfsError::AccountNotFound(ctx.req.customer_account.clone()))?;
        let account_holder = match &account.cif_number {
            Some(cif) => s
                .customer(cif)?
                .map(|c| c.full_name)
                .unwrap_or_else(|| account.account_name.clone()),
            None => account.account_name.clone(),
        };

        s.insert_agency_transaction(&AgencyTransaction {
            transaction_ref: ctx.transaction_ref.to_string(),
            agent_id: agent.agent_id.clone(),
            customer_account: account.account_number.clone(),
            transaction_type: AgencyTxnType::BalanceInquiry,
            amount: Money::ZERO,
            commission: Money::ZERO,
            status: AgencyTxnStatus::Completed,
            failure_reason: None,
            device_id: ctx.session.device_id.clone(),
            location: ctx.req.location,
            created_at: *ctx.now,
            completed_at: Some(*ctx.now),
        })?;

        Ok(TransactionOutcome::BalanceInquiry {
            transaction_ref: ctx.transaction_ref.to_string(),
            account_holder,
            balance: account.balance,
            status: account.status,
        })
    }

    /// Write the COMPLETED agency transaction and its commission.
    fn complete(&self, s: &BankStore, agent: &Agent, ctx: &TxnContext<'_>) -> DfsResult<Money> {
        let txn_type = ctx.req.transaction_type;
        let amount = ctx.req.amount;
        let commission = self.commission_for(txn_type, amount);

        s.insert_agency_transaction(&AgencyTransaction {
            transaction_ref: ctx.transaction_ref.to_string(),
            agent_id: agent.agent_id.clone(),
            customer_account: ctx.req.customer_account.clone(),
            transaction_type: txn_type,
            amount,
            commission,
            status: AgencyTxnStatus::Completed,
            failure_reason: None,
            device_id: ctx.session.device_id.clone(),
            location: ctx.req.location,
            created_at: *ctx.now,
            completed_at: Some(*ctx.now),
        })?;
        if commission > Money::ZERO {
            s.insert_commission(&AgentCommission {
                agent_id: agent.agent_id.clone(),
                transaction_ref: ctx.transaction_ref.to_string(),
                commission_amount: commission,
                commission_type: txn_type,
                status: CommissionStatus::Pending,
                created_at: *ctx.now,
                paid_at: None,
            })?;
        }
        s.append_event(
            &DfsEvent::AgencyTransactionCompleted {
                agent_id: agent.agent_id.clone(),
                transaction_ref: ctx.transaction_ref.to_string(),
                transaction_type: txn_type.as_str().to_string(),
                amount,
                commission,
            },
            ctx.now,
        )?;
        log::info!(
            "gateway: {txn_type} {amount} by {} ref={} commission={commission}",
            agent.agent_id,
            ctx.transaction_ref
        );
        Ok(commission)
    }

    /// Commission earned on `amount`; types without a rule earn nothing.
    pub fn commission_for(&self, txn_type: AgencyTxnType, amount: Money) -> Money {
        match self.config.commission_rule(txn_type.as_str()) {
            Some(CommissionBasis::Percent { rate }) => round_money(amount * *rate),
            Some(CommissionBasis::Flat { amount }) => *amount,
            None => Money::ZERO,
        }
    }

    pub fn transaction(&self, transaction_ref: &str) -> DfsResult<AgencyTransaction> {
        self.store
            .agency_transaction(transaction_ref)?
            .ok_or_else(|| DfsError::NotFound {
                entity: "Agency transaction",
                id: transaction_ref.to_string(),
            })
    }
}

struct TxnContext<'a> {
    session: &'a Session,
    req: &'a TransactionRequest,
    transaction_ref: &'a str,
    now: &'a DateTime<Utc>,
}

fn customer_account(s: &BankStore, account_number: &str) -> DfsResult<Account> {
    match s.account(account_number)? {
        Some(account) if account.status == AccountStatus::Active => Ok(account),
        _ => Err(DfsError::InvalidCustomerAccount(account_number.to_string())),
    }
}

/// Opaque token: SHA-256 over agent, device, issue time and 32 random bytes.
fn session_token(agent_id: &str, device_id: &str, at: &DateTime<Utc>) -> String {
    let nonce: [u8; 32] = rand::thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(device_id.as_bytes());
    hasher.update(format_ts(at).as_bytes());
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}
