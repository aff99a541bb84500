//! Shared fakes for the integration suites

#![allow(dead_code)]

use alloy::primitives::{aliases::I24, Address, Bytes, TxHash, I256, U160, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dca_engine::config::AppConfig;
use dca_engine::execution::{ExecutorSettings, PaymentExecutor, QuoteError, QuoteRequest, QuoteService, SwapQuote};
use dca_engine::feeds::{OracleError, RateOracle};
use dca_engine::ledger::{PaymentLedger, Plan, User};
use dca_engine::network::abi::{executeSwapCall, payment, Swap};
use dca_engine::network::{ChainClient, ChainError, ChainLog, LogQuery, TxReceipt, TxSubmission};
use dca_engine::notifications::{Notifier, NotifyError};
use dca_engine::reconciler::{EventReconciler, ReconcilerSettings};
use dca_engine::secrets::{ExecutorCredential, SecretError, SecretProvider};
use dca_engine::utils::Cadence;

pub const CONFIG_YAML: &str = r#"
rpc:
  url: "http://localhost:8545"
  chain_id: 8453
contracts:
  dca_contract: "0x1111111111111111111111111111111111111111"
  swap_pool: "0x2222222222222222222222222222222222222222"
  input_token:
    address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
    symbol: "USDC"
    decimals: 6
  output_token:
    address: "0xcbb7c0000ab88b473b1f5afd9ef808440eed33bf"
    symbol: "cbBTC"
    decimals: 8
quote:
  api_url: "http://localhost:3000"
oracle:
  api_url: "http://localhost:3001"
  asset_symbol: "cbBTC"
telemetry:
  log_level: "debug"
"#;

pub const USER_A: &str = "0x00000000000000000000000000000000000000a1";
pub const USER_B: &str = "0x00000000000000000000000000000000000000b2";
pub const USER_C: &str = "0x00000000000000000000000000000000000000c3";

pub fn config() -> AppConfig {
    AppConfig::from_yaml_str(CONFIG_YAML).unwrap()
}

pub fn addr(s: &str) -> Address {
    Address::from_str(s).unwrap()
}

/// Raw input units for a whole-dollar USDC amount
pub fn usdc(dollars: u64) -> u128 {
    dollars as u128 * 1_000_000
}

/// In-memory chain. Every submitted swap is mined immediately at unit
/// sqrt price, so the output raw amount equals the input raw amount.
pub struct FakeChain {
    pub pool: Address,
    pub dca: Address,
    state: Mutex<ChainState>,
    submit_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct ChainState {
    gas_error: Option<String>,
    head: u64,
    nonce: u64,
    insufficient: HashSet<Address>,
    reverting: HashSet<Address>,
    plans: HashMap<Address, String>,
    receipts: HashMap<TxHash, TxReceipt>,
    hidden_receipts: HashSet<TxHash>,
    timestamps: HashMap<u64, u64>,
    loose_logs: Vec<ChainLog>,
    submissions: Vec<(Address, u128)>,
}

impl FakeChain {
    pub fn new() -> Self {
        let config = config();
        Self {
            pool: addr(&config.contracts.swap_pool),
            dca: addr(&config.contracts.dca_contract),
            state: Mutex::new(ChainState {
                head: 1_000,
                ..Default::default()
            }),
            submit_delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Each submission stays in flight for `ms` before it is mined
    pub fn slow_submissions(&self, ms: u64) {
        self.submit_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Most submissions ever in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_gas(&self, reason: &str) {
        self.state.lock().unwrap().gas_error = Some(reason.to_string());
    }

    pub fn insufficient_funds_for(&self, user: &str) {
        self.state.lock().unwrap().insufficient.insert(addr(user));
    }

    pub fn revert_for(&self, user: &str) {
        self.state.lock().unwrap().reverting.insert(addr(user));
    }

    /// Swaps for `user` also emit a `Payment` against `plan_id`
    pub fn emit_payments_for(&self, user: &str, plan_id: &str) {
        self.state.lock().unwrap().plans.insert(addr(user), plan_id.to_string());
    }

    /// Receipt lookups for `hash` return nothing
    pub fn hide_receipt(&self, hash: TxHash) {
        self.state.lock().unwrap().hidden_receipts.insert(hash);
    }

    pub fn advance_head(&self, blocks: u64) {
        self.state.lock().unwrap().head += blocks;
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    pub fn submissions(&self) -> Vec<(Address, u128)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Mine a swap outside the executor, as a crashed or external run would
    pub fn mine_swap(&self, user: &str, amount_in: u128, payment_id: Option<(&str, &str)>) -> TxHash {
        let mut state = self.state.lock().unwrap();
        let payment = payment_id.map(|(plan, id)| (plan.to_string(), id.to_string()));
        self.mine_locked(&mut state, addr(user), amount_in, payment)
    }

    /// A `Payment` log with no receipt behind it
    pub fn push_loose_payment(&self, user: &str, amount: u128, plan_id: &str, payment_id: &str, tx: TxHash) {
        let mut state = self.state.lock().unwrap();
        let block = state.head;
        let log = self.payment_log(addr(user), amount, plan_id, payment_id, tx, block);
        state.timestamps.insert(block, Utc::now().timestamp() as u64);
        state.loose_logs.push(log);
    }

    fn mine_locked(
        &self,
        state: &mut ChainState,
        user: Address,
        amount_in: u128,
        payment: Option<(String, String)>,
    ) -> TxHash {
        state.nonce += 1;
        state.head += 1;
        let block = state.head;
        let hash = hash_for(state.nonce);
        state.timestamps.insert(block, Utc::now().timestamp() as u64);

        let mut logs = vec![self.swap_log(amount_in, hash, block)];
        if let Some((plan_id, payment_id)) = payment {
            logs.push(self.payment_log(user, amount_in, &plan_id, &payment_id, hash, block));
        }

        state.receipts.insert(
            hash,
            TxReceipt {
                transaction_hash: hash,
                block_number: block,
                gas_used: 180_000,
                effective_gas_price: 2_000_000,
                success: true,
                logs,
            },
        );
        hash
    }

    fn mine_submission(&self, user: Address, amount: u128) -> Result<TxHash, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.insufficient.contains(&user) {
            return Err(ChainError::InsufficientFunds(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }
        state.submissions.push((user, amount));

        let payment = state.plans.get(&user).map(|plan| {
            let id = format!("{}-{}", plan, state.nonce + 1);
            (plan.clone(), id)
        });
        let hash = self.mine_locked(&mut state, user, amount, payment);

        if state.reverting.contains(&user) {
            if let Some(receipt) = state.receipts.get_mut(&hash) {
                receipt.success = false;
                receipt.logs.clear();
            }
        }
        Ok(hash)
    }

    fn swap_log(&self, amount_in: u128, tx: TxHash, block: u64) -> ChainLog {
        let amount = I256::try_from(amount_in as i128).unwrap();
        let event = Swap {
            sender: Address::repeat_byte(0x33),
            recipient: self.dca,
            amount0: amount,
            amount1: -amount,
            sqrtPriceX96: U160::from(1u64) << 96,
            liquidity: 5_000_000u128,
            tick: I24::ZERO,
        };
        to_chain_log(self.pool, event.encode_log_data(), tx, block, 0)
    }

    fn payment_log(&self, user: Address, amount: u128, plan_id: &str, payment_id: &str, tx: TxHash, block: u64) -> ChainLog {
        let event = payment::Payment {
            user,
            amount: U256::from(amount),
            planId: plan_id.to_string(),
            paymentId: payment_id.to_string(),
        };
        to_chain_log(self.dca, event.encode_log_data(), tx, block, 1)
    }
}

fn hash_for(nonce: u64) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xfe;
    bytes[24..].copy_from_slice(&nonce.to_be_bytes());
    TxHash::from(bytes)
}

fn to_chain_log(address: Address, data: alloy::primitives::LogData, tx: TxHash, block: u64, index: u64) -> ChainLog {
    ChainLog {
        address,
        topics: data.topics().to_vec(),
        data: data.data.clone(),
        block_number: Some(block),
        transaction_hash: Some(tx),
        log_index: Some(index),
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        match &self.state.lock().unwrap().gas_error {
            Some(reason) => Err(ChainError::Rpc(reason.clone())),
            None => Ok(1_000_000),
        }
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head())
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainError> {
        Ok(self.state.lock().unwrap().timestamps.get(&number).copied())
    }

    async fn submit_transaction(
        &self,
        _credential: &ExecutorCredential,
        submission: TxSubmission,
    ) -> Result<TxHash, ChainError> {
        let call = executeSwapCall::abi_decode(&submission.calldata).map_err(|e| ChainError::Rpc(e.to_string()))?;
        let amount = u128::try_from(call.amount).map_err(|e| ChainError::Rpc(e.to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let result = self.mine_submission(call.user, amount);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("unknown transaction {}", hash)))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let state = self.state.lock().unwrap();
        if state.hidden_receipts.contains(&hash) {
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn query_logs(&self, query: LogQuery) -> Result<Vec<ChainLog>, ChainError> {
        let state = self.state.lock().unwrap();
        let mut receipts: Vec<&TxReceipt> = state.receipts.values().collect();
        receipts.sort_by_key(|r| r.block_number);

        let logs = receipts
            .into_iter()
            .flat_map(|r| r.logs.iter())
            .chain(state.loose_logs.iter())
            .filter(|log| log.address == query.address)
            .filter(|log| {
                log.topics
                    .first()
                    .map(|t| query.event_signatures.contains(t))
                    .unwrap_or(false)
            })
            .filter(|log| {
                log.block_number
                    .map(|b| b >= query.from_block && b <= query.to_block)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(logs)
    }
}

/// Always routes, with fixed calldata
pub struct FakeQuotes;

#[async_trait]
impl QuoteService for FakeQuotes {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError> {
        Ok(SwapQuote {
            to: Address::repeat_byte(0x44),
            calldata: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            value: U256::ZERO,
            deadline: request.deadline,
        })
    }
}

/// Fixed fiat price per asset unit
pub struct FakeOracle {
    price: Decimal,
    failing: Mutex<bool>,
}

impl FakeOracle {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            failing: Mutex::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn check(&self) -> Result<(), OracleError> {
        if *self.failing.lock().unwrap() {
            return Err(OracleError::InvalidResponse("oracle offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RateOracle for FakeOracle {
    async fn asset_to_fiat(&self, amount: Decimal) -> Result<Decimal, OracleError> {
        self.check()?;
        Ok(amount * self.price)
    }

    async fn fiat_to_asset(&self, amount: Decimal) -> Result<Decimal, OracleError> {
        self.check()?;
        Ok(amount / self.price)
    }
}

pub struct StaticSecrets {
    missing: bool,
}

impl StaticSecrets {
    pub fn valid() -> Self {
        Self { missing: false }
    }

    pub fn missing() -> Self {
        Self { missing: true }
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn executor_credential(&self) -> Result<ExecutorCredential, SecretError> {
        if self.missing {
            return Err(SecretError::Missing("DCA_EXECUTOR_PRIVATE_KEY".to_string()));
        }
        ExecutorCredential::from_secret("test", &format!("0x{}", "11".repeat(32)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Purchase(String, Decimal),
    LackOfFunds(String, Decimal),
    Milestone(String, u32, Decimal),
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn purchase_confirmation(&self, user: &User, amount: Decimal) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::Purchase(user.address.clone(), amount));
        Ok(())
    }

    async fn lack_of_funds(&self, user: &User, amount: Decimal) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent::LackOfFunds(user.address.clone(), amount));
        Ok(())
    }

    async fn milestone_achieved(&self, user: &User, milestone_pct: u32, total_invested: Decimal) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Milestone(user.address.clone(), milestone_pct, total_invested));
        Ok(())
    }
}

/// Everything an executor or reconciler test needs, wired together
pub struct Harness {
    pub ledger: Arc<PaymentLedger>,
    pub chain: Arc<FakeChain>,
    pub oracle: Arc<FakeOracle>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(PaymentLedger::in_memory()),
            chain: Arc::new(FakeChain::new()),
            oracle: Arc::new(FakeOracle::new(Decimal::from(60_000))),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    /// Fresh fakes around an existing ledger
    pub fn with_ledger(ledger: PaymentLedger) -> Self {
        Self {
            ledger: Arc::new(ledger),
            ..Self::new()
        }
    }

    /// Same chain and oracle, fresh ledger
    pub fn with_fresh_ledger(&self) -> Self {
        Self {
            ledger: Arc::new(PaymentLedger::in_memory()),
            chain: self.chain.clone(),
            oracle: self.oracle.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub async fn enroll(&self, address: &str, cadence: Cadence, amount: Decimal, target: Decimal) -> User {
        let user = User::new(address, cadence, amount, target);
        self.ledger.enroll_user(user.clone()).await.unwrap();
        user
    }

    pub async fn plan(&self, plan_id: &str, user: &str, remaining: Decimal) -> Plan {
        let plan = Plan::new(plan_id, user, remaining);
        self.ledger.upsert_plan(plan.clone()).await.unwrap();
        plan
    }

    pub fn executor(&self) -> PaymentExecutor {
        self.executor_with(Arc::new(FakeQuotes), Arc::new(StaticSecrets::valid()))
    }

    pub fn executor_with(&self, quotes: Arc<dyn QuoteService>, secrets: Arc<dyn SecretProvider>) -> PaymentExecutor {
        let settings = ExecutorSettings::from_config(&config()).unwrap();
        PaymentExecutor::new(
            settings,
            self.ledger.clone(),
            self.chain.clone(),
            quotes,
            self.oracle.clone(),
            secrets,
            self.notifier.clone(),
        )
    }

    pub fn reconciler(&self) -> EventReconciler {
        let settings = ReconcilerSettings::from_config(&config()).unwrap();
        EventReconciler::new(settings, self.ledger.clone(), self.chain.clone(), self.oracle.clone())
    }
}
