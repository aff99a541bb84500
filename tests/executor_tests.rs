//! Execution cycle tests against an in-memory chain

mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mockall::mock;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use common::{usdc, Harness, Sent, StaticSecrets, USER_A, USER_B, USER_C};
use dca_engine::execution::{ExecutorError, QuoteError, QuoteRequest, QuoteService, SwapQuote};
use dca_engine::ledger::PaymentCommit;
use dca_engine::utils::{Cadence, FailureKind, PaymentSource};

mock! {
    Quotes {}

    #[async_trait]
    impl QuoteService for Quotes {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError>;
    }
}

#[tokio::test]
async fn test_cycle_commits_each_due_user() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_B, Cadence::Daily, dec!(20), dec!(1000)).await;
    h.enroll(USER_C, Cadence::Weekly, dec!(30), dec!(1000)).await;

    let report = assert_ok!(h.executor().run_cycle(Cadence::Daily).await);

    assert_eq!(report.attempted, 2);
    assert_eq!(report.committed.len(), 2);
    assert!(report.failures.is_empty());

    let a = h.ledger.user(USER_A).await.unwrap();
    assert_eq!(a.total_invested, dec!(10));
    assert_eq!(a.total_invested_raw, usdc(10));
    assert_eq!(a.payments.len(), 1);

    let record = h.ledger.payment_by_tx(&a.payments[0]).await.unwrap();
    assert_eq!(record.source, PaymentSource::Executor);
    assert_eq!(record.input_raw, usdc(10));
    assert_eq!(record.price, dec!(100.00));
    assert_eq!(record.gas_used, 180_000);

    // Weekly user untouched
    let c = h.ledger.user(USER_C).await.unwrap();
    assert!(c.payments.is_empty());
    assert!(h.ledger.audit().await.is_empty());
}

#[tokio::test]
async fn test_one_user_failure_does_not_stop_the_cycle() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_B, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_C, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.chain.insufficient_funds_for(USER_B);

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.committed.len(), 2);
    assert_eq!(report.failures.len(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.user_address, USER_B);
    assert_eq!(failure.kind, FailureKind::InsufficientFunds);
    assert_eq!(failure.tx_hash, None);

    let sent = h.notifier.sent();
    assert!(sent.contains(&Sent::LackOfFunds(USER_B.to_string(), dec!(10))));
    assert!(sent.contains(&Sent::Purchase(USER_A.to_string(), dec!(10))));
    assert!(sent.contains(&Sent::Purchase(USER_C.to_string(), dec!(10))));
    assert_eq!(h.chain.submissions().len(), 2);
}

#[tokio::test]
async fn test_reverted_swap_reports_hash_without_commit() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.chain.revert_for(USER_A);

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();

    assert!(report.committed.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Other);
    assert!(report.failures[0].tx_hash.is_some());
    assert!(h.ledger.user(USER_A).await.unwrap().payments.is_empty());
    // A revert is not a funding problem
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_milestones_crossed_by_one_purchase() {
    let h = Harness::new();
    let user = h.enroll(USER_A, Cadence::Daily, dec!(360), dec!(1000)).await;

    // Earlier purchase worth $400, outside the current period
    let mut seed = PaymentCommit::new(&user, "0x5eed", PaymentSource::Executor)
        .executed_at(Utc::now() - Duration::days(30));
    seed.planned_amount = dec!(400);
    h.ledger.commit_payment(seed).await.unwrap();

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();
    assert_eq!(report.committed.len(), 1);

    let sent = h.notifier.sent();
    assert_eq!(
        sent,
        vec![
            Sent::Purchase(USER_A.to_string(), dec!(360)),
            Sent::Milestone(USER_A.to_string(), 50, dec!(760)),
            Sent::Milestone(USER_A.to_string(), 75, dec!(760)),
        ]
    );
}

#[tokio::test]
async fn test_user_paid_this_period_is_skipped() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    let executor = h.executor();

    let first = executor.run_cycle(Cadence::Daily).await.unwrap();
    assert_eq!(first.committed.len(), 1);

    let second = executor.run_cycle(Cadence::Daily).await.unwrap();
    assert_eq!(second.attempted, 0);
    assert_eq!(second.skipped, vec![USER_A.to_string()]);
    assert_eq!(h.chain.submissions().len(), 1);
}

#[tokio::test]
async fn test_paused_user_not_attempted() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.ledger.set_paused(USER_A, true).await.unwrap();

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();
    assert_eq!(report.attempted, 0);
    assert!(h.chain.submissions().is_empty());
}

#[tokio::test]
async fn test_payment_event_accrues_to_plan() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.plan("plan-a", USER_A, dec!(10000)).await;
    h.chain.emit_payments_for(USER_A, "plan-a");

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();
    let record = &report.committed[0];
    assert_eq!(record.plan_id.as_deref(), Some("plan-a"));
    assert!(record.payment_id.is_some());

    let plan = h.ledger.plan_for("plan-a", USER_A).await.unwrap();
    // 10 USDC at unit sqrt price buys 0.1 cbBTC, valued at 60k
    assert_eq!(plan.value_accrued, dec!(0.1));
    assert_eq!(plan.total_paid, dec!(0.1));
    assert_eq!(plan.remaining_to_be_paid, dec!(4000));
    assert_eq!(plan.streak, 1);
}

#[tokio::test]
async fn test_oracle_outage_still_records_purchase() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.plan("plan-a", USER_A, dec!(10000)).await;
    h.chain.emit_payments_for(USER_A, "plan-a");
    h.oracle.set_failing(true);

    let report = h.executor().run_cycle(Cadence::Daily).await.unwrap();
    assert_eq!(report.committed.len(), 1);
    // Owed to the plan until the reconciler can value it
    assert!(report.committed[0].accrual_pending);
    assert_eq!(report.committed[0].plan_id.as_deref(), Some("plan-a"));

    let plan = h.ledger.plan_for("plan-a", USER_A).await.unwrap();
    assert_eq!(plan.streak, 0);
    assert_eq!(plan.remaining_to_be_paid, dec!(10000));
}

#[tokio::test]
async fn test_overlapping_cycles_submit_one_at_a_time() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_B, Cadence::Weekly, dec!(20), dec!(1000)).await;
    h.chain.slow_submissions(50);

    let executor = h.executor();
    let (daily, weekly) = tokio::join!(
        executor.run_cycle(Cadence::Daily),
        executor.run_cycle(Cadence::Weekly)
    );

    assert_eq!(daily.unwrap().committed.len(), 1);
    assert_eq!(weekly.unwrap().committed.len(), 1);
    assert_eq!(h.chain.submissions().len(), 2);
    assert_eq!(h.chain.max_in_flight(), 1);
    assert!(h.ledger.audit().await.is_empty());
}

#[tokio::test]
async fn test_gas_failure_aborts_cycle() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.chain.fail_gas("connection refused");

    let err = assert_err!(h.executor().run_cycle(Cadence::Daily).await);
    assert!(matches!(err, ExecutorError::FatalGasPrice(_)));
    assert!(h.chain.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_credential_aborts_cycle() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;

    let executor = h.executor_with(Arc::new(common::FakeQuotes), Arc::new(StaticSecrets::missing()));
    let err = assert_err!(executor.run_cycle(Cadence::Daily).await);
    assert!(matches!(err, ExecutorError::FatalCredential(_)));
}

#[tokio::test]
async fn test_quote_failures_are_per_user() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_B, Cadence::Daily, dec!(15), dec!(1000)).await;

    let mut quotes = MockQuotes::new();
    quotes
        .expect_quote()
        .withf(|req: &QuoteRequest| req.amount_in == usdc(10) || req.amount_in == usdc(15))
        .times(2)
        .returning(|_| Err(QuoteError::NoRoute));

    let executor = h.executor_with(Arc::new(quotes), Arc::new(StaticSecrets::valid()));
    let report = executor.run_cycle(Cadence::Daily).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Other));
    assert!(h.chain.submissions().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_second_user_quote_failure_is_isolated() {
    let h = Harness::new();
    h.enroll(USER_A, Cadence::Daily, dec!(10), dec!(1000)).await;
    h.enroll(USER_B, Cadence::Daily, dec!(15), dec!(1000)).await;
    h.enroll(USER_C, Cadence::Daily, dec!(20), dec!(1000)).await;

    let mut quotes = MockQuotes::new();
    quotes
        .expect_quote()
        .withf(|req: &QuoteRequest| req.amount_in == usdc(15))
        .times(1)
        .returning(|_| Err(QuoteError::Status { status: 502, body: "bad gateway".to_string() }));
    quotes
        .expect_quote()
        .withf(|req: &QuoteRequest| req.amount_in != usdc(15))
        .times(2)
        .returning(|req| {
            Ok(SwapQuote {
                to: alloy::primitives::Address::repeat_byte(0x44),
                calldata: alloy::primitives::Bytes::from(vec![0x01]),
                value: alloy::primitives::U256::ZERO,
                deadline: req.deadline,
            })
        });

    let executor = h.executor_with(Arc::new(quotes), Arc::new(StaticSecrets::valid()));
    let report = executor.run_cycle(Cadence::Daily).await.unwrap();

    let committed: Vec<&str> = report.committed.iter().map(|r| r.user_address.as_str()).collect();
    assert_eq!(committed, vec![USER_A, USER_C]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].user_address, USER_B);
    assert!(h.ledger.user(USER_B).await.unwrap().payments.is_empty());
    assert!(h.ledger.audit().await.is_empty());
}
