//! disburse-runner: headless runner for the disbursement engine.
//!
//! Usage:
//!   disburse-runner --seed 12345 --loans 40 --seconds 20 --db run.db
//!   disburse-runner --config data/engine.json --statement bank.csv
//!   disburse-runner --ipc-mode          (JSON commands on stdin)

use anyhow::{Context, Result};
use disburse_core::{
    clock::{Clock, SystemClock},
    config::EngineConfig,
    engine::PayEngine,
    ids::UuidIdGenerator,
    model::{Account, Loan, PaymentStatus},
    notifier::ChannelNotifier,
    processor::{BeneficiaryDetails, DisburseRequest, PaymentRequest},
    provider::{RailProviders, SimulatedProvider},
    reconciliation::{load_statement, StatementEntry},
    rng::{RngBank, RngSlot},
    scheduler::process_on_demand,
    store::PayStore,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Disburse { request: DisburseRequest },
    CreatePayment { request: PaymentRequest },
    Process { record_id: String },
    Retry { record_id: String },
    Reconcile { date: String },
    Quit,
}

#[derive(serde::Serialize)]
struct RunSummary {
    seed: u64,
    loans: i64,
    initiated: i64,
    processing: i64,
    success: i64,
    suspended: i64,
    failed: i64,
    funding_balance: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let loans = parse_arg(&args, "--loans", 25u64);
    let seconds = parse_arg(&args, "--seconds", 15u64);
    let balance = parse_arg(&args, "--balance", 50_000_000.0f64);
    let db = str_arg(&args, "--db").unwrap_or(":memory:");

    let mut config = match str_arg(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.seed = parse_arg(&args, "--seed", config.seed);
    let seed = config.seed;

    if !ipc_mode {
        println!("disburse-runner");
        println!("  seed:      {seed}");
        println!("  loans:     {loans}");
        println!("  seconds:   {seconds}");
        println!("  db:        {db}");
        println!();
    }

    let store = Arc::new(if db == ":memory:" {
        PayStore::in_memory()?
    } else {
        PayStore::open(db)?
    });
    store.migrate()?;
    if store.get_account(&config.funding_account_id).is_err() {
        store.insert_account(&Account {
            account_id: config.funding_account_id.clone(),
            balance,
            alert_threshold: balance * 0.1,
        })?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = Arc::new(SimulatedProvider::new(
        config.provider.clone(),
        RngBank::new(seed).for_slot(RngSlot::SimulatedProvider),
        clock.clone(),
    ));
    let (notifier, notifications) = ChannelNotifier::new();
    thread::Builder::new()
        .name("notifications".into())
        .spawn(move || {
            for txn_id in notifications {
                log::info!("notify: transfer {txn_id} settled");
            }
        })
        .context("cannot spawn notification thread")?;

    let engine = PayEngine::build(
        config,
        store.clone(),
        RailProviders::uniform(provider.clone()),
        Arc::new(notifier),
        clock.clone(),
        Arc::new(UuidIdGenerator),
    );

    if ipc_mode {
        return run_ipc_loop(&engine, &provider);
    }

    seed_loans(&engine, loans)?;

    let scheduler = engine.start_scheduler()?;
    thread::sleep(Duration::from_secs(seconds));
    scheduler.stop();

    let statement: Vec<StatementEntry> = match str_arg(&args, "--statement") {
        Some(path) => load_statement(path)?,
        None => simulated_statement(&provider),
    };
    let today = clock.now().date_naive().format("%Y-%m-%d").to_string();
    let report = engine.reconcile(&today, &statement)?;

    print_summary(&engine, seed)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Loans spread across all three rail tiers.
fn seed_loans(engine: &PayEngine, count: u64) -> Result<()> {
    const AMOUNTS: [f64; 5] = [25_000.0, 95_000.0, 240_000.0, 480_000.0, 750_000.0];
    for i in 0..count {
        let loan_id = format!("LOAN-{i:05}");
        let amount = AMOUNTS[(i as usize) % AMOUNTS.len()];
        if engine.store.get_loan(&loan_id).is_err() {
            engine.store.insert_loan(&Loan {
                loan_id: loan_id.clone(),
                amount,
                beneficiary_id: None,
            })?;
        }
        let response = engine.processor.disburse(&DisburseRequest {
            loan_id: loan_id.clone(),
            amount,
            beneficiary: Some(BeneficiaryDetails {
                name: format!("Borrower {i}"),
                account_number: format!("{:012}", 100_000_000 + i),
                ifsc: if i % 17 == 16 {
                    "BADIFSC".into()
                } else {
                    format!("HDFC0{:06}", i % 1000)
                },
                bank_name: "HDFC Bank".into(),
            }),
        })?;
        log::debug!("{loan_id}: {}", response.message);
    }
    Ok(())
}

/// What the bank would report: every transfer the provider completed.
fn simulated_statement(provider: &SimulatedProvider) -> Vec<StatementEntry> {
    provider
        .settled()
        .into_iter()
        .map(|r| StatementEntry {
            reference_id: r.reference_id,
            amount: r.amount,
            status: "SUCCESS".into(),
        })
        .collect()
}

fn run_ipc_loop(engine: &PayEngine, provider: &SimulatedProvider) -> Result<()> {
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

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => serde_json::to_value(summary(engine, engine.config.seed)?),
            IpcCommand::Disburse { request } => match engine.processor.disburse(&request) {
                Ok(response) => serde_json::to_value(response),
                Err(e) => Ok(serde_json::json!({ "error": e.to_string() })),
            },
            IpcCommand::CreatePayment { request } => {
                match engine.processor.create_payment(&request) {
                    Ok(response) => serde_json::to_value(response),
                    Err(e) => Ok(serde_json::json!({ "error": e.to_string() })),
                }
            }
            IpcCommand::Process { record_id } => {
                match process_on_demand(
                    &engine.store,
                    engine.processor.channels(),
                    engine.processor.as_ref(),
                    &record_id,
                ) {
                    Ok(outcome) => Ok(serde_json::json!({ "outcome": format!("{outcome:?}") })),
                    Err(e) => Ok(serde_json::json!({ "error": e.to_string() })),
                }
            }
            IpcCommand::Retry { record_id } => match engine.processor.retry(&record_id) {
                Ok(record) => serde_json::to_value(record),
                Err(e) => Ok(serde_json::json!({ "error": e.to_string() })),
            },
            IpcCommand::Reconcile { date } => match engine.reconcile(&date, &simulated_statement(provider)) {
                Ok(report) => serde_json::to_value(report),
                Err(e) => Ok(serde_json::json!({ "error": e.to_string() })),
            },
        }?;
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn summary(engine: &PayEngine, seed: u64) -> Result<RunSummary> {
    let store = &engine.store;
    Ok(RunSummary {
        seed,
        loans: store.loan_count()?,
        initiated: store.record_count(PaymentStatus::Initiated)?,
        processing: store.record_count(PaymentStatus::Processing)?,
        success: store.record_count(PaymentStatus::Success)?,
        suspended: store.record_count(PaymentStatus::Suspended)?,
        failed: store.record_count(PaymentStatus::Failed)?,
        funding_balance: store.account_balance(&engine.config.funding_account_id)?,
    })
}

fn print_summary(engine: &PayEngine, seed: u64) -> Result<()> {
    let s = summary(engine, seed)?;
    println!("=== Run complete ===");
    println!("  loans:      {}", s.loans);
    println!("  success:    {}", s.success);
    println!("  suspended:  {}", s.suspended);
    println!("  failed:     {}", s.failed);
    println!("  initiated:  {}", s.initiated);
    println!("  processing: {}", s.processing);
    println!("  balance:    {:.2}", s.funding_balance);
    println!();
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payment_command_parses() {
        let line = r#"{"type":"create_payment","request":{"amount":750.0,"funding_account_id":null,
            "beneficiary":{"name":"Asha Rao","account_number":"998877665544","ifsc":"HDFC0001234",
            "bank_name":"HDFC Bank"},"idempotency_key":"order-77"}}"#;
        let cmd: IpcCommand = serde_json::from_str(line).unwrap();
        let IpcCommand::CreatePayment { request } = cmd else {
            panic!("expected create_payment");
        };
        assert_eq!(request.amount, 750.0);
        assert_eq!(request.idempotency_key.as_deref(), Some("order-77"));
    }

    #[test]
    fn state_reports_seeded_loans() {
        let harness = PayEngine::build_test(1, 1_000_000.0).unwrap();
        seed_loans(&harness.engine, 3).unwrap();
        let state = summary(&harness.engine, 1).unwrap();
        assert_eq!(state.loans, 3);
    }
}
