use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use multidelegate_crypto::signatures::{address_of, signed_call, SigningKey};
use multidelegate_execution::{execute_call, GlobalState, VotableAsset};
use multidelegate_types::{
    Address, Amount, Call, DelegateId, DelegationInstruction, ProcessorConfig, SettlementMode,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-delegate randomized scenario runner")]
struct Args {
    /// Independent scenarios, run in parallel.
    #[arg(long, default_value_t = 8)]
    scenarios: u64,
    /// Depositor wallets per scenario.
    #[arg(long, default_value_t = 20)]
    depositors: usize,
    /// Delegates that calls pick sources and targets from.
    #[arg(long, default_value_t = 12)]
    delegates: usize,
    /// `delegate_multi` calls per scenario.
    #[arg(long, default_value_t = 500)]
    rounds: usize,
    /// Asset airdropped to each depositor.
    #[arg(long, default_value_t = 1_000_000)]
    simulation_money: Amount,
    /// Scenario `i` runs with `seed + i`.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value = "warn")]
    log_level: Level,
}

struct SimWallet {
    keypair: SigningKey,
    address: Address,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct ScenarioReport {
    seed: u64,
    succeeded: u64,
    failed: u64,
    proxies: usize,
    sequential_moves: usize,
    netted_moves: usize,
    root: [u8; 32],
}

fn build_wallets(rng: &mut StdRng, wallet_count: usize) -> Vec<SimWallet> {
    (0..wallet_count)
        .map(|_| {
            let keypair = SigningKey::from_bytes(&rng.gen());
            let address = address_of(&keypair);
            SimWallet { keypair, address }
        })
        .collect()
}

fn sign_call(wallet: &SimWallet, nonce: u64, instruction: DelegationInstruction) -> Call {
    signed_call(&wallet.keypair, nonce, instruction)
}

/// Mints `amount` to every wallet and has each grant the processor an unlimited allowance.
fn seed_simulation_money(
    state: &mut GlobalState,
    wallets: &[SimWallet],
    amount: Amount,
) -> Result<()> {
    for wallet in wallets {
        state
            .token
            .mint(wallet.address, amount)
            .context("airdrop overflowed the supply")?;
        let approve = sign_call(
            wallet,
            state.nonce_of(&wallet.address),
            DelegationInstruction::ApproveProcessor {
                amount: Amount::MAX,
            },
        );
        execute_call(&approve, state)?;
    }
    Ok(())
}

/// A mostly valid call: sources drawn from what the wallet holds, targets sized to
/// what it can afford. A few calls name a source it does not hold or overspend.
fn random_instruction(
    rng: &mut StdRng,
    state: &GlobalState,
    wallet: &SimWallet,
    delegates: &[DelegateId],
) -> DelegationInstruction {
    let held: Vec<(DelegateId, Amount)> = state.ledger.entries_of(&wallet.address).collect();
    let source_count = rng.gen_range(0..=held.len().min(3));
    let picked: Vec<(DelegateId, Amount)> =
        held.choose_multiple(rng, source_count).copied().collect();

    let mut available = state.token.balance_of(&wallet.address);
    let mut sources = Vec::with_capacity(picked.len() + 1);
    for (delegate, amount) in picked {
        available = available.saturating_add(amount);
        sources.push(delegate);
    }
    if rng.gen_bool(0.03) {
        if let Some(stray) = delegates.choose(rng) {
            sources.push(*stray);
        }
    }

    let mut target_count = rng.gen_range(0..=delegates.len().min(3));
    if sources.is_empty() && target_count == 0 {
        target_count = 1;
    }
    let targets: Vec<DelegateId> = delegates.choose_multiple(rng, target_count).copied().collect();

    let cap = (available / targets.len().max(1) as Amount).max(1);
    let amounts = targets
        .iter()
        .map(|_| {
            let amount = rng.gen_range(1..=cap);
            if rng.gen_bool(0.03) {
                amount.saturating_mul(2)
            } else {
                amount
            }
        })
        .collect();

    DelegationInstruction::DelegateMulti {
        sources,
        targets,
        amounts,
    }
}

fn new_state(asset: Address, settlement: SettlementMode) -> GlobalState {
    let mut config = ProcessorConfig::new(asset);
    config.settlement = settlement;
    GlobalState::new(config)
}

/// Replays the same random calls against a sequential and a netted processor and fails
/// as soon as they disagree or either one breaks an invariant.
fn run_scenario(args: &Args, seed: u64) -> Result<ScenarioReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let asset: Address = rng.gen();
    let wallets = build_wallets(&mut rng, args.depositors);
    let delegates: Vec<DelegateId> = (0..args.delegates).map(|_| rng.gen()).collect();
    ensure!(!wallets.is_empty() && !delegates.is_empty(), "need depositors and delegates");

    let mut sequential = new_state(asset, SettlementMode::Sequential);
    let mut netted = new_state(asset, SettlementMode::Netted);
    seed_simulation_money(&mut sequential, &wallets, args.simulation_money)?;
    seed_simulation_money(&mut netted, &wallets, args.simulation_money)?;

    let mut report = ScenarioReport {
        seed,
        ..Default::default()
    };

    for round in 0..args.rounds {
        let wallet = &wallets[rng.gen_range(0..wallets.len())];
        let instruction = random_instruction(&mut rng, &sequential, wallet, &delegates);
        let call = sign_call(wallet, sequential.nonce_of(&wallet.address), instruction);

        match (
            execute_call(&call, &mut sequential),
            execute_call(&call, &mut netted),
        ) {
            (Ok(a), Ok(b)) => {
                report.succeeded += 1;
                report.sequential_moves += a.delegation.map_or(0, |d| d.moves.len());
                report.netted_moves += b.delegation.map_or(0, |d| d.moves.len());
            }
            (Err(_), Err(_)) => report.failed += 1,
            (a, b) => bail!(
                "seed {seed} round {round}: modes disagree (sequential {:?}, netted {:?})",
                a.err().map(|e| e.to_string()),
                b.err().map(|e| e.to_string())
            ),
        }

        ensure!(
            sequential.ledger == netted.ledger
                && sequential.registry == netted.registry
                && sequential.token == netted.token,
            "seed {seed} round {round}: settlement modes diverged"
        );
        sequential
            .audit()
            .with_context(|| format!("seed {seed} round {round}: sequential audit"))?;
        netted
            .audit()
            .with_context(|| format!("seed {seed} round {round}: netted audit"))?;
    }

    report.proxies = sequential.registry.len();
    report.root = sequential.root_hash();
    info!(
        seed,
        succeeded = report.succeeded,
        failed = report.failed,
        proxies = report.proxies,
        "Scenario finished"
    );
    Ok(report)
}

fn run_simulation(args: &Args) -> Result<Vec<ScenarioReport>> {
    (0..args.scenarios)
        .into_par_iter()
        .map(|i| run_scenario(args, args.seed.wrapping_add(i)))
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let start = Instant::now();
    let reports = run_simulation(&args)?;
    let elapsed = start.elapsed();

    let succeeded: u64 = reports.iter().map(|r| r.succeeded).sum();
    let failed: u64 = reports.iter().map(|r| r.failed).sum();
    let sequential_moves: usize = reports.iter().map(|r| r.sequential_moves).sum();
    let netted_moves: usize = reports.iter().map(|r| r.netted_moves).sum();
    let calls = succeeded + failed;
    let cps = if elapsed.as_secs_f64() > 0.0 {
        calls as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    println!("=== Multi-delegate simulation ===");
    println!("Scenarios: {} (seeds {}..)", reports.len(), args.seed);
    println!("Depositors per scenario: {}", args.depositors);
    println!("Delegates per scenario: {}", args.delegates);
    println!("Calls accepted: {}", succeeded);
    println!("Calls rejected: {}", failed);
    println!("Asset moves (sequential): {}", sequential_moves);
    println!("Asset moves (netted): {}", netted_moves);
    println!("Elapsed: {:.2?}", elapsed);
    println!("Calls/s (both modes): {:.2}", cps);

    Ok(())
}
