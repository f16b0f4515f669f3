// sol_cycle: runs the address-lifecycle trading pipeline against a
// config file.

use log::{error, info};
use sol_cycle_core::activity_log::ActivityLog;
use sol_cycle_core::stages::{
    BalanceAudit, BuyService, DrainAudit, MintFilterService, PriceMonitorService, PrunerService,
    ScanService, SellService, Stage, TreasuryService,
};
use sol_cycle_core::{
    AddressStore, CapitalStore, CodexClient, HandoffList, KeypairSigner, NativeRpcClient,
    Pipeline, RaydiumClient, Settings, SplTokenCli,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "Usage: sol_cycle [--config <path>] [--once]

Options:
  --config <path>   Settings file (default: Config.json)
  --once            Run a single pipeline cycle and exit
  -h, --help        Show this help";

struct CliArgs {
    config: String,
    once: bool,
}

fn parse_args() -> CliArgs {
    let mut config = "Config.json".to_string();
    let mut once = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = path,
                None => {
                    eprintln!("--config requires a path\n{}", USAGE);
                    std::process::exit(2);
                }
            },
            "--once" => once = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}\n{}", other, USAGE);
                std::process::exit(2);
            }
        }
    }

    CliArgs { config, once }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();

    // A broken config is the one fatal error class.
    let settings = match Settings::from_file(&args.config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load settings from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        error!("Invalid settings: {}", e);
        std::process::exit(1);
    }

    let signer = match KeypairSigner::from_settings(&settings) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to load wallet keypair: {}", e);
            std::process::exit(1);
        }
    };

    let settings = Arc::new(settings);
    let data_dir = PathBuf::from(&settings.data_dir);

    let store = Arc::new(AddressStore::new(data_dir.join("addresses.json")));
    let capital = Arc::new(CapitalStore::new(data_dir.join("current_capital.json")));
    let current_list = || HandoffList::new(data_dir.join("current_list.json"));
    let secure_list = || HandoffList::new(data_dir.join("secure_list.json"));

    let rpc = Arc::new(NativeRpcClient::new(settings.solana_rpc_urls[0].clone()));
    let discovery = Arc::new(CodexClient::new(
        settings.discovery_url.clone(),
        settings.api_key.clone(),
        settings.network_id,
    ));
    let swap = Arc::new(RaydiumClient::new(
        settings.swap_host.clone(),
        settings.swap_fee_url.clone(),
    ));
    let wallet = Arc::new(SplTokenCli::new(Duration::from_secs(
        settings.command_timeout_secs,
    )));

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ScanService::new(
            discovery.clone(),
            current_list(),
            data_dir.join("scanlog"),
            settings.clone(),
        )),
        Box::new(MintFilterService::new(
            rpc.clone(),
            current_list(),
            secure_list(),
            store.clone(),
            settings.clone(),
        )),
        Box::new(TreasuryService::new(
            wallet.clone(),
            secure_list(),
            store.clone(),
            capital.clone(),
            settings.clone(),
        )),
        Box::new(BuyService::new(
            swap.clone(),
            rpc.clone(),
            signer.clone(),
            store.clone(),
            capital.clone(),
            settings.clone(),
        )),
        Box::new(BalanceAudit::new(wallet.clone(), store.clone(), &settings)),
        Box::new(PriceMonitorService::new(
            discovery.clone(),
            store.clone(),
            settings.clone(),
        )),
        Box::new(SellService::new(
            swap,
            rpc,
            signer,
            wallet.clone(),
            store.clone(),
            settings.clone(),
        )),
        Box::new(DrainAudit::new(wallet, store.clone(), &settings)),
        Box::new(PrunerService::new(store, settings.clone())),
    ];

    let activity = ActivityLog::new(
        PathBuf::from(&settings.log_dir),
        Duration::from_secs(settings.log_rotate_secs),
    );
    let pipeline = Pipeline::new(stages, activity, &settings);

    if args.once {
        let summary = pipeline.run_cycle().await;
        info!(
            "Cycle finished: {} stages succeeded, {} failed",
            summary.succeeded, summary.failed
        );
    } else {
        pipeline.run_forever().await;
    }
}
