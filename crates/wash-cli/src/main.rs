use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use wash_analysis::pipeline::{address_clusters, build_worker_pool, run_detection};
use wash_analysis::scc::extract_scc_catalog;
use wash_data::config::{DetectionConfig, DEFAULT_ETHER_ADDRESS};
use wash_data::loader::{load_prices_csv, load_token_decimals_json, load_trades_csv};
use wash_data::preprocess::preprocess;
use wash_data::store::Store;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
}

#[derive(Parser, Debug)]
#[command(name = "wash-detect")]
#[command(about = "Wash-trading detection for on-chain token exchanges")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/wash.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full detection pipeline and persist the results.
    Detect(DetectArgs),
    /// Summarize what the result store currently holds.
    Status(StatusArgs),
    /// Export stored results to CSV/JSON files.
    Export(ExportArgs),
}

/// Arguments for the `detect` subcommand.
///
/// Reads the raw trade dump plus the ETH/USD price series, runs
/// preprocessing, layered SCC extraction, and volume matching, and persists
/// every output to the SQLite store.
#[derive(Args, Debug)]
struct DetectArgs {
    /// Raw trades CSV.
    #[arg(long)]
    trades: PathBuf,

    /// ETH/USD price CSV (date, timestamp, usd_per_eth).
    #[arg(long)]
    prices: PathBuf,

    /// Optional per-token decimals JSON; absent tokens default to 18.
    #[arg(long)]
    decimals: Option<PathBuf>,

    /// Balance tolerance as a fraction of the window's mean trade amount.
    #[arg(long, default_value_t = 0.1)]
    margin: f64,

    /// Minimum layered occurrence count for a relevant SCC.
    #[arg(long, default_value_t = 100)]
    threshold: u64,

    /// Window sizes in seconds, comma separated.
    #[arg(long, value_delimiter = ',', default_values_t = [3_600i64, 86_400, 604_800])]
    windows: Vec<i64>,

    /// Worker pool size for both parallel regions.
    #[arg(long, default_value_t = 16)]
    workers: usize,

    /// Token address treated as the ETH side of a trade.
    #[arg(long, default_value = DEFAULT_ETHER_ADDRESS)]
    ether_address: String,

    /// Keep trades regardless of their status field.
    #[arg(long)]
    no_status_filter: bool,

    /// Balance windows on the ETH amount instead of the token amount.
    #[arg(long)]
    use_eth_amount: bool,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[derive(Args, Debug)]
struct StatusArgs {}

/// Arguments for the `export` subcommand.
#[derive(Args, Debug)]
struct ExportArgs {
    /// Directory the export files are written into.
    #[arg(long, default_value = "data/export")]
    out: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Detect(args) => handle_detect(&ctx, args),
        Commands::Status(args) => handle_status(&ctx, args),
        Commands::Export(args) => handle_export(&ctx, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn handle_detect(ctx: &AppContext, args: DetectArgs) -> Result<()> {
    let config = DetectionConfig {
        ether_address: args.ether_address.clone(),
        scc_occurrence_threshold: args.threshold,
        wash_margin: args.margin,
        window_sizes_seconds: args.windows.clone(),
        worker_count: args.workers,
        filter_status: !args.no_status_filter,
        wash_trade_uses_eth_amount: args.use_eth_amount,
    };
    config.validate()?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .wrap_err("failed to create progress style")?,
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    pb.set_message("loading input files");
    let load = load_trades_csv(&args.trades)?;
    let input_rows = load.rows.len();
    let skipped = (load.skipped_incomplete, load.skipped_malformed);
    let prices = load_prices_csv(&args.prices)?;
    let decimals = match &args.decimals {
        Some(path) => load_token_decimals_json(path)?,
        None => Default::default(),
    };

    pb.set_message("preprocessing trades");
    let preprocessed = preprocess(load.rows, &prices, &decimals, &config)?;

    let pool = build_worker_pool(config.worker_count)?;

    pb.set_message("extracting layered SCCs");
    let catalog = extract_scc_catalog(
        &preprocessed.table,
        config.scc_occurrence_threshold,
        &pool,
    );

    pb.set_message("volume matching");
    let outcome = run_detection(&preprocessed.table, &catalog, &config, &pool);
    let clusters = address_clusters(&catalog, &preprocessed.traders);

    pb.set_message("persisting results");
    persist_results(ctx, &preprocessed, &catalog, &outcome)?;

    pb.finish_with_message("detection completed");

    match args.output.to_lowercase().as_str() {
        "table" => {
            print_detect_table(&args, input_rows, skipped, &preprocessed, &catalog, &outcome)?
        }
        "json" => print_detect_json(input_rows, skipped, &preprocessed, &catalog, &outcome)?,
        other => return Err(eyre!("unknown output format '{}'; use 'table' or 'json'", other)),
    }

    info!(
        trades = preprocessed.table.len(),
        relevant_sccs = catalog.relevant_count(),
        wash_labeled = outcome.labeled_count(),
        clusters = clusters.len(),
        db_path = %ctx.db_path,
        "detect command completed"
    );

    Ok(())
}

fn persist_results(
    ctx: &AppContext,
    preprocessed: &wash_data::preprocess::Preprocessed,
    catalog: &wash_analysis::scc::SccCatalog,
    outcome: &wash_analysis::pipeline::DetectionOutcome,
) -> Result<()> {
    let mut store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    store
        .insert_traders(&preprocessed.traders)
        .wrap_err("failed to insert traders")?;
    store
        .insert_trades(&preprocessed.table, &preprocessed.tokens, &outcome.wash_label)
        .wrap_err("failed to insert trades")?;

    let catalog_rows: Vec<(String, u64, usize, bool)> = catalog
        .records
        .iter()
        .map(|record| {
            (
                record.scc_hash.clone(),
                record.occurrence,
                record.num_traders,
                record.occurrence >= catalog.threshold,
            )
        })
        .collect();
    store
        .insert_scc_catalog(&catalog_rows)
        .wrap_err("failed to insert SCC catalog")?;

    let member_rows: Vec<(String, String)> = catalog
        .members
        .iter()
        .map(|(hash, members)| {
            let joined = members
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            (hash.clone(), joined)
        })
        .collect();
    store
        .insert_scc_members(&member_rows)
        .wrap_err("failed to insert SCC members")?;

    let mut window_rows: Vec<(String, i64, String)> = Vec::new();
    for (hash, per_window) in &outcome.wash_windows {
        for (window_size, tx_ids) in per_window {
            let json = serde_json::to_string(tx_ids).wrap_err("failed to serialize tx ids")?;
            window_rows.push((hash.clone(), *window_size, json));
        }
    }
    store
        .insert_wash_windows(&window_rows)
        .wrap_err("failed to insert wash windows")?;

    Ok(())
}

fn print_detect_table(
    args: &DetectArgs,
    input_rows: usize,
    skipped: (u64, u64),
    preprocessed: &wash_data::preprocess::Preprocessed,
    catalog: &wash_analysis::scc::SccCatalog,
    outcome: &wash_analysis::pipeline::DetectionOutcome,
) -> Result<()> {
    let drops = &preprocessed.drops;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);

    table.add_row(vec!["Input rows", &format!("{input_rows}")]);
    table.add_row(vec![
        "Skipped by loader",
        &format!("{}", skipped.0 + skipped.1),
    ]);
    table.add_row(vec!["Dropped: status", &format!("{}", drops.status_filtered)]);
    table.add_row(vec!["Dropped: non-ETH pair", &format!("{}", drops.non_eth)]);
    table.add_row(vec![
        "Dropped: outside price range",
        &format!("{}", drops.outside_price_range),
    ]);
    table.add_row(vec!["Dropped: self trades", &format!("{}", drops.self_trades)]);
    table.add_row(vec!["Dropped: non-finite", &format!("{}", drops.non_finite)]);
    table.add_row(vec!["Canonical trades", &format!("{}", preprocessed.table.len())]);
    table.add_row(vec!["Traders", &format!("{}", preprocessed.traders.len())]);
    table.add_row(vec!["Tokens", &format!("{}", preprocessed.tokens.len())]);
    table.add_row(vec!["SCCs observed", &format!("{}", catalog.records.len())]);
    table.add_row(vec!["Relevant SCCs", &format!("{}", catalog.relevant_count())]);
    table.add_row(vec!["Wash-labeled trades", &format!("{}", outcome.labeled_count())]);

    println!("\n{table}\n");

    // Top relevant clusters
    let mut scc_table = Table::new();
    scc_table.load_preset(UTF8_BORDERS_ONLY);
    scc_table.set_header(vec!["SCC Fingerprint", "Occurrence", "Traders", "Labeled"]);
    for record in catalog.relevant().take(10) {
        let labeled: usize = outcome
            .wash_windows
            .get(&record.scc_hash)
            .map(|per_window| per_window.values().map(Vec::len).sum())
            .unwrap_or(0);
        scc_table.add_row(vec![
            truncate_hash(&record.scc_hash),
            record.occurrence.to_string(),
            record.num_traders.to_string(),
            labeled.to_string(),
        ]);
    }
    println!("{scc_table}\n");

    println!(
        "Windows: {}",
        args.windows
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

fn print_detect_json(
    input_rows: usize,
    skipped: (u64, u64),
    preprocessed: &wash_data::preprocess::Preprocessed,
    catalog: &wash_analysis::scc::SccCatalog,
    outcome: &wash_analysis::pipeline::DetectionOutcome,
) -> Result<()> {
    use serde::Serialize;

    #[derive(Serialize)]
    struct JsonSummary<'a> {
        input_rows: usize,
        skipped_incomplete: u64,
        skipped_malformed: u64,
        drops: &'a wash_data::preprocess::DropStats,
        canonical_trades: usize,
        traders: usize,
        tokens: usize,
        sccs_observed: usize,
        relevant_sccs: usize,
        wash_labeled: usize,
    }

    let summary = JsonSummary {
        input_rows,
        skipped_incomplete: skipped.0,
        skipped_malformed: skipped.1,
        drops: &preprocessed.drops,
        canonical_trades: preprocessed.table.len(),
        traders: preprocessed.traders.len(),
        tokens: preprocessed.tokens.len(),
        sccs_observed: catalog.records.len(),
        relevant_sccs: catalog.relevant_count(),
        wash_labeled: outcome.labeled_count(),
    };

    let json = serde_json::to_string_pretty(&summary).wrap_err("failed to serialize summary")?;
    println!("{json}");
    Ok(())
}

fn handle_status(ctx: &AppContext, _args: StatusArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let (trade_count, labeled_count) = store
        .trade_counts()
        .wrap_err("failed to query trade counts")?;
    let trader_count = store
        .trader_count()
        .wrap_err("failed to query trader count")?;
    let (scc_count, relevant_count) = store
        .scc_counts()
        .wrap_err("failed to query SCC counts")?;

    let db_size_str = if ctx.db_path == ":memory:" {
        "N/A (in-memory)".to_string()
    } else {
        match Store::file_size(&ctx.db_path) {
            Some(bytes) => format!("{} MB", bytes / 1_000_000),
            None => "N/A (file not found)".to_string(),
        }
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);

    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);
    table.add_row(vec!["DB Size", &db_size_str]);
    table.add_row(vec!["Trades", &format!("{trade_count}")]);
    table.add_row(vec!["Wash-labeled", &format!("{labeled_count}")]);
    table.add_row(vec!["Traders", &format!("{trader_count}")]);
    table.add_row(vec!["SCCs", &format!("{scc_count}")]);
    table.add_row(vec!["Relevant SCCs", &format!("{relevant_count}")]);

    println!("\n{table}\n");

    info!(
        trades = trade_count,
        labeled = labeled_count,
        sccs = scc_count,
        db_path = %ctx.db_path,
        "status command completed"
    );

    Ok(())
}

fn handle_export(ctx: &AppContext, args: ExportArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    ensure_dir(&args.out)?;

    // Labeled trade table
    let trades = store.labeled_trades().wrap_err("failed to query trades")?;
    let mut csv = String::from(
        "tx_id,timestamp,token,eth_buyer_id,eth_seller_id,amount_eth,amount_token,amount_usd,wash_label\n",
    );
    for row in &trades {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            row.tx_id,
            row.timestamp,
            row.token,
            row.eth_buyer_id,
            row.eth_seller_id,
            row.amount_eth,
            row.amount_token,
            row.amount_usd,
            row.wash_label,
        ));
    }
    let trades_path = args.out.join("trades_wash_labeled.csv");
    std::fs::write(&trades_path, csv)
        .wrap_err_with(|| format!("failed to write {}", trades_path.display()))?;

    // SCC catalog
    let catalog = store.scc_catalog().wrap_err("failed to query SCC catalog")?;
    let mut catalog_csv = String::from("scc_hash,occurrence,num_traders,relevant\n");
    for (hash, occurrence, num_traders, relevant) in &catalog {
        catalog_csv.push_str(&format!("{hash},{occurrence},{num_traders},{relevant}\n"));
    }
    let catalog_path = args.out.join("scc_catalog.csv");
    std::fs::write(&catalog_path, catalog_csv)
        .wrap_err_with(|| format!("failed to write {}", catalog_path.display()))?;

    // Nested wash-window map, window sizes as string keys
    let mut windows: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for (hash, window_size, tx_ids_json) in store
        .wash_windows()
        .wrap_err("failed to query wash windows")?
    {
        let tx_ids: Vec<String> = serde_json::from_str(&tx_ids_json)
            .wrap_err_with(|| format!("corrupt tx-ID list for SCC {hash}"))?;
        windows
            .entry(hash)
            .or_default()
            .insert(window_size.to_string(), tx_ids);
    }
    let windows_path = args.out.join("wash_windows.json");
    std::fs::write(
        &windows_path,
        serde_json::to_string_pretty(&windows).wrap_err("failed to serialize wash windows")?,
    )
    .wrap_err_with(|| format!("failed to write {}", windows_path.display()))?;

    // Address clusters for relevant SCCs
    let clusters: BTreeMap<String, Vec<String>> = store
        .relevant_member_addresses()
        .wrap_err("failed to query member addresses")?
        .into_iter()
        .collect();
    let clusters_path = args.out.join("address_clusters.json");
    std::fs::write(
        &clusters_path,
        serde_json::to_string_pretty(&clusters).wrap_err("failed to serialize clusters")?,
    )
    .wrap_err_with(|| format!("failed to write {}", clusters_path.display()))?;

    info!(
        trades = trades.len(),
        sccs = catalog.len(),
        out_dir = %args.out.display(),
        "export command completed"
    );

    Ok(())
}

/// Truncate a fingerprint/hash for compact table display.
fn truncate_hash(hash: &str) -> String {
    if hash.len() > 14 {
        format!("{}…{}", &hash[..8], &hash[hash.len() - 4..])
    } else {
        hash.to_string()
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .wrap_err_with(|| format!("failed to create export directory {}", path.display()))?;
    Ok(())
}
