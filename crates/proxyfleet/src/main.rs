mod cli;
mod serve;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use proxyfleet_config::Settings;
use proxyfleet_core::ProvisionPlan;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// 設定が不正な場合の終了コード (clap の使用法エラーと同じ)
const EXIT_INVALID_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|e| {
        eprintln!(
            "{} ログレベル '{}' を解釈できません ({}), info を使用します",
            "Warning:".yellow().bold(),
            cli.log_level,
            e
        );
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (settings, plan) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            eprintln!();
            eprintln!("{}", "ヒント: proxyfleet --help で設定項目を確認してください".yellow());
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    print_banner(&settings, &plan);
    serve::run(settings, plan).await
}

fn prepare(cli: &Cli) -> anyhow::Result<(Settings, ProvisionPlan)> {
    let settings = cli.settings()?;
    let plan = ProvisionPlan::new(
        settings.fleet.replicas,
        settings.fleet.start_port,
        settings.fleet.expected_address.clone(),
    )?;
    Ok((settings, plan))
}

fn print_banner(settings: &Settings, plan: &ProvisionPlan) {
    println!("{}", format!("proxyfleet {}", env!("CARGO_PKG_VERSION")).bold());
    println!();
    println!("  → Image: {}", settings.fleet.image.cyan());
    println!(
        "  → Proxies: {} (ports {} - {})",
        plan.replicas().to_string().cyan(),
        plan.start_port(),
        plan.last_port()
    );
    println!("  → Address: {}", plan.expected_address().cyan());
    println!(
        "  → RabbitMQ: {} (queue {})",
        settings.broker.display_url().cyan(),
        settings.broker.queue.cyan()
    );
    println!();
}
