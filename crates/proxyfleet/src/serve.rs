use anyhow::Context;
use colored::Colorize;
use futures_util::FutureExt;
use proxyfleet_config::Settings;
use proxyfleet_container::{DockerRuntime, WorkerRuntime};
use proxyfleet_controlplane::ControlPlane;
use proxyfleet_core::{
    Disconnect, FleetController, FleetError, Lifecycle, ProvisionPlan, ShutdownReport,
    WorkerTemplate,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

/// フリートを起動して再起動要求を処理し、最後に必ず後片付けを行う
pub async fn run(settings: Settings, plan: ProvisionPlan) -> ExitCode {
    let lifecycle = Arc::new(Lifecycle::new());
    let signals = lifecycle.listen_for_signals();

    println!("{}", "Dockerに接続中...".blue());
    let runtime = match DockerRuntime::connect().await {
        Ok(runtime) => runtime,
        Err(e) => {
            print_fatal(&anyhow::Error::new(e));
            signals.abort();
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let template = WorkerTemplate {
        image: settings.fleet.image.clone(),
        container_port: settings.fleet.container_port,
        name_prefix: settings.fleet.name_prefix.clone(),
    };
    let mut controller = FleetController::new(runtime, template);

    let status = drive(&mut controller, &settings, &plan, &lifecycle).await;
    signals.abort();
    ExitCode::from(status)
}

/// `serve` を実行し、成否やパニックに関わらず一度だけ後片付けを行って終了コードを返す
async fn drive<R: WorkerRuntime>(
    controller: &mut FleetController<R>,
    settings: &Settings,
    plan: &ProvisionPlan,
    lifecycle: &Lifecycle,
) -> u8 {
    let mut control_plane: Option<ControlPlane> = None;

    let served = AssertUnwindSafe(serve(
        settings,
        plan,
        controller,
        &mut control_plane,
        lifecycle,
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|panic| Err(anyhow::anyhow!("panic: {}", panic_message(&*panic))));

    if let Err(e) = &served {
        print_fatal(e);
    }

    println!();
    println!("{}", "プロキシを停止中...".blue());
    let report = lifecycle
        .finish(
            controller,
            control_plane.as_mut().map(|c| c as &mut dyn Disconnect),
        )
        .await;

    exit_status(&served, report.as_ref())
}

async fn serve<R: WorkerRuntime>(
    settings: &Settings,
    plan: &ProvisionPlan,
    controller: &mut FleetController<R>,
    control_plane: &mut Option<ControlPlane>,
    lifecycle: &Lifecycle,
) -> anyhow::Result<()> {
    let mut shutdown = lifecycle.token();

    report_leftovers(controller.runtime()).await;

    match controller.provision(plan, &shutdown).await {
        Ok(()) => {}
        // シグナルによる中断は正常終了として扱う
        Err(FleetError::ProvisionInterrupted { .. }) => return Ok(()),
        Err(e) => return Err(e).context("プロキシの起動に失敗しました"),
    }
    println!(
        "  {} {} 台のプロキシが起動しました",
        "✓".green(),
        controller.registry().len()
    );

    if controller.export(&settings.roster.path, &settings.roster.separator)? {
        println!(
            "  → Proxy file: {}",
            settings.roster.path.display().to_string().cyan()
        );
    }

    println!();
    println!(
        "{}",
        format!("RabbitMQ に接続中: {}", settings.broker.display_url()).blue()
    );
    let plane = match ControlPlane::connect(&settings.broker, &mut shutdown).await {
        Ok(plane) => control_plane.insert(plane),
        Err(e) if e.is_interrupted() => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    plane.declare().await?;
    println!(
        "  {} キュー {} で待機中 (Ctrl+C で終了)",
        "✓".green(),
        settings.broker.queue.cyan()
    );

    plane.listen(controller, &mut shutdown).await?;
    info!("Shutdown requested");
    Ok(())
}

/// 前回の実行で残ったワーカーを表示する。名前が衝突すると起動に失敗するため
async fn report_leftovers<R: WorkerRuntime>(runtime: &R) {
    let workers = match runtime.list_workers().await {
        Ok(workers) => workers,
        Err(e) => {
            warn!(error = %e, "Could not list existing workers");
            return;
        }
    };
    if workers.is_empty() {
        return;
    }

    warn!(count = workers.len(), "Workers from a previous run are still present");
    println!("  {} 前回の実行で残ったプロキシがあります:", "⚠".yellow());
    for worker in &workers {
        match worker.host_port {
            Some(port) => println!("    • {} (port {})", worker.name.cyan(), port),
            None => println!("    • {}", worker.name.cyan()),
        }
    }
    println!(
        "  {}",
        "ヒント: docker rm -f <name> で削除してから再実行してください".yellow()
    );
}

fn exit_status(served: &anyhow::Result<()>, report: Option<&ShutdownReport>) -> u8 {
    // 接続のクローズ失敗はログのみ
    let torn_down = report.is_none_or(|r| r.teardown.is_ok());

    if served.is_ok() && torn_down {
        println!("{}", "✓ 正常に終了しました".green());
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn print_fatal(e: &anyhow::Error) {
    error!("{:#}", e);
    eprintln!();
    eprintln!("{} {:#}", "Error:".red().bold(), e);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
