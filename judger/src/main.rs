use anyhow::Context;
use clap::Parser;
use mission_judger::{
    config::JudgerConfig,
    coordinator::Coordinator,
    tester::{model::TestSuiteFile, Harness},
};
use serde::Serialize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod opt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = opt::Opts::parse();

    // stdout is reserved for results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(&opt.opt).await?;
    let coordinator = Coordinator::from_config(&cfg)?;
    if let Err(e) = coordinator.initialize().await {
        tracing::warn!("Local sandbox unavailable: {}", e);
    }

    let res = match opt.cmd {
        opt::SubCmd::Run(cmd) => run(&coordinator, cmd).await,
        opt::SubCmd::Grade(cmd) => grade(&coordinator, cmd).await,
    };
    coordinator.dispose().await;
    res
}

async fn load_config(opt: &opt::GlobalOpts) -> anyhow::Result<JudgerConfig> {
    let mut cfg = match &opt.config {
        Some(path) => JudgerConfig::load(path).await?,
        None => JudgerConfig::default(),
    };
    if let Some(policy) = opt.policy {
        cfg.policy = policy;
    }
    if let Some(ms) = opt.timeout {
        cfg.sandbox.timeout = Duration::from_millis(ms);
    }
    tracing::debug!(
        policy = ?cfg.policy,
        timeout = ?cfg.sandbox.timeout,
        "Configuration loaded"
    );
    Ok(cfg)
}

async fn read_source(path: &std::path::Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", s);
    Ok(())
}

async fn run(coordinator: &Coordinator, cmd: opt::RunSubCmd) -> anyhow::Result<()> {
    let code = read_source(&cmd.script).await?;
    let res = coordinator.run(&code).await?;
    print_json(&res)
}

async fn grade(coordinator: &Coordinator, cmd: opt::GradeSubCmd) -> anyhow::Result<()> {
    let code = read_source(&cmd.submission).await?;
    let cases = TestSuiteFile::load(&cmd.tests).await?;
    tracing::info!(cases = cases.len(), "Test suite loaded");
    let res = Harness::new(coordinator)
        .grade_submission(&code, &cases)
        .await?;
    print_json(&res)
}
