use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::info;

use recap_config::AppConfig;
use recap_digest::{
    CheckpointStore, DigestSettings, Orchestrator, RunMode, RunReport, TriggerContext, render_digest,
};
use recap_llm::LlmRouter;
use recap_runtime::{LlmAnalyzer, Scheduler, jobs_from_config};
use recap_slack::SlackClient;

use crate::CliRunMode;

pub(crate) fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let slack = Arc::new(SlackClient::new(&config.slack)?);
    let timeout = (config.llm.request_timeout_secs > 0)
        .then(|| Duration::from_secs(config.llm.request_timeout_secs));
    let router = LlmRouter::new(&config.llm.ollama_base_url, timeout)?;
    let analyzer = Arc::new(LlmAnalyzer::new(router, &config.llm));

    Ok(Orchestrator::new(
        slack.clone(),
        slack.clone(),
        analyzer,
        slack,
        CheckpointStore::new(&config.checkpoint.path),
        DigestSettings::from_config(config),
    ))
}

pub(crate) async fn run_start_mode(config: AppConfig) -> Result<()> {
    let settings = DigestSettings::from_config(&config);
    let jobs = jobs_from_config(&config.schedule, settings.timezone)?;
    if jobs.is_empty() {
        bail!("no schedules configured; set [schedule] periodic or weekly, or use `recap run`");
    }

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let mut scheduler = Scheduler::new(orchestrator);
    for job in jobs {
        scheduler.spawn(job);
    }
    println!(
        "recap running {} schedule(s) for channel {}; press Ctrl-C to stop",
        scheduler.job_count(),
        config.slack.channel_id
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for in-flight runs");
    scheduler.shutdown().await;
    Ok(())
}

pub(crate) async fn run_once(config: AppConfig, mode: CliRunMode, show: bool) -> Result<()> {
    let orchestrator = build_orchestrator(&config)?;
    let mode = match mode {
        CliRunMode::Scheduled => RunMode::scheduled(),
        CliRunMode::Manual => RunMode::Manual(TriggerContext {
            channel: config.slack.channel_id.clone(),
            thread_ts: None,
            requested_by: Some("cli".to_string()),
        }),
        CliRunMode::Window => RunMode::Window,
    };

    let report = orchestrator.run(&mode).await?;
    print_report(&report);
    if show {
        let now = Utc::now();
        println!();
        println!("{}", render_digest(&report.digest, report.lower_bound, now, now));
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let stats = &report.digest.stats;
    println!("── digest run ({}) ──────────────────────────────────", report.mode);
    println!(
        "  lower bound  : {} ({})",
        report.lower_bound.to_rfc3339(),
        if report.bound_from_checkpoint { "checkpoint" } else { "lookback window" }
    );
    println!(
        "  activity     : {} messages, {} participants, {} segments",
        stats.message_count, stats.unique_user_count, report.segments
    );
    if report.digest.insufficient {
        println!("  digest       : insufficient ({})", report.digest.insufficient_reason);
    } else {
        println!("  digest       : {} questions, {} trends", report.digest.questions.len(), report.digest.concept_trends.len());
    }
    println!("  published    : {}", if report.published { "yes" } else { "no" });
    match report.checkpoint {
        Some(at) => println!("  checkpoint   : {}", at.to_rfc3339()),
        None => println!("  checkpoint   : (not written)"),
    }
}
