use anyhow::{bail, Result};
use clap::Parser;
use indicatif::ProgressBar;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use reddit_archiver::archive::Archiver;
use reddit_archiver::cli::Args;
use reddit_archiver::client::RedditClient;
use reddit_archiver::config;
use reddit_archiver::fetch::Fetcher;
use reddit_archiver::record::Serializer;
use reddit_archiver::select::Selector;

/// Conservative ceiling; OAuth clients are allowed 100/min.
const REQUESTS_PER_MINUTE: u32 = 60;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reddit_archiver=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let criteria = args.criteria();
    if criteria.is_empty() {
        bail!("nothing selected; pass --id, --saved, --upvoted or --submitted (see --help)");
    }

    // Config problems must surface before any network call.
    let cfg = config::load(&args.config)?;
    let output_dir = args.output.clone().unwrap_or(cfg.defaults.output_dir.clone());
    let limit = args.limit.unwrap_or(cfg.defaults.limit);
    let quiet = args.quiet;

    let client = RedditClient::connect(&cfg.reddit, REQUESTS_PER_MINUTE).await?;
    note(quiet, "[+] Authenticated against the Reddit API");

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Selecting submissions...");
        pb
    };
    let selection = Selector::new(&client).select(&criteria, limit).await?;
    pb.finish_and_clear();
    note(
        quiet,
        &format!("[+] Selected {} submission(s)", selection.ids.len()),
    );

    let fetcher = Fetcher::new(&client);
    let serializer = Serializer::new(&output_dir, cfg.defaults.media);
    let mut report = Archiver::new(&fetcher, &serializer, quiet)
        .run(&selection.ids)
        .await?;
    for reference in selection.not_found {
        report.record_failure(&reference, "not found".to_string());
    }

    for (id, reason) in &report.failed {
        eprintln!("[X] {id}: {reason}");
    }
    note(
        quiet,
        &format!(
            "[=] Run finished: {} archived, {} failed, output in {}",
            report.done.len(),
            report.failed.len(),
            output_dir.display()
        ),
    );

    Ok(())
}

fn note(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{message}");
    }
}
