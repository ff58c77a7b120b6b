// SPDX-License-Identifier: GPL-2.0-or-later
//
// Entry point: parses one download request off the command line,
// drives it through the C5 pipeline in the background, and serves the
// resulting virtual download(s) over HTTP until every registered file
// has been fetched (or the export wait times out). Shutdown wiring
// grounded on `src/sentryshot/app.rs`'s `tokio::select!` over
// `ctrl_c()`/`SIGTERM`/a server-exit channel.

mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use common::{ArcLogger, EnvConfig, LogEntry, LogLevel};
use pipeline::{Driver, DownloadMode, DownloadRegistry, OutputMetadata};
use thiserror::Error;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";
const PLAYURL_URL: &str = "https://api.bilibili.com/x/player/wbi/playurl";

#[derive(Debug, PartialEq)]
struct Args {
    config: PathBuf,
    bvid: Option<String>,
    ep_id: Option<String>,
    cid: Option<u64>,
    quality: u32,
    mode: DownloadMode,
    output_filename: String,
}

#[derive(Debug, Error)]
enum ArgsError {
    #[error("parse arguments: {0}")]
    Pico(#[from] pico_args::Error),

    #[error("exactly one of --bvid, --ep-id or --cid is required")]
    NoTarget,

    #[error("--mode must be 'raw' or 'mux', got '{0}'")]
    BadMode(String),

    #[error("unexpected arguments: {0:?}")]
    Unused(Vec<String>),
}

fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(pico_args::Arguments::from_env())
}

fn parse_args_from(mut pargs: pico_args::Arguments) -> Result<Args, ArgsError> {
    let config = pargs
        .opt_value_from_str("--config")?
        .unwrap_or_else(|| PathBuf::from("./configs/bilidown.toml"));
    let bvid: Option<String> = pargs.opt_value_from_str("--bvid")?;
    let ep_id: Option<String> = pargs.opt_value_from_str("--ep-id")?;
    let cid: Option<u64> = pargs.opt_value_from_str("--cid")?;
    let quality: u32 = pargs.opt_value_from_str("--quality")?.unwrap_or(127);
    let mode_str: String = pargs
        .opt_value_from_str("--mode")?
        .unwrap_or_else(|| "mux".to_owned());
    let output_filename: String = pargs
        .opt_value_from_str("--output")?
        .unwrap_or_else(|| "download.mp4".to_owned());

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        return Err(ArgsError::Unused(
            remaining.into_iter().map(|s| s.to_string_lossy().into_owned()).collect(),
        ));
    }

    if bvid.is_none() && ep_id.is_none() && cid.is_none() {
        return Err(ArgsError::NoTarget);
    }

    let mode = match mode_str.as_str() {
        "raw" => DownloadMode::Raw,
        "mux" => DownloadMode::Mux,
        other => return Err(ArgsError::BadMode(other.to_owned())),
    };

    Ok(Args {
        config,
        bvid,
        ep_id,
        cid,
        quality,
        mode,
        output_filename,
    })
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let env = match env::EnvConf::new(&args.config) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("load config: {e}");
            std::process::exit(1);
        }
    };
    let env: Arc<dyn EnvConfig + Send + Sync> = Arc::new(env);

    let logger: ArcLogger = Arc::new(log::Logger::new(env.log_level()));
    logger.log(LogEntry::new(
        LogLevel::Info,
        "bilidwn",
        format!("starting, port={}", env.port()),
    ));

    let rt_handle = tokio::runtime::Handle::current();
    let fetcher = fetch::ChunkedFetcher::new(rt_handle.clone());
    let spfs = spfs::Spfs::new(env.spfs_root().to_path_buf(), Arc::clone(&logger));
    let registry = DownloadRegistry::new();

    let mode = args.mode;
    let http_client = Arc::new(api::HyperApiClient::new(rt_handle));
    let request = api::MediaRequest {
        bvid: args.bvid,
        ep_id: args.ep_id,
        cid: args.cid,
        output_filename: args.output_filename,
        quality: args.quality,
    };
    let resolver = api::BilibiliResolver::new(
        http_client,
        parse_fixed_url(NAV_URL),
        parse_fixed_url(VIEW_URL),
        parse_fixed_url(PLAYURL_URL),
        request,
    );

    let (registered_tx, mut registered_rx) = mpsc::unbounded_channel();
    let driver = Driver::new(
        fetcher,
        spfs,
        registry.clone(),
        Arc::clone(&env),
        Arc::clone(&logger),
    )
    .with_registration_feed(registered_tx);

    let shutdown = CancellationToken::new();
    let run_cancel = shutdown.child_token();
    let work_dir = std::env::temp_dir().join(format!("bilidown-{}", std::process::id()));
    if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
        eprintln!("create work dir {}: {e}", work_dir.display());
        std::process::exit(1);
    }

    let announce_logger = Arc::clone(&logger);
    tokio::spawn(async move {
        while let Some(reg) = registered_rx.recv().await {
            announce_logger.log(LogEntry::new(
                LogLevel::Info,
                "bilidwn",
                format!("{} ready at {}", reg.filename, reg.url_path),
            ));
        }
    });

    let run_logger = Arc::clone(&logger);
    let run_port = env.port();
    tokio::spawn(async move {
        let result = driver
            .run(
                &resolver,
                mode,
                OutputMetadata {
                    tool: Some("bilidown".to_owned()),
                    tool_tag: None,
                    description: None,
                    description_tag: None,
                },
                &work_dir,
                run_cancel,
            )
            .await;
        match result {
            Ok(done) => run_logger.log(LogEntry::new(
                LogLevel::Info,
                "bilidwn",
                format!(
                    "run finished: {} media, {} attachments",
                    done.media.len(),
                    done.attachments.len()
                ),
            )),
            Err(e) => run_logger.log(LogEntry::new(
                LogLevel::Error,
                "bilidwn",
                format!("run failed: {e} (retryable={})", e.retryable()),
            )),
        }
        eprintln!("visit http://127.0.0.1:{run_port}/streams/... (see log) to fetch the result");
    });

    let router = server::router(registry);
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    if let Err(e) = server::serve(router, env.port(), shutdown, Arc::clone(&logger)).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}

fn parse_fixed_url(s: &str) -> Url {
    Url::parse(s).expect("built-in endpoint URL is always valid")
}

async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => eprintln!("\nreceived interrupt, stopping..\n"),
        () = terminate => eprintln!("\nreceived terminate, stopping..\n"),
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args_from(argv: &[&str]) -> Result<Args, ArgsError> {
        let argv = argv.iter().map(std::ffi::OsString::from).collect();
        parse_args_from(pico_args::Arguments::from_vec(argv))
    }

    #[test]
    fn defaults_fill_in_when_only_bvid_is_given() {
        let args = args_from(&["--bvid", "BV1xx411c7mD"]).unwrap();
        assert_eq!(args.bvid.as_deref(), Some("BV1xx411c7mD"));
        assert_eq!(args.ep_id, None);
        assert_eq!(args.cid, None);
        assert_eq!(args.quality, 127);
        assert_eq!(args.mode, DownloadMode::Mux);
        assert_eq!(args.output_filename, "download.mp4");
        assert_eq!(args.config, PathBuf::from("./configs/bilidown.toml"));
    }

    #[test]
    fn every_flag_overrides_its_default() {
        let args = args_from(&[
            "--config", "/tmp/custom.toml",
            "--cid", "12345",
            "--quality", "80",
            "--mode", "raw",
            "--output", "clip.mp4",
        ])
        .unwrap();
        assert_eq!(args.cid, Some(12345));
        assert_eq!(args.quality, 80);
        assert_eq!(args.mode, DownloadMode::Raw);
        assert_eq!(args.output_filename, "clip.mp4");
        assert_eq!(args.config, PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn rejects_missing_target() {
        let err = args_from(&["--quality", "80"]).unwrap_err();
        assert!(matches!(err, ArgsError::NoTarget));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = args_from(&["--bvid", "BV1", "--mode", "weird"]).unwrap_err();
        assert!(matches!(err, ArgsError::BadMode(m) if m == "weird"));
    }

    #[test]
    fn rejects_leftover_arguments() {
        let err = args_from(&["--bvid", "BV1", "extra-positional"]).unwrap_err();
        assert!(matches!(err, ArgsError::Unused(_)));
    }

    #[test]
    fn ep_id_alone_satisfies_the_target_requirement() {
        let args = args_from(&["--ep-id", "12345"]).unwrap();
        assert_eq!(args.ep_id.as_deref(), Some("12345"));
    }
}
