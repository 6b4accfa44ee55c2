//! `sriov` CNI plugin entry point.
//!
//! Reads the invocation from the environment and stdin, sets up logging and
//! runs one ADD, DEL, CHECK or VERSION. The result goes to stdout.

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use sriov_cni::cni::{self, CniArgs, CniCommand, ErrorResult, VersionResult, DEFAULT_CNI_VERSION};
use sriov_cni::logging;
use sriov_cni::{IpLink, NetConf, Settings, SysfsLocator, VfMgr};
use sriov_cni_common::VfError;

async fn read_stdin() -> Result<Vec<u8>, VfError> {
    let mut buf = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut buf)
        .await
        .map_err(|e| VfError::io("<stdin>", e))?;
    Ok(buf)
}

async fn run(args: &CniArgs) -> Result<Option<Value>, ErrorResult> {
    let early = |e: VfError| ErrorResult::from_error(DEFAULT_CNI_VERSION, &e);

    let command = args.cni_command().map_err(early)?;
    if command == CniCommand::Version {
        return serde_json::to_value(VersionResult::new())
            .map(Some)
            .map_err(|e| early(VfError::decode("result", e)));
    }

    let conf = NetConf::from_slice(&read_stdin().await.map_err(early)?).map_err(early)?;
    let settings = Settings::load_or_default(&args.config).map_err(early)?;

    let level = logging::effective_level(conf.log_level.as_deref(), &settings.logging.level);
    let log_file = conf
        .log_file
        .as_deref()
        .filter(|f| !f.is_empty())
        .map(std::path::PathBuf::from)
        .or_else(|| settings.logging.file.clone());
    if let Err(e) = logging::init(level, log_file.as_deref()) {
        eprintln!("sriov: logging disabled: {}", e);
    }

    info!(command = %command, container = ?args.container_id, "sriov plugin invoked");

    let mgr = VfMgr::new(
        IpLink::new(settings.ip_commands()),
        SysfsLocator::new(&settings.system.sysfs_root),
        settings.host_netns(),
    );
    let result = cni::handle(&mgr, command, args, &conf).await;
    if let Err(e) = &result {
        error!(code = e.code, "{} failed: {}", command, e.msg);
    }
    result
}

fn emit(value: &Value) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).context("failed to encode plugin output")?;
    writeln!(stdout).context("failed to write plugin output")?;
    stdout.flush().context("failed to flush plugin output")?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = CniArgs::parse();

    let (output, code) = match run(&args).await {
        Ok(Some(value)) => (Some(value), ExitCode::SUCCESS),
        Ok(None) => (None, ExitCode::SUCCESS),
        Err(err) => (serde_json::to_value(&err).ok(), ExitCode::FAILURE),
    };

    if let Some(value) = output {
        if let Err(e) = emit(&value) {
            eprintln!("sriov: {:#}", e);
            return ExitCode::FAILURE;
        }
    }
    code
}
