//! Subcommand handlers

use std::path::Path;
use tracing::{info, warn};
use xvdkit_stream::{DecryptOutcome, StreamConfig, XvdContainer, XvdError, ensure_crypto_provider};

use crate::config::{Cli, Command, KeyArgs, Target, walk_options};
use crate::error::{CliError, ConfigError, Result};
use crate::keys::{require_key, resolve_key};
use crate::progress::LogProgress;

/// Open a target; only local files can be opened writable
pub async fn open_target(
    target: &Target,
    writable: bool,
    config: StreamConfig,
) -> std::result::Result<XvdContainer, XvdError> {
    match target {
        Target::Local(path) => XvdContainer::open_local(path, writable, config).await,
        Target::Url(url) => {
            ensure_crypto_provider();
            XvdContainer::open_url(url, config).await
        }
    }
}

/// Run the parsed command line
pub async fn run(cli: &Cli) -> Result<()> {
    let config = cli.stream_config();
    match &cli.command {
        Command::Info { target, all, json } => info(target, *all, *json, config).await,
        Command::Verify { target } => verify(target, config).await,
        Command::Decrypt { target, keys } => decrypt(target, keys, config).await,
        Command::Extract {
            target,
            output,
            skip_regions,
            download_regions,
            no_hash_check,
            keys,
        } => {
            let options = walk_options(skip_regions, download_regions, *no_hash_check);
            let container = open_target(&Target::parse(target), false, config).await?;
            let key = resolve_key(keys, container.get_key_id())?;
            if key.is_none() && !container.get_key_id().is_nil() {
                warn!(
                    "No key for {}; encrypted regions will fail",
                    container.get_key_id()
                );
            }

            let summary = container
                .extract_files(output, key.as_ref(), &options, &LogProgress::new())
                .await?;
            println!(
                "Extracted {} files (0x{:x} bytes) from {} regions into {}",
                summary.files,
                summary.bytes,
                summary.regions,
                output.display()
            );
            if summary.retried_pages > 0 {
                println!("{} pages needed a second read", summary.retried_pages);
            }
            Ok(())
        }
        Command::ExtractEmbedded { target, output } => {
            extract_embedded(target, output, config).await
        }
    }
}

async fn info(target: &str, all: bool, json: bool, config: StreamConfig) -> Result<()> {
    let container = open_target(&Target::parse(target), false, config).await?;
    if json {
        println!("{}", container.summary_json()?);
    } else {
        print!("{}", container.render_info(all));
    }
    Ok(())
}

async fn verify(target: &str, config: StreamConfig) -> Result<()> {
    let container = open_target(&Target::parse(target), false, config).await?;
    let report = container.verify_all_pages(&LogProgress::new()).await?;

    if report.integrity_disabled {
        println!("Data integrity is disabled; nothing to verify");
        return Ok(());
    }

    println!("Checked {} pages", report.pages_checked);
    for page in &report.mismatches {
        println!("  mismatch at page 0x{page:x}");
    }
    if report.missing_pages > 0 {
        println!("  {} hashed pages missing from the file", report.missing_pages);
    }

    if report.is_valid() {
        println!("All pages match");
        Ok(())
    } else {
        Err(CliError::VerificationFailed {
            mismatches: report.mismatches.len(),
            missing: report.missing_pages,
        })
    }
}

async fn decrypt(target: &str, keys: &KeyArgs, config: StreamConfig) -> Result<()> {
    let target = Target::parse(target);
    if let Target::Url(url) = &target {
        return Err(ConfigError::LocalFileRequired {
            operation: "decrypt",
            target: url.clone(),
        }
        .into());
    }

    let mut container = open_target(&target, true, config).await?;
    if !container.integrity()?.encrypted {
        println!("Container is not encrypted");
        return Ok(());
    }

    let key = require_key(keys, container.get_key_id())?;
    match container
        .decrypt_whole(&key, false, &LogProgress::new())
        .await?
    {
        DecryptOutcome::NotEncrypted => println!("Container is not encrypted"),
        DecryptOutcome::NoKeys => println!("Content index declares no keys; nothing to decrypt"),
        DecryptOutcome::Decrypted { regions, pages } => {
            info!("Decryption finished");
            println!("Decrypted {pages} pages in {regions} regions");
        }
    }
    Ok(())
}

async fn extract_embedded(target: &str, output: &Path, config: StreamConfig) -> Result<()> {
    let container = open_target(&Target::parse(target), false, config).await?;
    match container
        .extract_embedded(output, &LogProgress::new())
        .await
    {
        Ok(bytes) => {
            println!("Wrote 0x{bytes:x} bytes to {}", output.display());
            Ok(())
        }
        Err(XvdError::NotPresent(what)) => {
            println!("Container has no {what}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_decrypt_refuses_urls() {
        let cli = Cli::try_parse_from(["xvdkit", "decrypt", "https://cdn.example.com/game.xvc"])
            .unwrap();
        let err = run(&cli).await.unwrap_err();
        assert!(matches!(
            err,
            CliError::Config(ConfigError::LocalFileRequired {
                operation: "decrypt",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.xvd");
        let cli = Cli::try_parse_from(["xvdkit", "info", path.to_str().unwrap()]).unwrap();
        let err = run(&cli).await.unwrap_err();
        assert!(matches!(err, CliError::Container(XvdError::Io(_))));
    }

    #[tokio::test]
    async fn test_truncated_local_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.xvd");
        std::fs::write(&path, [0u8; 0x200]).unwrap();
        let cli = Cli::try_parse_from(["xvdkit", "verify", path.to_str().unwrap()]).unwrap();
        let err = run(&cli).await.unwrap_err();
        assert!(matches!(err, CliError::Container(XvdError::MalformedInput(_))));
    }
}
