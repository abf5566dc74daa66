use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use time::macros::format_description;

use crate::config::AppConfig;
use crate::message::Message;
use crate::search::Indexer;
use crate::storage::LogStore;
use crate::timekey::ArchiveZone;

#[derive(Args, Debug, Clone)]
pub struct BuildIndexArgs {
    /// Directory to write the `channel` manifest and `.index` tree into
    #[arg(long)]
    pub outdir: PathBuf,
    /// Channels loaded in parallel (defaults to index.workers from the config)
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct MonthsArgs {
    /// Channel identifier, e.g. C01ABCDEF
    pub channel: String,
}

#[derive(Args, Debug, Clone)]
pub struct ThreadArgs {
    /// Channel identifier
    pub channel: String,
    /// Timestamp of the thread's root message
    pub ts: String,
}

pub fn build_index(config: Arc<AppConfig>, store: &LogStore, args: BuildIndexArgs) -> Result<()> {
    let workers = args.workers.unwrap_or(config.index.workers).max(1);
    store.preload(workers).context("loading channels")?;

    let mut indexer = Indexer::new(store);
    indexer.build().context("building search index")?;
    let stats = indexer
        .output(&args.outdir)
        .with_context(|| format!("writing search index to {}", args.outdir.display()))?;
    println!(
        "Indexed {} channel(s) into {} file(s) under {}",
        stats.channels,
        stats.index_files,
        args.outdir.display()
    );
    Ok(())
}

pub fn list_months(_config: Arc<AppConfig>, store: &LogStore, args: MonthsArgs) -> Result<()> {
    let output = run_months(store, &args)?;
    print!("{output}");
    Ok(())
}

fn run_months(store: &LogStore, args: &MonthsArgs) -> Result<String> {
    let months = store
        .get_messages_per_month(&args.channel)
        .with_context(|| format!("reading channel {}", args.channel))?;
    if months.is_empty() {
        return Ok("No messages.\n".to_string());
    }
    let mut out = String::new();
    for (key, msgs) in &months {
        let mut line = format!("{key}  {:>5} message(s)", msgs.len());
        if store.has_prev_month(&args.channel, *key) {
            let _ = write!(line, "  prev={}-{}", key.prev_year(), key.prev_month());
        }
        if store.has_next_month(&args.channel, *key) {
            let _ = write!(line, "  next={}-{}", key.next_year(), key.next_month());
        }
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

pub fn show_thread(config: Arc<AppConfig>, store: &LogStore, args: ThreadArgs) -> Result<()> {
    let output = run_thread(&config, store, &args)?;
    print!("{output}");
    Ok(())
}

fn run_thread(config: &AppConfig, store: &LogStore, args: &ThreadArgs) -> Result<String> {
    let thread = store
        .get_thread(&args.channel, &args.ts)
        .with_context(|| format!("reading channel {}", args.channel))?
        .with_context(|| format!("no thread {} in channel {}", args.ts, args.channel))?;

    let zone = config.storage.zone;
    let mut out = String::new();
    match thread.root() {
        Some(root) => out.push_str(&format_message(config, store, zone, root)),
        None => out.push_str("(root message not archived)\n"),
    }
    for reply in thread.replies() {
        out.push_str("  ");
        out.push_str(&format_message(config, store, zone, reply));
    }
    let count = thread.reply_count();
    let _ = writeln!(out, "{count} {}", if count == 1 { "reply" } else { "replies" });
    Ok(out)
}

fn format_message(config: &AppConfig, store: &LogStore, zone: ArchiveZone, msg: &Message) -> String {
    let when = msg
        .timestamp_time(zone)
        .ok()
        .and_then(|t| {
            t.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
                .ok()
        })
        .unwrap_or_else(|| msg.ts.to_string());
    let mut author = store.display_name(&msg.user);
    if author.is_empty() {
        author = msg.user.clone();
    }
    let mut line = format!("[{when}] {author}: {}", msg.text.replace('\n', " "));
    if msg.is_edited() {
        line.push(' ');
        line.push_str(&config.edited_suffix);
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageOptions;
    use std::fs;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_store() -> TestResult<(TempDir, LogStore)> {
        let temp = TempDir::new()?;
        let root = temp.path();
        fs::write(root.join("channels.json"), r#"[{"id":"C1","name":"general"}]"#)?;
        fs::write(
            root.join("users.json"),
            r#"[{"id":"U1","name":"alice","profile":{"real_name":"Alice"}}]"#,
        )?;
        fs::create_dir_all(root.join("C1"))?;
        fs::write(
            root.join("C1/2020-02-29.json"),
            r#"[{"type":"message","user":"U1","text":"leap","ts":"1582902000.000000"}]"#,
        )?;
        fs::write(
            root.join("C1/2020-03-01.json"),
            r#"[
                {"type":"message","user":"U1","text":"root","ts":"1582988400.000100","thread_ts":"1582988400.000100"},
                {"type":"message","user":"U9","text":"fixed","ts":"1582988401.000000","thread_ts":"1582988400.000100","edited":{"user":"U9","ts":"1582988402.000000"}}
            ]"#,
        )?;
        let store = LogStore::open(&StorageOptions::for_data_dir(root))?;
        Ok((temp, store))
    }

    #[test]
    fn months_lists_counts_and_neighbours() -> TestResult {
        let (_temp, store) = setup_store()?;
        let output = run_months(
            &store,
            &MonthsArgs {
                channel: "C1".into(),
            },
        )?;
        assert_eq!(
            output,
            "2020-02      1 message(s)  next=2020-03\n2020-03      1 message(s)  prev=2020-02\n"
        );
        Ok(())
    }

    #[test]
    fn thread_prints_root_then_replies() -> TestResult {
        let (_temp, store) = setup_store()?;
        let config = AppConfig::default();
        let output = run_thread(
            &config,
            &store,
            &ThreadArgs {
                channel: "C1".into(),
                ts: "1582988400.000100".into(),
            },
        )?;
        assert_eq!(
            output,
            "[2020-03-01 00:00:00] Alice: root\n  [2020-03-01 00:00:01] U9: fixed (edited)\n1 reply\n"
        );
        Ok(())
    }

    #[test]
    fn unknown_thread_is_an_error() -> TestResult {
        let (_temp, store) = setup_store()?;
        let err = run_thread(
            &AppConfig::default(),
            &store,
            &ThreadArgs {
                channel: "C1".into(),
                ts: "1.0".into(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("no thread 1.0"));
        Ok(())
    }

    #[test]
    fn build_index_writes_manifest() -> TestResult {
        let (temp, store) = setup_store()?;
        let outdir = temp.path().join("index");
        build_index(
            Arc::new(AppConfig::default()),
            &store,
            BuildIndexArgs {
                outdir: outdir.clone(),
                workers: Some(2),
            },
        )?;
        assert_eq!(fs::read_to_string(outdir.join("channel"))?, "1\tC1\tgeneral\n");
        Ok(())
    }
}
