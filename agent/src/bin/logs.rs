//! Query CLI over the conversation logs: usage totals, per-prompt-version
//! breakdowns, and conversation browsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trellis_agents::logstats::{LogStore, UsageStats};

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, env = "TRELLIS_LOG_ROOT", default_value = ".")]
    log_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Overall model usage totals.
    Stats,
    /// Model usage grouped by prompt version.
    StatsByVersion,
    /// Print every record of one conversation.
    Conversation { id: String },
    /// The most recent model calls, newest first.
    Recent {
        #[arg(default_value_t = 10)]
        limit: usize,
    },
    /// List conversation ids with their record counts.
    List,
}

fn main() {
    let args = Args::parse();
    let store = match LogStore::load(&args.log_root) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("failed to load logs: {error}");
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Stats => {
            print_stats(&store.stats());
            println!("conversations:   {}", store.conversation_ids().len());
        }
        Command::StatsByVersion => {
            for (version, stats) in store.stats_by_version() {
                println!("-- prompt version {version} --");
                print_stats(&stats);
            }
        }
        Command::Conversation { id } => {
            for record in store.conversation(&id) {
                let agent = record.agent_name.as_deref().unwrap_or("-");
                println!(
                    "[{}] {agent} {}: {}",
                    record.timestamp, record.record_type, record.message
                );
            }
        }
        Command::Recent { limit } => {
            for record in store.recent_llm_calls(limit) {
                let model = record.model.as_deref().unwrap_or("-");
                println!(
                    "[{}] {} {} in={} out={} {}ms",
                    record.timestamp,
                    record.conversation_id,
                    model,
                    record.input_tokens.unwrap_or_default(),
                    record.output_tokens.unwrap_or_default(),
                    record.duration_ms.unwrap_or_default(),
                );
            }
        }
        Command::List => {
            for id in store.conversation_ids() {
                println!("{id} ({} records)", store.conversation(&id).len());
            }
        }
    }
}

fn print_stats(stats: &UsageStats) {
    println!("llm calls:       {}", stats.llm_calls);
    println!("input tokens:    {}", stats.input_tokens);
    println!("output tokens:   {}", stats.output_tokens);
    println!("avg latency:     {}ms", stats.average_latency_ms());
}
