use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use api::config::AppConfig;
use api::services::Services;
use api::telemetry;
use pipeline::{Transcript, TranscriptFileReader, Transcriber};

#[derive(Parser, Debug)]
#[command(name = "fraudcall", about = "Analyze recorded calls for telephone fraud")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe and analyze one call recording.
    Analyze {
        /// Audio file, or a saved transcript with --transcript.
        audio: PathBuf,

        /// Victim role id from roles.csv.
        #[arg(long, default_value = api::DEFAULT_ROLE_ID)]
        role: String,

        /// Rebuild the knowledge base before analyzing.
        #[arg(long)]
        init_kb: bool,

        /// Treat the input as a transcript file (.txt or .json) instead of audio.
        #[arg(long)]
        transcript: bool,

        /// Print the result as JSON instead of the text report.
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the knowledge base from the data directory.
    Rebuild,
    /// Search the knowledge base for similar cases.
    Search {
        query: String,

        #[arg(short, long, default_value_t = pipeline::DEFAULT_TOP_K)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init("warn,fraudcall=info,pipeline=info,knowledge=info");

    let services = Services::from_config(AppConfig::from_env())?;

    match cli.command {
        Command::Analyze {
            audio,
            role,
            init_kb,
            transcript,
            json,
        } => {
            if init_kb {
                let stats = services.rebuild_knowledge().await?;
                eprintln!("知识库已重建: {} 条文档", stats.total);
            } else {
                services.ensure_knowledge().await?;
            }

            let result = if transcript {
                let text: Transcript = TranscriptFileReader
                    .transcribe(&audio)
                    .await
                    .with_context(|| format!("failed to read transcript {}", audio.display()))?;
                services.pipeline.analyze(text, &role).await?
            } else {
                services
                    .pipeline
                    .analyze_audio(services.transcriber.as_ref(), &audio, &role)
                    .await?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.report());
            }
        }
        Command::Rebuild => {
            let stats = services.rebuild_knowledge().await?;
            println!(
                "知识库已重建: {} 种诈骗类型, {} 段样本对话, 共 {} 条文档",
                stats.case_types, stats.dialogues, stats.total
            );
        }
        Command::Search { query, k } => {
            if query.trim().is_empty() {
                bail!("query must not be empty");
            }
            let results = services.index.query(&query, k).await?;
            print!("{}", pipeline::search_tool::format_results(&results));
        }
    }

    Ok(())
}
