use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ClientConfig;

#[derive(Parser)]
#[command(name = "quizwire")]
#[command(version)]
#[command(about = "Interview-practice client: stream multi-model answer scoring in the terminal")]
pub struct Cli {
    /// Backend API root (overrides config file and environment)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit an answer and stream per-model scoring live
    Practice {
        /// Question id; a random question is drawn when omitted
        #[arg(long)]
        question: Option<u64>,

        /// Limit the random draw to one category
        #[arg(long)]
        category: Option<u64>,

        /// Answering user id
        #[arg(long)]
        user: u64,

        /// The answer text
        #[arg(long)]
        answer: String,

        /// Model ids to score with (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<u64>,

        /// Second participant's user id (enables battle mode)
        #[arg(long, requires = "opponent_answer")]
        opponent: Option<u64>,

        /// Second participant's answer text
        #[arg(long, requires = "opponent")]
        opponent_answer: Option<String>,

        /// Interviewer role key forwarded to the backend
        #[arg(long)]
        role: Option<String>,

        /// Role difficulty level (easy, medium, hard)
        #[arg(long, requires = "role")]
        difficulty: Option<String>,
    },

    /// Ask a follow-up question about an existing answer record
    FollowUp {
        /// Answer record id the question refers to
        #[arg(long)]
        record: u64,

        /// The follow-up question text
        #[arg(long)]
        question: String,

        /// Model id to answer with (backend default when omitted)
        #[arg(long)]
        model: Option<u64>,
    },

    /// List configured scoring models
    Models,

    /// List participant accounts
    Users,

    /// List interviewer role presets
    Roles,

    /// Show one question (or a random one)
    Question {
        /// Question id; random when omitted
        id: Option<u64>,

        /// Limit the random draw to one category
        #[arg(long)]
        category: Option<u64>,
    },
}

/// Final base URL: the CLI flag beats whatever the config layer resolved.
pub fn resolve_base_url(flag: Option<&str>, config: &ClientConfig) -> String {
    match flag {
        Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
        _ => config.base_url.clone(),
    }
}
