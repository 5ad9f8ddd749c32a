use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forum_core::posts::{self, CreatePostReq, Post, POSTS, POSTS_BY};
use forum_core::users::{self, AddUserRequest};
use forum_core::{Direction, ForumConfig, Store};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod import;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Import posts into the forum store and query its indexes", long_about = None)]
struct Cli {
    /// Store directory (overrides the config file)
    #[arg(long, env = "FORUM_DB", global = true)]
    db: Option<PathBuf>,
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import posts from JSON/JSONL dumps (a file or a directory)
    Import {
        #[arg(long)]
        input: String,
    },
    /// Register a user
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        email: String,
    },
    /// List users
    Users,
    /// Create a post, optionally as a reply
    Post {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        parent: Option<u64>,
        #[arg(long)]
        content: String,
    },
    /// List posts under a term such as `t:rust`, `u:1` or `m:2024.03`
    Query {
        #[arg(long)]
        term: String,
        /// Hex cursor printed by the previous page
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Oldest first instead of newest first
        #[arg(long, default_value_t = false)]
        forward: bool,
    },
    /// Show a post with its ancestors and replies
    Thread {
        #[arg(long)]
        post: u64,
    },
    /// Rebuild index entries for one post, or for all posts
    Reindex {
        #[arg(long)]
        post: Option<u64>,
    },
}

#[derive(Serialize)]
struct QueryOutput {
    term: String,
    posts: Vec<Post>,
    next_cursor: String,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ForumConfig::load(path)?,
        None => ForumConfig::default(),
    };
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    let store = Store::open(&config.store)?;

    match cli.command {
        Commands::Import { input } => {
            let stats = import::run_import(&store, Path::new(&input), &config)?;
            let finished = time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default();
            println!(
                "imported {} posts ({} new users, {} skipped) from {} files at {finished}",
                stats.posts, stats.users_created, stats.skipped, stats.files
            );
        }
        Commands::AddUser { username, email } => {
            let mut tx = store.write_tx();
            let user = users::add_user(&mut tx, AddUserRequest { username, email })?;
            tx.commit()?;
            print_json(&user)?;
        }
        Commands::Users => {
            let tx = store.read_tx();
            print_json(&users::list_users(&tx)?)?;
        }
        Commands::Post { user, parent, content } => {
            let mut tx = store.write_tx();
            let req = CreatePostReq { user_id: user, parent_id: parent, content };
            let post = posts::create_post(&mut tx, req, &config)?;
            tx.commit()?;
            print_json(&post)?;
        }
        Commands::Query { term, cursor, limit, forward } => {
            let cursor = match cursor {
                Some(hex_cursor) => hex::decode(hex_cursor).context("cursor is not hex")?,
                None => Vec::new(),
            };
            let direction = if forward { Direction::Forward } else { Direction::Reverse };
            let tx = store.read_tx();
            let limit = limit.unwrap_or(config.page_limit);
            let (ids, next) = POSTS_BY.query(&tx, &term, &cursor, limit, direction)?;
            let posts = posts::read_posts(&tx, &ids)?;
            print_json(&QueryOutput { term, posts, next_cursor: hex::encode(next) })?;
        }
        Commands::Thread { post } => {
            let tx = store.read_tx();
            print_json(&posts::get_post(&tx, post)?)?;
        }
        Commands::Reindex { post } => {
            let mut tx = store.write_tx();
            let ids = match post {
                Some(id) => vec![id],
                None => {
                    let mut ids = Vec::new();
                    POSTS.iterate_all(&tx, |id, _| {
                        ids.push(id);
                        true
                    })?;
                    ids
                }
            };
            // ascending ids put every parent before its replies
            for id in &ids {
                posts::reindex_post(&mut tx, *id)?;
            }
            tx.commit()?;
            tracing::info!(posts = ids.len(), "reindex complete");
        }
    }
    store.close()?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
