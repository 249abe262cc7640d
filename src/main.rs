//! notecrit — distributed code review stored in git notes.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use notecrit::cli::commands::{
    run_abandon, run_accept, run_comment, run_comments, run_list, run_pull, run_push, run_reject,
    run_request, run_show, CommentOpts, RequestOpts,
};
use notecrit::cli::{Cli, Commands};
use notecrit::config::Config;
use notecrit::error::{Error, Result};
use notecrit::output::{Formatter, OutputFormat};
use notecrit::scm::git::{detect_git_root, GitRepo};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::RepoIo(anyhow::anyhow!("cannot read working directory: {e}")))?;
    let root = detect_git_root(&cwd)
        .ok_or_else(|| Error::validation("not inside a git repository".to_string()))?;
    let repo = GitRepo::new(root);
    let config = Config::load(&repo);
    let formatter = Formatter::new(if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    });

    match cli.command {
        Commands::List { all } => run_list(&repo, &config, all, formatter),

        Commands::Show { review_id } => run_show(&repo, &config, review_id.as_deref(), formatter),

        Commands::Request {
            source,
            target,
            message,
            reviewers,
            base,
            alias,
            sign,
        } => run_request(
            &repo,
            RequestOpts {
                source,
                target,
                message,
                reviewers,
                base,
                alias,
                sign,
            },
            formatter,
        ),

        Commands::Comment {
            review_id,
            message,
            parent,
            file,
            line,
            lgtm,
            nmw,
            detached,
            sign,
            date,
        } => run_comment(
            &repo,
            &config,
            CommentOpts {
                review_id,
                message,
                parent,
                file,
                line,
                lgtm,
                nmw,
                detached,
                sign,
                date,
            },
            formatter,
        ),

        Commands::Accept {
            review_id,
            message,
            sign,
            date,
        } => run_accept(
            &repo,
            &config,
            review_id.as_deref(),
            message,
            sign,
            date.as_deref(),
            formatter,
        ),

        Commands::Reject {
            review_id,
            message,
            sign,
            date,
        } => run_reject(
            &repo,
            &config,
            review_id.as_deref(),
            message,
            sign,
            date.as_deref(),
            formatter,
        ),

        Commands::Abandon { review_id, message } => {
            run_abandon(&repo, &config, review_id.as_deref(), message, formatter)
        }

        Commands::Comments { path } => run_comments(&repo, &path, formatter),

        Commands::Pull { remote } => run_pull(&repo, &config, remote.as_deref(), formatter),

        Commands::Push { remote } => run_push(&repo, &config, remote.as_deref(), formatter),
    }
}
