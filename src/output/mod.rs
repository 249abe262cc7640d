//! Output formatting for the CLI: plain text for humans, JSON for machines.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::records::CiStatus;
use crate::review::{Review, Summary, Thread};

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Line-oriented text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

/// Formatter for command results.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    format: OutputFormat,
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn vote_marker(resolved: Option<bool>) -> &'static str {
    match resolved {
        Some(true) => "+",
        Some(false) => "-",
        None => " ",
    }
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        let rendered =
            serde_json::to_string_pretty(data).map_err(|e| Error::Parse(e.to_string()))?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{rendered}").map_err(|e| Error::RepoIo(e.into()))?;
        Ok(())
    }

    /// Print a one-line confirmation (text) or a structured result (JSON).
    pub fn confirm<T: Serialize>(&self, text: &str, data: &T) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                println!("{text}");
                Ok(())
            }
            OutputFormat::Json => self.print_json(data),
        }
    }

    pub fn print_summaries(&self, summaries: &[Summary]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&summaries),
            OutputFormat::Text => {
                if summaries.is_empty() {
                    println!("No reviews.");
                    return Ok(());
                }
                for summary in summaries {
                    println!(
                        "[{:9}] {}  {}",
                        summary.status.as_str(),
                        short(&summary.revision),
                        first_line(&summary.description),
                    );
                }
                Ok(())
            }
        }
    }

    pub fn print_review(&self, review: &Review) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&review),
            OutputFormat::Text => {
                println!(
                    "[{}] {}  {} -> {}",
                    review.status.as_str(),
                    short(&review.revision),
                    review.request.review_ref,
                    if review.request.target_ref.is_empty() {
                        "(abandoned)"
                    } else {
                        &review.request.target_ref
                    },
                );
                println!("requester: {}", review.request.requester);
                if !review.request.reviewers.is_empty() {
                    println!("reviewers: {}", review.request.reviewers.join(", "));
                }
                if let Some(resolved) = review.resolved {
                    println!("resolved: {resolved}");
                }
                if !review.request.description.is_empty() {
                    println!("\n{}", review.request.description);
                }
                if !review.comments.is_empty() {
                    println!("\ncomments:");
                    for thread in &review.comments {
                        print_thread(thread, 1);
                    }
                }
                if !review.orphaned.is_empty() {
                    println!("\norphaned comments:");
                    for thread in &review.orphaned {
                        print_thread(thread, 1);
                    }
                }
                if !review.ci_reports.is_empty() {
                    println!("\nci:");
                    for report in &review.ci_reports {
                        let status = report.status.map_or("unknown", |s| match s {
                            CiStatus::Success => "success",
                            CiStatus::Failure => "failure",
                            CiStatus::Pending => "pending",
                        });
                        println!("  {}: {} {}", report.agent, status, report.url);
                    }
                }
                if !review.analyses.is_empty() {
                    println!("\nanalyses:");
                    for note in &review.analyses {
                        println!("  {}", note.url);
                    }
                }
                if !review.parse_errors.is_empty() {
                    println!("\nmalformed records skipped:");
                    for error in &review.parse_errors {
                        println!("  {error}");
                    }
                }
                Ok(())
            }
        }
    }

    pub fn print_threads(&self, threads: &[Thread]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&threads),
            OutputFormat::Text => {
                if threads.is_empty() {
                    println!("No comments.");
                    return Ok(());
                }
                for thread in threads {
                    print_thread(thread, 0);
                }
                Ok(())
            }
        }
    }

    pub fn print_changed_reviews(&self, ids: &[String]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&ids),
            OutputFormat::Text => {
                if ids.is_empty() {
                    println!("Already up to date.");
                } else {
                    for id in ids {
                        println!("{id}");
                    }
                }
                Ok(())
            }
        }
    }
}

fn print_thread(thread: &Thread, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut suffix = String::new();
    if thread.edited {
        suffix.push_str(" (edited)");
    }
    if thread.verified == Some(false) {
        suffix.push_str(" (unverified)");
    }
    println!(
        "{indent}[{}] {}: {}{suffix}",
        vote_marker(thread.comment.resolved),
        thread.comment.author,
        first_line(thread.display_description()),
    );
    for child in &thread.children {
        print_thread(child, depth + 1);
    }
}
