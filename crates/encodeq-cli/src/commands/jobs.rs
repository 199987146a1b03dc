//! Job commands.

use anyhow::{Context, Result};
use encodeq_core::{Job, Submission};

use crate::client::ApiClient;

pub async fn submit(
    api_url: &str,
    filename: String,
    submitter: String,
    metadata: Option<String>,
) -> Result<()> {
    let metadata = metadata
        .map(|raw| serde_json::from_str(&raw).context("--metadata must be valid JSON"))
        .transpose()?;
    let submission = Submission {
        filename,
        submitter_id: submitter,
        metadata,
    };

    let job = ApiClient::new(api_url)?.submit(&submission).await?;
    println!("Queued job {} as {}", job.id, job.storage_name);
    Ok(())
}

pub async fn list(api_url: &str, status: Option<String>) -> Result<()> {
    let jobs = ApiClient::new(api_url)?.list().await?;
    let jobs: Vec<&Job> = jobs
        .iter()
        .filter(|j| status.as_deref().is_none_or(|s| j.status.to_string() == s))
        .collect();

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    println!("{:>8}  {:<10}  {:<8}  {}", "ID", "STATUS", "ATTEMPTS", "FILE");
    for job in jobs {
        println!(
            "{:>8}  {:<10}  {:<8}  {}",
            job.id, job.status, job.attempts, job.original_name
        );
    }
    Ok(())
}

pub async fn show(api_url: &str, id: u64) -> Result<()> {
    let job = ApiClient::new(api_url)?.get(id).await?;

    println!("Job {}", job.id);
    println!("  status:       {}", job.status);
    println!("  file:         {}", job.original_name);
    println!("  storage name: {}", job.storage_name);
    println!("  submitter:    {}", job.submitter);
    println!("  created:      {}", job.created_at);
    println!("  attempts:     {}", job.attempts);
    if let Some(started) = job.started_at {
        println!("  started:      {}", started);
    }
    if let Some(finished) = job.finished_at {
        println!("  finished:     {}", finished);
    }
    if let Some(error) = &job.error {
        println!("  error:        {}", error);
    }
    if let Some(metadata) = &job.metadata {
        println!("  metadata:     {}", metadata);
    }
    Ok(())
}
