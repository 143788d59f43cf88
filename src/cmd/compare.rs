//! # Compare module
//!
//! This module provides the `compare` command which computes the json patch
//! between two reports

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::cmd::{summarize, Context, Executor};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read report '{0:?}', {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse report '{0:?}', {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("failed to serialize difference, {0}")]
    Serialize(serde_json::Error),
    #[error("failed to store difference, {0}")]
    Write(summarize::Error),
}

// -----------------------------------------------------------------------------
// Compare structure

#[derive(clap::Args, Clone, Debug)]
pub struct Compare {
    /// Report to compare from
    #[clap(name = "report-a")]
    pub from: PathBuf,
    /// Report to compare to
    #[clap(name = "report-b")]
    pub to: PathBuf,
    /// Directory the difference is written to
    #[clap(short = 'o', long = "output", default_value = ".")]
    pub output: PathBuf,
    /// Print the difference
    #[clap(long = "show", default_value_t = true, action = clap::ArgAction::Set)]
    pub show: bool,
}

#[async_trait]
impl Executor for Compare {
    type Error = Error;

    #[tracing::instrument(skip_all)]
    async fn execute(&self, _ctx: Arc<Context>) -> Result<(), Self::Error> {
        let from = load(&self.from).await?;
        let to = load(&self.to).await?;

        let patch = diff(&from, &to)?;
        let path = summarize::write(&self.output, "diff", &patch, Utc::now())
            .await
            .map_err(Error::Write)?;

        if self.show {
            println!(
                "{}",
                serde_json::to_string_pretty(&patch).map_err(Error::Serialize)?
            );
        }

        println!("Difference has been stored in '{}'", path.display());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// helpers

pub async fn load(path: &Path) -> Result<Value, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Read(path.to_owned(), err))?;

    serde_json::from_str(&content).map_err(|err| Error::Parse(path.to_owned(), err))
}

/// returns the json patch which turns `from` into `to`
pub fn diff(from: &Value, to: &Value) -> Result<Value, Error> {
    serde_json::to_value(json_patch::diff(from, to)).map_err(Error::Serialize)
}
