//! Script file resolution
//!
//! A script named `orders` of app `shop` is looked up as
//! `{root}/shop/orders` and then `{root}/shop/orders.sql` for every root in
//! order. The default roots are `~/.websql` and `./.websql`.

use std::path::{Path, PathBuf};

use tracing::debug;
use websql_common::WebsqlError;

const SCRIPT_DIR: &str = ".websql";
const SCRIPT_SUFFIX: &str = ".sql";
const LOOP_SUFFIX: &str = "_loop";

#[derive(Debug, Clone)]
pub struct ScriptLocator {
    roots: Vec<PathBuf>,
}

impl Default for ScriptLocator {
    fn default() -> Self {
        Self::new(Self::default_roots())
    }
}

impl ScriptLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn default_roots() -> Vec<PathBuf> {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        vec![Path::new(&home).join(SCRIPT_DIR), cwd.join(SCRIPT_DIR)]
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Name of the script that drives a job's main script
    pub fn loop_name(job_name: &str) -> String {
        format!("{}{}", job_name, LOOP_SUFFIX)
    }

    pub fn candidates(&self, app_name: &str, name: &str) -> Vec<PathBuf> {
        self.roots
            .iter()
            .flat_map(|root| {
                let dir = root.join(app_name);
                [dir.join(name), dir.join(format!("{}{}", name, SCRIPT_SUFFIX))]
            })
            .collect()
    }

    /// First readable candidate and its text
    pub async fn find(&self, app_name: &str, name: &str) -> Option<(PathBuf, String)> {
        for candidate in self.candidates(app_name, name) {
            match tokio::fs::read_to_string(&candidate).await {
                Ok(text) => return Some((candidate, text)),
                Err(e) => debug!(path = %candidate.display(), error = %e, "Script candidate skipped"),
            }
        }
        None
    }

    /// Refreshes `script_text` for a required script.
    ///
    /// An explicit path must be readable. Without one the roots are searched,
    /// and text already present is kept when nothing is found.
    pub async fn reload(
        &self,
        app_name: &str,
        name: &str,
        script_path: &mut String,
        script_text: &mut String,
    ) -> anyhow::Result<()> {
        if self.refresh(app_name, name, script_path, script_text).await? || !script_text.trim().is_empty() {
            return Ok(());
        }
        Err(WebsqlError::validation(format!("Failed to open query file: {}", name)).into())
    }

    /// Same as [`ScriptLocator::reload`] but a missing script is not an error
    pub async fn reload_optional(
        &self,
        app_name: &str,
        name: &str,
        script_path: &mut String,
        script_text: &mut String,
    ) -> anyhow::Result<()> {
        self.refresh(app_name, name, script_path, script_text).await?;
        Ok(())
    }

    async fn refresh(
        &self,
        app_name: &str,
        name: &str,
        script_path: &mut String,
        script_text: &mut String,
    ) -> anyhow::Result<bool> {
        let explicit = script_path.trim();
        if !explicit.is_empty() {
            let text = tokio::fs::read_to_string(explicit)
                .await
                .map_err(|e| WebsqlError::validation(format!("Failed to open query file: {} ({})", explicit, e)))?;
            *script_text = text;
            return Ok(true);
        }

        match self.find(app_name, name).await {
            Some((path, text)) => {
                *script_path = path.display().to_string();
                *script_text = text;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
