use crate::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Appends lifecycle events for one instance to its log file.
pub struct InstanceLogger {
    instance_name: String,
    log_file: PathBuf,
}

impl InstanceLogger {
    pub fn new(instance_name: impl Into<String>, log_file: PathBuf) -> Self {
        Self {
            instance_name: instance_name.into(),
            log_file,
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    pub async fn init(&self) -> Result<()> {
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    pub async fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        let timestamp = Utc::now();
        let log_entry = format!(
            "{} [{}] [{}] {}\n",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level.as_str(),
            self.instance_name,
            message
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await?;

        file.write_all(log_entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn info(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Info, message).await
    }

    pub async fn warn(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Warn, message).await
    }

    pub async fn error(&self, message: &str) -> Result<()> {
        self.log(LogLevel::Error, message).await
    }

    /// Whole log, or an empty string if nothing has been written yet.
    pub async fn read(&self) -> Result<String> {
        match fs::read(&self.log_file).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logger = InstanceLogger::new("web-1", dir.path().join("logs").join("web-1.log"));
        assert_eq!(logger.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_entries_are_appended() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let logger = InstanceLogger::new("web-1", dir.path().join("logs").join("web-1.log"));
        logger.init().await?;
        logger.info("booting").await?;
        logger.warn("no network").await?;

        let content = logger.read().await?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] [web-1] booting"));
        assert!(lines[1].ends_with("[WARN] [web-1] no network"));
        Ok(())
    }
}
