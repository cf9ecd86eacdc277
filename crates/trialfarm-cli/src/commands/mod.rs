//! CLI commands implementation

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::info;
use trialfarm_core::{load_pool_triples, FarmConfig, Resolution, TaskEntry};
use trialfarm_scheduler::{ClusterPool, Scheduler};

/// Load the farm config, replacing its workers with the pool file if one is given
pub fn load_config(config: Option<&Path>, pool: Option<&Path>) -> Result<FarmConfig> {
    let mut farm = match config {
        Some(path) => FarmConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FarmConfig::default(),
    };

    if let Some(path) = pool {
        farm.workers = load_pool_triples(path)
            .with_context(|| format!("loading pool file {}", path.display()))?;
    }

    Ok(farm)
}

/// Extract payloads from a task file
///
/// Each element is either the payload string itself or an array whose first
/// element is the payload.
pub fn parse_tasks(content: &str) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(content).context("task file is not valid JSON")?;
    let Value::Array(items) = value else {
        bail!("task file must hold a JSON array");
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(payload) => Ok(payload),
            Value::Array(fields) => match fields.into_iter().next() {
                Some(Value::String(payload)) => Ok(payload),
                _ => bail!("task {} does not start with a payload string", index),
            },
            other => bail!("task {} has no payload: {}", index, other),
        })
        .collect()
}

/// One line of the results report
#[derive(Debug, Serialize)]
pub struct ResultRow<'a> {
    pub index: usize,
    pub payload: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gave_up_after: Option<u32>,
}

pub fn result_rows(entries: &[TaskEntry]) -> Vec<ResultRow<'_>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut row = ResultRow {
                index,
                payload: &entry.payload,
                metric: None,
                duration_minutes: None,
                gave_up_after: None,
            };
            match &entry.result {
                Some(Resolution::Completed(result)) => {
                    row.metric = Some(result.metric);
                    row.duration_minutes = Some(result.duration_minutes);
                }
                Some(Resolution::GaveUp { attempts }) => {
                    row.gave_up_after = Some(*attempts);
                }
                None => {}
            }
            row
        })
        .collect()
}

/// Run every task in the task file
pub async fn run(config: &FarmConfig, tasks: &Path, output: Option<&Path>) -> Result<()> {
    let content = if tasks == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading tasks from stdin")?;
        buf
    } else {
        std::fs::read_to_string(tasks)
            .with_context(|| format!("reading task file {}", tasks.display()))?
    };

    let mut entries: Vec<TaskEntry> = parse_tasks(&content)?
        .into_iter()
        .map(TaskEntry::new)
        .collect();

    let mut scheduler = Scheduler::connect(config)?;
    scheduler.run_entries(&mut entries).await?;

    let report = serde_json::to_string_pretty(&result_rows(&entries))?;
    match output {
        Some(path) => {
            std::fs::write(path, report + "\n")
                .with_context(|| format!("writing results to {}", path.display()))?;
            info!(path = %path.display(), tasks = entries.len(), "Results written");
        }
        None => println!("{}", report),
    }

    Ok(())
}

/// Show telemetry and availability of every worker
pub async fn probe(config: &FarmConfig) -> Result<()> {
    let pool = ClusterPool::connect(config)?;

    let snapshots =
        futures::future::join_all(pool.workers().iter().map(|w| w.probe().snapshot())).await;

    println!(
        "{:<24} {:<6} {:<22} {:<6} {:<12}",
        "WORKER", "TEMP", "MEMORY", "UTIL", "STATUS"
    );
    println!("{}", "-".repeat(72));
    for (worker, snapshot) in pool.workers().iter().zip(snapshots) {
        match snapshot {
            Some(t) => println!(
                "{:<24} {:<6} {:<22} {:<6} {:<12}",
                worker.id(),
                format!("{}C", t.temperature_c),
                format!("{}/{}MiB", t.used_mem_mib, t.total_mem_mib),
                format!("{}%", t.utilization_pct),
                if t.is_idle(&config.probe) {
                    "Available"
                } else {
                    "Busy"
                }
            ),
            None => println!(
                "{:<24} {:<6} {:<22} {:<6} {:<12}",
                worker.id(),
                "-",
                "-",
                "-",
                "Unreachable"
            ),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use trialfarm_core::{TrialResult, WorkerSpec};

    #[test]
    fn test_parse_plain_payloads() {
        let tasks = parse_tasks(r#"["/exp/a", "/exp/b"]"#).unwrap();
        assert_eq!(tasks, vec!["/exp/a", "/exp/b"]);
    }

    #[test]
    fn test_parse_entry_arrays() {
        let tasks = parse_tasks(r#"[["/exp/a", 3, "extra"], ["/exp/b"]]"#).unwrap();
        assert_eq!(tasks, vec!["/exp/a", "/exp/b"]);
    }

    #[test]
    fn test_parse_rejects_bad_tasks() {
        assert!(parse_tasks(r#"{"tasks": []}"#).is_err());
        assert!(parse_tasks(r#"[42]"#).is_err());
        assert!(parse_tasks(r#"[[]]"#).is_err());
        assert!(parse_tasks("not json").is_err());
    }

    #[test]
    fn test_load_config_with_pool_override() {
        let mut config_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            config_file,
            "[scheduler]\nmax_running_workers = 3\n\n[[workers]]\nhost = \"old\"\ndevice = 0\nexecutable = \"a.py\""
        )
        .unwrap();
        let mut pool_file = tempfile::NamedTempFile::new().unwrap();
        write!(pool_file, r#"[["gpu-01", 1, "/srv/b.py"]]"#).unwrap();

        let config = load_config(Some(config_file.path()), Some(pool_file.path())).unwrap();

        assert_eq!(config.scheduler.max_running_workers, 3);
        assert_eq!(config.workers, vec![WorkerSpec::new("gpu-01", 1, "/srv/b.py")]);
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert!(config.workers.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_result_rows() {
        let report = trialfarm_core::TrialReport {
            running_time_secs: 300.0,
            metric: 0.9,
        };
        let entries = vec![
            TaskEntry {
                payload: "/exp/a".to_string(),
                result: Some(Resolution::Completed(TrialResult::from_report(&report))),
            },
            TaskEntry {
                payload: "/exp/b".to_string(),
                result: Some(Resolution::GaveUp { attempts: 4 }),
            },
        ];

        let json = serde_json::to_value(result_rows(&entries)).unwrap();
        assert_eq!(json[0]["metric"], 0.9);
        assert_eq!(json[0]["duration_minutes"], 5.0);
        assert!(json[0].get("gave_up_after").is_none());
        assert_eq!(json[1]["index"], 1);
        assert_eq!(json[1]["gave_up_after"], 4);
    }
}
