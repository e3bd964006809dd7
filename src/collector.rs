//! Per-probe metric collection.
//!
//! A [`ProbeCollector`] is built fresh for every probe request and owns a
//! private Prometheus registry, so concurrent probes against different
//! targets can never intermix metric-family state. The only thing probes
//! share is the process-wide [`TokenCache`].

use crate::client::{parse_job, parse_vm_client, CommvaultClient};
use crate::config::TargetConfig;
use crate::error::{CvError, Result};
use crate::token_cache::TokenCache;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Label carrying the probed target's name on every sample.
const TARGET_LABEL: &str = "commvault_target";

/// Ephemeral collector for one probe of one target.
pub struct ProbeCollector {
    client: CommvaultClient,
    config: TargetConfig,
    target_name: String,
    registry: Registry,

    // Scrape outcome
    scrape_duration: GaugeVec,
    scrape_success: GaugeVec,

    // System info
    system_info: GaugeVec,

    // VM pseudo-client inventory
    vm_client_status: GaugeVec,
    vm_client_activity: GaugeVec,

    // Job history
    job_status: GaugeVec,
    job_duration: GaugeVec,
    job_start_time: GaugeVec,
    job_end_time: GaugeVec,
    job_failed_files: GaugeVec,
    job_failed_folders: GaugeVec,
    job_percent_complete: GaugeVec,
    job_size_application_bytes: GaugeVec,
    job_size_media_bytes: GaugeVec,
    job_alert_level: GaugeVec,
}

fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let mut labels = labels.to_vec();
    labels.push(TARGET_LABEL);
    let gauge = GaugeVec::new(Opts::new(name, help), &labels)
        .map_err(|e| CvError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| CvError::Metrics(e.to_string()))?;
    Ok(gauge)
}

impl ProbeCollector {
    /// Create a collector scoped to one probe of `target_name`.
    ///
    /// Builds the per-target API client; a construction failure here is the
    /// one fatal error path of a probe (surfaced as HTTP 500 upstream).
    pub fn new(
        target_name: &str,
        config: TargetConfig,
        token_cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let client = CommvaultClient::new(target_name, config.clone(), token_cache)?;
        let registry = Registry::new();

        let scrape_duration = register_gauge_vec(
            &registry,
            "commvault_scrape_duration_seconds",
            "Time the Commvault scrape took for this target",
            &[],
        )?;
        let scrape_success = register_gauge_vec(
            &registry,
            "commvault_scrape_success",
            "Whether the Commvault scrape succeeded for this target (1 for success, 0 for failure)",
            &[],
        )?;
        let system_info = register_gauge_vec(
            &registry,
            "commvault_info",
            "Commvault system information for this target",
            &["version", "commserve_name"],
        )?;
        let vm_client_status = register_gauge_vec(
            &registry,
            "commvault_vm_client_status",
            "Status of VM pseudo clients (1 = active, 0 = inactive)",
            &["client_id", "client_name", "host_name", "instance_name", "status"],
        )?;
        let vm_client_activity = register_gauge_vec(
            &registry,
            "commvault_vm_client_activity_control",
            "Activity control status for VM pseudo clients",
            &["client_id", "client_name", "activity_type", "enabled"],
        )?;
        let job_status = register_gauge_vec(
            &registry,
            "commvault_job_status",
            "Job status (Completed=1, Failed=0, Running=2, Other=3)",
            &["job_id", "job_type", "client_name", "subclient_name"],
        )?;
        let job_duration = register_gauge_vec(
            &registry,
            "commvault_job_duration_seconds",
            "Job duration in seconds",
            &["job_id", "job_type", "client_name"],
        )?;
        let job_start_time = register_gauge_vec(
            &registry,
            "commvault_job_start_time_seconds",
            "Job start time (Unix timestamp)",
            &["job_id", "job_type"],
        )?;
        let job_end_time = register_gauge_vec(
            &registry,
            "commvault_job_end_time_seconds",
            "Job end time (Unix timestamp)",
            &["job_id", "job_type"],
        )?;
        let job_failed_files = register_gauge_vec(
            &registry,
            "commvault_job_failed_files_total",
            "Number of failed files in the last job run",
            &["job_id", "job_type"],
        )?;
        let job_failed_folders = register_gauge_vec(
            &registry,
            "commvault_job_failed_folders_total",
            "Number of failed folders in the last job run",
            &["job_id", "job_type"],
        )?;
        let job_percent_complete = register_gauge_vec(
            &registry,
            "commvault_job_percent_complete",
            "Job completion percentage (0-100)",
            &["job_id", "job_type"],
        )?;
        let job_size_application_bytes = register_gauge_vec(
            &registry,
            "commvault_job_size_application_bytes",
            "Size of the application data processed (bytes)",
            &["job_id", "job_type"],
        )?;
        let job_size_media_bytes = register_gauge_vec(
            &registry,
            "commvault_job_size_media_bytes",
            "Size of media on disk (bytes)",
            &["job_id", "job_type"],
        )?;
        let job_alert_level = register_gauge_vec(
            &registry,
            "commvault_job_alert_level",
            "Alert severity (0 = normal, higher = issues)",
            &["job_id", "job_type"],
        )?;

        Ok(Self {
            client,
            config,
            target_name: target_name.to_string(),
            registry,
            scrape_duration,
            scrape_success,
            system_info,
            vm_client_status,
            vm_client_activity,
            job_status,
            job_duration,
            job_start_time,
            job_end_time,
            job_failed_files,
            job_failed_folders,
            job_percent_complete,
            job_size_application_bytes,
            job_size_media_bytes,
            job_alert_level,
        })
    }

    /// Run all sub-collections concurrently and aggregate the outcome.
    ///
    /// Overall success requires every sub-collection to finish without a
    /// fatal error; "no data" and empty results are soft failures that leave
    /// success untouched. The scrape gauges are always populated, so even a
    /// fully failed probe renders a usable exposition document.
    pub async fn collect(&self) -> bool {
        let start = Instant::now();
        info!(target = %self.target_name, "Starting metrics collection");

        let (system, vm_clients, jobs) = tokio::join!(
            self.collect_system_info(),
            self.collect_vm_clients(),
            self.collect_job_metrics(),
        );

        let mut overall_success = true;
        let outcomes = [
            ("system info", system),
            ("VM pseudo clients", vm_clients),
            ("job metrics", jobs),
        ];
        for (task, outcome) in outcomes {
            match outcome {
                Ok(()) => debug!(target = %self.target_name, "Task '{}' completed", task),
                Err(e) => {
                    error!(target = %self.target_name, "Task '{}' failed: {}", task, e);
                    overall_success = false;
                }
            }
        }

        let duration = start.elapsed().as_secs_f64();
        self.scrape_duration
            .with_label_values(&[&self.target_name])
            .set(duration);
        self.scrape_success
            .with_label_values(&[&self.target_name])
            .set(if overall_success { 1.0 } else { 0.0 });

        info!(
            target = %self.target_name,
            "Scrape completed in {:.2} seconds (success: {})",
            duration,
            overall_success
        );
        overall_success
    }

    /// Emit the static info sample. Sourced from configuration only, so it
    /// cannot fail.
    async fn collect_system_info(&self) -> Result<()> {
        let version = self.config.version.clone();
        let commserve_name = self.config.commserve_name_or(&self.target_name);
        self.system_info
            .with_label_values(&[&version, commserve_name, &self.target_name])
            .set(1.0);
        debug!(
            target = %self.target_name,
            "Collected system info - Version: {}, Server: {}",
            version,
            commserve_name
        );
        Ok(())
    }

    async fn collect_vm_clients(&self) -> Result<()> {
        let Some(response) = self.client.get("/Client/VMPseudoClient", &[]).await? else {
            return Ok(());
        };
        let Some(entries) = response.get("VSPseudoClientsList").and_then(Value::as_array) else {
            debug!(target = %self.target_name, "No VSPseudoClientsList in response");
            return Ok(());
        };

        let mut count = 0;
        for entry in entries {
            let record = match parse_vm_client(entry) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        target = %self.target_name,
                        "Skipping malformed VM pseudo client entry: {}", e
                    );
                    continue;
                }
            };

            let status_value = if record.is_active() { 1.0 } else { 0.0 };
            self.vm_client_status
                .with_label_values(&[
                    &record.client_id,
                    &record.client_name,
                    &record.host_name,
                    &record.instance_name,
                    &record.status_str,
                    &self.target_name,
                ])
                .set(status_value);

            for (activity_type, enabled) in &record.activities {
                let enabled_value = if *enabled { 1.0 } else { 0.0 };
                let enabled_label = if *enabled { "1" } else { "0" };
                self.vm_client_activity
                    .with_label_values(&[
                        &record.client_id,
                        &record.client_name,
                        activity_type,
                        enabled_label,
                        &self.target_name,
                    ])
                    .set(enabled_value);
            }
            count += 1;
        }

        info!(target = %self.target_name, "Processed {} VM pseudo clients", count);
        Ok(())
    }

    async fn collect_job_metrics(&self) -> Result<()> {
        let params = [
            ("completed", "true".to_string()),
            ("lookupFinishedJobs", "true".to_string()),
            ("allProps", "true".to_string()),
            ("limit", self.config.job_history_limit.to_string()),
        ];
        let Some(response) = self.client.get("/Job", &params).await? else {
            return Ok(());
        };
        let Some(entries) = response.get("jobs").and_then(Value::as_array) else {
            debug!(target = %self.target_name, "No jobs list in response");
            return Ok(());
        };

        let mut count = 0;
        for entry in entries {
            let job = match parse_job(entry) {
                Ok(job) => job,
                Err(e) => {
                    warn!(target = %self.target_name, "Skipping malformed job entry: {}", e);
                    continue;
                }
            };

            self.job_status
                .with_label_values(&[
                    &job.job_id,
                    &job.job_type,
                    &job.client_name,
                    &job.subclient_name,
                    &self.target_name,
                ])
                .set(job.status.value());
            self.job_duration
                .with_label_values(&[
                    &job.job_id,
                    &job.job_type,
                    &job.client_name,
                    &self.target_name,
                ])
                .set(job.duration_seconds);

            let common = [
                job.job_id.as_str(),
                job.job_type.as_str(),
                self.target_name.as_str(),
            ];
            self.job_start_time
                .with_label_values(&common)
                .set(job.start_time);
            self.job_end_time
                .with_label_values(&common)
                .set(job.end_time);
            self.job_failed_files
                .with_label_values(&common)
                .set(job.failed_files);
            self.job_failed_folders
                .with_label_values(&common)
                .set(job.failed_folders);
            self.job_percent_complete
                .with_label_values(&common)
                .set(job.percent_complete);
            self.job_size_application_bytes
                .with_label_values(&common)
                .set(job.app_size_bytes);
            self.job_size_media_bytes
                .with_label_values(&common)
                .set(job.media_size_bytes);
            self.job_alert_level
                .with_label_values(&common)
                .set(job.alert_level);
            count += 1;
        }

        info!(target = %self.target_name, "Processed {} jobs", count);
        Ok(())
    }

    /// Encode this probe's samples in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::with_capacity(8192);
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| CvError::Metrics(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| CvError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;

    fn test_config() -> TargetConfig {
        TargetConfig {
            api_url: "https://cs.example.com/webconsole/api".to_string(),
            username: "probe".to_string(),
            password: "secret".to_string(),
            verify_tls: false,
            timeout_seconds: 5,
            job_history_limit: 1000,
            version: "11.36".to_string(),
            commserve_name: Some("CS01".to_string()),
        }
    }

    #[tokio::test]
    async fn test_system_info_sample_carries_config_labels() {
        let collector =
            ProbeCollector::new("prod", test_config(), Arc::new(TokenCache::new())).unwrap();
        collector.collect_system_info().await.unwrap();

        let output = collector.encode().unwrap();
        assert!(output.contains(r#"version="11.36""#));
        assert!(output.contains(r#"commserve_name="CS01""#));
        assert!(output.contains(r#"commvault_target="prod""#));
    }

    #[test]
    fn test_construction_fails_on_missing_credentials() {
        let mut config = test_config();
        config.password = String::new();
        let result = ProbeCollector::new("prod", config, Arc::new(TokenCache::new()));
        assert!(result.is_err());
    }
}
