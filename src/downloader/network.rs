// Network helper - anonymizing proxy restart and egress IP checks

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use super::config::AnonymizerConfig;
use super::errors::{PipelineError, PipelineResult};
use super::utils::run_output_with_timeout;

/// Client identity the extraction was made under
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EgressIdentity {
    pub direct_ip: Option<String>,
    pub proxied_ip: Option<String>,
    /// Proxy URL handed to the extractor when anonymized
    pub proxy: Option<String>,
}

impl EgressIdentity {
    /// Address the transcoder forwards: proxied when available, direct otherwise
    pub fn ip_address(&self) -> Option<&str> {
        self.proxied_ip.as_deref().or(self.direct_ip.as_deref())
    }
}

/// Pre-flight step run before every extraction
#[async_trait]
pub trait EgressResolver: Send + Sync {
    async fn resolve(&self, anonymize: bool) -> PipelineResult<EgressIdentity>;
}

pub struct NetworkHelper {
    config: AnonymizerConfig,
}

impl NetworkHelper {
    pub fn new(config: AnonymizerConfig) -> Self {
        Self { config }
    }

    /// Service-manager invocations tried in order for this platform
    pub fn restart_commands(service: &str) -> Vec<(String, Vec<String>)> {
        fn owned(args: &[&str]) -> Vec<String> {
            args.iter().map(|a| a.to_string()).collect()
        }
        if cfg!(target_os = "macos") {
            vec![("brew".to_string(), owned(&["services", "restart", service]))]
        } else if cfg!(unix) {
            vec![
                ("systemctl".to_string(), owned(&["restart", service])),
                ("service".to_string(), owned(&[service, "restart"])),
            ]
        } else {
            Vec::new()
        }
    }

    /// Restart the proxy service with the first service manager that works
    pub async fn restart_service(&self) -> PipelineResult<()> {
        let commands = Self::restart_commands(&self.config.service_name);
        if commands.is_empty() {
            return Err(PipelineError::Anonymization(
                "no service manager available on this platform".to_string(),
            ));
        }

        let mut last_error = String::new();
        for (program, args) in commands {
            match run_output_with_timeout(&program, &args, 30).await {
                Ok(output) if output.status.success() => {
                    tracing::info!(target: "transcoder::network", program = %program, service = %self.config.service_name, "proxy service restarted");
                    return Ok(());
                }
                Ok(output) => {
                    last_error = format!(
                        "{} exited with {}: {}",
                        program,
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Err(e) => last_error = e.to_string(),
            }
            tracing::debug!(target: "transcoder::network", error = %last_error, "restart attempt failed");
        }
        Err(PipelineError::Anonymization(format!(
            "could not restart {}: {}",
            self.config.service_name, last_error
        )))
    }

    /// Whether something accepts connections on the SOCKS endpoint
    pub async fn probe_socks(&self) -> bool {
        let attempt = TcpStream::connect(self.config.socks_endpoint.as_str());
        matches!(
            tokio::time::timeout(Duration::from_millis(500), attempt).await,
            Ok(Ok(_))
        )
    }

    /// Egress IP as seen by the check endpoint, optionally through the proxy
    pub async fn fetch_ip(&self, proxy: Option<&str>) -> PipelineResult<String> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(self.config.request_timeout_secs));
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| PipelineError::Anonymization(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build()?;

        let text = client
            .get(&self.config.ip_check_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text.trim().to_string())
    }

    /// `fetch_ip` with the configured fixed retry count; empty bodies count
    /// as failures
    pub async fn fetch_ip_with_retry(&self, proxy: Option<&str>) -> PipelineResult<String> {
        let attempts = self.config.retries.max(1);
        let mut last_error = PipelineError::Network("no attempt made".to_string());
        for attempt in 1..=attempts {
            match self.fetch_ip(proxy).await {
                Ok(ip) if !ip.is_empty() => return Ok(ip),
                Ok(_) => last_error = PipelineError::Network("IP check returned nothing".to_string()),
                Err(e) => last_error = e,
            }
            tracing::debug!(target: "transcoder::network", attempt, proxied = proxy.is_some(), error = %last_error, "IP check failed");
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl EgressResolver for NetworkHelper {
    async fn resolve(&self, anonymize: bool) -> PipelineResult<EgressIdentity> {
        if !anonymize {
            // direct identity is advisory; the header is simply left out without it
            let direct_ip = match self.fetch_ip_with_retry(None).await {
                Ok(ip) => Some(ip),
                Err(e) => {
                    tracing::warn!(target: "transcoder::network", error = %e, "direct IP check failed");
                    None
                }
            };
            return Ok(EgressIdentity {
                direct_ip,
                ..EgressIdentity::default()
            });
        }

        if self.config.restart_service {
            self.restart_service().await?;
        }

        let direct_ip = self.fetch_ip_with_retry(None).await.ok();
        if !self.probe_socks().await {
            tracing::warn!(target: "transcoder::network", endpoint = %self.config.socks_endpoint, "SOCKS endpoint not accepting connections yet");
        }

        let proxy = self.config.proxy_url();
        let proxied_ip = self.fetch_ip_with_retry(Some(&proxy)).await.map_err(|e| {
            PipelineError::Anonymization(format!(
                "proxied IP check through {} failed: {}",
                self.config.socks_endpoint, e
            ))
        })?;

        tracing::info!(
            target: "transcoder::network",
            direct = direct_ip.as_deref().unwrap_or("unknown"),
            proxied = %proxied_ip,
            "egress verified"
        );
        Ok(EgressIdentity {
            direct_ip,
            proxied_ip: Some(proxied_ip),
            proxy: Some(proxy),
        })
    }
}
