//! Probe dispatcher.
//!
//! Picks the typed prober for a module, runs it under a span and records
//! duration and outcome the same way for every protocol.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::config::{Module, ProbeSettings};
use crate::observability::metrics;
use crate::prober::dns::probe_dns;
use crate::prober::http::probe_http;
use crate::prober::icmp::{probe_icmp, IcmpSequence};
use crate::prober::result::{ProbeContext, ProbeFailure, ProbeOutcome, ProbeReport};
use crate::prober::tcp::probe_tcp;

/// Runs probes. Cheap to clone; clones share the ICMP sequence counter.
#[derive(Debug, Clone, Default)]
pub struct ProbeEngine {
    icmp_sequence: Arc<IcmpSequence>,
}

impl ProbeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_icmp_sequence(icmp_sequence: Arc<IcmpSequence>) -> Self {
        Self { icmp_sequence }
    }

    /// Probe `target` with `module`, never returning early without a report.
    pub async fn probe(
        &self,
        module_name: &str,
        module: &Module,
        target: &str,
        ctx: ProbeContext,
    ) -> ProbeReport {
        let probe_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "probe",
            %probe_id,
            module = module_name,
            prober = %module.prober,
            target = target,
        );

        async move {
            tracing::debug!("Beginning probe");
            let start = Instant::now();
            let outcome = self.dispatch(module, target, &ctx).await;
            let duration = start.elapsed();

            let success = outcome.result.is_ok();
            let failure = outcome.result.err();
            match &failure {
                None => tracing::debug!(duration_seconds = duration.as_secs_f64(), "Probe succeeded"),
                Some(f) => tracing::debug!(
                    duration_seconds = duration.as_secs_f64(),
                    kind = f.kind(),
                    error = %f,
                    "Probe failed"
                ),
            }
            metrics::record_probe(module.prober, module_name, success, duration);

            ProbeReport {
                module: module_name.to_string(),
                prober: module.prober,
                target: target.to_string(),
                success,
                duration,
                failure,
                measurements: outcome.measurements,
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, module: &Module, target: &str, ctx: &ProbeContext) -> ProbeOutcome {
        match module.settings() {
            Some(ProbeSettings::Http(http)) => probe_http(ctx, target, http).await,
            Some(ProbeSettings::Tcp(tcp)) => probe_tcp(ctx, target, tcp).await,
            Some(ProbeSettings::Dns(dns)) => probe_dns(ctx, target, dns).await,
            Some(ProbeSettings::Icmp(icmp)) => {
                probe_icmp(ctx, target, icmp, &self.icmp_sequence).await
            }
            None => {
                tracing::error!(prober = %module.prober, "Module has no settings for its prober");
                ProbeOutcome::failure(ProbeFailure::Config(format!(
                    "module has no {} section",
                    module.prober
                )))
            }
        }
    }
}
