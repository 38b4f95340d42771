//! Prometheus metrics HTTP endpoint
//!
//! Exposes occupancy metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Clone, Copy)]
enum Kind {
    Counter,
    Gauge,
}

/// One site-labelled series read from a summary
struct Series {
    name: &'static str,
    help: &'static str,
    kind: Kind,
    value: fn(&MetricsSummary) -> u64,
}

const SERIES: &[Series] = &[
    Series {
        name: "occupancy_events_total",
        help: "Total item events processed",
        kind: Kind::Counter,
        value: |s| s.events_total,
    },
    Series {
        name: "occupancy_sensor_events_total",
        help: "Sensor state changes routed to a handler",
        kind: Kind::Counter,
        value: |s| s.sensor_events_total,
    },
    Series {
        name: "occupancy_command_events_total",
        help: "Commands received on occupancy control items",
        kind: Kind::Counter,
        value: |s| s.command_events_total,
    },
    Series {
        name: "occupancy_event_queue_depth",
        help: "Inbound events waiting for the engine",
        kind: Kind::Gauge,
        value: |s| s.event_queue_depth,
    },
    Series {
        name: "occupancy_occupied_transitions_total",
        help: "Vacant to occupied transitions",
        kind: Kind::Counter,
        value: |s| s.occupied_transitions_total,
    },
    Series {
        name: "occupancy_vacant_transitions_total",
        help: "Transitions to vacant",
        kind: Kind::Counter,
        value: |s| s.vacant_transitions_total,
    },
    Series {
        name: "occupancy_timer_expiries_total",
        help: "Occupancy timers that expired",
        kind: Kind::Counter,
        value: |s| s.timer_expiries_total,
    },
    Series {
        name: "occupancy_stale_timers_total",
        help: "Superseded timer entries discarded",
        kind: Kind::Counter,
        value: |s| s.stale_timers_total,
    },
    Series {
        name: "occupancy_locks_total",
        help: "Lock operations including cascades",
        kind: Kind::Counter,
        value: |s| s.locks_total,
    },
    Series {
        name: "occupancy_unlocks_total",
        help: "Unlock operations including cascades",
        kind: Kind::Counter,
        value: |s| s.unlocks_total,
    },
    Series {
        name: "occupancy_guard_rejections_total",
        help: "Transitions refused because of locks or vacancy guards",
        kind: Kind::Counter,
        value: |s| s.guard_rejections_total,
    },
    Series {
        name: "occupancy_config_warnings_total",
        help: "Metadata validation warnings",
        kind: Kind::Counter,
        value: |s| s.config_warnings_total,
    },
    Series {
        name: "occupancy_action_commands_total",
        help: "Device commands issued by location actions",
        kind: Kind::Counter,
        value: |s| s.action_commands_total,
    },
    Series {
        name: "occupancy_locations",
        help: "Known locations",
        kind: Kind::Gauge,
        value: |s| s.locations,
    },
    Series {
        name: "occupancy_locations_occupied",
        help: "Locations currently occupied",
        kind: Kind::Gauge,
        value: |s| s.locations_occupied,
    },
    Series {
        name: "occupancy_locations_locked",
        help: "Locations currently locked",
        kind: Kind::Gauge,
        value: |s| s.locations_locked,
    },
    Series {
        name: "occupancy_ingress_dropped_total",
        help: "Inbound events dropped due to full queue",
        kind: Kind::Counter,
        value: |s| s.ingress_dropped,
    },
    Series {
        name: "occupancy_egress_dropped_total",
        help: "Outbound messages dropped due to full queue",
        kind: Kind::Counter,
        value: |s| s.egress_dropped,
    },
];

const LATENCY_NAME: &str = "occupancy_event_latency_us";

/// Text exposition for one scrape
fn render(summary: &MetricsSummary, site: &str) -> String {
    let mut out = String::with_capacity(4096);

    for series in SERIES {
        let kind = match series.kind {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
        };
        let _ = writeln!(out, "# HELP {} {}", series.name, series.help);
        let _ = writeln!(out, "# TYPE {} {kind}", series.name);
        let _ = writeln!(out, "{}{{site=\"{site}\"}} {}", series.name, (series.value)(summary));
    }

    render_latency(&mut out, summary, site);
    out
}

/// Cumulative latency buckets; the sum is estimated from the interval average
fn render_latency(out: &mut String, summary: &MetricsSummary, site: &str) {
    let _ = writeln!(out, "# HELP {LATENCY_NAME} Event processing latency in microseconds");
    let _ = writeln!(out, "# TYPE {LATENCY_NAME} histogram");

    let buckets: &[u64; METRICS_NUM_BUCKETS] = &summary.lat_buckets;
    let mut seen = 0u64;
    for (bound, count) in METRICS_BUCKET_BOUNDS.iter().zip(buckets.iter()) {
        seen += count;
        let _ = writeln!(out, "{LATENCY_NAME}_bucket{{site=\"{site}\",le=\"{bound}\"}} {seen}");
    }
    let total: u64 = buckets.iter().sum();
    let _ = writeln!(out, "{LATENCY_NAME}_bucket{{site=\"{site}\",le=\"+Inf\"}} {total}");
    let _ = writeln!(out, "{LATENCY_NAME}_sum{{site=\"{site}\"}} {}", summary.avg_process_latency_us * total);
    let _ = writeln!(out, "{LATENCY_NAME}_count{{site=\"{site}\"}} {total}");
}

fn route(method: &Method, path: &str, metrics: &Metrics, site_id: &str) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match (method, path) {
        (&Method::GET, "/metrics") => (
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            render(&metrics.report(), site_id),
        ),
        (&Method::GET, "/health") => (StatusCode::OK, "text/plain", "ok".to_string()),
        _ => (StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Serve `/metrics` and `/health` until shutdown is signalled
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let site_id: Arc<str> = Arc::from(site_id);
    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, metrics.clone(), site_id.clone()));
                }
                Err(e) => error!(error = %e, "prometheus_accept_error"),
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, metrics: Arc<Metrics>, site_id: Arc<str>) {
    let service = service_fn(move |req: Request<Incoming>| {
        let response = route(req.method(), req.uri().path(), &metrics, &site_id);
        async move { Ok::<_, Infallible>(response) }
    });
    if let Err(e) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
        debug!(error = %e, peer = %peer, "prometheus_http_error");
    }
}
