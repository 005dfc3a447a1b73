//! `harbor check`: show the resolved run plan without starting anything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use harbor_core::{ImageSource, Service};
use harbor_sync::{prune, DirSync};

use super::target::{Target, TargetArgs};

/// Arguments for `harbor check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let target = self.target.load()?;
        let plan = build_plan(&target)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }
        print_table(&plan);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Plan {
    app: String,
    services: Vec<ServicePlan>,
}

#[derive(Debug, Serialize)]
struct ServicePlan {
    order: usize,
    service: String,
    process: String,
    image: String,
    build: Option<String>,
    links: Vec<String>,
    proxies: Vec<ProxyPlan>,
    syncs: Vec<SyncPlan>,
    unresolved_syncs: Vec<UnresolvedSync>,
}

#[derive(Debug, Serialize)]
struct ProxyPlan {
    name: String,
    host: u16,
    container: u16,
}

#[derive(Debug, Serialize)]
struct SyncPlan {
    local: String,
    remote: String,
}

#[derive(Debug, Serialize)]
struct UnresolvedSync {
    local: String,
    error: String,
}

#[derive(Tabled)]
struct PlanTableRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "process")]
    process: String,
    #[tabled(rename = "image")]
    image: String,
    #[tabled(rename = "ports")]
    ports: String,
    #[tabled(rename = "syncs")]
    syncs: String,
}

fn build_plan(target: &Target) -> Result<Plan> {
    let app = &target.options.app;
    let order = target
        .manifest
        .run_order()
        .context("cannot determine service start order")?;

    let services = order
        .into_iter()
        .enumerate()
        .map(|(i, service)| service_plan(target, i + 1, service))
        .collect();

    Ok(Plan {
        app: app.clone(),
        services,
    })
}

fn service_plan(target: &Target, order: usize, service: &Service) -> ServicePlan {
    let app = &target.options.app;
    let dir = &target.options.dir;

    let mut resolved = Vec::new();
    let mut unresolved_syncs = Vec::new();
    for (local, remote) in service.sync_paths() {
        match DirSync::new(dir.join(&local), remote) {
            Ok(sync) => resolved.push(sync),
            Err(err) => unresolved_syncs.push(UnresolvedSync {
                local,
                error: err.to_string(),
            }),
        }
    }
    let syncs = prune(resolved)
        .into_iter()
        .map(|sync| SyncPlan {
            local: sync.local().display().to_string(),
            remote: sync.remote().display().to_string(),
        })
        .collect();

    let proxies = service
        .proxies(app, &target.config.proxy_image)
        .into_iter()
        .map(|proxy| ProxyPlan {
            name: proxy.name,
            host: proxy.port.host,
            container: proxy.port.container,
        })
        .collect();

    ServicePlan {
        order,
        service: service.name.0.clone(),
        process: service.process(app).name,
        image: service.image(app),
        build: match &service.source {
            ImageSource::Build(context) => Some(dir.join(context).display().to_string()),
            ImageSource::Image(_) => None,
        },
        links: service.links.iter().map(|l| l.0.clone()).collect(),
        proxies,
        syncs,
        unresolved_syncs,
    }
}

fn print_table(plan: &Plan) {
    println!(
        "Harbor v{} | app {} | {} services",
        env!("CARGO_PKG_VERSION"),
        plan.app.bold(),
        plan.services.len(),
    );

    let rows: Vec<PlanTableRow> = plan
        .services
        .iter()
        .map(|s| PlanTableRow {
            order: s.order,
            service: s.service.clone(),
            process: s.process.clone(),
            image: match &s.build {
                Some(context) => format!("{} (build {context})", s.image),
                None => s.image.clone(),
            },
            ports: ports_cell(&s.proxies),
            syncs: syncs_cell(s),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let unresolved: usize = plan.services.iter().map(|s| s.unresolved_syncs.len()).sum();
    if unresolved > 0 {
        println!(
            "{}",
            format!("{unresolved} sync path(s) do not exist; `harbor start` will fail").yellow()
        );
    }
}

fn ports_cell(proxies: &[ProxyPlan]) -> String {
    if proxies.is_empty() {
        return "-".to_string();
    }
    proxies
        .iter()
        .map(|p| format!("{}:{}", p.host, p.container))
        .collect::<Vec<_>>()
        .join(", ")
}

fn syncs_cell(service: &ServicePlan) -> String {
    let mut lines: Vec<String> = service
        .syncs
        .iter()
        .map(|s| format!("{} -> {}", s.local, s.remote))
        .collect();
    lines.extend(
        service
            .unresolved_syncs
            .iter()
            .map(|s| format!("{} {}", s.local, "(missing)".red())),
    );
    if lines.is_empty() {
        return "-".to_string();
    }
    lines.join("\n")
}
