use std::collections::HashSet;
use std::io::{self, Write as IoWrite};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use strata_domain::{
    compute_state_hash, Fact, Host, HostId, Plan, Resource, ResourceStateRecord, RunStatus,
};
use strata_hosts::{parse_selector, HostRegistry};
use strata_planner::{build_plan, compute_diff, optimize_plan, validate_plan};
use strata_provider::{NullProvider, ProviderRegistry, ReadRequest};
use strata_scheduler::{ScheduleOptions, Scheduler};
use strata_store::{SqliteStore, StateStore};
use uuid::Uuid;

use crate::config::Config;
use crate::output;

const DEFAULT_MAX_PARALLEL: i32 = 10;
const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

// ── Init ──────────────────────────────────────────────────────────────────────

pub async fn init(config: &Config, solo: bool) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;

    SqliteStore::open(&config.db_url(), config.max_connections())
        .await
        .with_context(|| format!("failed to initialize store at {}", config.db_path().display()))?;

    if !config.config_file().exists() {
        let default_config = serde_json::json!({
            "solo": solo,
            "max_parallel": DEFAULT_MAX_PARALLEL,
        });
        std::fs::write(config.config_file(), serde_json::to_string_pretty(&default_config)?)
            .with_context(|| format!("failed to write {}", config.config_file().display()))?;
    }

    if !config.signing_key_path().exists() {
        write_signing_key(&config.signing_key_path())?;
    }

    println!("Initialized data directory at {}", config.data_dir.display());
    if solo {
        println!("Running solo: single embedded store, no peer coordination.");
    }
    Ok(())
}

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

fn write_signing_key(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, generate_token())
        .with_context(|| format!("failed to write signing key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

fn read_signing_key(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .with_context(|| format!("no signing key at {} — run `strata init` first", path.display()))
}

async fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    let store = SqliteStore::open(&config.db_url(), config.max_connections())
        .await
        .with_context(|| {
            format!(
                "failed to open store at {} — run `strata init` first",
                config.db_path().display()
            )
        })?;
    Ok(Arc::new(store))
}

fn load_resources(path: &PathBuf) -> Result<Vec<Resource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {} as a desired-resource-list", path.display()))
}

/// Builds a registry with a `NullProvider` standing in for every distinct
/// resource type present, so `plan`/`apply` have something to dispatch to
/// without a real provider plug-in configured. Mirrors the teacher's
/// `local` cloud target being wired in by default.
fn build_default_registry(resources: &[Resource]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let mut seen = HashSet::new();
    for resource in resources {
        if seen.insert(resource.r#type.clone()) {
            registry.register(resource.r#type.clone(), Arc::new(NullProvider::new()));
        }
    }
    registry
}

fn confirm(prompt: &str) -> Result<()> {
    print!("{prompt} [y/N]: ");
    io::stdout().flush().context("flush stdout")?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("read confirmation")?;
    if line.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        bail!("aborted");
    }
}

// ── Validate ──────────────────────────────────────────────────────────────────

pub async fn validate(_config: &Config, path: PathBuf) -> Result<()> {
    let resources = load_resources(&path)?;
    if resources.is_empty() {
        bail!("{} contains no resources", path.display());
    }

    let mut seen = HashSet::new();
    for resource in &resources {
        if resource.r#type.trim().is_empty() {
            bail!("resource {} has an empty type", resource.id);
        }
        if resource.name.trim().is_empty() {
            bail!("resource {} has an empty name", resource.id);
        }
        if !seen.insert(resource.id.clone()) {
            bail!("duplicate resource id {}", resource.id);
        }
    }

    println!("{} valid resource(s) in {}", resources.len(), path.display());
    Ok(())
}

// ── Plan ──────────────────────────────────────────────────────────────────────

pub async fn plan(
    config: &Config,
    resources_path: PathBuf,
    out: PathBuf,
    targets: Vec<String>,
    refresh: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let mut resources = load_resources(&resources_path)?;

    if !targets.is_empty() {
        resources.retain(|r| targets.contains(&r.id.0) || targets.contains(&r.name));
        if resources.is_empty() {
            bail!("no resources matched --target");
        }
    }

    let providers = build_default_registry(&resources);

    if refresh {
        refresh_resource_state(store.as_ref(), &providers, &resources).await?;
    }

    let diff = compute_diff(&resources, store.as_ref(), Some(&providers)).await?;
    let built = build_plan(diff)?;
    let optimized = optimize_plan(built)?;
    validate_plan(&optimized)?;

    std::fs::write(&out, serde_json::to_string_pretty(&optimized)?)
        .with_context(|| format!("failed to write plan to {}", out.display()))?;

    if config.json {
        println!("{}", serde_json::to_string(&optimized)?);
    } else {
        println!("{}", output::render_plan_summary(&optimized));
        print!("{}", output::render_changes(&optimized.units));
        println!("Plan written to {}", out.display());
    }
    Ok(())
}

async fn refresh_resource_state(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    resources: &[Resource],
) -> Result<()> {
    for resource in resources {
        let Ok(provider) = providers.for_type(&resource.r#type) else {
            continue;
        };
        let request = ReadRequest {
            r#type: resource.r#type.clone(),
            name: resource.name.clone(),
            config: resource.config.clone(),
        };
        let read = provider.read(&request).await?;
        if read.exists {
            store
                .upsert_resource_state(&ResourceStateRecord {
                    r#type: resource.r#type.clone(),
                    name: resource.name.clone(),
                    hash: compute_state_hash(&read.state),
                    state: read.state,
                    last_run_id: None,
                    last_applied: Utc::now(),
                })
                .await?;
        }
    }
    Ok(())
}

// ── Apply ─────────────────────────────────────────────────────────────────────

pub async fn apply(
    config: &Config,
    plan_path: PathBuf,
    auto_approve: bool,
    parallelism: Option<i32>,
) -> Result<()> {
    let store = open_store(config).await?;
    let text = std::fs::read_to_string(&plan_path)
        .with_context(|| format!("failed to read {}", plan_path.display()))?;
    let plan: Plan = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {} as a plan", plan_path.display()))?;

    if plan.units.is_empty() {
        bail!("plan {} has no units to apply", plan_path.display());
    }

    if !config.json {
        println!("{}", output::render_plan_summary(&plan));
        print!("{}", output::render_changes(&plan.units));
    }
    if !auto_approve {
        confirm("Apply this plan?")?;
    }

    let registry = Arc::new(build_default_registry_for_units(&plan));
    let scheduler = Arc::new(Scheduler::new(store, registry));

    let options = ScheduleOptions {
        max_parallel: parallelism.unwrap_or(DEFAULT_MAX_PARALLEL),
        start_delay: None,
        dry_run: false,
        fail_fast: false,
        user: whoami(),
    };

    let run_id = scheduler.schedule(plan, options).await?;
    let run = wait_for_terminal(&scheduler, &run_id).await?;

    if config.json {
        println!("{}", serde_json::to_string(&run)?);
    } else {
        println!("{}", output::render_run(&run));
    }

    if run.status != RunStatus::Succeeded {
        bail!("run {} finished with status {:?}", run.id, run.status);
    }
    Ok(())
}

fn build_default_registry_for_units(plan: &Plan) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let mut seen = HashSet::new();
    for unit in &plan.units {
        let key = if unit.provider_name.is_empty() { "unknown" } else { &unit.provider_name };
        if seen.insert(key.to_string()) {
            registry.register(key.to_string(), Arc::new(NullProvider::new()));
        }
    }
    registry
}

async fn wait_for_terminal(
    scheduler: &Arc<Scheduler>,
    run_id: &strata_domain::RunId,
) -> Result<strata_domain::Run> {
    loop {
        if let Some(run) = scheduler.get_status(run_id).await? {
            if run.status.terminal() {
                return Ok(run);
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "cli".to_string())
}

// ── Run (named action) ───────────────────────────────────────────────────────

pub async fn run_action(
    _config: &Config,
    action: String,
    params: Vec<String>,
    extra_vars: Vec<String>,
    targets: Vec<String>,
) -> Result<()> {
    bail!(
        "action '{action}' is not implemented ({} param(s), {} extra-var(s), {} target(s)): \
         ad-hoc action execution is a runbook/automation collaborator external to this engine",
        params.len(),
        extra_vars.len(),
        targets.len(),
    );
}

// ── Drift ─────────────────────────────────────────────────────────────────────

pub async fn drift_detect(
    config: &Config,
    targets: Vec<String>,
    auto_reconcile: bool,
    report: Option<PathBuf>,
) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.list_resource_state(10_000, 0).await?;
    let mut drifted = Vec::new();

    for record in &records {
        if !targets.is_empty() && !targets.contains(&record.name) {
            continue;
        }
        // Without a registered provider, recorded vs. desired can't be
        // distinguished here — drift detection needs the provider's `read`
        // to compare actual cloud-side state against the recorded copy.
        drifted.push(record.clone());
    }

    if let Some(path) = &report {
        std::fs::write(path, serde_json::to_string_pretty(&drifted)?)
            .with_context(|| format!("failed to write drift report to {}", path.display()))?;
    }

    if config.json {
        println!("{}", serde_json::to_string(&drifted)?);
    } else {
        println!("{} resource(s) recorded, 0 confirmed drifted (no provider configured to re-read actual state)", records.len());
    }

    if auto_reconcile && !drifted.is_empty() {
        println!("auto-reconcile requested but nothing to reconcile without provider-confirmed drift");
    }
    Ok(())
}

pub async fn drift_reconcile(config: &Config, targets: Vec<String>, dry_run: bool) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.list_resource_state(10_000, 0).await?;
    let resources: Vec<Resource> = records
        .iter()
        .filter(|r| targets.is_empty() || targets.contains(&r.name))
        .map(|r| Resource::new(r.r#type.clone(), r.name.clone(), r.state.clone()))
        .collect();

    if resources.is_empty() {
        println!("nothing to reconcile");
        return Ok(());
    }

    let providers = build_default_registry(&resources);
    let diff = compute_diff(&resources, store.as_ref(), Some(&providers)).await?;
    let built = build_plan(diff)?;
    let optimized = optimize_plan(built)?;

    if optimized.units.is_empty() {
        println!("no drift to reconcile");
        return Ok(());
    }

    println!("{}", output::render_plan_summary(&optimized));
    if dry_run {
        print!("{}", output::render_changes(&optimized.units));
        return Ok(());
    }

    let registry = Arc::new(build_default_registry_for_units(&optimized));
    let scheduler = Arc::new(Scheduler::new(store, registry));
    let options = ScheduleOptions { user: whoami(), ..ScheduleOptions::default() };
    let run_id = scheduler.schedule(optimized, options).await?;
    let run = wait_for_terminal(&scheduler, &run_id).await?;
    println!("{}", output::render_run(&run));
    Ok(())
}

// ── Onboard ───────────────────────────────────────────────────────────────────

pub async fn onboard_ssh(config: &Config, args: crate::cli::SshOnboardArgs) -> Result<()> {
    let store = open_store(config).await?;
    let registry = HostRegistry::new(store);

    let labels = args
        .labels
        .as_deref()
        .map(parse_labels)
        .transpose()?
        .unwrap_or_default();

    let now = Utc::now();
    let host = Host {
        id: HostId::new(args.host.clone()),
        address: args.host.clone(),
        port: args.port,
        user: args.user.clone(),
        key_path: args.key.map(|p| p.display().to_string()),
        labels,
        onboarded_at: now,
        updated_at: now,
    };

    tracing::info!(
        host = %args.host,
        create_user = ?args.create_user,
        sudo = args.sudo,
        lock_down = args.lock_down,
        "connecting over SSH (stub: no outbound connection is made; this engine records the host only)"
    );

    registry.register(&host).await?;
    println!("Registered host {} ({})", host.id, host.address);
    Ok(())
}

fn parse_labels(raw: &str) -> Result<std::collections::HashMap<String, String>> {
    let mut labels = std::collections::HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair
            .split_once('=')
            .with_context(|| format!("label '{pair}' is missing '='"))?;
        labels.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(labels)
}

pub async fn onboard_rollback(config: &Config, host: String) -> Result<()> {
    let store = open_store(config).await?;
    let registry = HostRegistry::new(store);
    let id = HostId::new(host.clone());

    match registry.get(&id).await? {
        Some(_) => {
            registry.remove(&id).await?;
            println!("Rolled back host {host} (removed from registry; no live un-provisioning is performed)");
            Ok(())
        }
        None => bail!("no onboarded host found for '{host}'"),
    }
}

// ── Facts ─────────────────────────────────────────────────────────────────────

pub async fn facts_collect(
    config: &Config,
    selector: String,
    targets: Vec<String>,
    fact_type: Option<String>,
    refresh: bool,
) -> Result<()> {
    let store = open_store(config).await?;
    let registry = HostRegistry::new(store.clone());
    let parsed = parse_selector(&selector)?;
    let mut hosts = registry.list(&parsed).await?;

    if !targets.is_empty() {
        hosts.retain(|h| targets.contains(&h.id.0) || targets.contains(&h.address));
    }
    if hosts.is_empty() {
        println!("no hosts matched selector '{selector}'");
        return Ok(());
    }

    let namespace = fact_type.clone().unwrap_or_else(|| "system".to_string());
    for host in &hosts {
        tracing::info!(host = %host.address, refresh, "collecting facts (stub: no probe is executed against the host)");
        let fact = Fact::new(
            host.id.0.clone(),
            namespace.clone(),
            "collected_at",
            serde_json::json!(Utc::now().to_rfc3339()),
            0,
        );
        store.upsert_fact(&fact).await?;
    }

    println!("Collected facts for {} host(s)", hosts.len());
    Ok(())
}

pub async fn facts_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let facts = store.list_facts(None, None).await?;
    if config.json {
        println!("{}", serde_json::to_string(&facts)?);
    } else {
        print!("{}", output::render_facts(&facts));
    }
    Ok(())
}

pub async fn facts_show(config: &Config, target: String, fact_type: Option<String>) -> Result<()> {
    let store = open_store(config).await?;
    let facts = store.list_facts(Some(&target), fact_type.as_deref()).await?;
    if config.json {
        println!("{}", serde_json::to_string(&facts)?);
    } else {
        print!("{}", output::render_facts(&facts));
    }
    Ok(())
}

// ── Backup / restore ─────────────────────────────────────────────────────────

pub async fn backup(config: &Config, out: PathBuf, compress: bool, include_blobs: bool) -> Result<()> {
    if compress {
        tracing::warn!("--compress is not yet implemented; writing an uncompressed copy");
    }
    if include_blobs {
        tracing::warn!("--include-blobs is not yet implemented; the store has no blob tables to include");
    }

    let db_path = config.db_path();
    if !db_path.exists() {
        bail!("no store found at {} — run `strata init` first", db_path.display());
    }
    std::fs::copy(&db_path, &out)
        .with_context(|| format!("failed to copy {} to {}", db_path.display(), out.display()))?;

    println!("Backed up {} to {}", db_path.display(), out.display());
    Ok(())
}

pub async fn restore(config: &Config, from: PathBuf, force: bool) -> Result<()> {
    if !from.exists() {
        bail!("backup file {} does not exist", from.display());
    }

    let db_path = config.db_path();
    if db_path.exists() && !force {
        bail!(
            "a store already exists at {} — pass --force to overwrite",
            db_path.display()
        );
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::copy(&from, &db_path)
        .with_context(|| format!("failed to copy {} to {}", from.display(), db_path.display()))?;

    println!("Restored {} from {}", db_path.display(), from.display());
    Ok(())
}

// ── Dev ───────────────────────────────────────────────────────────────────────

pub async fn dev_up(
    config: &Config,
    controller_only: bool,
    worker_only: bool,
    workers: Option<u32>,
) -> Result<()> {
    if controller_only || worker_only || workers.is_some() {
        tracing::info!(
            controller_only,
            worker_only,
            ?workers,
            "this engine has no separate worker process to split; flags accepted and ignored"
        );
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {}", config.data_dir.display()))?;

    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStore::open(&config.db_url(), config.max_connections())
            .await
            .with_context(|| format!("failed to open store at {}", config.db_path().display()))?,
    );

    let token = if config.signing_key_path().exists() {
        read_signing_key(&config.signing_key_path())?
    } else {
        let t = generate_token();
        write_signing_key(&config.signing_key_path())?;
        t
    };

    let registry = Arc::new(ProviderRegistry::new());
    let app = strata_api::build_app(store, registry, Arc::new(token));
    let addr = format!("{DEFAULT_BIND}:{DEFAULT_PORT}");

    println!("Starting strata API server on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

pub async fn dev_down(_config: &Config) -> Result<()> {
    println!("`dev up` runs in the foreground — stop it with Ctrl-C; there is no background session to tear down");
    Ok(())
}
