//! Command-line interface for the Till extension runtime.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use till_core::config::{env_vars, HostConfig};
use till_core::extension::{
    archive, scaffold, ExtensionManifest, ExtensionRegistry, Installer, LifecycleState, Loader,
    StateManager,
};
use till_store::StoreBackend;

/// Till point-of-service host - extension runtime tooling.
#[derive(Parser, Debug)]
#[command(name = "till")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Extensions root directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Path of the shared store.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Scaffold a new extension (created inactive).
    Create {
        /// Extension id (lowercase, hyphens/underscores).
        #[arg(required = true)]
        id: String,
        /// Author recorded in the manifest.
        #[arg(short, long)]
        author: Option<String>,
    },
    /// List extensions and their lifecycle state.
    List,
    /// Reconcile filesystem state into the store.
    Sync,
    /// Package an extension directory into an installable archive.
    Package {
        /// Extension id.
        #[arg(required = true)]
        id: String,
        /// Output directory for the archive.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Validate an extension on disk without installing it.
    Validate {
        /// Extension id.
        #[arg(required = true)]
        id: String,
    },
    /// Install an extension archive.
    Install {
        /// Path to the archive.
        #[arg(required = true)]
        archive: PathBuf,
    },
    /// Activate an installed extension (takes effect after restart).
    Activate {
        /// Extension id.
        #[arg(required = true)]
        id: String,
    },
    /// Deactivate an extension (takes effect after restart).
    Deactivate {
        /// Extension id.
        #[arg(required = true)]
        id: String,
    },
    /// Uninstall an extension. Data tables are preserved.
    Uninstall {
        /// Extension id.
        #[arg(required = true)]
        id: String,
    },
    /// Drop the data tables an uninstalled extension left behind.
    Purge {
        /// Extension id.
        #[arg(required = true)]
        id: String,
        /// Confirm the irreversible data removal.
        #[arg(long)]
        yes: bool,
    },
    /// Show manifest details of an extension on disk.
    Info {
        /// Extension id.
        #[arg(required = true)]
        id: String,
    },
    /// Run the startup load once and report what would register.
    Load,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = HostConfig::resolve(args.root.clone(), args.store.clone());
    if let Err(err) = run(args, config).await {
        eprintln!("error: {}", err);
        std::process::exit(err.exit_code());
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "till=debug" } else { "till=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // JSON logging for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

async fn run(args: Args, config: HostConfig) -> till_core::Result<()> {
    match args.command {
        Command::Create { id, author } => cmd_create(&config, &id, author),
        Command::List => cmd_list(&config),
        Command::Sync => cmd_sync(&config),
        Command::Package { id, output } => cmd_package(&config, &id, &output),
        Command::Validate { id } => cmd_validate(&config, &id),
        Command::Install { archive } => cmd_install(&config, &archive),
        Command::Activate { id } => cmd_activate(&config, &id, true),
        Command::Deactivate { id } => cmd_activate(&config, &id, false),
        Command::Uninstall { id } => cmd_uninstall(&config, &id),
        Command::Purge { id, yes } => cmd_purge(&config, &id, yes),
        Command::Info { id } => cmd_info(&config, &id).await,
        Command::Load => cmd_load(&config).await,
    }
}

fn open_backend(config: &HostConfig) -> till_core::Result<StoreBackend> {
    Ok(StoreBackend::open(&config.store_path)?)
}

fn cmd_create(config: &HostConfig, id: &str, author: Option<String>) -> till_core::Result<()> {
    let author = author
        .or_else(|| std::env::var(env_vars::AUTHOR).ok())
        .unwrap_or_else(|| "Unknown".to_string());
    std::fs::create_dir_all(&config.extensions_root)?;
    let dir = scaffold::create(&config.extensions_root, id, &author)?;

    println!("Created extension skeleton: {}", dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {}/manifest.json", dir.display());
    println!("  2. till validate {}", id);
    println!("  3. till package {}", id);
    Ok(())
}

fn cmd_list(config: &HostConfig) -> till_core::Result<()> {
    let state = StateManager::new(&config.extensions_root);
    let backend = open_backend(config)?;

    println!("Extensions in {}", config.extensions_root.display());
    println!();

    let mut shown = 0;
    for entry in state.scan()? {
        if entry.state == LifecycleState::Hidden {
            continue;
        }
        let (name, version) = match ExtensionManifest::load(&entry.path) {
            Ok(manifest) => (manifest.name, manifest.version.to_string()),
            Err(_) => ("?".to_string(), "?".to_string()),
        };
        println!(
            "  {:<20} {:<24} {:<10} {}",
            entry.extension_id, name, version, entry.state
        );
        shown += 1;
    }
    if shown == 0 {
        println!("  No extensions found.");
    }

    let stats = backend.extensions().stats()?;
    println!();
    println!(
        "Total: {} registered, {} active, {} installed",
        stats.total_extensions, stats.active_count, stats.installed_count
    );
    Ok(())
}

fn cmd_sync(config: &HostConfig) -> till_core::Result<()> {
    use till_core::extension::backend::ExtensionCatalog;

    let state = StateManager::new(&config.extensions_root);
    let backend = open_backend(config)?;
    let catalog: &dyn ExtensionCatalog = &backend;

    let mut seen = Vec::new();
    let mut added = 0;
    let mut reconciled = 0;

    for entry in state.scan()? {
        if entry.state == LifecycleState::Hidden {
            continue;
        }
        let manifest = match ExtensionManifest::load(&entry.path) {
            Ok(manifest) => manifest,
            Err(err) => {
                eprintln!("  skipping {}: {}", entry.extension_id, err);
                continue;
            }
        };
        let active = entry.state == LifecycleState::Active;
        seen.push(entry.extension_id.clone());
        match catalog.get(&entry.extension_id)? {
            Some(record) => {
                if record.is_active != active {
                    catalog.set_active(&entry.extension_id, active)?;
                    reconciled += 1;
                }
            }
            None => {
                catalog.record_installed(&manifest, &entry.path, active)?;
                added += 1;
            }
        }
    }

    // Records whose directory vanished are uninstalled in all but name.
    let mut removed = 0;
    for record in catalog.entries()? {
        if !seen.contains(&record.extension_id) {
            catalog.record_removed(&record.extension_id)?;
            removed += 1;
        }
    }

    println!(
        "Sync complete: {} added, {} reconciled, {} removed",
        added, reconciled, removed
    );
    Ok(())
}

fn cmd_package(config: &HostConfig, id: &str, output: &PathBuf) -> till_core::Result<()> {
    let state = StateManager::new(&config.extensions_root);
    let (dir, _) = state
        .dir_of(id)
        .ok_or_else(|| till_core::Error::State(format!("extension {} not found on disk", id)))?;
    let manifest = ExtensionManifest::load(&dir)?;

    std::fs::create_dir_all(output)?;
    let archive_path = output.join(format!("{}-{}.zip", manifest.id, manifest.version));
    let checksum = archive::pack(&dir, &archive_path)?;

    println!("Packaged: {}", archive_path.display());
    println!("Checksum: {}", checksum);
    Ok(())
}

fn cmd_validate(config: &HostConfig, id: &str) -> till_core::Result<()> {
    let backend = open_backend(config)?;
    let installer = Installer::new(&config.extensions_root, &backend, &backend);

    let (manifest, report) = installer.validate_only(id)?;

    println!("Validation: PASSED");
    println!();
    println!("ID:          {}", manifest.id);
    println!("Name:        {}", manifest.name);
    println!("Version:     {}", manifest.version);
    println!("Namespace:   {}", manifest.namespace());
    print_warnings(&report.warnings);
    Ok(())
}

fn cmd_install(config: &HostConfig, archive_path: &PathBuf) -> till_core::Result<()> {
    if !archive_path.exists() {
        return Err(till_core::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("archive not found: {}", archive_path.display()),
        )));
    }
    let backend = open_backend(config)?;
    let installer = Installer::new(&config.extensions_root, &backend, &backend);

    let outcome = installer.install(archive_path)?;

    println!("Installed: {} {}", outcome.extension_id, outcome.version);
    println!("Location:  {}", outcome.install_path.display());
    if !outcome.created_tables.is_empty() {
        println!("Tables:    {}", outcome.created_tables.join(", "));
    }
    if outcome.locales_compiled > 0 {
        println!("Locales:   {} compiled", outcome.locales_compiled);
    }
    print_warnings(&outcome.security_warnings);
    for undeclared in &outcome.undeclared_tables {
        println!(
            "Warning: table {} referenced in {} but not declared in the manifest",
            undeclared.table,
            undeclared.file.display()
        );
    }
    println!();
    println!(
        "The extension is inactive. Run `till activate {}` and restart the host to load it.",
        outcome.extension_id
    );
    Ok(())
}

fn cmd_activate(config: &HostConfig, id: &str, activate: bool) -> till_core::Result<()> {
    use till_core::extension::backend::ExtensionCatalog;

    let state = StateManager::new(&config.extensions_root);
    let transition = if activate {
        state.activate(id)?
    } else {
        state.deactivate(id)?
    };

    // The stored flag is a cache of the directory name; keep it in step.
    let backend = open_backend(config)?;
    let catalog: &dyn ExtensionCatalog = &backend;
    if catalog.get(id)?.is_some() {
        catalog.set_active(id, activate)?;
    }

    println!(
        "Extension {} is now {} on disk.",
        transition.extension_id, transition.to
    );
    if transition.restart_required {
        println!("Restart required: the running host is unchanged until restarted.");
    }
    Ok(())
}

fn cmd_uninstall(config: &HostConfig, id: &str) -> till_core::Result<()> {
    let backend = open_backend(config)?;
    let installer = Installer::new(&config.extensions_root, &backend, &backend);

    let outcome = installer.uninstall(id)?;
    println!("Uninstalled: {}", outcome.extension_id);
    if !outcome.preserved_tables.is_empty() {
        println!(
            "Warning: data tables preserved: {}. Run `till purge {} --yes` to drop them.",
            outcome.preserved_tables.join(", "),
            outcome.extension_id
        );
    }
    Ok(())
}

fn cmd_purge(config: &HostConfig, id: &str, yes: bool) -> till_core::Result<()> {
    if !yes {
        return Err(till_core::Error::Validation(format!(
            "purge permanently drops {}'s data tables; re-run with --yes to confirm",
            id
        )));
    }
    let backend = open_backend(config)?;
    let installer = Installer::new(&config.extensions_root, &backend, &backend);

    let dropped = installer.purge(id)?;
    if dropped.is_empty() {
        println!("No data tables found for {}.", id);
    } else {
        println!("Dropped: {}", dropped.join(", "));
    }
    Ok(())
}

async fn cmd_info(config: &HostConfig, id: &str) -> till_core::Result<()> {
    use till_core::extension::backend::ExtensionCatalog;
    use till_core::extension::entitlement::HttpEntitlementClient;
    use till_core::extension::{PricingKind, SubscriptionChecker};

    let state = StateManager::new(&config.extensions_root);
    let (dir, lifecycle) = state
        .dir_of(id)
        .ok_or_else(|| till_core::Error::State(format!("extension {} not found on disk", id)))?;
    let manifest = ExtensionManifest::load(&dir)?;

    println!("Extension Information");
    println!("======================");
    println!();
    println!("ID:          {}", manifest.id);
    println!("Name:        {}", manifest.name);
    println!("Version:     {}", manifest.version);
    println!("Author:      {}", manifest.author);
    println!("Pricing:     {}", manifest.pricing);
    println!("State:       {}", lifecycle);
    println!("Namespace:   {}", manifest.namespace());
    if let Some(description) = &manifest.description {
        println!("Description: {}", description);
    }
    if let Some(req) = &manifest.min_host_version {
        println!("Requires:    host {}", req);
    }
    if !manifest.dependencies.is_empty() {
        println!();
        println!("Dependencies:");
        for dep in &manifest.dependencies {
            println!("  {} {}", dep.package, dep.version);
        }
    }
    if !manifest.permissions.is_empty() {
        println!();
        println!("Permissions:");
        for perm in &manifest.permissions {
            println!("  {:<28} {}", manifest.codename(&perm.action), perm.name);
        }
    }
    if !manifest.schema.tables.is_empty() {
        println!();
        println!("Tables: {}", manifest.schema.tables.join(", "));
    }

    let backend = open_backend(config)?;
    let catalog: &dyn ExtensionCatalog = &backend;
    if let Some(record) = catalog.get(id)? {
        println!();
        println!(
            "Installed: yes (store flag: {})",
            if record.is_active { "active" } else { "inactive" }
        );
    } else {
        println!();
        println!("Installed: no (directory only; run `till sync`)");
    }

    if manifest.pricing != PricingKind::Free {
        if let Some(endpoint) = &config.entitlement_endpoint {
            let client = HttpEntitlementClient::new(endpoint.clone())?;
            let checker = SubscriptionChecker::new(std::sync::Arc::new(client));
            let decision = checker.verify(&manifest.id, manifest.pricing).await;
            println!("Entitlement: {}", decision);
        } else {
            println!(
                "Entitlement: not checked (set {} to verify)",
                env_vars::ENTITLEMENT_ENDPOINT
            );
        }
    }
    Ok(())
}

async fn cmd_load(config: &HostConfig) -> till_core::Result<()> {
    let backend = open_backend(config)?;
    let loader = Loader::new(&config.extensions_root, &backend, &backend);
    let registry = ExtensionRegistry::new();

    let report = loader.load_all(&registry).await?;

    println!("Startup scan of {}", config.extensions_root.display());
    println!();
    for id in &report.loaded {
        println!("  loaded  {}", id);
    }
    for skipped in &report.skipped {
        println!("  skipped {} ({})", skipped.extension_id, skipped.reason);
    }
    if report.loaded.is_empty() && report.skipped.is_empty() {
        println!("  No active extensions.");
    }

    let menu = registry.menu().await;
    if !menu.is_empty() {
        println!();
        println!("Menu:");
        for entry in menu {
            println!("  {:>4}  {:<20} {}", entry.priority, entry.label, entry.route);
        }
    }
    Ok(())
}

fn print_warnings(warnings: &[till_core::extension::SecurityWarning]) {
    for warning in warnings {
        println!("Security warning: {}", warning);
    }
}
