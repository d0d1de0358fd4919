use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use waydroid_manager::cli::{Args, ConfigDiscovery, ContainerAction, ExecutionMode, ManagerConfig};
use waydroid_manager::container::{ContainerError, ContainerManager, HostAdapters};
use waydroid_manager::executor::{CommandExecutor, HostExecutor};
use waydroid_manager::ipc::{LifecycleService, RemoteService, ServiceScope, SocketServer};
use waydroid_manager::prop::{LxcProperties, PropertyCoordinator};
use waydroid_manager::session::{
    SessionEnvironment, SessionError, SessionId, SessionManager, request_stop,
};

/// Mode of the container service socket; any local user may call it,
/// ownership is checked per verb
const CONTAINER_SOCKET_MODE: u32 = 0o666;

/// Mode of the session service socket
const SESSION_SOCKET_MODE: u32 = 0o600;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_filter = if args.verbose {
        "waydroid_manager=debug"
    } else {
        "waydroid_manager=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if mode == ExecutionMode::ShowConfig {
        ConfigDiscovery::show_discovery_info();
        return Ok(());
    }

    let config =
        ConfigDiscovery::load(args.config.as_deref()).context("Failed to load configuration")?;

    match mode {
        ExecutionMode::ContainerService => run_container_service(config).await,
        ExecutionMode::SessionService { background_start } => {
            run_session_service(config, background_start).await
        }
        ExecutionMode::SessionStop { session_id } => stop_session(&config, session_id).await,
        ExecutionMode::Container(action) => run_container_action(&config, action).await,
        ExecutionMode::PropGet { session_id, key } => {
            if let Some(value) = property_coordinator(&config).get(session_id, &key).await? {
                println!("{}", value);
            }
            Ok(())
        }
        ExecutionMode::PropSet {
            session_id,
            key,
            value,
        } => {
            property_coordinator(&config)
                .set(session_id, &key, &value)
                .await?;
            Ok(())
        }
        ExecutionMode::ShowConfig => Ok(()),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn container_client(config: &ManagerConfig) -> RemoteService {
    RemoteService::new(&config.container_socket, ServiceScope::System)
}

async fn run_container_service(config: ManagerConfig) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("The container service must run as root");
    }

    let server = match SocketServer::bind(&config.container_socket, CONTAINER_SOCKET_MODE).await {
        Ok(server) => server,
        Err(ContainerError::AlreadyRunning(_)) => {
            error!("Container service is already running");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let executor: Arc<dyn CommandExecutor> = Arc::new(HostExecutor::new());
    let adapters = HostAdapters::from_config(&config, executor);
    let manager = Arc::new(ContainerManager::new(config, adapters));
    info!("Container service started");

    server.serve(manager.clone(), termination_signal()).await?;
    info!("Caught termination signal");
    manager.shutdown(true).await;
    Ok(())
}

async fn run_session_service(config: ManagerConfig, background_start: bool) -> Result<()> {
    let environment = SessionEnvironment::from_process();
    let runtime_dir = environment
        .runtime_dir
        .clone()
        .ok_or(SessionError::MissingRuntimeDir)?;

    let socket = config.session_socket(&runtime_dir);
    let server = match SocketServer::bind(socket, SESSION_SOCKET_MODE).await {
        Ok(server) => server,
        Err(ContainerError::AlreadyRunning(_)) => {
            error!("Session is already running");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let container: Arc<dyn LifecycleService> = Arc::new(container_client(&config));
    let manager = Arc::new(
        SessionManager::new(config, container, environment, Arc::new(HostExecutor::new()))
            .with_background_start(background_start),
    );

    if let Err(e) = manager.start_all().await {
        error!("{}", e);
        return Err(e.into());
    }

    manager.serve(server, termination_signal()).await?;
    Ok(())
}

async fn stop_session(config: &ManagerConfig, session_id: SessionId) -> Result<()> {
    let container = container_client(config);

    match SessionEnvironment::from_process().runtime_dir {
        Some(runtime_dir) => {
            let session = RemoteService::new(config.session_socket(&runtime_dir), ServiceScope::User);
            request_stop(&session, &container, session_id).await?;
        }
        None => container.stop(session_id, true).await?,
    }
    Ok(())
}

async fn run_container_action(config: &ManagerConfig, action: ContainerAction) -> Result<()> {
    let container = container_client(config);

    match action {
        ContainerAction::Status { session_id } => {
            let fields = container.get_session(session_id).await?;
            println!("{}", serde_json::to_string_pretty(&fields)?);
        }
        ContainerAction::Stop {
            session_id,
            quit_session,
        } => container.stop(session_id, quit_session).await?,
        ContainerAction::StopAll { quit_session } => container.stop_all(quit_session).await?,
        ContainerAction::Freeze { session_id } => container.freeze(session_id).await?,
        ContainerAction::Unfreeze { session_id } => container.unfreeze(session_id).await?,
        ContainerAction::Restart { session_id } => container.restart(session_id).await?,
    }
    Ok(())
}

fn property_coordinator(config: &ManagerConfig) -> PropertyCoordinator {
    let properties = LxcProperties::new(
        Arc::new(HostExecutor::new()),
        &config.work_dir,
        &config.container_name,
    );
    let coordinator = PropertyCoordinator::new(Arc::new(container_client(config)), Arc::new(properties));

    match SessionEnvironment::from_process().runtime_dir {
        Some(runtime_dir) => coordinator.with_session_service(Arc::new(RemoteService::new(
            config.session_socket(&runtime_dir),
            ServiceScope::User,
        ))),
        None => coordinator,
    }
}
