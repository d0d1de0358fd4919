//! Host-side adapters driven during bring-up and teardown.
//!
//! Each concern the Container Manager touches on the host sits behind its
//! own trait so tests can substitute in-memory fakes. The command-backed
//! implementations here shell out through [`CommandExecutor`].

use super::runtime::{LxcRuntime, RuntimeAdapter};
use super::{ContainerError, Result};
use crate::cli::ManagerConfig;
use crate::env;
use crate::executor::{CommandExecutor, ExecutionCommand};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Kernel driver probing and binder node setup.
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    async fn probe_binder(&self) -> Result<()>;
    async fn probe_ashmem(&self) -> Result<()>;
    /// Make sure the binder nodes exist under binderfs.
    async fn load_binder_nodes(&self) -> Result<()>;
    /// Host paths of the binder nodes handed to the container.
    fn binder_nodes(&self) -> Vec<PathBuf>;
}

/// Recursive mode changes over host device paths.
#[async_trait]
pub trait PermissionAdapter: Send + Sync {
    /// Apply `mode` to every existing path. Missing paths are skipped.
    async fn set_mode(&self, paths: &[PathBuf], mode: u32) -> Result<()>;
    /// Hardware nodes the container needs opened up on this host.
    async fn hardware_nodes(&self) -> Vec<PathBuf>;
}

/// Session-scoped network namespace setup.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn start(&self, session_id: SessionId) -> Result<()>;
    async fn stop(&self, session_id: SessionId) -> Result<()>;
}

/// Rootfs image and legacy data mounts.
#[async_trait]
pub trait FilesystemAdapter: Send + Sync {
    async fn mount_rootfs(&self, session_id: SessionId, images_path: &Path, session: &Session) -> Result<()>;
    async fn umount_rootfs(&self, session_id: SessionId) -> Result<()>;
    async fn bind_legacy_data(&self, session_id: SessionId, data_dir: &Path) -> Result<()>;
    async fn unbind_legacy_data(&self, session_id: SessionId) -> Result<()>;
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Record the binder IPC protocol versions the container should use.
    async fn set_default_version(&self, session_id: SessionId) -> Result<()>;
}

#[async_trait]
pub trait HardwareAdapter: Send + Sync {
    async fn stop(&self, session_id: SessionId) -> Result<()>;
}

/// Notifies a session's owning client that its session ended.
pub trait OwnerSignal: Send + Sync {
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Drivers loaded with `modprobe`, binderfs mounted with `mount`.
pub struct KernelDrivers {
    executor: Arc<dyn CommandExecutor>,
    binderfs_path: PathBuf,
    node_names: Vec<String>,
}

impl KernelDrivers {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: &ManagerConfig) -> Self {
        Self {
            executor,
            binderfs_path: config.binder.binderfs_path.clone(),
            node_names: vec![
                config.binder.binder_driver.clone(),
                config.binder.vndbinder_driver.clone(),
                config.binder.hwbinder_driver.clone(),
            ],
        }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<()> {
        let command = ExecutionCommand::new(program, args);
        self.executor.execute(command.clone()).await?.check(&command)?;
        Ok(())
    }
}

#[async_trait]
impl DriverAdapter for KernelDrivers {
    async fn probe_binder(&self) -> Result<()> {
        let devices = format!("devices={}", self.node_names.join(","));
        self.run("modprobe", vec!["binder_linux".to_string(), devices])
            .await
    }

    async fn probe_ashmem(&self) -> Result<()> {
        self.run("modprobe", vec!["-q".to_string(), "ashmem_linux".to_string()])
            .await
    }

    async fn load_binder_nodes(&self) -> Result<()> {
        let binderfs = self.binderfs_path.to_string_lossy().into_owned();

        let probe = ExecutionCommand::new("mountpoint", vec!["-q".to_string(), binderfs.clone()]);
        if !self.executor.execute(probe).await?.success() {
            tokio::fs::create_dir_all(&self.binderfs_path).await?;
            self.run(
                "mount",
                vec![
                    "-t".to_string(),
                    "binder".to_string(),
                    "binder".to_string(),
                    binderfs,
                ],
            )
            .await?;
            info!("Mounted binderfs at {:?}", self.binderfs_path);
        }

        for node in self.binder_nodes() {
            if !tokio::fs::try_exists(&node).await? {
                return Err(ContainerError::Runtime(format!(
                    "binder node {} is missing",
                    node.display()
                )));
            }
        }
        Ok(())
    }

    fn binder_nodes(&self) -> Vec<PathBuf> {
        self.node_names
            .iter()
            .map(|name| self.binderfs_path.join(name))
            .collect()
    }
}

/// Mode changes through `chmod -R`.
pub struct ChmodPermissions {
    executor: Arc<dyn CommandExecutor>,
    dev_dir: PathBuf,
}

impl ChmodPermissions {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            dev_dir: PathBuf::from("/dev"),
        }
    }
}

#[async_trait]
impl PermissionAdapter for ChmodPermissions {
    async fn set_mode(&self, paths: &[PathBuf], mode: u32) -> Result<()> {
        for path in paths {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                continue;
            }

            let command = ExecutionCommand::new(
                "chmod",
                vec![
                    format!("{:o}", mode),
                    "-R".to_string(),
                    path.to_string_lossy().into_owned(),
                ],
            );
            let result = self.executor.execute(command).await?;
            if !result.success() {
                // Some nodes refuse mode changes (sysfs); the rest still apply
                warn!(
                    "chmod {:o} on {} exited with {}: {}",
                    mode,
                    path.display(),
                    result.exit_code,
                    result.stderr.trim()
                );
            }
        }
        Ok(())
    }

    async fn hardware_nodes(&self) -> Vec<PathBuf> {
        let mut nodes: Vec<PathBuf> = env::devices::HARDWARE_NODES
            .iter()
            .map(PathBuf::from)
            .collect();

        match tokio::fs::read_dir(&self.dev_dir).await {
            Ok(mut entries) => {
                let mut matched = Vec::new();
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if env::devices::HARDWARE_NODE_PREFIXES
                        .iter()
                        .any(|prefix| name.starts_with(prefix))
                    {
                        matched.push(entry.path());
                    }
                }
                matched.sort();
                nodes.extend(matched);
            }
            Err(e) => warn!("Cannot list {}: {}", self.dev_dir.display(), e),
        }

        nodes
    }
}

/// The network helper script, invoked as `<script> start|stop --sid <id>`.
pub struct NetworkScript {
    executor: Arc<dyn CommandExecutor>,
    script: PathBuf,
}

impl NetworkScript {
    pub fn new(executor: Arc<dyn CommandExecutor>, script: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            script: script.into(),
        }
    }

    async fn invoke(&self, mode: &str, session_id: SessionId) -> Result<()> {
        let command = ExecutionCommand::new(
            self.script.to_string_lossy(),
            vec![
                mode.to_string(),
                "--sid".to_string(),
                session_id.to_string(),
            ],
        );
        self.executor.execute(command.clone()).await?.check(&command)?;
        Ok(())
    }
}

#[async_trait]
impl NetworkAdapter for NetworkScript {
    async fn start(&self, session_id: SessionId) -> Result<()> {
        self.invoke("start", session_id).await
    }

    async fn stop(&self, session_id: SessionId) -> Result<()> {
        self.invoke("stop", session_id).await
    }
}

/// Loop-mounts the system and vendor images under each session's rootfs.
pub struct MountFilesystem {
    executor: Arc<dyn CommandExecutor>,
    work_dir: PathBuf,
}

impl MountFilesystem {
    pub fn new(executor: Arc<dyn CommandExecutor>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            work_dir: work_dir.into(),
        }
    }

    async fn mount(&self, args: Vec<String>) -> Result<()> {
        let command = ExecutionCommand::new("mount", args);
        self.executor.execute(command.clone()).await?.check(&command)?;
        Ok(())
    }

    async fn umount(&self, target: &Path) -> Result<()> {
        let command = ExecutionCommand::new(
            "umount",
            vec!["-l".to_string(), target.to_string_lossy().into_owned()],
        );
        self.executor.execute(command.clone()).await?.check(&command)?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl FilesystemAdapter for MountFilesystem {
    async fn mount_rootfs(&self, session_id: SessionId, images_path: &Path, session: &Session) -> Result<()> {
        let rootfs = env::session_rootfs_path(&self.work_dir, session_id);
        tokio::fs::create_dir_all(&rootfs).await?;

        self.mount(vec![
            "-o".to_string(),
            "ro,loop".to_string(),
            path_arg(&images_path.join("system.img")),
            path_arg(&rootfs),
        ])
        .await?;
        self.mount(vec![
            "-o".to_string(),
            "ro,loop".to_string(),
            path_arg(&images_path.join("vendor.img")),
            path_arg(&rootfs.join("vendor")),
        ])
        .await?;

        debug!(
            session_id,
            user = session.user_name.as_deref().unwrap_or("?"),
            "Mounted rootfs at {:?}",
            rootfs
        );
        Ok(())
    }

    async fn umount_rootfs(&self, session_id: SessionId) -> Result<()> {
        let rootfs = env::session_rootfs_path(&self.work_dir, session_id);
        self.umount(&rootfs.join("vendor")).await?;
        self.umount(&rootfs).await
    }

    async fn bind_legacy_data(&self, session_id: SessionId, data_dir: &Path) -> Result<()> {
        let target = env::session_data_path(&self.work_dir, session_id);
        tokio::fs::create_dir_all(&target).await?;
        self.mount(vec!["--bind".to_string(), path_arg(data_dir), path_arg(&target)])
            .await
    }

    async fn unbind_legacy_data(&self, session_id: SessionId) -> Result<()> {
        self.umount(&env::session_data_path(&self.work_dir, session_id))
            .await
    }
}

/// Writes the binder protocol versions into the session's base props.
pub struct BinderProtocol {
    work_dir: PathBuf,
    binder_protocol: String,
    service_manager_protocol: String,
}

const BINDER_PROTOCOL_KEY: &str = "waydroid.binder_protocol";
const SERVICE_MANAGER_PROTOCOL_KEY: &str = "waydroid.service_manager_protocol";

impl BinderProtocol {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            binder_protocol: config.binder.binder_protocol.clone(),
            service_manager_protocol: config.binder.service_manager_protocol.clone(),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for BinderProtocol {
    async fn set_default_version(&self, session_id: SessionId) -> Result<()> {
        let path = env::session_base_prop_file(&self.work_dir, session_id);
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut lines: Vec<String> = existing
            .lines()
            .filter(|line| {
                !line.starts_with(BINDER_PROTOCOL_KEY) && !line.starts_with(SERVICE_MANAGER_PROTOCOL_KEY)
            })
            .map(str::to_string)
            .collect();
        lines.push(format!("{}={}", BINDER_PROTOCOL_KEY, self.binder_protocol));
        lines.push(format!(
            "{}={}",
            SERVICE_MANAGER_PROTOCOL_KEY, self.service_manager_protocol
        ));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, lines.join("\n") + "\n").await?;
        Ok(())
    }
}

/// Hardware passthrough is run by the user's session; nothing to stop here.
pub struct NullHardware;

#[async_trait]
impl HardwareAdapter for NullHardware {
    async fn stop(&self, session_id: SessionId) -> Result<()> {
        debug!(session_id, "No hardware service to stop");
        Ok(())
    }
}

/// Sends SIGTERM to the owning client.
pub struct SigtermOwner;

impl OwnerSignal for SigtermOwner {
    fn terminate(&self, pid: u32) -> Result<()> {
        let pid = i32::try_from(pid)
            .map_err(|_| ContainerError::Runtime(format!("pid {} out of range", pid)))?;
        signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|e| ContainerError::Runtime(format!("failed to signal pid {}: {}", pid, e)))
    }
}

/// All adapters the Container Manager drives.
#[derive(Clone)]
pub struct HostAdapters {
    pub runtime: Arc<dyn RuntimeAdapter>,
    pub drivers: Arc<dyn DriverAdapter>,
    pub permissions: Arc<dyn PermissionAdapter>,
    pub network: Arc<dyn NetworkAdapter>,
    pub filesystem: Arc<dyn FilesystemAdapter>,
    pub protocol: Arc<dyn ProtocolAdapter>,
    pub hardware: Arc<dyn HardwareAdapter>,
    pub owner: Arc<dyn OwnerSignal>,
}

impl HostAdapters {
    /// Command-backed adapters for a real host.
    pub fn from_config(config: &ManagerConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        debug!("Host adapters use the {} executor", executor.executor_type());
        Self {
            runtime: Arc::new(
                LxcRuntime::new(executor.clone(), &config.work_dir)
                    .with_container_name(&config.container_name),
            ),
            drivers: Arc::new(KernelDrivers::new(executor.clone(), config)),
            permissions: Arc::new(ChmodPermissions::new(executor.clone())),
            network: Arc::new(NetworkScript::new(
                executor.clone(),
                env::network_script_path(&config.tools_dir),
            )),
            filesystem: Arc::new(MountFilesystem::new(executor, &config.work_dir)),
            protocol: Arc::new(BinderProtocol::new(config)),
            hardware: Arc::new(NullHardware),
            owner: Arc::new(SigtermOwner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::recording::RecordingExecutor;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_network_script_scopes_by_session() {
        let executor = Arc::new(RecordingExecutor::new());
        let network = NetworkScript::new(executor.clone(), "/usr/lib/waydroid/data/scripts/waydroid-net.sh");

        network.start(2).await.unwrap();
        network.stop(2).await.unwrap();

        assert_eq!(
            executor.commands(),
            vec![
                "/usr/lib/waydroid/data/scripts/waydroid-net.sh start --sid 2",
                "/usr/lib/waydroid/data/scripts/waydroid-net.sh stop --sid 2",
            ]
        );
    }

    #[tokio::test]
    async fn test_chmod_skips_missing_and_tolerates_failures() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("binder");
        std::fs::write(&present, "").unwrap();

        let executor = Arc::new(RecordingExecutor::new());
        executor.respond("chmod", 1, "");
        let permissions = ChmodPermissions::new(executor.clone());

        permissions
            .set_mode(&[present.clone(), temp.path().join("absent")], 0o666)
            .await
            .unwrap();

        assert_eq!(
            executor.commands(),
            vec![format!("chmod 666 -R {}", present.display())]
        );
    }

    #[tokio::test]
    async fn test_binder_nodes_follow_config() {
        let drivers = KernelDrivers::new(Arc::new(RecordingExecutor::new()), &ManagerConfig::default());
        assert_eq!(
            drivers.binder_nodes(),
            vec![
                PathBuf::from("/dev/binderfs/anbox-binder"),
                PathBuf::from("/dev/binderfs/anbox-vndbinder"),
                PathBuf::from("/dev/binderfs/anbox-hwbinder"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rootfs_mounts_are_session_scoped() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let filesystem = MountFilesystem::new(executor.clone(), temp.path());

        filesystem
            .mount_rootfs(1, Path::new("/images"), &Session::default())
            .await
            .unwrap();

        let rootfs = env::session_rootfs_path(temp.path(), 1);
        assert!(rootfs.is_dir());
        assert_eq!(
            executor.commands(),
            vec![
                format!("mount -o ro,loop /images/system.img {}", rootfs.display()),
                format!("mount -o ro,loop /images/vendor.img {}/vendor", rootfs.display()),
            ]
        );
    }

    #[tokio::test]
    async fn test_protocol_versions_replace_previous_values() {
        let temp = TempDir::new().unwrap();
        let config = ManagerConfig {
            work_dir: temp.path().to_path_buf(),
            ..Default::default()
        };
        let path = env::session_base_prop_file(temp.path(), 0);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "ro.foo=1\nwaydroid.binder_protocol=aidl\n").unwrap();

        BinderProtocol::new(&config).set_default_version(0).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("ro.foo=1"));
        assert_eq!(written.matches(BINDER_PROTOCOL_KEY).count(), 1);
        assert!(written.contains("waydroid.binder_protocol=aidl3"));
        assert!(written.contains("waydroid.service_manager_protocol=aidl3"));
    }
}
