//! Typed remote operations
//!
//! Thin wrappers over [`Agent::call`]: each fixes the message type and the
//! request/response schema from the command catalog.

use pilotlink_proto::catalog::*;
use pilotlink_proto::{Command, Payload};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::agent::Agent;
use crate::{PilotError, Result};

impl Agent {
    /// Issue a catalog command with the default timeout
    pub async fn request<C: Command>(&self, request: &C::Request) -> Result<C::Response> {
        self.request_with_timeout::<C>(request, self.call_timeout()).await
    }

    /// Issue a catalog command with an explicit timeout
    pub async fn request_with_timeout<C: Command>(
        &self,
        request: &C::Request,
        timeout: Duration,
    ) -> Result<C::Response> {
        let payload = Payload::encode(request)?;
        let response = self.call_with_timeout(C::KIND, payload, timeout).await?;
        response.decode::<C::Response>().map_err(|e| {
            debug!(addr = %self.addr(), kind = %C::KIND, "Response did not match schema: {}", e);
            PilotError::Decode(format!("{} response: {}", C::KIND, e))
        })
    }

    /// Send a catalog command without waiting for a reply
    pub async fn notify_command<C: Command>(&self, request: &C::Request) -> Result<()> {
        self.notify(C::KIND, Payload::encode(request)?).await
    }

    /// Check liveness; the agent answers with a status line
    pub async fn heartbeat(&self, status: &str) -> Result<String> {
        self.request::<Heartbeat>(&status.to_string()).await
    }

    /// Identity and version as the agent reports them now
    pub async fn agent_info(&self) -> Result<AgentIdentity> {
        self.request::<GetAgentInfo>(&()).await
    }

    /// Run a shell command
    pub async fn run_command(&self, command: impl Into<String>) -> Result<CommandOutput> {
        self.request::<RunCommand>(&CommandRequest { command: command.into() })
            .await
    }

    /// Run a script with arguments
    pub async fn run_script(&self, script: impl Into<String>, args: Vec<String>) -> Result<CommandOutput> {
        self.request::<RunScript>(&ScriptRequest {
            script: script.into(),
            args,
        })
        .await
    }

    /// OS summary
    pub async fn os_info(&self) -> Result<OsInfo> {
        self.request::<GetOsInfo>(&()).await
    }

    /// CPU summary
    pub async fn cpu_info(&self) -> Result<CpuInfo> {
        self.request::<GetCpuInfo>(&()).await
    }

    /// Memory summary
    pub async fn memory_info(&self) -> Result<MemoryInfo> {
        self.request::<GetMemoryInfo>(&()).await
    }

    /// All kernel parameters
    pub async fn sysctl_info(&self) -> Result<BTreeMap<String, String>> {
        self.request::<GetSysctlInfo>(&()).await
    }

    /// Change a kernel parameter at runtime
    pub async fn change_sysctl(&self, key: impl Into<String>, value: impl Into<String>) -> Result<String> {
        self.request::<ChangeSysctl>(&SysctlAssignment {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Read one kernel parameter
    pub async fn view_sysctl(&self, key: impl Into<String>) -> Result<String> {
        self.request::<ViewSysctl>(&key.into()).await
    }

    /// Service units
    pub async fn service_list(&self) -> Result<Vec<ServiceUnit>> {
        self.request::<ListServices>(&()).await
    }

    /// Status of one service
    pub async fn service_status(&self, service: impl Into<String>) -> Result<String> {
        self.request::<GetServiceStatus>(&service.into()).await
    }

    /// Restart a service
    pub async fn service_restart(&self, service: impl Into<String>) -> Result<String> {
        self.request::<RestartService>(&service.into()).await
    }

    /// Stop a service
    pub async fn service_stop(&self, service: impl Into<String>) -> Result<String> {
        self.request::<StopService>(&service.into()).await
    }

    /// Start a service
    pub async fn service_start(&self, service: impl Into<String>) -> Result<String> {
        self.request::<StartService>(&service.into()).await
    }

    /// Installed packages
    pub async fn all_rpms(&self) -> Result<Vec<String>> {
        self.request::<ListRpms>(&()).await
    }

    /// Source package of an installed package
    pub async fn rpm_source(&self, rpm: impl Into<String>) -> Result<RpmSource> {
        self.request::<GetRpmSource>(&rpm.into()).await
    }

    /// Details of an installed package
    pub async fn rpm_info(&self, rpm: impl Into<String>) -> Result<RpmInfo> {
        self.request::<GetRpmInfo>(&rpm.into()).await
    }

    /// Install a package
    pub async fn install_rpm(&self, rpm: impl Into<String>) -> Result<String> {
        self.request::<InstallRpm>(&rpm.into()).await
    }

    /// Remove a package
    pub async fn remove_rpm(&self, rpm: impl Into<String>) -> Result<String> {
        self.request::<RemoveRpm>(&rpm.into()).await
    }

    /// Filesystem usage
    pub async fn disk_usage(&self) -> Result<Vec<DiskUsage>> {
        self.request::<GetDiskUsage>(&()).await
    }

    /// Block device I/O counters
    pub async fn disk_info(&self) -> Result<Vec<DiskIoCounters>> {
        self.request::<GetDiskInfo>(&()).await
    }

    /// Mount `source` on `target`
    pub async fn disk_mount(&self, source: impl Into<String>, target: impl Into<String>) -> Result<String> {
        self.request::<MountDisk>(&MountRequest {
            source: source.into(),
            target: target.into(),
        })
        .await
    }

    /// Unmount a mount point
    pub async fn disk_umount(&self, target: impl Into<String>) -> Result<String> {
        self.request::<UnmountDisk>(&target.into()).await
    }

    /// Create a filesystem on a device
    pub async fn disk_format(&self, fs_type: impl Into<String>, device: impl Into<String>) -> Result<String> {
        self.request::<FormatDisk>(&FormatRequest {
            fs_type: fs_type.into(),
            device: device.into(),
        })
        .await
    }

    /// TCP sockets
    pub async fn net_tcp(&self) -> Result<Vec<SocketStat>> {
        self.request::<GetNetTcp>(&()).await
    }

    /// UDP sockets
    pub async fn net_udp(&self) -> Result<Vec<SocketStat>> {
        self.request::<GetNetUdp>(&()).await
    }

    /// Interface I/O counters
    pub async fn net_io_counters(&self) -> Result<Vec<NetIoCounters>> {
        self.request::<GetNetIoCounters>(&()).await
    }

    /// NIC configuration
    pub async fn nic_config(&self) -> Result<Vec<NicConfig>> {
        self.request::<GetNicConfig>(&()).await
    }

    /// Account the agent runs as
    pub async fn current_user(&self) -> Result<UserAccount> {
        self.request::<GetCurrentUser>(&()).await
    }

    /// Every local account
    pub async fn all_users(&self) -> Result<Vec<UserAccount>> {
        self.request::<ListUsers>(&()).await
    }

    /// Create a local account
    pub async fn add_user(&self, username: impl Into<String>, password: impl Into<String>) -> Result<String> {
        self.request::<AddLinuxUser>(&NewUser {
            username: username.into(),
            password: password.into(),
        })
        .await
    }

    /// Delete a local account
    pub async fn del_user(&self, username: impl Into<String>) -> Result<String> {
        self.request::<DeleteUser>(&username.into()).await
    }

    /// chmod
    pub async fn change_permission(&self, permission: impl Into<String>, path: impl Into<String>) -> Result<String> {
        self.request::<ChangePermission>(&PermissionChange {
            permission: permission.into(),
            path: path.into(),
        })
        .await
    }

    /// chown
    pub async fn change_file_owner(&self, owner: impl Into<String>, path: impl Into<String>) -> Result<String> {
        self.request::<ChangeFileOwner>(&OwnerChange {
            owner: owner.into(),
            path: path.into(),
        })
        .await
    }

    /// OS details as the agent reports them
    pub async fn agent_os_info(&self) -> Result<OsInfo> {
        self.request::<GetAgentOsInfo>(&()).await
    }

    /// Firewall overview
    pub async fn firewall_config(&self) -> Result<FirewallOverview> {
        self.request::<GetFirewallConfig>(&()).await
    }

    /// Set the default firewall zone
    pub async fn firewall_set_default_zone(&self, zone: impl Into<String>) -> Result<String> {
        self.request::<SetFirewallDefaultZone>(&zone.into()).await
    }

    /// Configuration of one zone
    pub async fn firewall_zone_config(&self, zone: impl Into<String>) -> Result<ZoneConfig> {
        self.request::<GetFirewallZoneConfig>(&zone.into()).await
    }

    /// Allow a service in a zone
    pub async fn firewall_add_service(&self, rule: &ZoneService) -> Result<String> {
        self.request::<AddFirewallService>(rule).await
    }

    /// Disallow a service in a zone
    pub async fn firewall_remove_service(&self, rule: &ZoneService) -> Result<String> {
        self.request::<RemoveFirewallService>(rule).await
    }

    /// Bind a source to a zone
    pub async fn firewall_add_source(&self, rule: &ZoneSource) -> Result<String> {
        self.request::<AddFirewallSource>(rule).await
    }

    /// Unbind a source from a zone
    pub async fn firewall_remove_source(&self, rule: &ZoneSource) -> Result<String> {
        self.request::<RemoveFirewallSource>(rule).await
    }

    /// Restart the firewall
    pub async fn firewall_restart(&self) -> Result<String> {
        self.request::<RestartFirewall>(&()).await
    }

    /// Stop the firewall
    pub async fn firewall_stop(&self) -> Result<String> {
        self.request::<StopFirewall>(&()).await
    }

    /// Open a port
    pub async fn firewall_add_port(&self, rule: &ZonePort) -> Result<String> {
        self.request::<AddFirewallPort>(rule).await
    }

    /// Close a port
    pub async fn firewall_remove_port(&self, rule: &ZonePort) -> Result<String> {
        self.request::<RemoveFirewallPort>(rule).await
    }

    /// Install and start a cron job
    pub async fn cron_start(&self, job: &CronJob) -> Result<String> {
        self.request::<StartCron>(job).await
    }

    /// Stop and delete a cron job
    pub async fn cron_stop(&self, id: i64) -> Result<String> {
        self.request::<StopCron>(&id).await
    }

    /// Repository definition files
    pub async fn repo_sources(&self) -> Result<Vec<RepoFile>> {
        self.request::<GetRepoSources>(&()).await
    }

    /// Established network connections
    pub async fn network_connections(&self) -> Result<Vec<SocketStat>> {
        self.request::<GetNetworkConnections>(&()).await
    }

    /// Primary interface configuration
    pub async fn network_config(&self) -> Result<NetworkConfig> {
        self.request::<GetNetworkConfig>(&()).await
    }

    /// Primary NIC name
    pub async fn nic_name(&self) -> Result<String> {
        self.request::<GetNicName>(&()).await
    }

    /// Restart networking on a NIC
    pub async fn restart_network(&self, nic: impl Into<String>) -> Result<String> {
        self.request::<RestartNetwork>(&nic.into()).await
    }

    /// Read a file
    pub async fn read_file(&self, path: impl Into<String>) -> Result<String> {
        self.request::<ReadFile>(&path.into()).await
    }

    /// Overwrite a file
    pub async fn edit_file(&self, edit: &FileEdit) -> Result<String> {
        self.request::<EditFile>(edit).await
    }

    /// Agent wall-clock time
    pub async fn agent_time(&self) -> Result<String> {
        self.request::<GetAgentTime>(&()).await
    }

    /// Ask the agent to watch a config file
    pub async fn push_config_file(&self, file: &ConfigFile) -> Result<()> {
        self.request::<PushConfigFile>(file).await
    }
}
