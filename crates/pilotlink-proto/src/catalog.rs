//! Typed command catalog
//!
//! Every [`MessageType`] that carries a request has a fixed request schema and
//! a fixed response schema. Each remote capability is a zero-sized marker
//! implementing [`Command`], which the server-side call surface uses to encode
//! requests and bind responses without runtime casts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::message::MessageType;

/// A remote capability with a fixed request/response schema pair
pub trait Command {
    /// Wire type for this command
    const KIND: MessageType;
    /// Request payload shape
    type Request: Serialize + DeserializeOwned + Send + Sync;
    /// Response payload shape
    type Response: Serialize + DeserializeOwned + Send;
}

macro_rules! commands {
    ($( $(#[$doc:meta])* $name:ident => $kind:ident ($req:ty) -> $resp:ty; )*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Command for $name {
                const KIND: MessageType = MessageType::$kind;
                type Request = $req;
                type Response = $resp;
            }
        )*
    };
}

/// Identity announced by an agent during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable agent identity
    pub agent_uuid: String,
    /// Agent software version
    pub agent_version: String,
    /// Address the agent believes it has
    #[serde(default)]
    pub ip: String,
}

/// Shell command to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command line, interpreted by the agent's shell
    pub command: String,
}

/// Script to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    /// Script body
    pub script: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<String>,
}

/// Result of a command or script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operating system summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    /// Primary address
    pub ip: String,
    /// Distribution name
    pub platform: String,
    /// Distribution version
    pub platform_version: String,
    /// Running kernel
    pub kernel_version: String,
    /// Kernel architecture
    pub kernel_arch: String,
    /// Hostname
    pub host_name: String,
    /// Seconds since boot
    pub uptime: u64,
}

/// CPU summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Model string
    pub model_name: String,
    /// Logical CPU count
    pub cpu_num: u32,
}

/// Memory summary in kilobytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Total RAM
    pub mem_total: u64,
    /// Unused RAM
    pub mem_free: u64,
    /// RAM available without swapping
    pub mem_available: u64,
    /// Buffer cache
    pub buffers: u64,
    /// Page cache
    pub cached: u64,
    /// Swap cache
    pub swap_cached: u64,
}

/// Kernel parameter assignment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysctlAssignment {
    /// Parameter name, e.g. `vm.swappiness`
    pub key: String,
    /// New value
    pub value: String,
}

/// One systemd unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnit {
    /// Unit name
    pub name: String,
    /// Load state
    pub load: String,
    /// Active state
    pub active: String,
    /// Sub state
    pub sub: String,
}

/// Source package of an installed package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmSource {
    /// Package name
    pub name: String,
    /// Source RPM
    pub source: String,
}

/// Installed package details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmInfo {
    /// Package name
    pub name: String,
    /// Version
    pub version: String,
    /// Release
    pub release: String,
    /// Architecture
    pub architecture: String,
    /// Installed size in bytes
    pub size: u64,
    /// License
    pub license: String,
    /// One-line summary
    pub summary: String,
}

/// Filesystem usage of one mount
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Backing device
    pub device: String,
    /// Mount point
    pub path: String,
    /// Filesystem type
    pub fstype: String,
    /// Capacity in bytes
    pub total: u64,
    /// Bytes in use
    pub used: u64,
    /// Percentage in use
    pub used_percent: f64,
}

/// I/O counters of one block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIoCounters {
    /// Device name
    pub name: String,
    /// Completed reads
    pub read_count: u64,
    /// Completed writes
    pub write_count: u64,
    /// Bytes read
    pub read_bytes: u64,
    /// Bytes written
    pub write_bytes: u64,
}

/// Mount a device onto a path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    /// Device to mount
    pub source: String,
    /// Mount point
    pub target: String,
}

/// Create a filesystem on a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRequest {
    /// Filesystem type, e.g. `ext4`
    pub fs_type: String,
    /// Device to format
    pub device: String,
}

/// One socket table entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketStat {
    /// Local address and port
    pub local_addr: String,
    /// Remote address and port
    pub remote_addr: String,
    /// Connection state
    pub status: String,
    /// Owning process, 0 when unknown
    pub pid: i32,
}

/// I/O counters of one interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIoCounters {
    /// Interface name
    pub name: String,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_recv: u64,
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_recv: u64,
}

/// NIC hardware and address configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConfig {
    /// Interface name
    pub name: String,
    /// Hardware address
    pub mac: String,
    /// Assigned addresses in CIDR form
    pub addrs: Vec<String>,
}

/// Basic network configuration of the primary interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface name
    pub nic: String,
    /// Address
    pub ip: String,
    /// Netmask
    pub netmask: String,
    /// Default gateway
    pub gateway: String,
    /// Resolvers
    pub dns: Vec<String>,
    /// `dhcp` or `static`
    pub boot_proto: String,
}

/// Local account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Login name
    pub name: String,
    /// User ID
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
    /// Home directory
    pub home: String,
    /// Login shell
    pub shell: String,
}

/// Account to create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Login name
    pub username: String,
    /// Initial password
    pub password: String,
}

/// chmod request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChange {
    /// Mode, e.g. `0644`
    pub permission: String,
    /// Target path
    pub path: String,
}

/// chown request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerChange {
    /// New owner, `user` or `user:group`
    pub owner: String,
    /// Target path
    pub path: String,
}

/// Firewall overview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallOverview {
    /// Daemon state
    pub status: String,
    /// Default zone
    pub default_zone: String,
    /// Known zones
    pub zones: Vec<String>,
    /// Known services
    pub services: Vec<String>,
}

/// Configuration of one firewall zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name
    pub zone: String,
    /// Allowed services
    pub services: Vec<String>,
    /// Bound sources
    pub sources: Vec<String>,
    /// Open ports as `port/protocol`
    pub ports: Vec<String>,
}

/// Service rule in a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneService {
    /// Zone name
    pub zone: String,
    /// Service name
    pub service: String,
}

/// Source rule in a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSource {
    /// Zone name
    pub zone: String,
    /// Source address or CIDR
    pub source: String,
}

/// Port rule in a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePort {
    /// Zone name
    pub zone: String,
    /// Port or range
    pub port: String,
    /// `tcp` or `udp`
    pub protocol: String,
}

/// Cron job to install
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJob {
    /// Server-side job ID
    pub id: i64,
    /// Cron schedule expression
    pub spec: String,
    /// Command to run
    pub command: String,
}

/// One package repository definition file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    /// File name under the repo directory
    pub file: String,
    /// File contents
    pub content: String,
}

/// Overwrite a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Directory
    pub path: String,
    /// File name
    pub name: String,
    /// New contents
    pub text: String,
}

/// Watched config file and its contents.
///
/// Sent server → agent to start watching, and agent → server when it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Identity of the machine holding the file
    pub machine_uuid: String,
    /// Absolute path of the file
    pub path: String,
    /// Current contents
    pub content: String,
}

commands! {
    /// Liveness check; the agent echoes a status line
    Heartbeat => Heartbeat(String) -> String;
    /// Run a shell command
    RunCommand => RunCommand(CommandRequest) -> CommandOutput;
    /// Run a script
    RunScript => RunScript(ScriptRequest) -> CommandOutput;
    /// Fetch the agent's identity; used for the handshake
    GetAgentInfo => AgentInfo(()) -> AgentIdentity;
    /// Fetch the OS summary
    GetOsInfo => OsInfo(()) -> OsInfo;
    /// Fetch the CPU summary
    GetCpuInfo => CpuInfo(()) -> CpuInfo;
    /// Fetch the memory summary
    GetMemoryInfo => MemoryInfo(()) -> MemoryInfo;
    /// Fetch every kernel parameter
    GetSysctlInfo => SysctlInfo(()) -> BTreeMap<String, String>;
    /// Change a kernel parameter at runtime
    ChangeSysctl => SysctlChange(SysctlAssignment) -> String;
    /// Read one kernel parameter
    ViewSysctl => SysctlView(String) -> String;
    /// List services
    ListServices => ServiceList(()) -> Vec<ServiceUnit>;
    /// Status of one service
    GetServiceStatus => ServiceStatus(String) -> String;
    /// Restart a service
    RestartService => ServiceRestart(String) -> String;
    /// Stop a service
    StopService => ServiceStop(String) -> String;
    /// Start a service
    StartService => ServiceStart(String) -> String;
    /// List installed packages
    ListRpms => AllRpm(()) -> Vec<String>;
    /// Source package of an installed package
    GetRpmSource => RpmSource(String) -> RpmSource;
    /// Details of an installed package
    GetRpmInfo => RpmInfo(String) -> RpmInfo;
    /// Install a package
    InstallRpm => InstallRpm(String) -> String;
    /// Remove a package
    RemoveRpm => RemoveRpm(String) -> String;
    /// Filesystem usage
    GetDiskUsage => DiskUsage(()) -> Vec<DiskUsage>;
    /// Block device I/O counters
    GetDiskInfo => DiskInfo(()) -> Vec<DiskIoCounters>;
    /// Mount a device
    MountDisk => DiskMount(MountRequest) -> String;
    /// Unmount a mount point
    UnmountDisk => DiskUmount(String) -> String;
    /// Format a device
    FormatDisk => DiskFormat(FormatRequest) -> String;
    /// TCP socket table
    GetNetTcp => NetTcp(()) -> Vec<SocketStat>;
    /// UDP socket table
    GetNetUdp => NetUdp(()) -> Vec<SocketStat>;
    /// Interface I/O counters
    GetNetIoCounters => NetIoCounter(()) -> Vec<NetIoCounters>;
    /// NIC configuration
    GetNicConfig => NetNicConfig(()) -> Vec<NicConfig>;
    /// Account the agent runs as
    GetCurrentUser => CurrentUser(()) -> UserAccount;
    /// Every local account
    ListUsers => AllUser(()) -> Vec<UserAccount>;
    /// Create a local account
    AddLinuxUser => AddLinuxUser(NewUser) -> String;
    /// Delete a local account
    DeleteUser => DelUser(String) -> String;
    /// chmod a path
    ChangePermission => ChangePermission(PermissionChange) -> String;
    /// chown a path
    ChangeFileOwner => ChangeFileOwner(OwnerChange) -> String;
    /// Host OS details as reported by the agent
    GetAgentOsInfo => AgentOsInfo(()) -> OsInfo;
    /// Firewall overview
    GetFirewallConfig => FirewalldConfig(()) -> FirewallOverview;
    /// Set the default zone
    SetFirewallDefaultZone => FirewalldDefaultZone(String) -> String;
    /// Configuration of one zone
    GetFirewallZoneConfig => FirewalldZoneConfig(String) -> ZoneConfig;
    /// Allow a service in a zone
    AddFirewallService => FirewalldServiceAdd(ZoneService) -> String;
    /// Disallow a service in a zone
    RemoveFirewallService => FirewalldServiceRemove(ZoneService) -> String;
    /// Bind a source to a zone
    AddFirewallSource => FirewalldSourceAdd(ZoneSource) -> String;
    /// Unbind a source from a zone
    RemoveFirewallSource => FirewalldSourceRemove(ZoneSource) -> String;
    /// Restart the firewall
    RestartFirewall => FirewalldRestart(()) -> String;
    /// Stop the firewall
    StopFirewall => FirewalldStop(()) -> String;
    /// Open a port in a zone
    AddFirewallPort => FirewalldZonePortAdd(ZonePort) -> String;
    /// Close a port in a zone
    RemoveFirewallPort => FirewalldZonePortDel(ZonePort) -> String;
    /// Install and start a cron job
    StartCron => CronStart(CronJob) -> String;
    /// Stop and delete a cron job
    StopCron => CronStopAndDel(i64) -> String;
    /// Repository definition files
    GetRepoSources => RepoSource(()) -> Vec<RepoFile>;
    /// Established connections
    GetNetworkConnections => NetworkConnections(()) -> Vec<SocketStat>;
    /// Primary interface configuration
    GetNetworkConfig => NetworkConfig(()) -> NetworkConfig;
    /// Primary NIC name
    GetNicName => NicName(()) -> String;
    /// Restart networking on a NIC
    RestartNetwork => RestartNetwork(String) -> String;
    /// Read a file
    ReadFile => ReadFile(String) -> String;
    /// Overwrite a file
    EditFile => EditFile(FileEdit) -> String;
    /// Agent wall-clock time
    GetAgentTime => AgentTime(()) -> String;
    /// Ask the agent to watch a config file
    PushConfigFile => ConfigFilePush(ConfigFile) -> ();
    /// Agent reports a changed config file; no reply is sent
    ConfigFileChanged => ConfigFileChanged(ConfigFile) -> ();
    /// Agent reports a file monitor event; no reply is sent
    FileMonitor => FileMonitor(String) -> ();
}
