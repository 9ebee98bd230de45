//! Message envelope and type codes

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ProtocolError;

/// Error text used when a peer reports failure without saying why
pub const UNSPECIFIED_FAILURE: &str = "remote operation failed without an error message";

macro_rules! message_types {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal => $name:literal, )*) => {
        /// Command or notification kind carried by a [`Message`].
        ///
        /// Encoded on the wire as its `u16` code. Codes this build does not
        /// know decode to [`MessageType::Other`] rather than failing, so a
        /// newer agent cannot desynchronise the stream.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "u16", into = "u16")]
        pub enum MessageType {
            $( $(#[$doc])* $variant, )*
            /// Type code not known to this build
            Other(u16),
        }

        impl MessageType {
            /// Wire code for this type
            pub fn code(self) -> u16 {
                match self {
                    $( Self::$variant => $code, )*
                    Self::Other(code) => code,
                }
            }

            /// Stable lowercase name used in logs
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                    Self::Other(_) => "unknown",
                }
            }
        }

        impl From<u16> for MessageType {
            fn from(code: u16) -> Self {
                match code {
                    $( $code => Self::$variant, )*
                    other => Self::Other(other),
                }
            }
        }
    };
}

message_types! {
    /// Liveness notification from the agent
    Heartbeat = 1 => "heartbeat",
    /// Run a shell command
    RunCommand = 2 => "run_command",
    /// Run a script body
    RunScript = 3 => "run_script",
    /// Identity and version of the agent, used for the handshake
    AgentInfo = 4 => "agent_info",
    /// Operating system summary
    OsInfo = 5 => "os_info",
    /// CPU summary
    CpuInfo = 6 => "cpu_info",
    /// Memory summary
    MemoryInfo = 7 => "memory_info",
    /// Full kernel parameter table
    SysctlInfo = 8 => "sysctl_info",
    /// Change one kernel parameter at runtime
    SysctlChange = 9 => "sysctl_change",
    /// Read one kernel parameter
    SysctlView = 10 => "sysctl_view",
    /// List services
    ServiceList = 11 => "service_list",
    /// Status of one service
    ServiceStatus = 12 => "service_status",
    /// Restart a service
    ServiceRestart = 13 => "service_restart",
    /// Stop a service
    ServiceStop = 14 => "service_stop",
    /// Start a service
    ServiceStart = 15 => "service_start",
    /// List installed packages
    AllRpm = 16 => "all_rpm",
    /// Source package of an installed package
    RpmSource = 17 => "rpm_source",
    /// Details of an installed package
    RpmInfo = 18 => "rpm_info",
    /// Install a package
    InstallRpm = 19 => "install_rpm",
    /// Remove a package
    RemoveRpm = 20 => "remove_rpm",
    /// Filesystem usage
    DiskUsage = 21 => "disk_usage",
    /// Block device I/O counters
    DiskInfo = 22 => "disk_info",
    /// Mount a device
    DiskMount = 23 => "disk_mount",
    /// Unmount a mount point
    DiskUmount = 24 => "disk_umount",
    /// Format a device
    DiskFormat = 25 => "disk_format",
    /// TCP connection table
    NetTcp = 26 => "net_tcp",
    /// UDP socket table
    NetUdp = 27 => "net_udp",
    /// Per-interface I/O counters
    NetIoCounter = 28 => "net_io_counter",
    /// NIC configuration
    NetNicConfig = 29 => "net_nic_config",
    /// User the agent runs as
    CurrentUser = 30 => "current_user",
    /// Every local account
    AllUser = 31 => "all_user",
    /// Create a local account
    AddLinuxUser = 32 => "add_linux_user",
    /// Delete a local account
    DelUser = 33 => "del_user",
    /// chmod a path
    ChangePermission = 34 => "change_permission",
    /// chown a path
    ChangeFileOwner = 35 => "change_file_owner",
    /// Agent-reported host OS details
    AgentOsInfo = 36 => "agent_os_info",
    /// Firewall overview
    FirewalldConfig = 37 => "firewalld_config",
    /// Set the default firewall zone
    FirewalldDefaultZone = 38 => "firewalld_default_zone",
    /// Configuration of one zone
    FirewalldZoneConfig = 39 => "firewalld_zone_config",
    /// Allow a service in a zone
    FirewalldServiceAdd = 40 => "firewalld_service_add",
    /// Disallow a service in a zone
    FirewalldServiceRemove = 41 => "firewalld_service_remove",
    /// Bind a source to a zone
    FirewalldSourceAdd = 42 => "firewalld_source_add",
    /// Unbind a source from a zone
    FirewalldSourceRemove = 43 => "firewalld_source_remove",
    /// Restart the firewall
    FirewalldRestart = 44 => "firewalld_restart",
    /// Stop the firewall
    FirewalldStop = 45 => "firewalld_stop",
    /// Open a port in a zone
    FirewalldZonePortAdd = 46 => "firewalld_zone_port_add",
    /// Close a port in a zone
    FirewalldZonePortDel = 47 => "firewalld_zone_port_del",
    /// Install and start a cron job
    CronStart = 48 => "cron_start",
    /// Stop and delete a cron job
    CronStopAndDel = 49 => "cron_stop_and_del",
    /// Package repository definitions
    RepoSource = 50 => "repo_source",
    /// Established network connections
    NetworkConnections = 51 => "network_connections",
    /// Basic network configuration of the primary NIC
    NetworkConfig = 52 => "network_config",
    /// Primary NIC name
    NicName = 53 => "nic_name",
    /// Restart networking on a NIC
    RestartNetwork = 54 => "restart_network",
    /// Read a file
    ReadFile = 55 => "read_file",
    /// Overwrite a file
    EditFile = 56 => "edit_file",
    /// Agent wall-clock time
    AgentTime = 57 => "agent_time",
    /// Push a config file to watch to the agent
    ConfigFilePush = 58 => "config_file_push",
    /// Agent reports a watched config file changed (no reply)
    ConfigFileChanged = 59 => "config_file_changed",
    /// Agent reports a free-form file monitor event (no reply)
    FileMonitor = 60 => "file_monitor",
}

impl From<MessageType> for u16 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "unknown({})", code),
            known => f.write_str(known.name()),
        }
    }
}

/// Outcome carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Operation succeeded, or the message is a request/notification
    Success,
    /// Remote operation ran and failed; see the error text
    Failure,
}

/// MessagePack encoding of a typed value, decoded on demand.
///
/// The schema is implied by the [`MessageType`] of the enclosing message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Bytes);

impl Payload {
    /// Encode a typed value
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self(Bytes::from(rmp_serde::to_vec_named(value)?)))
    }

    /// Payload carrying no value
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap already-encoded bytes
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Decode into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.0)
    }

    /// Raw encoded bytes
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        // MessagePack nil, so binding to `()` succeeds
        Self(Bytes::from_static(&[0xc0]))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// Request/response envelope exchanged with agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation ID, reused verbatim by the response
    pub id: Uuid,
    /// Command or notification kind
    pub kind: MessageType,
    /// Outcome of the operation
    pub status: Status,
    /// Type-specific body
    pub payload: Payload,
    /// Error text, non-empty whenever `status` is `Failure`
    pub error: String,
}

impl Message {
    /// Create a request with a fresh correlation ID
    pub fn request(kind: MessageType, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: Status::Success,
            payload,
            error: String::new(),
        }
    }

    /// Create a fire-and-forget notification
    pub fn notification(kind: MessageType, payload: Payload) -> Self {
        Self::request(kind, payload)
    }

    /// Build a successful response to this message
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            status: Status::Success,
            payload,
            error: String::new(),
        }
    }

    /// Build a failed response to this message
    pub fn failure(&self, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = UNSPECIFIED_FAILURE.to_string();
        }
        Self {
            id: self.id,
            kind: self.kind,
            status: Status::Failure,
            payload: Payload::empty(),
            error,
        }
    }

    /// Whether the remote side reported failure
    pub fn is_failure(&self) -> bool {
        self.status == Status::Failure
    }

    /// Error text of a failed message, never empty for failures
    pub fn error_text(&self) -> &str {
        if self.is_failure() && self.error.is_empty() {
            UNSPECIFIED_FAILURE
        } else {
            &self.error
        }
    }

    /// Decode the payload into the shape expected for this message type
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.payload.decode().map_err(|e| ProtocolError::PayloadDecode {
            kind: self.kind,
            reason: e.to_string(),
        })
    }

    /// Split a response into its payload or the remote failure it reports
    pub fn into_result(self) -> Result<Payload, (MessageType, String)> {
        if self.is_failure() {
            let text = self.error_text().to_string();
            Err((self.kind, text))
        } else {
            Ok(self.payload)
        }
    }

    /// Serialize the envelope to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(rmp_serde::to_vec_named(self)?))
    }

    /// Deserialize an envelope from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} type={} status={:?} payload={}B",
            self.id,
            self.kind,
            self.status,
            self.payload.len()
        )?;
        if !self.error.is_empty() {
            write!(f, " error={:?}", self.error)?;
        }
        Ok(())
    }
}
