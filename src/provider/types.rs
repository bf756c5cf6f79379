//! Provider-neutral value types for instances and their pending actions.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider supplied identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

newtype!(
    /// Identifier of an instance as assigned by the provider.
    InstanceId
);
newtype!(
    /// Identifier of a boot image or snapshot.
    ImageId
);
newtype!(
    /// Identifier of an asynchronous provider action.
    ActionId
);

/// Lifecycle status of an instance as reported by the provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// The instance has been requested but is not running yet.
    Pending,
    /// The instance is running.
    Active,
    /// The instance exists but is powered off.
    Off,
    /// The instance is being torn down.
    Destroying,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Off => "off",
            Self::Destroying => "destroying",
        };
        f.write_str(label)
    }
}

/// Whether an address is reachable from the internet or only inside the
/// provider network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressKind {
    /// Internet-facing address.
    Public,
    /// Address on the provider's private network.
    Private,
}

/// A single network address attached to an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkAddress {
    /// The address itself.
    pub ip: IpAddr,
    /// Public or private scope.
    pub kind: AddressKind,
}

/// Status of an asynchronous provider-side operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionStatus {
    /// The provider is still working on the action.
    InProgress,
    /// The action finished successfully.
    Completed,
    /// The action finished unsuccessfully.
    Errored,
}

impl ActionStatus {
    /// Returns `true` once the action can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// What a pending action is doing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionKind {
    /// Instance creation and first boot.
    Create,
    /// Floating IP assignment.
    AssignFloatingIp,
    /// Instance destruction.
    Destroy,
    /// Any other provider action, carrying the provider's own label.
    Other(String),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::AssignFloatingIp => f.write_str("assign_ip"),
            Self::Destroy => f.write_str("destroy"),
            Self::Other(label) => f.write_str(label),
        }
    }
}

/// An in-flight or finished provider operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingAction {
    /// Provider action identifier used for polling.
    pub id: ActionId,
    /// Operation performed by the action.
    pub kind: ActionKind,
    /// Last observed status.
    pub status: ActionStatus,
}

/// A provider instance as observed at one point in time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: InstanceId,
    /// Instance name; the stack prefix is matched against this.
    pub name: String,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Public and private addresses.
    pub addresses: Vec<NetworkAddress>,
    /// Tags applied at creation time.
    pub tags: Vec<String>,
    /// Actions the provider reported alongside the instance, if any.
    pub pending_actions: Vec<PendingAction>,
}

impl Instance {
    /// Returns the first public IPv4 address, if the provider assigned one.
    #[must_use]
    pub fn public_ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses.iter().find_map(|address| match address {
            NetworkAddress {
                ip: IpAddr::V4(ip),
                kind: AddressKind::Public,
            } => Some(*ip),
            _ => None,
        })
    }
}

/// Parameters for creating an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateInstanceRequest {
    /// Name of the new instance.
    pub name: String,
    /// Region slug (for example `sgp1`).
    pub region: String,
    /// Size slug (for example `s-1vcpu-1gb`).
    pub size: String,
    /// Resolved boot image.
    pub image: ImageId,
    /// SSH keys to install, as identifiers the provider accepts.
    pub ssh_keys: Vec<String>,
    /// Tags to apply.
    pub tags: Vec<String>,
    /// Bootstrap payload executed on first boot.
    pub user_data: String,
    /// Whether to enable provider monitoring.
    pub monitoring: bool,
    /// Whether to attach a private network interface.
    pub private_networking: bool,
    /// Whether to enable provider backups.
    pub backups: bool,
}
