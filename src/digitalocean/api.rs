//! Wire types for the DigitalOcean v2 API and their conversion into
//! provider-neutral values.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::DigitalOceanError;
use crate::provider::{
    ActionId, ActionKind, ActionStatus, AddressKind, CreateInstanceRequest, Instance, InstanceId,
    InstanceStatus, NetworkAddress, PendingAction,
};

#[derive(Debug, Default, Deserialize)]
pub(super) struct Links {
    #[serde(default)]
    pub(super) pages: Option<Pages>,
    #[serde(default)]
    pub(super) actions: Vec<ActionLink>,
}

impl Links {
    pub(super) fn next_page(&self) -> Option<&str> {
        self.pages.as_ref().and_then(|pages| pages.next.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Pages {
    #[serde(default)]
    pub(super) next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionLink {
    pub(super) id: u64,
    #[serde(default)]
    pub(super) rel: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct DropletList {
    pub(super) droplets: Vec<ApiDroplet>,
    #[serde(default)]
    pub(super) links: Links,
}

#[derive(Debug, Deserialize)]
pub(super) struct DropletEnvelope {
    pub(super) droplet: ApiDroplet,
    #[serde(default)]
    pub(super) links: Links,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiDroplet {
    pub(super) id: u64,
    pub(super) name: String,
    pub(super) status: String,
    #[serde(default)]
    pub(super) networks: ApiNetworks,
    #[serde(default)]
    pub(super) tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiNetworks {
    #[serde(default)]
    pub(super) v4: Vec<ApiNetwork>,
    #[serde(default)]
    pub(super) v6: Vec<ApiNetwork>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiNetwork {
    pub(super) ip_address: String,
    #[serde(rename = "type")]
    pub(super) kind: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionList {
    pub(super) actions: Vec<ApiAction>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionEnvelope {
    pub(super) action: ApiAction,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiAction {
    pub(super) id: u64,
    pub(super) status: String,
    #[serde(rename = "type")]
    pub(super) kind: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ImageList {
    pub(super) images: Vec<ApiImage>,
    #[serde(default)]
    pub(super) links: Links,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiImage {
    pub(super) id: u64,
    pub(super) name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SshKeyList {
    pub(super) ssh_keys: Vec<ApiSshKey>,
    #[serde(default)]
    pub(super) links: Links,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiSshKey {
    pub(super) fingerprint: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorBody {
    #[serde(default)]
    pub(super) id: String,
    pub(super) message: String,
}

impl ApiErrorBody {
    pub(super) fn describe(&self) -> String {
        if self.id.is_empty() {
            self.message.clone()
        } else {
            format!("{} ({})", self.message, self.id)
        }
    }
}

/// A list response that may continue on another page.
pub(super) trait Paged {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

impl Paged for DropletList {
    type Item = ApiDroplet;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        let next = self.links.next_page().map(str::to_owned);
        (self.droplets, next)
    }
}

impl Paged for ImageList {
    type Item = ApiImage;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        let next = self.links.next_page().map(str::to_owned);
        (self.images, next)
    }
}

impl Paged for SshKeyList {
    type Item = ApiSshKey;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>) {
        let next = self.links.next_page().map(str::to_owned);
        (self.ssh_keys, next)
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum ImageRef {
    Id(u64),
    Slug(String),
}

#[derive(Debug, Serialize)]
pub(super) struct CreateDropletBody<'a> {
    pub(super) name: &'a str,
    pub(super) region: &'a str,
    pub(super) size: &'a str,
    pub(super) image: ImageRef,
    pub(super) ssh_keys: &'a [String],
    pub(super) backups: bool,
    pub(super) ipv6: bool,
    pub(super) private_networking: bool,
    pub(super) monitoring: bool,
    pub(super) user_data: &'a str,
    pub(super) tags: &'a [String],
}

impl<'a> CreateDropletBody<'a> {
    pub(super) fn from_request(request: &'a CreateInstanceRequest) -> Self {
        let image = request
            .image
            .as_str()
            .parse()
            .map_or_else(|_| ImageRef::Slug(request.image.to_string()), ImageRef::Id);
        Self {
            name: &request.name,
            region: &request.region,
            size: &request.size,
            image,
            ssh_keys: &request.ssh_keys,
            backups: request.backups,
            ipv6: false,
            private_networking: request.private_networking,
            monitoring: request.monitoring,
            user_data: &request.user_data,
            tags: &request.tags,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AssignBody {
    #[serde(rename = "type")]
    pub(super) kind: &'static str,
    pub(super) droplet_id: u64,
}

pub(super) fn instance_status(raw: &str) -> Result<InstanceStatus, DigitalOceanError> {
    match raw {
        "new" => Ok(InstanceStatus::Pending),
        "active" => Ok(InstanceStatus::Active),
        "off" => Ok(InstanceStatus::Off),
        "archive" => Ok(InstanceStatus::Destroying),
        other => Err(DigitalOceanError::UnknownStatus {
            kind: "droplet",
            value: other.to_owned(),
        }),
    }
}

pub(super) fn action_status(raw: &str) -> Result<ActionStatus, DigitalOceanError> {
    match raw {
        "in-progress" => Ok(ActionStatus::InProgress),
        "completed" => Ok(ActionStatus::Completed),
        "errored" => Ok(ActionStatus::Errored),
        other => Err(DigitalOceanError::UnknownStatus {
            kind: "action",
            value: other.to_owned(),
        }),
    }
}

pub(super) fn action_kind(raw: &str) -> ActionKind {
    match raw {
        "create" => ActionKind::Create,
        "assign_ip" | "assign" => ActionKind::AssignFloatingIp,
        "destroy" => ActionKind::Destroy,
        other => ActionKind::Other(other.to_owned()),
    }
}

impl TryFrom<ApiAction> for PendingAction {
    type Error = DigitalOceanError;

    fn try_from(value: ApiAction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ActionId::new(value.id.to_string()),
            kind: action_kind(&value.kind),
            status: action_status(&value.status)?,
        })
    }
}

fn addresses(networks: &ApiNetworks) -> Vec<NetworkAddress> {
    networks
        .v4
        .iter()
        .chain(&networks.v6)
        .filter_map(|network| {
            let ip = network.ip_address.parse::<IpAddr>().ok()?;
            let kind = match network.kind.as_str() {
                "public" => AddressKind::Public,
                _ => AddressKind::Private,
            };
            Some(NetworkAddress { ip, kind })
        })
        .collect()
}

pub(super) fn instance_from(
    droplet: ApiDroplet,
    action_links: &[ActionLink],
) -> Result<Instance, DigitalOceanError> {
    let status = instance_status(&droplet.status)?;
    let pending_actions = action_links
        .iter()
        .map(|link| PendingAction {
            id: ActionId::new(link.id.to_string()),
            kind: action_kind(&link.rel),
            status: ActionStatus::InProgress,
        })
        .collect();
    Ok(Instance {
        id: InstanceId::new(droplet.id.to_string()),
        addresses: addresses(&droplet.networks),
        name: droplet.name,
        status,
        tags: droplet.tags,
        pending_actions,
    })
}
