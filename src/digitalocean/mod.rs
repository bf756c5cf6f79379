//! DigitalOcean implementation of [`Provider`] over the v2 REST API.

mod api;
mod error;

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::DigitalOceanConfig;
use crate::provider::{
    ActionId, ActionKind, ActionStatus, CreateInstanceRequest, ImageId, Instance, InstanceId,
    PendingAction, Provider, ProviderFuture,
};
use api::{
    ActionEnvelope, ActionList, ApiErrorBody, AssignBody, CreateDropletBody, DropletEnvelope,
    DropletList, ImageList, Paged, SshKeyList,
};

pub use error::DigitalOceanError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 200;
const MAX_PAGES: usize = 50;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider that manages droplets through the DigitalOcean API.
#[derive(Clone)]
pub struct DigitalOceanProvider {
    token: String,
    api_base: String,
}

impl std::fmt::Debug for DigitalOceanProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOceanProvider")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl DigitalOceanProvider {
    /// Constructs a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: &DigitalOceanConfig) -> Result<Self, DigitalOceanError> {
        config.validate()?;
        Ok(Self {
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<Vec<u8>, DigitalOceanError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| DigitalOceanError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| DigitalOceanError::Transport(err.to_string()))?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        Err(status_error(status, &body, resource))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DigitalOceanError> {
        let body = self.send(HTTP_CLIENT.get(url), url).await?;
        decode(&body)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &B,
    ) -> Result<T, DigitalOceanError> {
        let body = self.send(HTTP_CLIENT.post(url).json(payload), url).await?;
        decode(&body)
    }

    async fn get_all<P>(&self, first: String) -> Result<Vec<P::Item>, DigitalOceanError>
    where
        P: Paged + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0_usize;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(DigitalOceanError::Decode(format!(
                    "pagination did not terminate after {MAX_PAGES} pages"
                )));
            }
            let page: P = self.get_json(&url).await?;
            let (mut batch, following) = page.into_parts();
            items.append(&mut batch);
            next = following;
        }
        Ok(items)
    }

    async fn droplet_actions(&self, droplet_id: u64) -> Result<Vec<PendingAction>, DigitalOceanError> {
        let list: ActionList = self
            .get_json(&self.url(&format!("/droplets/{droplet_id}/actions?per_page=50")))
            .await?;
        list.actions
            .into_iter()
            .map(PendingAction::try_from)
            .collect()
    }

    /// Reports a record-less destroy as done only once the droplet is gone.
    async fn droplet_destroy_status(
        &self,
        droplet_id: u64,
    ) -> Result<PendingAction, DigitalOceanError> {
        let path = self.url(&format!("/droplets/{droplet_id}"));
        match self.get_json::<DropletEnvelope>(&path).await {
            Ok(_) => Ok(droplet_destroy(droplet_id, ActionStatus::InProgress)),
            Err(DigitalOceanError::NotFound { .. }) => {
                debug!(droplet = droplet_id, "droplet gone");
                Ok(droplet_destroy(droplet_id, ActionStatus::Completed))
            }
            Err(err) => Err(err),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DigitalOceanError> {
    serde_json::from_slice(body).map_err(|err| DigitalOceanError::Decode(err.to_string()))
}

fn status_error(status: StatusCode, body: &[u8], resource: &str) -> DigitalOceanError {
    if status == StatusCode::NOT_FOUND {
        return DigitalOceanError::NotFound {
            resource: resource.to_owned(),
        };
    }
    let message = serde_json::from_slice::<ApiErrorBody>(body).map_or_else(
        |_| String::from_utf8_lossy(body).into_owned(),
        |parsed| parsed.describe(),
    );
    DigitalOceanError::Api {
        status: status.as_u16(),
        message,
    }
}

fn numeric_id(kind: &'static str, value: &str) -> Result<u64, DigitalOceanError> {
    value.parse().map_err(|_| DigitalOceanError::InvalidId {
        kind,
        value: value.to_owned(),
    })
}

/// Picks the action with the highest id; DigitalOcean ids grow over time.
fn newest(actions: Vec<PendingAction>) -> Option<PendingAction> {
    actions
        .into_iter()
        .max_by_key(|action| action.id.as_str().parse::<u64>().unwrap_or(0))
}

const DESTROY_PREFIX: &str = "destroy-";

/// Stand-in for a destroy that has no action record of its own. Its status
/// follows the droplet: completed once the droplet answers `404`.
fn droplet_destroy(droplet_id: u64, status: ActionStatus) -> PendingAction {
    PendingAction {
        id: ActionId::new(format!("{DESTROY_PREFIX}{droplet_id}")),
        kind: ActionKind::Destroy,
        status,
    }
}

impl Provider for DigitalOceanProvider {
    type Error = DigitalOceanError;

    fn list_instances_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            let droplets = self
                .get_all::<DropletList>(self.url(&format!("/droplets?per_page={PAGE_SIZE}")))
                .await?;
            let matching = droplets
                .into_iter()
                .filter(|droplet| droplet.name.starts_with(prefix))
                .map(|droplet| api::instance_from(droplet, &[]))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(prefix, count = matching.len(), "listed droplets");
            Ok(matching)
        })
    }

    fn resolve_image_id<'a>(
        &'a self,
        snapshot_name: &'a str,
    ) -> ProviderFuture<'a, ImageId, Self::Error> {
        Box::pin(async move {
            let images = self
                .get_all::<ImageList>(
                    self.url(&format!("/images?private=true&per_page={PAGE_SIZE}")),
                )
                .await?;
            let matches: Vec<_> = images
                .into_iter()
                .filter(|image| image.name == snapshot_name)
                .collect();
            match matches.as_slice() {
                [only] => Ok(ImageId::new(only.id.to_string())),
                _ => Err(DigitalOceanError::ImageNotFound {
                    name: snapshot_name.to_owned(),
                    matches: matches.len(),
                }),
            }
        })
    }

    fn list_ssh_key_ids(&self) -> ProviderFuture<'_, Vec<String>, Self::Error> {
        Box::pin(async move {
            let keys = self
                .get_all::<SshKeyList>(self.url(&format!("/account/keys?per_page={PAGE_SIZE}")))
                .await?;
            Ok(keys.into_iter().map(|key| key.fingerprint).collect())
        })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ProviderFuture<'a, Instance, Self::Error> {
        Box::pin(async move {
            let body = CreateDropletBody::from_request(request);
            let created: DropletEnvelope = self.post_json(&self.url("/droplets"), &body).await?;
            let instance = api::instance_from(created.droplet, &created.links.actions)?;
            info!(id = %instance.id, name = %instance.name, "droplet requested");
            Ok(instance)
        })
    }

    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, Instance, Self::Error> {
        Box::pin(async move {
            let droplet_id = numeric_id("droplet", id.as_str())?;
            let envelope: DropletEnvelope = self
                .get_json(&self.url(&format!("/droplets/{droplet_id}")))
                .await?;
            api::instance_from(envelope.droplet, &[])
        })
    }

    fn latest_action<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        Box::pin(async move {
            let droplet_id = numeric_id("droplet", instance.id.as_str())?;
            let actions = self.droplet_actions(droplet_id).await?;
            newest(actions)
                .or_else(|| newest(instance.pending_actions.clone()))
                .ok_or_else(|| DigitalOceanError::NoActions {
                    instance_id: instance.id.to_string(),
                })
        })
    }

    fn action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, PendingAction, Self::Error> {
        Box::pin(async move {
            if let Some(droplet) = id.as_str().strip_prefix(DESTROY_PREFIX) {
                let droplet_id = numeric_id("droplet", droplet)?;
                return self.droplet_destroy_status(droplet_id).await;
            }
            let action_id = numeric_id("action", id.as_str())?;
            let envelope: ActionEnvelope = self
                .get_json(&self.url(&format!("/actions/{action_id}")))
                .await?;
            PendingAction::try_from(envelope.action)
        })
    }

    fn assign_floating_ip<'a>(
        &'a self,
        ip: IpAddr,
        instance_id: &'a InstanceId,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        Box::pin(async move {
            let droplet_id = numeric_id("droplet", instance_id.as_str())?;
            let body = AssignBody {
                kind: "assign",
                droplet_id,
            };
            let envelope: ActionEnvelope = self
                .post_json(&self.url(&format!("/floating_ips/{ip}/actions")), &body)
                .await?;
            info!(%ip, droplet = droplet_id, "floating IP assignment requested");
            PendingAction::try_from(envelope.action)
        })
    }

    fn destroy_instance<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        Box::pin(async move {
            let droplet_id = numeric_id("droplet", instance.id.as_str())?;
            let path = self.url(&format!("/droplets/{droplet_id}"));
            match self.send(HTTP_CLIENT.delete(&path), &path).await {
                Ok(_) => {}
                Err(DigitalOceanError::NotFound { .. }) => {
                    return Ok(droplet_destroy(droplet_id, ActionStatus::Completed));
                }
                Err(err) => return Err(err),
            }
            info!(id = %instance.id, name = %instance.name, "droplet destroy requested");

            match self.droplet_actions(droplet_id).await {
                Ok(actions) => Ok(newest(
                    actions
                        .into_iter()
                        .filter(|action| action.kind == ActionKind::Destroy)
                        .collect(),
                )
                .unwrap_or_else(|| droplet_destroy(droplet_id, ActionStatus::InProgress))),
                Err(DigitalOceanError::NotFound { .. }) => {
                    Ok(droplet_destroy(droplet_id, ActionStatus::Completed))
                }
                Err(err) => Err(err),
            }
        })
    }
}
