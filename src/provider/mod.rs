//! Capability interface over the cloud provider.
//!
//! The orchestrator only talks to the provider through [`Provider`], which
//! keeps the state machine testable against an in-memory fake. Reads are
//! idempotent; creation and destruction are issued at most once per run and
//! are never retried here.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

mod types;
mod wait;

pub use types::{
    ActionId, ActionKind, ActionStatus, AddressKind, CreateInstanceRequest, ImageId, Instance,
    InstanceId, InstanceStatus, NetworkAddress, PendingAction,
};
pub use wait::{AwaitError, await_action};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations the deployment needs from a compute provider.
pub trait Provider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance whose name starts with `prefix`.
    fn list_instances_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>, Self::Error>;

    /// Resolves a snapshot name to an image identifier. Fails when no
    /// snapshot or more than one snapshot carries the name.
    fn resolve_image_id<'a>(
        &'a self,
        snapshot_name: &'a str,
    ) -> ProviderFuture<'a, ImageId, Self::Error>;

    /// Lists the account's SSH keys as identifiers accepted by
    /// [`Provider::create_instance`].
    fn list_ssh_key_ids(&self) -> ProviderFuture<'_, Vec<String>, Self::Error>;

    /// Requests a new instance.
    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ProviderFuture<'a, Instance, Self::Error>;

    /// Reads the current status and addresses of an instance.
    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, Instance, Self::Error>;

    /// Returns the most recent action recorded against an instance.
    fn latest_action<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error>;

    /// Reads the current status of an action.
    fn action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, PendingAction, Self::Error>;

    /// Points the floating IP at `instance_id`.
    fn assign_floating_ip<'a>(
        &'a self,
        ip: IpAddr,
        instance_id: &'a InstanceId,
    ) -> ProviderFuture<'a, PendingAction, Self::Error>;

    /// Requests destruction of an instance.
    fn destroy_instance<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error>;
}
