//! Test support utilities shared across unit and integration tests.
//!
//! Every fake here records what it was asked to do so tests can assert on
//! call order as well as on outcomes.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::{Arc, PoisonError};

use camino::Utf8Path;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::archive::{ArchiveError, ArchiveReceipt, LogArchive, ObjectUploader, StoredObject, UploadError};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::health::{HealthProbe, ProbeFuture, ProbeOutcome};
use crate::paths::file_len_ambient;
use crate::provider::{
    ActionId, ActionKind, ActionStatus, AddressKind, CreateInstanceRequest, ImageId, Instance,
    InstanceId, InstanceStatus, NetworkAddress, PendingAction, Provider, ProviderFuture,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug, Default)]
struct ProbeScript {
    outcomes: VecDeque<ProbeOutcome>,
    fallback: Option<ProbeOutcome>,
    urls: Vec<String>,
}

/// Health probe that replays scripted outcomes, then answers healthy (or a
/// fixed fallback) forever.
#[derive(Clone, Debug, Default)]
pub struct FakeProbe {
    script: Arc<std::sync::Mutex<ProbeScript>>,
}

impl FakeProbe {
    /// Replays `outcomes` in order, then reports healthy.
    #[must_use]
    pub fn new(outcomes: impl IntoIterator<Item = ProbeOutcome>) -> Self {
        Self {
            script: Arc::new(std::sync::Mutex::new(ProbeScript {
                outcomes: outcomes.into_iter().collect(),
                ..ProbeScript::default()
            })),
        }
    }

    /// Answers `outcome` to every probe.
    #[must_use]
    pub fn repeating(outcome: ProbeOutcome) -> Self {
        Self {
            script: Arc::new(std::sync::Mutex::new(ProbeScript {
                fallback: Some(outcome),
                ..ProbeScript::default()
            })),
        }
    }

    /// Number of probes issued so far.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.lock().urls.len()
    }

    /// URLs probed, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HealthProbe for FakeProbe {
    fn probe<'a>(&'a self, url: &'a str) -> ProbeFuture<'a> {
        let outcome = {
            let mut script = self.lock();
            script.urls.push(url.to_owned());
            script
                .outcomes
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(ProbeOutcome::Healthy)
        };
        Box::pin(async move { outcome })
    }
}

/// Object uploader that stores nothing and reports a configurable size.
#[derive(Clone, Debug, Default)]
pub struct FakeUploader {
    stored_size: Option<u64>,
    keys: Rc<RefCell<Vec<String>>>,
}

impl FakeUploader {
    /// Reports the local file's real size, as a faithful store would.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `size` regardless of the local file.
    #[must_use]
    pub fn with_stored_size(size: u64) -> Self {
        Self {
            stored_size: Some(size),
            ..Self::default()
        }
    }

    /// Keys uploaded so far.
    #[must_use]
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.keys.borrow().clone()
    }
}

impl ObjectUploader for FakeUploader {
    fn upload(&self, local: &Utf8Path, key: &str) -> Result<StoredObject, UploadError> {
        self.keys.borrow_mut().push(key.to_owned());
        let size = match self.stored_size {
            Some(size) => size,
            None => file_len_ambient(local).map_err(UploadError::Parse)?,
        };
        Ok(StoredObject { size })
    }
}

#[derive(Debug, Default)]
struct ArchiveLog {
    archived: Vec<String>,
    failure: Option<String>,
}

/// Log archive that records which instances it was asked to archive.
#[derive(Clone, Debug, Default)]
pub struct FakeArchive {
    log: Arc<std::sync::Mutex<ArchiveLog>>,
}

impl FakeArchive {
    /// Archive that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            log: Arc::new(std::sync::Mutex::new(ArchiveLog {
                failure: Some(message.into()),
                ..ArchiveLog::default()
            })),
        }
    }

    /// Names of the instances archived so far, including failed attempts.
    #[must_use]
    pub fn archived(&self) -> Vec<String> {
        self.lock().archived.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ArchiveLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogArchive for FakeArchive {
    fn archive(
        &self,
        instance: &Instance,
        remote_paths: &[String],
    ) -> Result<ArchiveReceipt, ArchiveError> {
        let mut log = self.lock();
        log.archived.push(instance.name.clone());
        if let Some(message) = &log.failure {
            return Err(ArchiveError::Copy {
                program: "scp".to_owned(),
                remote: format!("root@{}:{}", instance.name, remote_paths.join(",")),
                status_text: "1".to_owned(),
                stderr: message.clone(),
            });
        }
        Ok(ArchiveReceipt {
            bundle: format!("logs/{}.tar.gz", instance.name).into(),
            key: format!("stack-logs/{}.tar.gz", instance.name),
            size: 1024,
        })
    }
}

/// Operations recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `list_instances_by_prefix(prefix)`.
    ListInstances(String),
    /// `resolve_image_id(snapshot_name)`.
    ResolveImage(String),
    /// `list_ssh_key_ids()`.
    ListSshKeys,
    /// `create_instance` with the requested name and key count.
    Create {
        /// Requested instance name.
        name: String,
        /// SSH keys requested.
        ssh_keys: Vec<String>,
    },
    /// `get_instance(id)`.
    GetInstance(InstanceId),
    /// `latest_action(instance)`.
    LatestAction(InstanceId),
    /// `action(id)`.
    PollAction(ActionId),
    /// `assign_floating_ip(ip, instance)`.
    AssignFloatingIp(IpAddr, InstanceId),
    /// `destroy_instance(instance)`.
    Destroy(InstanceId),
}

/// Provider operations [`FakeProvider`] can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum FailPoint {
    /// Listing instances.
    List,
    /// Resolving the snapshot.
    ResolveImage,
    /// Creating the instance.
    Create,
    /// Refreshing an instance.
    GetInstance,
    /// Assigning the floating IP.
    Assign,
    /// Destroying an instance.
    Destroy,
}

/// Error returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider: {0}")]
pub struct FakeProviderError(pub String);

#[derive(Clone, Debug)]
enum ActionScript {
    Statuses(VecDeque<ActionStatus>),
    Hang,
}

#[derive(Clone, Debug)]
struct FakeAction {
    action: PendingAction,
    instance: InstanceId,
}

#[derive(Debug, Default)]
struct FakeCloud {
    instances: Vec<Instance>,
    images: Vec<(String, ImageId)>,
    ssh_keys: Vec<String>,
    actions: Vec<FakeAction>,
    scripts: Vec<(ActionKind, ActionScript)>,
    failures: BTreeSet<FailPoint>,
    calls: Vec<ProviderCall>,
    floating_target: Option<InstanceId>,
    omit_public_address: bool,
    next_id: u32,
}

impl FakeCloud {
    fn fail_if(&self, point: FailPoint) -> Result<(), FakeProviderError> {
        if self.failures.contains(&point) {
            return Err(FakeProviderError(format!("{point:?} failed")));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn start_action(&mut self, kind: ActionKind, instance: &InstanceId) -> PendingAction {
        let action = PendingAction {
            id: ActionId::new(format!("act-{}", self.allocate_id())),
            kind,
            status: ActionStatus::InProgress,
        };
        self.actions.push(FakeAction {
            action: action.clone(),
            instance: instance.clone(),
        });
        action
    }

    fn next_status(&mut self, kind: &ActionKind) -> ActionStatus {
        match self
            .scripts
            .iter_mut()
            .find(|(scripted, _)| scripted == kind)
        {
            Some((_, ActionScript::Hang)) => ActionStatus::InProgress,
            Some((_, ActionScript::Statuses(queue))) => {
                queue.pop_front().unwrap_or(ActionStatus::Completed)
            }
            None => ActionStatus::Completed,
        }
    }

    fn poll(&mut self, id: &ActionId) -> Result<PendingAction, FakeProviderError> {
        let entry = self
            .actions
            .iter()
            .find(|entry| &entry.action.id == id)
            .cloned()
            .ok_or_else(|| FakeProviderError(format!("unknown action {id}")))?;
        if entry.action.status.is_terminal() {
            return Ok(entry.action);
        }
        let next = self.next_status(&entry.action.kind);
        if next == ActionStatus::Completed {
            self.complete(&entry.action.kind, &entry.instance);
        }
        if let Some(stored) = self.actions.iter_mut().find(|stored| &stored.action.id == id) {
            stored.action.status = next;
        }
        Ok(PendingAction {
            status: next,
            ..entry.action
        })
    }

    fn complete(&mut self, kind: &ActionKind, instance: &InstanceId) {
        match kind {
            ActionKind::Create => {
                let address = (!self.omit_public_address).then_some(NetworkAddress {
                    ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
                    kind: AddressKind::Public,
                });
                if let Some(created) = self.instances.iter_mut().find(|i| &i.id == instance) {
                    created.status = InstanceStatus::Active;
                    created.addresses.extend(address);
                }
            }
            ActionKind::AssignFloatingIp => self.floating_target = Some(instance.clone()),
            ActionKind::Destroy => self.instances.retain(|i| &i.id != instance),
            ActionKind::Other(_) => {}
        }
    }
}

/// In-memory provider with scripted action progress.
///
/// Instances use their name as identifier. Every action starts `in-progress`; each poll then takes the next status
/// scripted for its kind, defaulting to `completed`. A completed create
/// action gives the instance the public address `203.0.113.10`.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    cloud: Arc<std::sync::Mutex<FakeCloud>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a running instance and returns it.
    #[must_use]
    pub fn add_instance(&self, name: &str) -> Instance {
        let mut cloud = self.lock();
        let id = cloud.allocate_id();
        let last_octet = u8::try_from(id).unwrap_or(u8::MAX);
        let instance = Instance {
            id: InstanceId::new(name),
            name: name.to_owned(),
            status: InstanceStatus::Active,
            addresses: vec![NetworkAddress {
                ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, last_octet)),
                kind: AddressKind::Public,
            }],
            tags: vec!["stack".to_owned()],
            pending_actions: Vec::new(),
        };
        cloud.instances.push(instance.clone());
        instance
    }

    /// Registers a snapshot. Registering a name twice makes it ambiguous.
    pub fn add_image(&self, name: &str, id: &str) {
        self.lock().images.push((name.to_owned(), ImageId::new(id)));
    }

    /// Sets the account SSH keys.
    pub fn set_ssh_keys(&self, keys: &[&str]) {
        self.lock().ssh_keys = keys.iter().map(|key| (*key).to_owned()).collect();
    }

    /// Statuses returned by successive polls of actions of `kind`; once the
    /// script runs out polls report `completed`.
    pub fn script_action(&self, kind: ActionKind, statuses: impl IntoIterator<Item = ActionStatus>) {
        let script = ActionScript::Statuses(statuses.into_iter().collect());
        self.set_script(kind, script);
    }

    /// Leaves actions of `kind` in progress forever.
    pub fn hang_action(&self, kind: ActionKind) {
        self.set_script(kind, ActionScript::Hang);
    }

    /// Makes the given operation fail.
    pub fn fail_on(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    /// Created instances never receive a public address.
    pub fn omit_public_address(&self) {
        self.lock().omit_public_address = true;
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Position of the first call matching `predicate`.
    #[must_use]
    pub fn call_index(&self, predicate: impl Fn(&ProviderCall) -> bool) -> Option<usize> {
        self.lock().calls.iter().position(predicate)
    }

    /// Instances still alive.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        self.lock().instances.clone()
    }

    /// Instance the floating IP points at after completed assignments.
    #[must_use]
    pub fn floating_ip_target(&self) -> Option<InstanceId> {
        self.lock().floating_target.clone()
    }

    fn set_script(&self, kind: ActionKind, script: ActionScript) {
        let mut cloud = self.lock();
        cloud.scripts.retain(|(scripted, _)| scripted != &kind);
        cloud.scripts.push((kind, script));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeCloud> {
        self.cloud.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_cloud<T>(
        &self,
        call: ProviderCall,
        op: impl FnOnce(&mut FakeCloud) -> Result<T, FakeProviderError>,
    ) -> Result<T, FakeProviderError> {
        let mut cloud = self.lock();
        cloud.calls.push(call);
        op(&mut cloud)
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn list_instances_by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> ProviderFuture<'a, Vec<Instance>, Self::Error> {
        let result = self.with_cloud(ProviderCall::ListInstances(prefix.to_owned()), |cloud| {
            cloud.fail_if(FailPoint::List)?;
            Ok(cloud
                .instances
                .iter()
                .filter(|instance| instance.name.starts_with(prefix))
                .cloned()
                .collect())
        });
        Box::pin(async move { result })
    }

    fn resolve_image_id<'a>(
        &'a self,
        snapshot_name: &'a str,
    ) -> ProviderFuture<'a, ImageId, Self::Error> {
        let result = self.with_cloud(
            ProviderCall::ResolveImage(snapshot_name.to_owned()),
            |cloud| {
                cloud.fail_if(FailPoint::ResolveImage)?;
                let matches: Vec<&ImageId> = cloud
                    .images
                    .iter()
                    .filter(|(name, _)| name == snapshot_name)
                    .map(|(_, id)| id)
                    .collect();
                match matches.as_slice() {
                    [only] => Ok((*only).clone()),
                    other => Err(FakeProviderError(format!(
                        "{} snapshots named {snapshot_name}",
                        other.len()
                    ))),
                }
            },
        );
        Box::pin(async move { result })
    }

    fn list_ssh_key_ids(&self) -> ProviderFuture<'_, Vec<String>, Self::Error> {
        let result = self.with_cloud(ProviderCall::ListSshKeys, |cloud| Ok(cloud.ssh_keys.clone()));
        Box::pin(async move { result })
    }

    fn create_instance<'a>(
        &'a self,
        request: &'a CreateInstanceRequest,
    ) -> ProviderFuture<'a, Instance, Self::Error> {
        let call = ProviderCall::Create {
            name: request.name.clone(),
            ssh_keys: request.ssh_keys.clone(),
        };
        let result = self.with_cloud(call, |cloud| {
            cloud.fail_if(FailPoint::Create)?;
            let id = InstanceId::new(request.name.clone());
            let action = cloud.start_action(ActionKind::Create, &id);
            let instance = Instance {
                id,
                name: request.name.clone(),
                status: InstanceStatus::Pending,
                addresses: Vec::new(),
                tags: request.tags.clone(),
                pending_actions: vec![action],
            };
            cloud.instances.push(instance.clone());
            Ok(instance)
        });
        Box::pin(async move { result })
    }

    fn get_instance<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, Instance, Self::Error> {
        let result = self.with_cloud(ProviderCall::GetInstance(id.clone()), |cloud| {
            cloud.fail_if(FailPoint::GetInstance)?;
            cloud
                .instances
                .iter()
                .find(|instance| &instance.id == id)
                .cloned()
                .ok_or_else(|| FakeProviderError(format!("instance {id} not found")))
        });
        Box::pin(async move { result })
    }

    fn latest_action<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        let result = self.with_cloud(ProviderCall::LatestAction(instance.id.clone()), |cloud| {
            cloud
                .actions
                .iter()
                .rev()
                .find(|entry| entry.instance == instance.id)
                .map(|entry| entry.action.clone())
                .ok_or_else(|| FakeProviderError(format!("no actions for {}", instance.id)))
        });
        Box::pin(async move { result })
    }

    fn action<'a>(&'a self, id: &'a ActionId) -> ProviderFuture<'a, PendingAction, Self::Error> {
        let result = self.with_cloud(ProviderCall::PollAction(id.clone()), |cloud| cloud.poll(id));
        Box::pin(async move { result })
    }

    fn assign_floating_ip<'a>(
        &'a self,
        ip: IpAddr,
        instance_id: &'a InstanceId,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        let result = self.with_cloud(
            ProviderCall::AssignFloatingIp(ip, instance_id.clone()),
            |cloud| {
                cloud.fail_if(FailPoint::Assign)?;
                Ok(cloud.start_action(ActionKind::AssignFloatingIp, instance_id))
            },
        );
        Box::pin(async move { result })
    }

    fn destroy_instance<'a>(
        &'a self,
        instance: &'a Instance,
    ) -> ProviderFuture<'a, PendingAction, Self::Error> {
        let result = self.with_cloud(ProviderCall::Destroy(instance.id.clone()), |cloud| {
            cloud.fail_if(FailPoint::Destroy)?;
            Ok(cloud.start_action(ActionKind::Destroy, &instance.id))
        });
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (or, for `None`, removes) environment variables while holding a
    /// global mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
