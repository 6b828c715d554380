//! Interface to the management console client.
//!
//! The client itself (session handling, transport, re-authentication) lives
//! outside this crate. Everything the cache, listener, scheduler and collector
//! need from it goes through [`ConsoleClient`].

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::ConsoleError;
use crate::PropertyMap;
use crate::PropertyValue;
use crate::ResourceClass;
use crate::ResourceRecord;
use crate::ResourceUri;

pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;

/// Systems a console call is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetScope {
    /// CPC names; empty means every CPC managed by the console
    pub cpcs: Vec<String>,
}

impl TargetScope {
    pub fn includes(
        &self,
        cpc_name: &str,
    ) -> bool {
        self.cpcs.is_empty() || self.cpcs.iter().any(|c| c == cpc_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// A pushed change of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub uri: ResourceUri,
    pub class: ResourceClass,
    /// Parent URI, carried by create events
    pub parent: Option<ResourceUri>,
    /// Changed properties (update) or initial properties (create)
    pub properties: PropertyMap,
}

impl ChangeEvent {
    pub fn create(
        uri: impl Into<ResourceUri>,
        class: ResourceClass,
        parent: Option<ResourceUri>,
        properties: PropertyMap,
    ) -> Self {
        Self {
            kind: ChangeKind::Create,
            uri: uri.into(),
            class,
            parent,
            properties,
        }
    }

    pub fn update(
        uri: impl Into<ResourceUri>,
        class: ResourceClass,
        properties: PropertyMap,
    ) -> Self {
        Self {
            kind: ChangeKind::Update,
            uri: uri.into(),
            class,
            parent: None,
            properties,
        }
    }

    pub fn delete(
        uri: impl Into<ResourceUri>,
        class: ResourceClass,
    ) -> Self {
        Self {
            kind: ChangeKind::Delete,
            uri: uri.into(),
            class,
            parent: None,
            properties: PropertyMap::new(),
        }
    }
}

/// Item delivered on the push-notification channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationMessage {
    Change(ChangeEvent),
    /// Transport lost; every subscription made so far is void
    Disconnected(String),
}

/// One set of metric service values, usually belonging to one resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricSample {
    pub group: String,
    pub resource: Option<ResourceUri>,
    pub values: BTreeMap<String, PropertyValue>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsoleClient: Send + Sync + 'static {
    /// Bulk listing of the resources of one class within the scope.
    /// Resources the user cannot see are simply absent.
    async fn list_resources(
        &self,
        class: ResourceClass,
        scope: &TargetScope,
    ) -> ConsoleResult<Vec<ResourceRecord>>;

    /// Named properties of one resource.
    async fn fetch_properties(
        &self,
        uri: &ResourceUri,
        names: &[String],
    ) -> ConsoleResult<PropertyMap>;

    /// Named properties of every resource of a class within the scope, in one
    /// narrow call.
    async fn poll_properties(
        &self,
        class: ResourceClass,
        scope: &TargetScope,
        names: &[String],
    ) -> ConsoleResult<Vec<(ResourceUri, PropertyMap)>>;

    /// Subscribe to change notifications of one resource.
    async fn register_interest(
        &self,
        uri: &ResourceUri,
    ) -> ConsoleResult<()>;

    /// Open a fresh notification channel. Any earlier channel is abandoned.
    async fn open_notifications(&self) -> ConsoleResult<mpsc::Receiver<NotificationMessage>>;

    /// Drop all subscriptions and close the channel.
    async fn close_notifications(&self) -> ConsoleResult<()>;

    /// Current metric service values of the given groups.
    async fn fetch_metric_values(
        &self,
        groups: &[String],
    ) -> ConsoleResult<Vec<MetricSample>>;
}
