use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

use super::types::EventSchema;
use crate::run::{WorkloadBackend, WorkloadSpec};

/// API group serving the structured events API
const EVENTS_GROUP: &str = "events.k8s.io";

/// Options for creating the measurement deployment
#[derive(Debug, Clone)]
pub struct CreateDeploymentOptions {
  pub name: String,
  pub namespace: String,
  pub image: String,
  pub replicas: i32,
  /// Value of the `app` label shared by the selector and the pod template
  pub app_label: String,
}

impl CreateDeploymentOptions {
  /// Options for a run's workload. The workload name doubles as the `app`
  /// label so concurrent runs never select each other's pods.
  pub fn for_workload(spec: &WorkloadSpec, namespace: impl Into<String>) -> Result<Self> {
    Ok(Self {
      name: spec.name.clone(),
      namespace: namespace.into(),
      image: spec.image.clone(),
      replicas: i32::try_from(spec.replicas).context("Replica count out of range")?,
      app_label: spec.name.clone(),
    })
  }

  /// Build the Deployment manifest.
  ///
  /// Pods always pull the image and then idle so that every replica reports
  /// exactly one pull.
  pub fn to_deployment(&self) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), self.app_label.clone())]);

    Deployment {
      metadata: ObjectMeta {
        name: Some(self.name.clone()),
        namespace: Some(self.namespace.clone()),
        labels: Some(labels.clone()),
        ..Default::default()
      },
      spec: Some(DeploymentSpec {
        replicas: Some(self.replicas),
        selector: LabelSelector {
          match_labels: Some(labels.clone()),
          ..Default::default()
        },
        template: PodTemplateSpec {
          metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
          }),
          spec: Some(PodSpec {
            containers: vec![Container {
              name: "pullbench".to_string(),
              image: Some(self.image.clone()),
              image_pull_policy: Some("Always".to_string()),
              command: Some(vec!["sleep".to_string()]),
              args: Some(vec!["36000".to_string()]),
              ..Default::default()
            }],
            ..Default::default()
          }),
        },
        ..Default::default()
      }),
      ..Default::default()
    }
  }
}

/// Thin wrapper around a kube client built from an explicit kubeconfig
#[derive(Clone)]
pub struct KubeClient {
  client: Client,
}

impl KubeClient {
  /// Load the current context of the kubeconfig at `path`
  pub async fn load_config(path: &Path) -> Result<Config> {
    let kubeconfig =
      Kubeconfig::read_from(path).with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
      .await
      .context("Invalid kubeconfig")
  }

  pub fn from_config(config: Config) -> Result<Self> {
    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    Ok(Self { client })
  }

  pub fn client(&self) -> Client {
    self.client.clone()
  }

  /// Discover which event schema the cluster prefers
  pub async fn event_schema(&self) -> Result<EventSchema> {
    let groups = self.client.list_api_groups().await.context("Failed to list API groups")?;

    let preferred = groups
      .groups
      .iter()
      .find(|g| g.name == EVENTS_GROUP)
      .and_then(|g| g.preferred_version.as_ref())
      .map(|v| v.version.as_str());

    Ok(EventSchema::from_preferred_version(preferred))
  }

  /// Create a deployment and return its name
  pub async fn create_deployment(&self, options: &CreateDeploymentOptions) -> Result<String> {
    let api: Api<Deployment> = Api::namespaced(self.client.clone(), &options.namespace);
    let created = api
      .create(&PostParams::default(), &options.to_deployment())
      .await
      .with_context(|| format!("Failed to create deployment '{}'", options.name))?;

    Ok(created.metadata.name.unwrap_or_else(|| options.name.clone()))
  }

  /// Delete a deployment, letting the garbage collector remove its pods
  pub async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
    api
      .delete(name, &DeleteParams::background())
      .await
      .with_context(|| format!("Failed to delete deployment '{name}'"))?;
    Ok(())
  }
}

/// Workload backend that runs the measured image as a Deployment
#[derive(Clone)]
pub struct DeploymentBackend {
  client: KubeClient,
  namespace: String,
}

impl DeploymentBackend {
  pub fn new(client: KubeClient, namespace: impl Into<String>) -> Self {
    Self {
      client,
      namespace: namespace.into(),
    }
  }
}

impl WorkloadBackend for DeploymentBackend {
  async fn create_workload(&self, spec: &WorkloadSpec) -> Result<String> {
    let options = CreateDeploymentOptions::for_workload(spec, self.namespace.clone())?;
    self.client.create_deployment(&options).await
  }

  async fn delete_workload(&self, id: &str) -> Result<()> {
    self.client.delete_deployment(id, &self.namespace).await
  }
}
