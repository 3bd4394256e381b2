mod client;
mod types;

pub use client::{CreateDeploymentOptions, DeploymentBackend, KubeClient};
pub use types::{EventObject, EventSchema, IMAGE_PULLED, NotificationEvent};
