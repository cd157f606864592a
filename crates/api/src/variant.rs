//! Community / enterprise variant selection.

use std::sync::Arc;

use serde::Serialize;

use crate::auth::controller::{AuthController, AuthPolicy, JwtAuthController};
use crate::builder::{BuilderFactory, ProjectApiBuilderFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Community,
    Enterprise,
}

impl Variant {
    /// The one place the `EE` flag is interpreted.
    pub fn from_flag(ee: bool) -> Self {
        if ee {
            Variant::Enterprise
        } else {
            Variant::Community
        }
    }

    pub fn auth_policy(self) -> AuthPolicy {
        match self {
            Variant::Community => AuthPolicy::Optional,
            Variant::Enterprise => AuthPolicy::Required,
        }
    }
}

/// Capability implementations chosen for a variant.
#[derive(Clone)]
pub struct Components {
    pub variant: Variant,
    pub builder_factory: Arc<dyn BuilderFactory>,
    pub auth: Arc<dyn AuthController>,
}

impl Components {
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            builder_factory: Arc::new(ProjectApiBuilderFactory::new(variant)),
            auth: Arc::new(JwtAuthController::new(variant.auth_policy())),
        }
    }

    /// Swap the builder factory, keeping the variant's auth controller.
    pub fn with_builder_factory(mut self, factory: Arc<dyn BuilderFactory>) -> Self {
        self.builder_factory = factory;
        self
    }
}
