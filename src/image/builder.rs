use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::core::docker_manager::{ContainerEngine, EngineError};
use crate::errors::{CntrError, CntrResult};
use crate::utils::parse_target_ref;

pub const RECIPE_FILE: &str = "Dockerfile";

const RECIPE_TEMPLATE: &str = r#"FROM {{BASE}}
RUN apt-get update -y \
	&& apt-get install -y --no-install-recommends containerd \
	&& apt-get clean -y \
	&& rm -rf \
		/var/cache/debconf/* \
		/var/lib/apt/lists/* \
		/var/log/* \
		/tmp/* \
		/var/tmp/* \
		/usr/share/doc/* \
		/usr/share/man/* \
		/usr/share/local/*
"#;

/// One base image build: where from, what to tag, and the recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub base_image: String,
    pub target_image: String,
    pub recipe: Vec<u8>,
}

impl BuildSpec {
    /// The containerd base recipe on top of `base_image`.
    pub fn from_template(base_image: &str, target_image: &str) -> Self {
        Self {
            base_image: base_image.to_string(),
            target_image: target_image.to_string(),
            recipe: render_recipe(base_image).into_bytes(),
        }
    }
}

pub fn render_recipe(base_image: &str) -> String {
    RECIPE_TEMPLATE.replace("{{BASE}}", base_image)
}

/// A tar build context holding the recipe and nothing else.
pub fn build_context(recipe: &[u8]) -> std::io::Result<Vec<u8>> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut header = tar::Header::new_gnu();
    header.set_size(recipe.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, RECIPE_FILE, recipe)?;
    archive.into_inner()
}

pub struct ImageBuilder {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageBuilder {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Build and tag `spec.target_image`. Re-using a tag moves it to the new image.
    pub async fn build(&self, spec: &BuildSpec) -> CntrResult<String> {
        parse_target_ref(&spec.target_image)?;
        self.engine
            .ping()
            .await
            .map_err(|e| CntrError::EngineUnavailable(e.to_string()))?;

        let context = build_context(&spec.recipe)?;
        info!(
            base = %spec.base_image,
            target = %spec.target_image,
            context_bytes = context.len(),
            "Building base image"
        );

        match self.engine.build_image(context, &spec.target_image).await {
            Ok(log) => {
                info!(steps = log.len(), "✓ Base image built: {}", spec.target_image);
                Ok(spec.target_image.clone())
            }
            Err(EngineError::Unavailable(message)) => Err(CntrError::EngineUnavailable(message)),
            Err(EngineError::Request(message)) => Err(CntrError::BuildFailed(message)),
        }
    }
}
