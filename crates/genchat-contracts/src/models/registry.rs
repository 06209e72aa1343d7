use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One supported generation or edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ImageGeneration,
    ImageEdit,
    VideoGeneration,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::ImageGeneration,
        Capability::ImageEdit,
        Capability::VideoGeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageGeneration => "image_generation",
            Self::ImageEdit => "image_edit",
            Self::VideoGeneration => "video_generation",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse speed/quality selector. Passed by value with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    #[default]
    Fast,
    Pro,
}

impl PerformanceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Pro => "pro",
        }
    }
}

impl std::fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "pro" => Ok(Self::Pro),
            other => Err(format!(
                "Unknown performance mode '{other}' (expected 'fast' or 'pro')."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub capability: Capability,
    /// `None` applies to every mode.
    pub mode: Option<PerformanceMode>,
    /// `None` is the mode's default route.
    pub category: Option<String>,
    pub model_id: String,
}

/// Static `(capability, mode, category) -> model id` table with a designated
/// default per capability.
#[derive(Debug, Clone)]
pub struct ModelTable {
    routes: IndexMap<String, ModelRoute>,
    defaults: IndexMap<Capability, String>,
}

impl ModelTable {
    pub fn new(routes: Option<Vec<ModelRoute>>) -> Self {
        let mut table = Self {
            routes: IndexMap::new(),
            defaults: default_capability_models(),
        };
        for route in routes.unwrap_or_else(default_routes) {
            table.insert(route);
        }
        table
    }

    pub fn insert(&mut self, route: ModelRoute) {
        let key = route_key(route.capability, route.mode, route.category.as_deref());
        self.routes.insert(key, route);
    }

    pub fn set_default(&mut self, capability: Capability, model_id: impl Into<String>) {
        self.defaults.insert(capability, model_id.into());
    }

    pub fn get(
        &self,
        capability: Capability,
        mode: Option<PerformanceMode>,
        category: Option<&str>,
    ) -> Option<&ModelRoute> {
        self.routes.get(&route_key(capability, mode, category))
    }

    pub fn default_for(&self, capability: Capability) -> &str {
        self.defaults
            .get(&capability)
            .map(String::as_str)
            .unwrap_or(FALLBACK_MODEL_ID)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelRoute> {
        self.routes.values()
    }

    pub fn categories(&self, capability: Capability) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for route in self.routes.values() {
            if route.capability != capability {
                continue;
            }
            if let Some(category) = route.category.as_ref() {
                if !out.contains(category) {
                    out.push(category.clone());
                }
            }
        }
        out
    }
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::new(None)
    }
}

const FALLBACK_MODEL_ID: &str = "fal-ai/nano-banana";

fn route_key(
    capability: Capability,
    mode: Option<PerformanceMode>,
    category: Option<&str>,
) -> String {
    format!(
        "{}:{}:{}",
        capability.as_str(),
        mode.map(PerformanceMode::as_str).unwrap_or("*"),
        category.unwrap_or("*")
    )
}

fn default_capability_models() -> IndexMap<Capability, String> {
    let mut map = IndexMap::new();
    map.insert(Capability::ImageGeneration, "fal-ai/nano-banana".to_string());
    map.insert(Capability::ImageEdit, "fal-ai/nano-banana/edit".to_string());
    map.insert(
        Capability::VideoGeneration,
        "fal-ai/luma-dream-machine".to_string(),
    );
    map
}

fn default_routes() -> Vec<ModelRoute> {
    let mut routes = Vec::new();
    let mut push = |capability: Capability,
                    mode: Option<PerformanceMode>,
                    category: Option<&str>,
                    model_id: &str| {
        routes.push(ModelRoute {
            capability,
            mode,
            category: category.map(str::to_string),
            model_id: model_id.to_string(),
        });
    };

    use Capability::{ImageEdit, ImageGeneration, VideoGeneration};
    use PerformanceMode::{Fast, Pro};

    push(
        ImageGeneration,
        Some(Fast),
        None,
        "fal-ai/gemini-25-flash-image",
    );
    push(ImageGeneration, Some(Pro), None, "fal-ai/flux-pro/v1.1-ultra");
    push(VideoGeneration, Some(Fast), None, "fal-ai/veo3/fast");
    push(VideoGeneration, Some(Pro), None, "fal-ai/veo3");
    push(ImageEdit, Some(Fast), None, "fal-ai/nano-banana/edit");
    push(ImageEdit, Some(Pro), None, "fal-ai/nano-banana/edit");

    push(ImageGeneration, None, Some("nano-banana"), "fal-ai/nano-banana");
    push(ImageGeneration, None, Some("flux-schnell"), "fal-ai/flux/schnell");
    push(ImageGeneration, None, Some("flux-pro"), "fal-ai/flux-pro");
    push(VideoGeneration, None, Some("luma"), "fal-ai/luma-dream-machine");
    push(
        ImageEdit,
        None,
        Some("flux-dev"),
        "fal-ai/flux/dev/image-to-image",
    );

    routes
}
