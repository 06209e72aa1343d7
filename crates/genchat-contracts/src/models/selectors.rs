use super::registry::{Capability, ModelTable, PerformanceMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model_id: String,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub table: ModelTable,
}

impl ModelSelector {
    pub fn new(table: Option<ModelTable>) -> Self {
        Self {
            table: table.unwrap_or_default(),
        }
    }

    /// Resolves the backing model for a capability. An unset category takes
    /// the mode route; an unknown one falls back to the capability default.
    /// This never fails.
    pub fn select(
        &self,
        capability: Capability,
        mode: PerformanceMode,
        category: Option<&str>,
    ) -> ModelSelection {
        let requested = category
            .map(str::trim)
            .map(str::to_ascii_lowercase)
            .filter(|value| !value.is_empty() && !matches!(value.as_str(), "default" | "auto"));

        if let Some(category) = requested.as_deref() {
            let route = self
                .table
                .get(capability, Some(mode), Some(category))
                .or_else(|| self.table.get(capability, None, Some(category)));
            let (model_id, fallback_reason) = match route {
                Some(route) => (route.model_id.clone(), None),
                None => (
                    self.table.default_for(capability).to_string(),
                    Some(format!(
                        "Requested model '{category}' unavailable for capability \
                         '{capability}'; using capability default."
                    )),
                ),
            };
            return ModelSelection {
                model_id,
                requested,
                fallback_reason,
            };
        }

        let mode_default = self
            .table
            .get(capability, Some(mode), None)
            .or_else(|| self.table.get(capability, None, None));
        match mode_default {
            Some(route) => ModelSelection {
                model_id: route.model_id.clone(),
                requested: None,
                fallback_reason: None,
            },
            None => ModelSelection {
                model_id: self.table.default_for(capability).to_string(),
                requested: None,
                fallback_reason: Some(format!(
                    "No {mode} route for capability '{capability}'; using capability default."
                )),
            },
        }
    }
}
