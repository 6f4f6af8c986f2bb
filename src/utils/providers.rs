//! `backend:provider` selection strings and provider availability

use crate::{
    config::{BackendType, ExecutionProvider},
    error::{BgCleanError, Result},
};

/// One selectable backend/provider combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse `backend[:provider]`, e.g. `onnx:auto`, `onnx:cuda`, `tract:cpu` or `tract`
    ///
    /// # Errors
    /// - Unknown backend or provider name
    /// - A provider the backend cannot use (Tract is CPU only)
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let lowered = provider_str.trim().to_lowercase();
        let (backend, provider) = match lowered.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (lowered.as_str(), None),
        };

        let backend_type = match backend {
            "onnx" => BackendType::Onnx,
            "tract" => BackendType::Tract,
            other => {
                return Err(BgCleanError::invalid_config(format!(
                    "Unknown backend: {other}. Supported backends: onnx, tract"
                )))
            },
        };

        let Some(provider) = provider else {
            return Ok((backend_type, Self::default_provider_for_backend(backend_type)));
        };

        let execution_provider = match (backend_type, provider) {
            (BackendType::Onnx, "auto") => ExecutionProvider::Auto,
            (_, "cpu") => ExecutionProvider::Cpu,
            (BackendType::Onnx, "cuda") => ExecutionProvider::Cuda,
            (BackendType::Onnx, "coreml") => ExecutionProvider::CoreMl,
            (BackendType::Onnx, other) => {
                return Err(BgCleanError::invalid_config(format!(
                    "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
                )))
            },
            (BackendType::Tract, other) => {
                return Err(BgCleanError::invalid_config(format!(
                    "Unknown Tract provider: {other}. Tract only supports 'cpu'"
                )))
            },
        };

        Ok((backend_type, execution_provider))
    }

    #[must_use]
    pub fn default_provider_for_backend(backend_type: BackendType) -> ExecutionProvider {
        match backend_type {
            BackendType::Onnx => ExecutionProvider::Auto,
            BackendType::Tract => ExecutionProvider::Cpu,
        }
    }

    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }

    /// Every combination with its availability on this machine and build
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        let onnx: Vec<(String, bool)> = crate::backends::OnnxBackend::list_providers()
            .into_iter()
            .map(|(name, available, _)| (name.to_lowercase(), available))
            .collect();
        #[cfg(not(feature = "onnx"))]
        let onnx: Vec<(String, bool)> = Vec::new();

        let onnx_available = |name: &str| onnx.iter().any(|(n, a)| n == name && *a);
        let suffix = if cfg!(feature = "onnx") { "" } else { " (feature disabled)" };

        for (provider, available, description) in [
            (
                ExecutionProvider::Auto,
                onnx.iter().any(|(_, a)| *a),
                "ONNX Runtime with auto-selected provider",
            ),
            (ExecutionProvider::Cpu, onnx_available("cpu"), "ONNX Runtime CPU execution"),
            (
                ExecutionProvider::Cuda,
                onnx_available("cuda"),
                "ONNX Runtime CUDA GPU acceleration",
            ),
            (
                ExecutionProvider::CoreMl,
                onnx_available("coreml"),
                "ONNX Runtime CoreML (Apple Silicon) acceleration",
            ),
        ] {
            providers.push(ProviderInfo {
                name: Self::provider_to_string(BackendType::Onnx, provider),
                backend_type: BackendType::Onnx,
                execution_provider: provider,
                available,
                description: format!("{description}{suffix}"),
            });
        }

        #[cfg(feature = "tract")]
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            providers.push(ProviderInfo {
                name: format!("tract:{}", name.to_lowercase()),
                backend_type: BackendType::Tract,
                execution_provider: ExecutionProvider::Cpu,
                available,
                description,
            });
        }

        #[cfg(not(feature = "tract"))]
        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: false,
            description: "Pure Rust CPU inference via Tract (feature disabled)".to_string(),
        });

        providers
    }
}
